use crate::db::{self, CourseFields};
use crate::grading::MAX_CREDITS;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, params_object, patch_enum, patch_i64, patch_str, required_i64};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const COURSE_STATUSES: &[&str] = &["active", "inactive", "completed"];

fn parse_course_fields(
    obj: &serde_json::Map<String, serde_json::Value>,
) -> Result<CourseFields, String> {
    for k in obj.keys() {
        match k.as_str() {
            "code" | "name" | "description" | "credits" | "department" | "semester"
            | "schedule" | "room" | "capacity" | "enrollmentCount" | "status" => {}
            _ => return Err(format!("unknown course field: {}", k)),
        }
    }
    Ok(CourseFields {
        code: patch_str(obj, "code", true)?,
        name: patch_str(obj, "name", true)?,
        description: patch_str(obj, "description", false)?,
        credits: patch_i64(obj, "credits", 1, MAX_CREDITS)?,
        department: patch_str(obj, "department", false)?,
        semester: patch_str(obj, "semester", false)?,
        schedule: patch_str(obj, "schedule", false)?,
        room: patch_str(obj, "room", false)?,
        capacity: patch_i64(obj, "capacity", 0, i64::from(u32::MAX))?,
        enrollment_count: patch_i64(obj, "enrollmentCount", 0, i64::from(u32::MAX))?,
        status: patch_enum(obj, "status", COURSE_STATUSES)?,
    })
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match db::courses_list(conn) {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::course_get(conn, id) {
        Ok(Some(c)) => {
            let fill_rate = if c.capacity > 0 {
                Some(100.0 * (c.enrollment_count as f64) / (c.capacity as f64))
            } else {
                None
            };
            ok(&req.id, json!({ "course": c, "fillRatePercent": fill_rate }))
        }
        Ok(None) => err(&req.id, "not_found", "course not found", Some(json!({ "courseId": id }))),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let obj = match params_object(req, None) {
        Ok(o) => o,
        Err(e) => return e,
    };
    let fields = match parse_course_fields(obj) {
        Ok(f) => f,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    if fields.code.is_none() || fields.name.is_none() {
        return err(&req.id, "bad_params", "code and name are required", None);
    }
    match db::course_insert(conn, &fields) {
        Ok(id) => ok(&req.id, json!({ "courseId": id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match params_object(req, Some("patch")) {
        Ok(o) => o,
        Err(e) => return e,
    };
    let fields = match parse_course_fields(patch) {
        Ok(f) => f,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    match db::course_update(conn, id, &fields) {
        Ok(true) => ok(&req.id, json!({ "ok": true })),
        Ok(false) => err(&req.id, "not_found", "course not found", Some(json!({ "courseId": id }))),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::course_delete(conn, id) {
        Ok(Some(affected)) => ok(&req.id, json!({ "ok": true, "affectedStudentIds": affected })),
        Ok(None) => err(&req.id, "not_found", "course not found", Some(json!({ "courseId": id }))),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.get" => Some(handle_courses_get(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        _ => None,
    }
}
