use crate::db::{self, StudentFields};
use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, optional_i64, optional_str, params_object, patch_enum, patch_i64, patch_str,
    required_i64,
};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, StudentFilter};
use serde_json::json;

const STUDENT_STATUSES: &[&str] = &["active", "inactive", "graduated", "suspended"];

fn parse_student_fields(
    obj: &serde_json::Map<String, serde_json::Value>,
) -> Result<StudentFields, String> {
    for k in obj.keys() {
        match k.as_str() {
            "firstName" | "lastName" | "email" | "phone" | "dateOfBirth" | "enrollmentDate"
            | "year" | "status" | "address" => {}
            "courseIds" => {
                return Err("courseIds follow enrollments; use enrollments.bulkEnroll".into())
            }
            "gpa" => return Err("gpa is derived from grades and cannot be set".into()),
            _ => return Err(format!("unknown student field: {}", k)),
        }
    }
    Ok(StudentFields {
        first_name: patch_str(obj, "firstName", true)?,
        last_name: patch_str(obj, "lastName", true)?,
        email: patch_str(obj, "email", false)?,
        phone: patch_str(obj, "phone", false)?,
        date_of_birth: patch_date(obj, "dateOfBirth")?,
        enrollment_date: patch_date(obj, "enrollmentDate")?,
        year: patch_i64(obj, "year", 1, 10)?,
        status: patch_enum(obj, "status", STUDENT_STATUSES)?,
        address: patch_str(obj, "address", false)?,
    })
}

/// Dates are stored as given but must read as `YYYY-MM-DD` (or be blank).
fn patch_date(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<String>, String> {
    let v = patch_str(obj, key, false)?;
    if let Some(d) = v.as_deref().filter(|d| !d.is_empty()) {
        if chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").is_err() {
            return Err(format!("{} must be a YYYY-MM-DD date", key));
        }
    }
    Ok(v)
}

fn parse_student_filter(req: &Request) -> Result<StudentFilter, serde_json::Value> {
    Ok(StudentFilter {
        search: optional_str(req, "search")?,
        year: optional_i64(req, "year")?,
        status: optional_str(req, "status")?.map(|s| s.to_ascii_lowercase()),
        course_id: optional_i64(req, "courseId")?,
    })
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let filter = match parse_student_filter(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    match db::students_list(conn) {
        Ok(students) => ok(
            &req.id,
            json!({ "students": report::filter_students(&students, &filter) }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::student_get(conn, id) {
        Ok(Some(s)) => ok(&req.id, json!({ "student": s })),
        Ok(None) => err(&req.id, "not_found", "student not found", Some(json!({ "studentId": id }))),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let obj = match params_object(req, None) {
        Ok(o) => o,
        Err(e) => return e,
    };
    let fields = match parse_student_fields(obj) {
        Ok(f) => f,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    if fields.first_name.is_none() || fields.last_name.is_none() {
        return err(&req.id, "bad_params", "firstName and lastName are required", None);
    }
    match db::student_insert(conn, &fields) {
        Ok(id) => ok(&req.id, json!({ "studentId": id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match params_object(req, Some("patch")) {
        Ok(o) => o,
        Err(e) => return e,
    };
    let fields = match parse_student_fields(patch) {
        Ok(f) => f,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    match db::student_update(conn, id, &fields) {
        Ok(true) => ok(&req.id, json!({ "ok": true })),
        Ok(false) => err(&req.id, "not_found", "student not found", Some(json!({ "studentId": id }))),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::student_delete(conn, id) {
        Ok(true) => ok(&req.id, json!({ "ok": true })),
        Ok(false) => err(&req.id, "not_found", "student not found", Some(json!({ "studentId": id }))),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

/// GPA straight from the student's stored grades; also refreshes the cached value.
fn handle_students_gpa(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::student_exists(conn, id) {
        Ok(true) => {}
        Ok(false) => {
            return err(&req.id, "not_found", "student not found", Some(json!({ "studentId": id })))
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let entries = match db::student_gpa_entries(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let gpa = match db::refresh_student_gpa(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    let credits = entries
        .iter()
        .filter(|e| e.credits > 0)
        .fold(0i64, |acc, e| acc.saturating_add(e.credits));
    ok(
        &req.id,
        json!({
            "studentId": id,
            "gpa": gpa,
            "standing": grading::gpa_standing(gpa),
            "credits": credits,
            "courseCount": entries.len()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.gpa" => Some(handle_students_gpa(state, req)),
        _ => None,
    }
}
