use crate::db::{self, ENROLLMENT_STATUSES};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_i64, required_i64};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const BULK_ENROLL_MAX_STUDENTS: usize = 500;

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match optional_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match optional_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::enrollments_for(conn, student_id, course_id) {
        Ok(rows) => ok(&req.id, json!({ "enrollments": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_enrollments_bulk_enroll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw_ids) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "studentIds must be an array", None);
    };
    if raw_ids.len() > BULK_ENROLL_MAX_STUDENTS {
        return err(
            &req.id,
            "bad_params",
            "too many students in one batch",
            Some(json!({ "count": raw_ids.len(), "max": BULK_ENROLL_MAX_STUDENTS })),
        );
    }
    match db::course_get(conn, course_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return err(&req.id, "not_found", "course not found", Some(json!({ "courseId": course_id })))
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut student_ids: Vec<i64> = Vec::with_capacity(raw_ids.len());
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for (index, raw) in raw_ids.iter().enumerate() {
        let Some(sid) = raw.as_i64() else {
            errors.push(json!({
                "index": index,
                "code": "bad_params",
                "message": "studentId must be an integer"
            }));
            continue;
        };
        match db::student_exists(conn, sid) {
            Ok(true) => student_ids.push(sid),
            Ok(false) => errors.push(json!({
                "index": index,
                "code": "not_found",
                "message": format!("student {} not found", sid)
            })),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let outcome = match db::enroll_many(conn, course_id, &student_ids) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_insert_failed", format!("{e:#}"), None),
    };
    tracing::info!(
        course_id,
        enrolled = outcome.enrolled.len(),
        skipped = outcome.already_enrolled.len(),
        rejected = errors.len(),
        "enrollments.bulkEnroll"
    );
    let mut result = json!({
        "courseId": course_id,
        "enrolled": outcome.enrolled,
        "alreadyEnrolled": outcome.already_enrolled,
        "rejected": errors.len(),
    });
    if !errors.is_empty() {
        result["errors"] = json!(errors);
    }
    ok(&req.id, result)
}

fn handle_enrollments_is_enrolled(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::enrollment_is_active(conn, student_id, course_id) {
        Ok(enrolled) => ok(&req.id, json!({ "enrolled": enrolled })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_enrollments_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_i64(req, "enrollmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match req.params.get("status").and_then(|v| v.as_str()) {
        Some(s) if ENROLLMENT_STATUSES.contains(&s.trim().to_ascii_lowercase().as_str()) => {
            s.trim().to_ascii_lowercase()
        }
        _ => {
            return err(
                &req.id,
                "bad_params",
                format!("status must be one of: {}", ENROLLMENT_STATUSES.join(", ")),
                None,
            )
        }
    };
    match db::enrollment_set_status(conn, id, &status) {
        Ok(Some(e)) => ok(&req.id, json!({ "enrollment": e })),
        Ok(None) => err(
            &req.id,
            "not_found",
            "enrollment not found",
            Some(json!({ "enrollmentId": id })),
        ),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        "enrollments.bulkEnroll" => Some(handle_enrollments_bulk_enroll(state, req)),
        "enrollments.isEnrolled" => Some(handle_enrollments_is_enrolled(state, req)),
        "enrollments.setStatus" => Some(handle_enrollments_set_status(state, req)),
        _ => None,
    }
}
