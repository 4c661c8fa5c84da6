use crate::db::{self, Course};
use crate::grading::{self, GpaEntry, MAX_CREDITS};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::{self, GradingSettings};
use crate::ipc::helpers::{db_conn, optional_i64, params_object, required_f64, required_i64};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{
    reconcile, reconcile_with, FieldUpdate, InsertDefaults, ReconcileError, ScoreRecord,
    ScoreUpdate,
};
use rusqlite::Connection;
use serde_json::json;

const BULK_UPDATE_MAX_UPDATES: usize = 5000;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(code: &'static str, e: anyhow::Error) -> HandlerErr {
    HandlerErr {
        code,
        message: e.to_string(),
        details: None,
    }
}

fn duplicate_err(e: ReconcileError) -> HandlerErr {
    let (student_id, course_id, count) = match &e {
        ReconcileError::DuplicateRecord {
            student_id,
            course_id,
            count,
        } => (*student_id, *course_id, *count),
    };
    tracing::warn!(student_id, course_id, count, "duplicate grade records in store");
    HandlerErr {
        code: "duplicate_record",
        message: e.to_string(),
        details: Some(json!({
            "studentId": student_id,
            "courseId": course_id,
            "count": count
        })),
    }
}

fn load_course(conn: &Connection, course_id: i64) -> Result<Course, HandlerErr> {
    db::course_get(conn, course_id)
        .map_err(|e| db_err("db_query_failed", e))?
        .ok_or_else(|| HandlerErr {
            code: "not_found",
            message: "course not found".to_string(),
            details: Some(json!({ "courseId": course_id })),
        })
}

fn require_student(conn: &Connection, student_id: i64) -> Result<(), HandlerErr> {
    if db::student_exists(conn, student_id).map_err(|e| db_err("db_query_failed", e))? {
        return Ok(());
    }
    Err(HandlerErr {
        code: "not_found",
        message: "student not found".to_string(),
        details: Some(json!({ "studentId": student_id })),
    })
}

/// Course credits and semester win; workspace settings fill the gaps.
fn insert_defaults(course: &Course, settings: &GradingSettings) -> InsertDefaults {
    InsertDefaults {
        credits: if course.credits > 0 {
            course.credits
        } else {
            settings.default_credits
        },
        semester: if course.semester.trim().is_empty() {
            settings.default_semester.clone()
        } else {
            course.semester.clone()
        },
    }
}

/// Parses the optional `credits`/`semester` fields shared by create, update
/// and bulk entries.
fn parse_field_updates(
    obj: &serde_json::Map<String, serde_json::Value>,
) -> Result<(FieldUpdate<i64>, FieldUpdate<String>), String> {
    let credits = match obj.get("credits") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_i64() {
            Some(n) if (1..=MAX_CREDITS).contains(&n) => Some(n),
            _ => return Err(format!("credits must be an integer in 1..={}", MAX_CREDITS)),
        },
    };
    let semester = match obj.get("semester") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_str().map(str::trim) {
            Some(s) if !s.is_empty() => Some(s.to_string()),
            _ => return Err("semester must be a non-empty string".to_string()),
        },
    };
    Ok((
        FieldUpdate::from_option(credits),
        FieldUpdate::from_option(semester),
    ))
}

fn check_score_range(score: f64, settings: &GradingSettings) -> Result<(), String> {
    if !score.is_finite() {
        return Err("score must be a finite number".to_string());
    }
    if settings.strict_score_range && !(0.0..=100.0).contains(&score) {
        return Err("score must be in 0..=100".to_string());
    }
    Ok(())
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let res = match (student_id, course_id) {
        (Some(s), Some(c)) => db::grades_by_pair(conn, s, c),
        (Some(s), None) => db::grades_by_student(conn, s),
        (None, Some(c)) => db::grades_by_course(conn, c),
        (None, None) => db::grades_all(conn),
    };
    match res {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_grades_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_i64(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::grade_get(conn, id) {
        Ok(Some(g)) => ok(&req.id, json!({ "grade": g })),
        Ok(None) => err(&req.id, "not_found", "grade not found", Some(json!({ "id": id }))),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn create_grade(conn: &Connection, req: &Request) -> Result<ScoreRecord, HandlerErr> {
    let student_id = required_i64(req, "studentId").map_err(bad_params_from_response)?;
    let course_id = required_i64(req, "courseId").map_err(bad_params_from_response)?;
    let score = required_f64(req, "score").map_err(bad_params_from_response)?;
    let obj = params_object(req, None).map_err(bad_params_from_response)?;
    let (credits, semester) = parse_field_updates(obj).map_err(bad_params)?;

    let settings = setup::load_grading(conn).map_err(|e| db_err("db_query_failed", e))?;
    check_score_range(score, &settings).map_err(bad_params)?;
    let course = load_course(conn, course_id)?;
    require_student(conn, student_id)?;

    let existing = db::grades_by_pair(conn, student_id, course_id)
        .map_err(|e| db_err("db_query_failed", e))?;
    if !existing.is_empty() {
        return Err(HandlerErr {
            code: "already_exists",
            message: "a grade already exists for this student and course".to_string(),
            details: Some(json!({
                "studentId": student_id,
                "courseId": course_id,
                "id": existing[0].id
            })),
        });
    }

    let update = ScoreUpdate {
        student_id,
        score,
        credits,
        semester,
    };
    let rec = reconcile_with(&[], course_id, &[update], &insert_defaults(&course, &settings))
        .map_err(duplicate_err)?;
    let saved = db::persist_reconciled(conn, &rec).map_err(|e| db_err("db_insert_failed", e))?;
    first_saved(saved)
}

fn handle_grades_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match create_grade(conn, req) {
        Ok(g) => ok(&req.id, json!({ "grade": g })),
        Err(e) => e.response(&req.id),
    }
}

fn update_grade(conn: &Connection, req: &Request) -> Result<ScoreRecord, HandlerErr> {
    let id = required_i64(req, "id").map_err(bad_params_from_response)?;
    let patch = params_object(req, Some("patch")).map_err(bad_params_from_response)?;
    for k in patch.keys() {
        match k.as_str() {
            "score" | "credits" | "semester" => {}
            "grade" => return Err(bad_params("grade is derived from score and cannot be set".to_string())),
            _ => return Err(bad_params(format!("unknown grade field: {}", k))),
        }
    }
    let (credits, semester) = parse_field_updates(patch).map_err(bad_params)?;

    let current = db::grade_get(conn, id)
        .map_err(|e| db_err("db_query_failed", e))?
        .ok_or_else(|| HandlerErr {
            code: "not_found",
            message: "grade not found".to_string(),
            details: Some(json!({ "id": id })),
        })?;
    let score = match patch.get("score") {
        None => current.score,
        Some(v) => v
            .as_f64()
            .ok_or_else(|| bad_params("score must be a number".to_string()))?,
    };
    let settings = setup::load_grading(conn).map_err(|e| db_err("db_query_failed", e))?;
    check_score_range(score, &settings).map_err(bad_params)?;

    let update = ScoreUpdate {
        student_id: current.student_id,
        score,
        credits,
        semester,
    };
    let next = first_saved(
        reconcile(std::slice::from_ref(&current), current.course_id, &[update])
            .map_err(duplicate_err)?,
    )?;
    if next == current {
        return Ok(current);
    }
    db::grade_save(conn, &next).map_err(|e| db_err("db_update_failed", e))
}

fn handle_grades_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match update_grade(conn, req) {
        Ok(g) => ok(&req.id, json!({ "grade": g })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_grades_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_i64(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let current = match db::grade_get(conn, id) {
        Ok(Some(g)) => g,
        Ok(None) => return err(&req.id, "not_found", "grade not found", Some(json!({ "id": id }))),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(e) = db::grade_delete(conn, id) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    let gpa = match db::refresh_student_gpa(conn, current.student_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({ "ok": true, "studentId": current.student_id, "gpa": gpa }),
    )
}

fn handle_grades_classify(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let score = match required_f64(req, "score") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let letter = grading::classify(score);
    ok(
        &req.id,
        json!({ "grade": letter, "gradePoints": letter.grade_points() }),
    )
}

fn handle_grades_gpa(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw) = req.params.get("entries") else {
        return err(&req.id, "bad_params", "missing entries", None);
    };
    let entries: Vec<GpaEntry> = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                "entries must be an array of { grade, credits }",
                Some(json!({ "reason": e.to_string() })),
            )
        }
    };
    if let Some((index, e)) = entries
        .iter()
        .enumerate()
        .find(|(_, e)| !(1..=MAX_CREDITS).contains(&e.credits))
    {
        return err(
            &req.id,
            "bad_params",
            format!("credits must be an integer in 1..={}", MAX_CREDITS),
            Some(json!({ "index": index, "credits": e.credits })),
        );
    }
    let gpa = grading::compute_gpa(&entries);
    ok(
        &req.id,
        json!({ "gpa": gpa, "standing": grading::gpa_standing(gpa) }),
    )
}

fn parse_bulk_entry(
    conn: &Connection,
    raw: &serde_json::Value,
    settings: &GradingSettings,
) -> Result<ScoreUpdate, HandlerErr> {
    let Some(obj) = raw.as_object() else {
        return Err(bad_params("update must be an object".to_string()));
    };
    let student_id = obj
        .get("studentId")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params("missing/invalid studentId".to_string()))?;
    let score = obj
        .get("score")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| bad_params("missing/invalid score".to_string()))?;
    check_score_range(score, settings).map_err(bad_params)?;
    let (credits, semester) = parse_field_updates(obj).map_err(bad_params)?;
    require_student(conn, student_id)?;
    Ok(ScoreUpdate {
        student_id,
        score,
        credits,
        semester,
    })
}

fn handle_grades_bulk_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw_updates) = req.params.get("updates").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "updates must be an array", None);
    };
    if raw_updates.len() > BULK_UPDATE_MAX_UPDATES {
        return err(
            &req.id,
            "bad_params",
            "too many updates in one batch",
            Some(json!({
                "count": raw_updates.len(),
                "max": BULK_UPDATE_MAX_UPDATES
            })),
        );
    }

    let course = match load_course(conn, course_id) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let settings = match setup::load_grading(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut updates: Vec<ScoreUpdate> = Vec::with_capacity(raw_updates.len());
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for (index, raw) in raw_updates.iter().enumerate() {
        match parse_bulk_entry(conn, raw, &settings) {
            Ok(u) => updates.push(u),
            Err(e) => errors.push(json!({
                "index": index,
                "code": e.code,
                "message": e.message,
                "details": e.details
            })),
        }
    }

    let existing = match db::grades_by_course(conn, course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rec = match reconcile_with(
        &existing,
        course_id,
        &updates,
        &insert_defaults(&course, &settings),
    ) {
        Ok(r) => r,
        Err(e) => return duplicate_err(e).response(&req.id),
    };
    let saved = match db::persist_reconciled(conn, &rec) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    tracing::info!(
        course_id,
        updated = rec.updated.len(),
        inserted = rec.inserted.len(),
        rejected = errors.len(),
        "bulk grade update applied"
    );

    let mut result = json!({
        "courseId": course_id,
        "updated": rec.updated.len(),
        "inserted": rec.inserted.len(),
        "rejected": errors.len(),
        "grades": saved
    });
    if !errors.is_empty() {
        result["errors"] = json!(errors);
    }
    ok(&req.id, result)
}

fn first_saved(saved: Vec<ScoreRecord>) -> Result<ScoreRecord, HandlerErr> {
    saved.into_iter().next().ok_or_else(|| HandlerErr {
        code: "internal",
        message: "reconcile produced no record".to_string(),
        details: None,
    })
}

fn bad_params(message: String) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message,
        details: None,
    }
}

/// Lifts an already-built `bad_params` response from the shared helpers.
fn bad_params_from_response(resp: serde_json::Value) -> HandlerErr {
    let error = resp.get("error");
    HandlerErr {
        code: "bad_params",
        message: error
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("bad params")
            .to_string(),
        details: error.and_then(|e| e.get("details")).cloned(),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.get" => Some(handle_grades_get(state, req)),
        "grades.create" => Some(handle_grades_create(state, req)),
        "grades.update" => Some(handle_grades_update(state, req)),
        "grades.delete" => Some(handle_grades_delete(state, req)),
        "grades.classify" => Some(handle_grades_classify(state, req)),
        "grades.gpa" => Some(handle_grades_gpa(state, req)),
        "grades.bulkUpdate" => Some(handle_grades_bulk_update(state, req)),
        _ => None,
    }
}
