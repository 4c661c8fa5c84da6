use crate::db::{self, Course, Student};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{db_conn, optional_i64, optional_str, required_i64};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::ScoreRecord;
use crate::report::{self, GradeFilter};
use rusqlite::Connection;
use serde_json::json;

struct Snapshot {
    students: Vec<Student>,
    courses: Vec<Course>,
    grades: Vec<ScoreRecord>,
}

fn load_snapshot(conn: &Connection) -> anyhow::Result<Snapshot> {
    Ok(Snapshot {
        students: db::students_list(conn)?,
        courses: db::courses_list(conn)?,
        grades: db::grades_all(conn)?,
    })
}

fn snapshot_or_err(state: &AppState, req: &Request) -> Result<Snapshot, serde_json::Value> {
    let conn = db_conn(state, req)?;
    load_snapshot(conn).map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn parse_limit(req: &Request, default: usize) -> Result<usize, serde_json::Value> {
    match optional_i64(req, "limit")? {
        None => Ok(default),
        Some(n) if n > 0 => Ok(n as usize),
        Some(n) => Err(err(
            &req.id,
            "bad_params",
            "limit must be > 0",
            Some(json!({ "limit": n })),
        )),
    }
}

fn parse_grade_filter(req: &Request) -> Result<GradeFilter, serde_json::Value> {
    Ok(GradeFilter {
        course_id: optional_i64(req, "courseId")?,
        semester: optional_str(req, "semester")?,
    })
}

fn today_file_name(prefix: &str) -> String {
    format!(
        "{}.csv",
        report::report_file_name(prefix, chrono::Local::now().date_naive())
    )
}

fn handle_reports_dashboard(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filter = match parse_grade_filter(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let snap = match snapshot_or_err(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let grades = filter.apply(&snap.grades);
    let stats = report::dashboard_stats(&snap.students, &snap.courses, &grades);
    ok(&req.id, json!(stats))
}

fn handle_reports_top_performers(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match setup::load_grading(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let limit = match parse_limit(req, settings.top_performers_limit) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grades = match db::grades_by_course(conn, course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let top = report::top_performers(&grades, course_id, limit);
    ok(&req.id, json!({ "courseId": course_id, "grades": top }))
}

fn handle_reports_top_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let limit = match parse_limit(req, 5) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::students_list(conn) {
        Ok(students) => ok(
            &req.id,
            json!({ "students": report::top_students(&students, limit) }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reports_gpa_distribution(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match db::students_list(conn) {
        Ok(students) => ok(
            &req.id,
            json!({ "buckets": report::gpa_distribution(&students) }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reports_grades_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filter = match parse_grade_filter(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let snap = match snapshot_or_err(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let grades = filter.apply(&snap.grades);
    let csv = report::grades_csv(&grades, &snap.students, &snap.courses);
    ok(
        &req.id,
        json!({ "fileName": today_file_name("grades_report"), "rowCount": grades.len(), "csv": csv }),
    )
}

fn handle_reports_students_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match db::students_list(conn) {
        Ok(students) => ok(
            &req.id,
            json!({
                "fileName": today_file_name("students_report"),
                "rowCount": students.len(),
                "csv": report::students_csv(&students)
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reports_courses_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match db::courses_list(conn) {
        Ok(courses) => ok(
            &req.id,
            json!({
                "fileName": today_file_name("courses_report"),
                "rowCount": courses.len(),
                "csv": report::courses_csv(&courses)
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reports_full_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let snap = match snapshot_or_err(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let csv = report::full_report_csv(&snap.students, &snap.courses, &snap.grades);
    ok(
        &req.id,
        json!({ "fileName": today_file_name("full_academic_report"), "csv": csv }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.dashboard" => Some(handle_reports_dashboard(state, req)),
        "reports.topPerformers" => Some(handle_reports_top_performers(state, req)),
        "reports.topStudents" => Some(handle_reports_top_students(state, req)),
        "reports.gpaDistribution" => Some(handle_reports_gpa_distribution(state, req)),
        "reports.gradesCsv" => Some(handle_reports_grades_csv(state, req)),
        "reports.studentsCsv" => Some(handle_reports_students_csv(state, req)),
        "reports.coursesCsv" => Some(handle_reports_courses_csv(state, req)),
        "reports.fullCsv" => Some(handle_reports_full_csv(state, req)),
        _ => None,
    }
}
