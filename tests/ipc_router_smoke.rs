use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok response for {}: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let no_ws = request(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(error_code(&no_ws), "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let student_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "firstName": "Ada", "lastName": "Lovelace", "email": "ada@example.edu", "year": 2 }),
    )
    .get("studentId")
    .and_then(|v| v.as_i64())
    .expect("studentId");
    let course_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.create",
        json!({ "code": "CS101", "name": "Intro to CS", "credits": 4, "semester": "Spring 2025" }),
    )
    .get("courseId")
    .and_then(|v| v.as_i64())
    .expect("courseId");

    let calls: Vec<(&str, serde_json::Value)> = vec![
        ("students.list", json!({})),
        ("students.get", json!({ "studentId": student_id })),
        ("students.update", json!({ "studentId": student_id, "patch": { "year": 3 } })),
        ("courses.list", json!({})),
        ("courses.get", json!({ "courseId": course_id })),
        ("courses.update", json!({ "courseId": course_id, "patch": { "capacity": 30 } })),
        ("enrollments.bulkEnroll", json!({ "courseId": course_id, "studentIds": [student_id] })),
        ("enrollments.list", json!({ "courseId": course_id })),
        ("enrollments.isEnrolled", json!({ "studentId": student_id, "courseId": course_id })),
        ("grades.create", json!({ "studentId": student_id, "courseId": course_id, "score": 91.0 })),
        ("grades.list", json!({ "courseId": course_id })),
        ("grades.classify", json!({ "score": 88.0 })),
        ("grades.gpa", json!({ "entries": [{ "grade": "A", "credits": 3 }] })),
        (
            "grades.bulkUpdate",
            json!({ "courseId": course_id, "updates": [{ "studentId": student_id, "score": 95.0 }] }),
        ),
        ("students.gpa", json!({ "studentId": student_id })),
        ("reports.dashboard", json!({})),
        ("reports.topPerformers", json!({ "courseId": course_id })),
        ("reports.topStudents", json!({})),
        ("reports.gpaDistribution", json!({})),
        ("reports.gradesCsv", json!({})),
        ("reports.studentsCsv", json!({})),
        ("reports.coursesCsv", json!({})),
        ("reports.fullCsv", json!({})),
        ("setup.get", json!({})),
        ("setup.update", json!({ "section": "grading", "patch": { "topPerformersLimit": 3 } })),
        ("backup.exportWorkspaceBundle", json!({ "outPath": bundle_out.to_string_lossy() })),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let id = format!("c{}", i);
        let _ = request_ok(&mut stdin, &mut reader, &id, method, params);
    }

    let unknown = request(&mut stdin, &mut reader, "99", "grades.nope", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn malformed_line_gets_bad_json_and_loop_continues() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse");
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&value), "bad_json");

    let _ = request_ok(&mut stdin, &mut reader, "after", "health", json!({}));

    drop(stdin);
    let _ = child.wait();
}
