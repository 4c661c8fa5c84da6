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

fn create_id(result: &serde_json::Value, key: &str) -> i64 {
    result.get(key).and_then(|v| v.as_i64()).expect(key)
}

#[test]
fn grade_crud_keeps_student_gpa_current() {
    let workspace = temp_dir("gradebook-grades-crud");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let sid = create_id(
        &request_ok(
            &mut stdin,
            &mut reader,
            "s",
            "students.create",
            json!({ "firstName": "Grace", "lastName": "Hopper" }),
        ),
        "studentId",
    );
    let c1 = create_id(
        &request_ok(
            &mut stdin,
            &mut reader,
            "c1",
            "courses.create",
            json!({ "code": "CS201", "name": "Data Structures", "credits": 3 }),
        ),
        "courseId",
    );
    let c2 = create_id(
        &request_ok(
            &mut stdin,
            &mut reader,
            "c2",
            "courses.create",
            json!({ "code": "LAB1", "name": "Lab", "credits": 1 }),
        ),
        "courseId",
    );

    let g1 = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.create",
        json!({ "studentId": sid, "courseId": c1, "score": 95.0 }),
    );
    let g1 = g1.get("grade").cloned().expect("grade");
    assert_eq!(g1.get("grade").and_then(|v| v.as_str()), Some("A"));
    assert_eq!(g1.get("credits").and_then(|v| v.as_i64()), Some(3));
    // Course has no semester, so the workspace default applies.
    assert_eq!(g1.get("semester").and_then(|v| v.as_str()), Some("Fall 2024"));
    let g1_id = g1.get("id").and_then(|v| v.as_i64()).expect("grade id");

    let g2 = request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "grades.create",
        json!({ "studentId": sid, "courseId": c2, "score": 84.0 }),
    );
    let g2_id = g2
        .get("grade")
        .and_then(|g| g.get("id"))
        .and_then(|v| v.as_i64())
        .expect("grade id");

    let gpa = request_ok(&mut stdin, &mut reader, "gpa1", "students.gpa", json!({ "studentId": sid }));
    assert_eq!(gpa.get("gpa").and_then(|v| v.as_f64()), Some(3.75));
    assert_eq!(gpa.get("standing").and_then(|v| v.as_str()), Some("Magna Cum Laude"));
    assert_eq!(gpa.get("credits").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(gpa.get("courseCount").and_then(|v| v.as_u64()), Some(2));

    let dup = request(
        &mut stdin,
        &mut reader,
        "dup",
        "grades.create",
        json!({ "studentId": sid, "courseId": c1, "score": 50.0 }),
    );
    assert_eq!(error_code(&dup), "already_exists");

    let upd = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "grades.update",
        json!({ "id": g1_id, "patch": { "score": 74.0 } }),
    );
    let upd = upd.get("grade").cloned().expect("grade");
    assert_eq!(upd.get("grade").and_then(|v| v.as_str()), Some("C"));
    assert_eq!(upd.get("credits").and_then(|v| v.as_i64()), Some(3));

    let derived = request(
        &mut stdin,
        &mut reader,
        "u2",
        "grades.update",
        json!({ "id": g1_id, "patch": { "grade": "A+" } }),
    );
    assert_eq!(error_code(&derived), "bad_params");

    let student = request_ok(&mut stdin, &mut reader, "sg", "students.get", json!({ "studentId": sid }));
    // (2.0 * 3 + 3.0 * 1) / 4
    assert_eq!(
        student
            .get("student")
            .and_then(|s| s.get("gpa"))
            .and_then(|v| v.as_f64()),
        Some(2.25)
    );

    let _ = request_ok(&mut stdin, &mut reader, "d", "grades.delete", json!({ "id": g2_id }));
    let gpa = request_ok(&mut stdin, &mut reader, "gpa2", "students.gpa", json!({ "studentId": sid }));
    assert_eq!(gpa.get("gpa").and_then(|v| v.as_f64()), Some(2.0));
    assert_eq!(gpa.get("standing").and_then(|v| v.as_str()), Some("Good Standing"));

    let missing = request(&mut stdin, &mut reader, "d2", "grades.delete", json!({ "id": g2_id }));
    assert_eq!(error_code(&missing), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn classify_and_gpa_need_no_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    for (i, (score, letter)) in [(89.99, "B+"), (100.0, "A+"), (150.0, "A+"), (60.0, "D-"), (-1.0, "F")]
        .into_iter()
        .enumerate()
    {
        let res = request_ok(
            &mut stdin,
            &mut reader,
            &format!("cl{}", i),
            "grades.classify",
            json!({ "score": score }),
        );
        assert_eq!(res.get("grade").and_then(|v| v.as_str()), Some(letter), "score {}", score);
    }

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "gpa",
        "grades.gpa",
        json!({ "entries": [
            { "grade": "A", "credits": 3 },
            { "grade": "Z", "credits": 1 }
        ] }),
    );
    assert_eq!(res.get("gpa").and_then(|v| v.as_f64()), Some(3.0));
    assert_eq!(res.get("standing").and_then(|v| v.as_str()), Some("Dean's List"));

    let empty = request_ok(&mut stdin, &mut reader, "empty", "grades.gpa", json!({ "entries": [] }));
    assert_eq!(empty.get("gpa").and_then(|v| v.as_f64()), Some(0.0));

    let bad = request(&mut stdin, &mut reader, "bad", "grades.gpa", json!({ "entries": 3 }));
    assert_eq!(error_code(&bad), "bad_params");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn credits_outside_the_accepted_range_are_rejected() {
    let workspace = temp_dir("gradebook-credit-bounds");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let negative = request(
        &mut stdin,
        &mut reader,
        "neg",
        "grades.gpa",
        json!({ "entries": [
            { "grade": "A", "credits": 5 },
            { "grade": "F", "credits": -4 }
        ] }),
    );
    assert_eq!(error_code(&negative), "bad_params");
    assert_eq!(negative.pointer("/error/details/index").and_then(|v| v.as_u64()), Some(1));

    let huge = request(
        &mut stdin,
        &mut reader,
        "huge",
        "grades.gpa",
        json!({ "entries": [
            { "grade": "A", "credits": i64::MAX },
            { "grade": "A", "credits": 1 }
        ] }),
    );
    assert_eq!(error_code(&huge), "bad_params");
    assert_eq!(huge.pointer("/error/details/index").and_then(|v| v.as_u64()), Some(0));

    // The sidecar is still answering.
    let _ = request_ok(&mut stdin, &mut reader, "alive", "health", json!({}));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let too_heavy = request(
        &mut stdin,
        &mut reader,
        "c-bad",
        "courses.create",
        json!({ "code": "X1", "name": "Heavy", "credits": 13 }),
    );
    assert_eq!(error_code(&too_heavy), "bad_params");

    let sid = create_id(
        &request_ok(
            &mut stdin,
            &mut reader,
            "s",
            "students.create",
            json!({ "firstName": "Max", "lastName": "Load" }),
        ),
        "studentId",
    );
    let cid = create_id(
        &request_ok(
            &mut stdin,
            &mut reader,
            "c",
            "courses.create",
            json!({ "code": "X2", "name": "Normal", "credits": 12 }),
        ),
        "courseId",
    );
    let bad_grade = request(
        &mut stdin,
        &mut reader,
        "g-bad",
        "grades.create",
        json!({ "studentId": sid, "courseId": cid, "score": 90.0, "credits": 13 }),
    );
    assert_eq!(error_code(&bad_grade), "bad_params");
    let bad_grade = request(
        &mut stdin,
        &mut reader,
        "g-neg",
        "grades.create",
        json!({ "studentId": sid, "courseId": cid, "score": 90.0, "credits": -3 }),
    );
    assert_eq!(error_code(&bad_grade), "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g",
        "grades.create",
        json!({ "studentId": sid, "courseId": cid, "score": 90.0 }),
    );
    let gpa = request_ok(&mut stdin, &mut reader, "gpa", "students.gpa", json!({ "studentId": sid }));
    assert_eq!(gpa.get("gpa").and_then(|v| v.as_f64()), Some(3.7));
    assert_eq!(gpa.get("credits").and_then(|v| v.as_i64()), Some(12));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_course_removes_grades_and_refreshes_gpa() {
    let workspace = temp_dir("gradebook-course-delete");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let sid = create_id(
        &request_ok(
            &mut stdin,
            &mut reader,
            "s",
            "students.create",
            json!({ "firstName": "Alan", "lastName": "Turing" }),
        ),
        "studentId",
    );
    let cid = create_id(
        &request_ok(
            &mut stdin,
            &mut reader,
            "c",
            "courses.create",
            json!({ "code": "PHIL1", "name": "Logic", "credits": 3 }),
        ),
        "courseId",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g",
        "grades.create",
        json!({ "studentId": sid, "courseId": cid, "score": 99.0 }),
    );

    let del = request_ok(&mut stdin, &mut reader, "del", "courses.delete", json!({ "courseId": cid }));
    let affected = del
        .get("affectedStudentIds")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("affected");
    assert_eq!(affected, vec![json!(sid)]);

    let grades = request_ok(&mut stdin, &mut reader, "gl", "grades.list", json!({ "studentId": sid }));
    assert_eq!(grades.get("grades").and_then(|v| v.as_array()).map(|a| a.len()), Some(0));
    let gpa = request_ok(&mut stdin, &mut reader, "gpa", "students.gpa", json!({ "studentId": sid }));
    assert_eq!(gpa.get("gpa").and_then(|v| v.as_f64()), Some(0.0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
