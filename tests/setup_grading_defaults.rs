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
fn grading_defaults_apply_to_inserted_records() {
    let workspace = temp_dir("gradebook-setup-grading");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let got = request_ok(&mut stdin, &mut reader, "get", "setup.get", json!({}));
    let grading = got.get("grading").cloned().expect("grading");
    assert_eq!(grading.get("defaultSemester").and_then(|v| v.as_str()), Some("Fall 2024"));
    assert_eq!(grading.get("defaultCredits").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(grading.get("strictScoreRange").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(grading.get("topPerformersLimit").and_then(|v| v.as_i64()), Some(5));

    let upd = request_ok(
        &mut stdin,
        &mut reader,
        "upd",
        "setup.update",
        json!({ "section": "grading", "patch": { "defaultSemester": "Winter 2026" } }),
    );
    assert_eq!(
        upd.get("values")
            .and_then(|v| v.get("defaultSemester"))
            .and_then(|v| v.as_str()),
        Some("Winter 2026")
    );

    for (i, patch) in [
        json!({ "defaultCredits": 0 }),
        json!({ "defaultCredits": 13 }),
        json!({ "topPerformersLimit": 51 }),
        json!({ "strictScoreRange": "yes" }),
        json!({ "defaultSemester": "   " }),
        json!({ "gradingScale": "curve" }),
    ]
    .into_iter()
    .enumerate()
    {
        let res = request(
            &mut stdin,
            &mut reader,
            &format!("bad{}", i),
            "setup.update",
            json!({ "section": "grading", "patch": patch }),
        );
        assert_eq!(error_code(&res), "bad_params", "patch {} should be rejected", i);
    }

    let unknown = request(
        &mut stdin,
        &mut reader,
        "sec",
        "setup.update",
        json!({ "section": "planner", "patch": {} }),
    );
    assert_eq!(error_code(&unknown), "bad_params");

    // Course without a semester picks up the workspace default.
    let sid = request_ok(
        &mut stdin,
        &mut reader,
        "s",
        "students.create",
        json!({ "firstName": "Emmy", "lastName": "Noether" }),
    )
    .get("studentId")
    .and_then(|v| v.as_i64())
    .expect("studentId");
    let cid = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "courses.create",
        json!({ "code": "ALG1", "name": "Algebra", "credits": 5 }),
    )
    .get("courseId")
    .and_then(|v| v.as_i64())
    .expect("courseId");
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "bulk",
        "grades.bulkUpdate",
        json!({ "courseId": cid, "updates": [{ "studentId": sid, "score": 90.0 }] }),
    );
    let grades = res.get("grades").and_then(|v| v.as_array()).cloned().expect("grades");
    let g = &grades[0];
    assert_eq!(g.get("semester").and_then(|v| v.as_str()), Some("Winter 2026"));
    assert_eq!(g.get("credits").and_then(|v| v.as_i64()), Some(5));

    drop(stdin);
    let _ = child.wait();

    // Settings persist across daemon restarts.
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let got = request_ok(&mut stdin, &mut reader, "get2", "setup.get", json!({}));
    assert_eq!(
        got.get("grading")
            .and_then(|v| v.get("defaultSemester"))
            .and_then(|v| v.as_str()),
        Some("Winter 2026")
    );
    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn workspace_env_var_preselects_workspace() {
    let workspace = temp_dir("gradebook-env-workspace");
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .env("GRADEBOOKD_WORKSPACE", &workspace)
        .env("GRADEBOOKD_LOG", "gradebookd=debug")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let mut stdin = child.stdin.take().expect("child stdin");
    let mut reader = BufReader::new(child.stdout.take().expect("child stdout"));

    let health = request_ok(&mut stdin, &mut reader, "h", "health", json!({}));
    assert_eq!(
        health.get("workspacePath").and_then(|v| v.as_str()),
        Some(workspace.to_string_lossy().as_ref())
    );
    let _ = request_ok(&mut stdin, &mut reader, "l", "students.list", json!({}));
    assert!(workspace.join("gradebook.sqlite3").is_file());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
