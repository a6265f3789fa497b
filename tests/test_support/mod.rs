#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_tppd"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn tppd sidecar");
    let stdin = child.stdin.take().expect("sidecar stdin");
    let reader = BufReader::new(child.stdout.take().expect("sidecar stdout"));
    (child, stdin, reader)
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let line = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", line).expect("write request");
    let mut out = String::new();
    reader.read_line(&mut out).expect("read response");
    serde_json::from_str(&out).expect("parse response")
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let resp = request(stdin, reader, id, method, params);
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok response for {}: {}",
        method,
        resp
    );
    resp.get("result").cloned().expect("result")
}

pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let resp = request(stdin, reader, id, method, params);
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected error response for {}: {}",
        method,
        resp
    );
    resp.get("error").cloned().expect("error")
}

/// Open a fresh workspace and register one student with a complete profile.
/// Returns the new student id.
pub fn register_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    full_name: &str,
    email: &str,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let result = request_ok(
        stdin,
        reader,
        "reg",
        "students.register",
        json!({
            "fullName": full_name,
            "email": email,
            "school": "Mzansi Secondary",
            "grade": "Grade 10",
        }),
    );
    result
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

/// Add one subject entry for a term; returns the response result.
pub fn add_subject(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
    term: i64,
    name: &str,
    level: serde_json::Value,
    final_percentage: serde_json::Value,
    grade_average: serde_json::Value,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        "add",
        "subjects.add",
        json!({
            "studentId": student_id,
            "term": term,
            "name": name,
            "level": level,
            "finalPercentage": final_percentage,
            "gradeAverage": grade_average,
        }),
    )
}
