mod test_support;

use serde_json::json;
use test_support::{add_subject, register_student, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn submit_validates_aggregates_and_persists() {
    let workspace = temp_dir("tppd-term-submit");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = register_student(
        &mut stdin,
        &mut reader,
        &workspace,
        "Zinhle Dube",
        "zinhle@tpp.example",
    );

    let entries: [(&str, i64, f64); 6] = [
        ("Mathematics", 7, 85.0),
        ("Physical Sciences", 6, 72.0),
        ("English Home Language", 5, 65.0),
        ("History", 4, 55.0),
        ("Geography", 3, 45.0),
        ("Visual Arts", 2, 35.0),
    ];
    for (name, level, pct) in entries.iter().take(5) {
        add_subject(
            &mut stdin,
            &mut reader,
            &student_id,
            2,
            name,
            json!(level),
            json!(pct),
            json!(pct),
        );
    }

    // Five subjects: rejected before any submit-side write happens.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "submit-5",
        "term.submit",
        json!({ "studentId": student_id, "term": 2 }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("subject_count"));
    assert!(e
        .get("message")
        .and_then(|v| v.as_str())
        .expect("message")
        .contains("at least 6"));

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "get-after-reject",
        "term.get",
        json!({ "studentId": student_id, "term": 2 }),
    );
    assert_eq!(
        summary.pointer("/summary/completed"),
        Some(&json!(false)),
        "rejected submit must not mark the term complete"
    );

    let (name, level, pct) = entries[5];
    add_subject(
        &mut stdin,
        &mut reader,
        &student_id,
        2,
        name,
        json!(level),
        json!(pct),
        json!(pct),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "submit-6",
        "term.submit",
        json!({ "studentId": student_id, "term": 2 }),
    );
    // mean of 85,72,65,55,45,35 is 59.5, half-up to 60
    assert_eq!(result.pointer("/aggregate/average"), Some(&json!(60)));
    assert_eq!(
        result.pointer("/aggregate/status"),
        Some(&json!("Doing Well"))
    );
    assert_eq!(result.get("completed"), Some(&json!(true)));
    assert!(result
        .get("submittedAt")
        .and_then(|v| v.as_str())
        .is_some());
    assert_eq!(result.get("overallAverage"), Some(&json!(60)));
    assert_eq!(
        result.get("overallPerformanceStatus"),
        Some(&json!("Doing Well"))
    );

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "student",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(student.pointer("/student/lastTermUpdated"), Some(&json!(2)));
    assert_eq!(
        student.pointer("/student/terms/1/average"),
        Some(&json!(60)),
        "term 2 occupies slot index 1"
    );
    assert_eq!(student.pointer("/student/terms/0"), Some(&json!(null)));
}

#[test]
fn submitted_terms_are_read_only_until_reopened() {
    let workspace = temp_dir("tppd-term-reopen");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = register_student(
        &mut stdin,
        &mut reader,
        &workspace,
        "Lwazi Nkosi",
        "lwazi@tpp.example",
    );

    for i in 0..6 {
        add_subject(
            &mut stdin,
            &mut reader,
            &student_id,
            1,
            &format!("Subject {}", i),
            json!(5),
            json!(65),
            json!(60),
        );
    }
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "submit",
        "term.submit",
        json!({ "studentId": student_id, "term": 1 }),
    );
    assert_eq!(result.pointer("/aggregate/average"), Some(&json!(65)));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "add-submitted",
        "subjects.add",
        json!({
            "studentId": student_id,
            "term": 1,
            "name": "Music",
            "level": 5,
            "finalPercentage": 70,
            "gradeAverage": 70,
        }),
    );
    assert_eq!(
        e.get("code").and_then(|v| v.as_str()),
        Some("term_submitted")
    );

    let reopened = request_ok(
        &mut stdin,
        &mut reader,
        "reopen",
        "term.reopen",
        json!({ "studentId": student_id, "term": 1 }),
    );
    assert_eq!(reopened.get("completed"), Some(&json!(false)));

    // A reopened term drops out of the rollup until resubmitted.
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "student",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        student.pointer("/student/overallAverage"),
        Some(&json!(0))
    );
    assert_eq!(
        student.pointer("/student/overallPerformanceStatus"),
        Some(&json!("No Data"))
    );

    // Prior data is preserved; editing works again after reopen.
    let added = request_ok(
        &mut stdin,
        &mut reader,
        "add-reopened",
        "subjects.add",
        json!({
            "studentId": student_id,
            "term": 1,
            "name": "Music",
            "level": 5,
            "finalPercentage": 72,
            "gradeAverage": 70,
        }),
    );
    assert_eq!(added.pointer("/aggregate/subjectCount"), Some(&json!(7)));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "reopen-editing",
        "term.reopen",
        json!({ "studentId": student_id, "term": 1 }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));
}

#[test]
fn preview_never_persists() {
    let workspace = temp_dir("tppd-term-preview");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = register_student(
        &mut stdin,
        &mut reader,
        &workspace,
        "Amahle Khumalo",
        "amahle@tpp.example",
    );

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "preview-empty",
        "term.preview",
        json!({ "studentId": student_id, "term": 3 }),
    );
    assert_eq!(preview.pointer("/aggregate/average"), Some(&json!(0)));
    assert_eq!(preview.pointer("/aggregate/status"), Some(&json!("No Data")));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "get-no-summary",
        "term.get",
        json!({ "studentId": student_id, "term": 3 }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("not_found"));
}
