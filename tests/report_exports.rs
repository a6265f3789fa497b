mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{add_subject, request_err, request_ok, spawn_sidecar, temp_dir};

fn register(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    full_name: &str,
    email: &str,
    grade: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        "reg",
        "students.register",
        json!({
            "fullName": full_name,
            "email": email,
            "school": "Mzansi Secondary",
            "grade": grade,
        }),
    );
    result
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

/// Three students: one doing well, one at risk, one with no marks at all.
fn seed_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> (String, String, String) {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let zinhle = register(stdin, reader, "Zinhle Dube", "zinhle@tpp.example", "Grade 10");
    let amahle = register(stdin, reader, "Amahle Khumalo", "amahle@tpp.example", "Grade 11");
    let lwazi = register(stdin, reader, "Lwazi Nkosi", "lwazi@tpp.example", "Grade 10");

    add_subject(stdin, reader, &zinhle, 1, "Mathematics", json!(6), json!(70), json!(68));
    add_subject(stdin, reader, &zinhle, 1, "History", json!(7), json!(80), json!(78));
    add_subject(stdin, reader, &amahle, 1, "Mathematics", json!(2), json!(30), json!(35));
    (zinhle, amahle, lwazi)
}

#[test]
fn bulk_report_covers_every_student_in_name_order() {
    let workspace = temp_dir("tppd-report-bulk");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_class(&mut stdin, &mut reader, &workspace);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "bulk",
        "report.bulk",
        json!({ "term": 1 }),
    );
    let report = result.get("report").expect("report");
    assert_eq!(report.get("term"), Some(&json!(1)));
    assert_eq!(report.get("totalStudents"), Some(&json!(3)));
    assert!(report
        .get("generatedAt")
        .and_then(|v| v.as_str())
        .is_some());

    let names: Vec<&str> = report
        .get("students")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .filter_map(|r| r.get("name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(names, vec!["Amahle Khumalo", "Lwazi Nkosi", "Zinhle Dube"]);

    assert_eq!(
        report.pointer("/students/2/termAverage"),
        Some(&json!(75))
    );
    assert_eq!(
        report.pointer("/students/2/termStatus"),
        Some(&json!("Doing Well"))
    );
    assert_eq!(
        report.pointer("/students/1/termStatus"),
        Some(&json!("No Data"))
    );

    // one of each band, a third apiece
    let summary = report.get("summary").and_then(|v| v.as_array()).expect("summary");
    assert_eq!(summary[0].get("status"), Some(&json!("Doing Well")));
    assert_eq!(summary[0].get("count"), Some(&json!(1)));
    assert_eq!(summary[0].get("percent"), Some(&json!(33)));
    assert_eq!(summary[2].get("status"), Some(&json!("At Risk")));
    assert_eq!(summary[2].get("count"), Some(&json!(1)));
}

#[test]
fn selection_modes_narrow_the_report() {
    let workspace = temp_dir("tppd-report-select");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (zinhle, _amahle, _lwazi) = seed_class(&mut stdin, &mut reader, &workspace);

    let by_id = request_ok(
        &mut stdin,
        &mut reader,
        "by-id",
        "report.bulk",
        json!({ "term": 1, "studentIds": [zinhle] }),
    );
    assert_eq!(by_id.pointer("/report/totalStudents"), Some(&json!(1)));
    assert_eq!(
        by_id.pointer("/report/students/0/name"),
        Some(&json!("Zinhle Dube"))
    );

    let by_grade = request_ok(
        &mut stdin,
        &mut reader,
        "by-grade",
        "report.bulk",
        json!({ "term": 1, "gradeLevel": "grade 11" }),
    );
    assert_eq!(
        by_grade.pointer("/report/students/0/name"),
        Some(&json!("Amahle Khumalo"))
    );

    let by_band = request_ok(
        &mut stdin,
        &mut reader,
        "by-band",
        "report.bulk",
        json!({ "term": 1, "statusBand": "At Risk" }),
    );
    assert_eq!(by_band.pointer("/report/totalStudents"), Some(&json!(1)));
    assert_eq!(
        by_band.pointer("/report/students/0/termAverage"),
        Some(&json!(30))
    );

    let e = request_err(
        &mut stdin,
        &mut reader,
        "no-match",
        "report.bulk",
        json!({ "term": 1, "gradeLevel": "Grade 12" }),
    );
    assert_eq!(
        e.get("code").and_then(|v| v.as_str()),
        Some("empty_selection")
    );

    let e = request_err(
        &mut stdin,
        &mut reader,
        "two-selectors",
        "report.bulk",
        json!({ "term": 1, "gradeLevel": "Grade 10", "statusBand": "At Risk" }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));
}

#[test]
fn csv_export_quotes_fields_and_keeps_blanks_blank() {
    let workspace = temp_dir("tppd-report-csv");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = register(
        &mut stdin,
        &mut reader,
        "Dube, Zinhle",
        "zinhle@tpp.example",
        "Grade 10",
    );
    add_subject(
        &mut stdin,
        &mut reader,
        &student_id,
        2,
        "Mathematics",
        json!(7),
        json!(88),
        json!(85),
    );
    add_subject(
        &mut stdin,
        &mut reader,
        &student_id,
        2,
        "History",
        json!(null),
        json!(null),
        json!(null),
    );

    let bulk = request_ok(
        &mut stdin,
        &mut reader,
        "bulk-csv",
        "report.bulk",
        json!({ "term": 2, "format": "csv" }),
    );
    assert_eq!(bulk.get("format"), Some(&json!("csv")));
    let csv = bulk.get("csv").and_then(|v| v.as_str()).expect("csv");
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("Name,Email,School,Grade,Term 2 Average,Term 2 Status")
    );
    let row = lines.next().expect("row");
    assert!(row.starts_with("\"Dube, Zinhle\""));
    assert!(row.ends_with("88,\"Doing Well\""));

    let single = request_ok(
        &mut stdin,
        &mut reader,
        "student-csv",
        "report.student",
        json!({ "studentId": student_id, "term": 2, "format": "csv" }),
    );
    let csv = single.get("csv").and_then(|v| v.as_str()).expect("csv");
    assert!(csv.contains("Subject,Level,Final Percentage,Grade Average"));
    assert!(csv.contains("\"Mathematics\",7,88,85"));
    // the incomplete entry exports blank cells, never zeros
    assert!(csv.contains("\"History\",,,"));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "bad-format",
        "report.student",
        json!({ "studentId": student_id, "term": 2, "format": "xlsx" }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));
}
