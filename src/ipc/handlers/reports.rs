use crate::calc::PerformanceStatus;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err_response, db_conn, load_student, load_subject_records, required_str, required_term,
};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, BulkSelection, StudentInfo};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFormat {
    Json,
    Csv,
}

fn parse_format(req: &Request) -> Result<ReportFormat, serde_json::Value> {
    match req
        .params
        .get("format")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        None | Some("json") => Ok(ReportFormat::Json),
        Some("csv") => Ok(ReportFormat::Csv),
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            "format must be one of: json, csv",
            Some(json!({ "format": other })),
        )),
    }
}

fn parse_selection(req: &Request) -> Result<BulkSelection, serde_json::Value> {
    let ids = req.params.get("studentIds").filter(|v| !v.is_null());
    let band = req.params.get("statusBand").filter(|v| !v.is_null());
    let grade = req.params.get("gradeLevel").filter(|v| !v.is_null());

    let given = [ids.is_some(), band.is_some(), grade.is_some()]
        .iter()
        .filter(|b| **b)
        .count();
    if given > 1 {
        return Err(err(
            &req.id,
            "bad_params",
            "use only one of studentIds, statusBand, gradeLevel",
            None,
        ));
    }

    if let Some(raw) = ids {
        let Some(arr) = raw.as_array() else {
            return Err(err(
                &req.id,
                "bad_params",
                "studentIds must be an array of ids",
                None,
            ));
        };
        let ids: Vec<String> = arr
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect();
        if ids.is_empty() {
            return Err(err(
                &req.id,
                "bad_params",
                "studentIds must not be empty",
                None,
            ));
        }
        return Ok(BulkSelection::StudentIds(ids));
    }
    if let Some(raw) = band {
        let parsed = raw.as_str().and_then(PerformanceStatus::parse);
        let Some(status) = parsed else {
            return Err(err(
                &req.id,
                "bad_params",
                "statusBand must be one of: Doing Well, Needs Support, At Risk, No Data",
                Some(json!({ "statusBand": raw })),
            ));
        };
        return Ok(BulkSelection::StatusBand(status));
    }
    if let Some(raw) = grade {
        let Some(g) = raw.as_str().map(|s| s.trim()).filter(|s| !s.is_empty()) else {
            return Err(err(
                &req.id,
                "bad_params",
                "gradeLevel must be a non-empty string",
                None,
            ));
        };
        return Ok(BulkSelection::GradeLevel(g.to_string()));
    }
    Ok(BulkSelection::All)
}

fn load_all_students(conn: &Connection) -> Result<Vec<StudentInfo>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, full_name, email, school, grade
         FROM students
         ORDER BY full_name, email",
    )?;
    stmt.query_map([], |r| {
        Ok(StudentInfo {
            id: r.get(0)?,
            full_name: r.get(1)?,
            email: r.get(2)?,
            school: r.get(3)?,
            grade: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

fn handle_student_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match required_term(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let format = match parse_format(req) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let student = match load_student(conn, req, &student_id) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let subjects = match load_subject_records(conn, &student_id, Some(term)) {
        Ok(v) => v,
        Err(e) => return calc_err_response(&req.id, e),
    };
    let info = StudentInfo {
        id: student.id,
        full_name: student.full_name,
        email: student.email,
        school: student.school,
        grade: student.grade,
    };
    let built = report::build_student_report(&info, &subjects, term);

    match format {
        ReportFormat::Json => ok(&req.id, json!({ "report": built })),
        ReportFormat::Csv => ok(
            &req.id,
            json!({ "format": "csv", "csv": report::student_report_csv(&built) }),
        ),
    }
}

fn handle_bulk_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let term = match required_term(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let format = match parse_format(req) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let selection = match parse_selection(req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let infos = match load_all_students(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut students: Vec<(StudentInfo, Vec<crate::calc::SubjectRecord>)> =
        Vec::with_capacity(infos.len());
    for info in infos {
        let subjects = match load_subject_records(conn, &info.id, Some(term)) {
            Ok(v) => v,
            Err(e) => return calc_err_response(&req.id, e),
        };
        students.push((info, subjects));
    }

    let generated_at = Utc::now().to_rfc3339();
    let built = match report::build_bulk_report(&students, term, &selection, generated_at) {
        Ok(r) => r,
        Err(e) => return calc_err_response(&req.id, e),
    };

    match format {
        ReportFormat::Json => ok(&req.id, json!({ "report": built })),
        ReportFormat::Csv => ok(
            &req.id,
            json!({ "format": "csv", "csv": report::bulk_report_csv(&built) }),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "report.student" => Some(handle_student_report(state, req)),
        "report.bulk" => Some(handle_bulk_report(state, req)),
        _ => None,
    }
}
