use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err_response, db_conn, db_conn_mut, load_student, load_subject_records,
    load_term_summaries, refresh_overall, required_str, required_term, upsert_term_summary,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;

fn handle_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(resp) = load_student(conn, req, &student_id) {
        return resp;
    }
    let subjects = match load_subject_records(conn, &student_id, Some(term)) {
        Ok(v) => v,
        Err(e) => return calc_err_response(&req.id, e),
    };
    ok(
        &req.id,
        json!({ "aggregate": calc::aggregate_term(&subjects, term) }),
    )
}

/// Submit flow: validate, aggregate, persist. Validation failures happen
/// before any write; a store failure inside the transaction leaves every
/// row untouched so the caller can retry with nothing lost.
fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match required_term(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let conn = match db_conn_mut(state, req) {
        Ok(c) => c,
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
    if let Err(e) = calc::validate_term_for_submit(
        &subjects,
        term,
        student.grade.as_deref(),
        student.school.as_deref(),
    ) {
        return calc_err_response(&req.id, e);
    }

    let aggregate = calc::aggregate_term(&subjects, term);
    let submitted_at = Utc::now().to_rfc3339();

    let tx = match conn.transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    if let Err(e) = upsert_term_summary(&tx, &student_id, &aggregate, true, Some(&submitted_at)) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    if let Err(e) = tx.execute(
        "UPDATE students SET last_term_updated = ?, last_term_submitted_at = ? WHERE id = ?",
        (term, &submitted_at, &student_id),
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    if let Err(e) = refresh_overall(&tx, &student_id) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }

    let overall: Result<(i64, String), _> = conn.query_row(
        "SELECT overall_average, overall_performance_status FROM students WHERE id = ?",
        [&student_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    );
    let (overall_average, overall_status) = match overall {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "aggregate": aggregate,
            "completed": true,
            "submittedAt": submitted_at,
            "overallAverage": overall_average,
            "overallPerformanceStatus": overall_status,
        }),
    )
}

/// Explicit Submitted -> Editing transition. Prior data is kept; the term
/// simply drops out of the overall rollup until it is submitted again.
fn handle_reopen(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match required_term(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let conn = match db_conn_mut(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(resp) = load_student(conn, req, &student_id) {
        return resp;
    }

    let completed: Option<i64> = match conn
        .query_row(
            "SELECT completed FROM term_summaries WHERE student_id = ? AND term = ?",
            (&student_id, term),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match completed {
        Some(1) => {}
        Some(_) | None => {
            return err(
                &req.id,
                "bad_params",
                format!("term {} is not submitted", term),
                Some(json!({ "term": term })),
            )
        }
    }

    let tx = match conn.transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "UPDATE term_summaries SET completed = 0, submitted_at = NULL
         WHERE student_id = ? AND term = ?",
        (&student_id, term),
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    if let Err(e) = refresh_overall(&tx, &student_id) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "term": term, "completed": false }))
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(resp) = load_student(conn, req, &student_id) {
        return resp;
    }
    let summaries = match load_term_summaries(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return calc_err_response(&req.id, e),
    };
    match summaries.into_iter().find(|s| s.term == term) {
        Some(summary) => ok(&req.id, json!({ "summary": summary })),
        None => err(
            &req.id,
            "not_found",
            format!("no summary for term {}", term),
            Some(json!({ "term": term })),
        ),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = load_student(conn, req, &student_id) {
        return resp;
    }
    match load_term_summaries(conn, &student_id) {
        Ok(summaries) => ok(&req.id, json!({ "summaries": summaries })),
        Err(e) => calc_err_response(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "term.preview" => Some(handle_preview(state, req)),
        "term.submit" => Some(handle_submit(state, req)),
        "term.reopen" => Some(handle_reopen(state, req)),
        "term.get" => Some(handle_get(state, req)),
        "term.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
