use crate::calc::{self, NormalizedSubject, RawSubjectEntry, SubjectRecord};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err_response, db_conn, db_conn_mut, load_student, load_subject_records, required_str,
    required_term, term_completed, upsert_term_summary,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde_json::json;
use uuid::Uuid;

fn handle_catalog(req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "subjects": calc::SUBJECT_CATALOG }))
}

fn reject_if_submitted(
    conn: &Connection,
    req: &Request,
    student_id: &str,
    term: i64,
) -> Result<(), serde_json::Value> {
    match term_completed(conn, student_id, term) {
        Ok(true) => Err(err(
            &req.id,
            "term_submitted",
            format!("term {} is submitted; reopen it before editing", term),
            Some(json!({ "term": term })),
        )),
        Ok(false) => Ok(()),
        Err(e) => Err(calc_err_response(&req.id, e)),
    }
}

fn normalize_from_params(
    req: &Request,
    name_override: Option<String>,
) -> Result<NormalizedSubject, serde_json::Value> {
    let mut raw: RawSubjectEntry = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return Err(err(&req.id, "bad_params", e.to_string(), None)),
    };
    if let Some(name) = name_override {
        raw.name = name;
    }
    calc::normalize_subject_entry(&raw).map_err(|e| calc_err_response(&req.id, e))
}

/// Recompute and persist the term summary for an in-edit term. Runs inside
/// the caller's transaction so a failed write rolls the whole edit back.
fn reaggregate_in_tx(
    tx: &Transaction<'_>,
    student_id: &str,
    term: i64,
) -> Result<calc::TermAggregate, calc::CalcError> {
    let subjects = load_subject_records(tx, student_id, Some(term))?;
    let aggregate = calc::aggregate_term(&subjects, term);
    upsert_term_summary(tx, student_id, &aggregate, false, None)
        .map_err(|e| calc::CalcError::new("db_write_failed", e.to_string()))?;
    tx.execute(
        "UPDATE students SET last_term_updated = ? WHERE id = ?",
        (term, student_id),
    )
    .map_err(|e| calc::CalcError::new("db_write_failed", e.to_string()))?;
    Ok(aggregate)
}

fn subject_json(s: &SubjectRecord) -> serde_json::Value {
    json!(s)
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
    let aggregate = calc::aggregate_term(&subjects, term);
    let completed = match term_completed(conn, &student_id, term) {
        Ok(v) => v,
        Err(e) => return calc_err_response(&req.id, e),
    };

    ok(
        &req.id,
        json!({
            "term": term,
            "completed": completed,
            "subjects": subjects.iter().map(subject_json).collect::<Vec<_>>(),
            "aggregate": aggregate,
        }),
    )
}

fn handle_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match required_term(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let norm = match normalize_from_params(req, None) {
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
    if let Err(resp) = reject_if_submitted(conn, req, &student_id, term) {
        return resp;
    }

    let duplicate: Option<String> = match conn
        .query_row(
            "SELECT id FROM subject_records WHERE student_id = ? AND term = ? AND name = ?",
            (&student_id, term, &norm.name),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if duplicate.is_some() {
        return err(
            &req.id,
            "duplicate_subject",
            format!("'{}' is already recorded for term {}", norm.name, term),
            Some(json!({ "name": norm.name, "term": term })),
        );
    }

    let tx = match conn.transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    let subject_id = Uuid::new_v4().to_string();
    let updated_at = Utc::now().to_rfc3339();
    if let Err(e) = tx.execute(
        "INSERT INTO subject_records(id, student_id, term, name, level, final_percentage,
                                     grade_average, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &subject_id,
            &student_id,
            term,
            &norm.name,
            norm.level,
            norm.final_percentage,
            norm.grade_average,
            &updated_at,
        ),
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    let aggregate = match reaggregate_in_tx(&tx, &student_id, term) {
        Ok(a) => a,
        Err(e) => return calc_err_response(&req.id, e),
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }

    let subject = SubjectRecord {
        id: subject_id,
        term,
        name: norm.name,
        level: norm.level,
        final_percentage: norm.final_percentage,
        grade_average: norm.grade_average,
    };
    ok(
        &req.id,
        json!({
            "subject": subject_json(&subject),
            "issues": norm.issues,
            "aggregate": aggregate,
        }),
    )
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let conn = match db_conn_mut(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let existing: Option<(i64, String)> = match conn
        .query_row(
            "SELECT term, name FROM subject_records WHERE id = ? AND student_id = ?",
            (&subject_id, &student_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((term, name)) = existing else {
        return err(
            &req.id,
            "not_found",
            "subject not found",
            Some(json!({ "subjectId": subject_id })),
        );
    };
    if let Err(resp) = reject_if_submitted(conn, req, &student_id, term) {
        return resp;
    }

    // Form saves replace the numeric fields wholesale; the name is fixed
    // (rename = remove + add).
    let norm = match normalize_from_params(req, Some(name)) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let tx = match conn.transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    let updated_at = Utc::now().to_rfc3339();
    if let Err(e) = tx.execute(
        "UPDATE subject_records
         SET level = ?, final_percentage = ?, grade_average = ?, updated_at = ?
         WHERE id = ?",
        (
            norm.level,
            norm.final_percentage,
            norm.grade_average,
            &updated_at,
            &subject_id,
        ),
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    let aggregate = match reaggregate_in_tx(&tx, &student_id, term) {
        Ok(a) => a,
        Err(e) => return calc_err_response(&req.id, e),
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }

    let subject = SubjectRecord {
        id: subject_id,
        term,
        name: norm.name,
        level: norm.level,
        final_percentage: norm.final_percentage,
        grade_average: norm.grade_average,
    };
    ok(
        &req.id,
        json!({
            "subject": subject_json(&subject),
            "issues": norm.issues,
            "aggregate": aggregate,
        }),
    )
}

fn handle_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let conn = match db_conn_mut(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let term: Option<i64> = match conn
        .query_row(
            "SELECT term FROM subject_records WHERE id = ? AND student_id = ?",
            (&subject_id, &student_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(term) = term else {
        return err(
            &req.id,
            "not_found",
            "subject not found",
            Some(json!({ "subjectId": subject_id })),
        );
    };
    if let Err(resp) = reject_if_submitted(conn, req, &student_id, term) {
        return resp;
    }

    // Delete and re-aggregate in one transaction: a failed summary write
    // rolls the delete back so client and store cannot diverge.
    let tx = match conn.transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM subject_records WHERE id = ?", [&subject_id]) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    let aggregate = match reaggregate_in_tx(&tx, &student_id, term) {
        Ok(a) => a,
        Err(e) => return calc_err_response(&req.id, e),
    };
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "removed": true,
            "term": term,
            "aggregate": aggregate,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.catalog" => Some(handle_catalog(req)),
        "subjects.list" => Some(handle_list(state, req)),
        "subjects.add" => Some(handle_add(state, req)),
        "subjects.update" => Some(handle_update(state, req)),
        "subjects.remove" => Some(handle_remove(state, req)),
        _ => None,
    }
}
