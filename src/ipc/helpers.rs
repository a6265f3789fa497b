use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use super::error::err;
use super::types::{AppState, Request};
use crate::calc::{self, CalcError, SubjectRecord, TermAggregate};

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
}

pub fn required_term(req: &Request) -> Result<i64, serde_json::Value> {
    let term = req.params.get("term").and_then(|v| v.as_i64());
    match term {
        Some(t) if (1..=calc::TERM_COUNT as i64).contains(&t) => Ok(t),
        Some(t) => Err(err(
            &req.id,
            "bad_params",
            format!("term must be 1-{}", calc::TERM_COUNT),
            Some(json!({ "term": t })),
        )),
        None => Err(err(&req.id, "bad_params", "missing term", None)),
    }
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn db_conn_mut<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<&'a mut Connection, serde_json::Value> {
    state
        .db
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn calc_err_response(id: &str, e: CalcError) -> serde_json::Value {
    err(id, &e.code, e.message, e.details)
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub school: Option<String>,
    pub grade: Option<String>,
    pub overall_average: Option<i64>,
    pub overall_performance_status: Option<String>,
    pub last_term_updated: Option<i64>,
    pub last_term_submitted_at: Option<String>,
}

pub fn load_student(
    conn: &Connection,
    req: &Request,
    student_id: &str,
) -> Result<StudentRow, serde_json::Value> {
    let row = conn
        .query_row(
            "SELECT id, full_name, email, school, grade, overall_average,
                    overall_performance_status, last_term_updated, last_term_submitted_at
             FROM students
             WHERE id = ?",
            [student_id],
            |r| {
                Ok(StudentRow {
                    id: r.get(0)?,
                    full_name: r.get(1)?,
                    email: r.get(2)?,
                    school: r.get(3)?,
                    grade: r.get(4)?,
                    overall_average: r.get(5)?,
                    overall_performance_status: r.get(6)?,
                    last_term_updated: r.get(7)?,
                    last_term_submitted_at: r.get(8)?,
                })
            },
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;

    row.ok_or_else(|| {
        err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "studentId": student_id })),
        )
    })
}

pub fn load_subject_records(
    conn: &Connection,
    student_id: &str,
    term: Option<i64>,
) -> Result<Vec<SubjectRecord>, CalcError> {
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<SubjectRecord> {
        Ok(SubjectRecord {
            id: r.get(0)?,
            term: r.get(1)?,
            name: r.get(2)?,
            level: r.get(3)?,
            final_percentage: r.get(4)?,
            grade_average: r.get(5)?,
        })
    };

    let result = match term {
        Some(t) => {
            let mut stmt = conn
                .prepare(
                    "SELECT id, term, name, level, final_percentage, grade_average
                     FROM subject_records
                     WHERE student_id = ? AND term = ?
                     ORDER BY name",
                )
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
            stmt.query_map((student_id, t), map_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        }
        None => {
            let mut stmt = conn
                .prepare(
                    "SELECT id, term, name, level, final_percentage, grade_average
                     FROM subject_records
                     WHERE student_id = ?
                     ORDER BY term, name",
                )
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
            stmt.query_map([student_id], map_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        }
    };

    result.map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermSummaryRow {
    pub term: i64,
    pub average: i64,
    pub status: String,
    pub completed: bool,
    pub submitted_at: Option<String>,
}

pub fn load_term_summaries(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<TermSummaryRow>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT term, average, status, completed, submitted_at
             FROM term_summaries
             WHERE student_id = ?
             ORDER BY term",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([student_id], |r| {
        Ok(TermSummaryRow {
            term: r.get(0)?,
            average: r.get(1)?,
            status: r.get(2)?,
            completed: r.get::<_, i64>(3)? != 0,
            submitted_at: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

pub fn term_completed(
    conn: &Connection,
    student_id: &str,
    term: i64,
) -> Result<bool, CalcError> {
    let completed: Option<i64> = conn
        .query_row(
            "SELECT completed FROM term_summaries WHERE student_id = ? AND term = ?",
            (student_id, term),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    Ok(completed.unwrap_or(0) != 0)
}

pub fn upsert_term_summary(
    conn: &Connection,
    student_id: &str,
    aggregate: &TermAggregate,
    completed: bool,
    submitted_at: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO term_summaries(student_id, term, average, status, completed, submitted_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, term) DO UPDATE SET
           average = excluded.average,
           status = excluded.status,
           completed = excluded.completed,
           submitted_at = excluded.submitted_at",
        (
            student_id,
            aggregate.term,
            aggregate.average,
            aggregate.status.as_str(),
            completed as i64,
            submitted_at,
        ),
    )?;
    Ok(())
}

/// Recompute the overall rollup from completed term summaries and write it
/// back to the student row.
pub fn refresh_overall(conn: &Connection, student_id: &str) -> Result<(), rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT average FROM term_summaries
         WHERE student_id = ? AND completed = 1
         ORDER BY term",
    )?;
    let averages: Vec<i64> = stmt
        .query_map([student_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let (overall, status) = calc::overall_rollup(&averages);
    conn.execute(
        "UPDATE students SET overall_average = ?, overall_performance_status = ? WHERE id = ?",
        (overall, status.as_str(), student_id),
    )?;
    Ok(())
}
