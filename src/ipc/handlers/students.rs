use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err_response, db_conn, load_student, load_term_summaries, optional_str, required_str,
    StudentRow,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn student_json(
    conn: &Connection,
    req: &Request,
    row: &StudentRow,
) -> Result<serde_json::Value, serde_json::Value> {
    // One slot per term, null where nothing has been aggregated yet.
    let mut terms: Vec<serde_json::Value> = vec![serde_json::Value::Null; calc::TERM_COUNT];
    let summaries =
        load_term_summaries(conn, &row.id).map_err(|e| calc_err_response(&req.id, e))?;
    for s in summaries {
        if (1..=calc::TERM_COUNT as i64).contains(&s.term) {
            terms[(s.term - 1) as usize] = json!(s);
        }
    }

    Ok(json!({
        "id": row.id,
        "fullName": row.full_name,
        "email": row.email,
        "school": row.school,
        "grade": row.grade,
        "overallAverage": row.overall_average,
        "overallPerformanceStatus": row.overall_performance_status,
        "lastTermUpdated": row.last_term_updated,
        "lastTermSubmittedAt": row.last_term_submitted_at,
        "terms": terms,
    }))
}

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if !email.contains('@') {
        return err(
            &req.id,
            "bad_params",
            "email must contain '@'",
            Some(json!({ "email": email })),
        );
    }
    let school = optional_str(req, "school").filter(|s| !s.is_empty());
    let grade = optional_str(req, "grade").filter(|g| !g.is_empty());

    let existing: Option<String> = match conn
        .query_row("SELECT id FROM students WHERE email = ?", [&email], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_some() {
        return err(
            &req.id,
            "duplicate_email",
            "a student with this email is already registered",
            Some(json!({ "email": email })),
        );
    }

    let student_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, full_name, email, school, grade, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&student_id, &full_name, &email, &school, &grade, &created_at),
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": student_id }))
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
    let row = match load_student(conn, req, &student_id) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match student_json(conn, req, &row) {
        Ok(profile) => ok(&req.id, json!({ "student": profile })),
        Err(resp) => resp,
    }
}

fn handle_update_profile(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let school = optional_str(req, "school");
    let grade = optional_str(req, "grade");
    if school.is_none() && grade.is_none() {
        return err(
            &req.id,
            "bad_params",
            "provide school and/or grade to update",
            None,
        );
    }
    if let Some(s) = &school {
        if s.is_empty() {
            return err(&req.id, "bad_params", "school must not be empty", None);
        }
    }
    if let Some(g) = &grade {
        if g.is_empty() {
            return err(&req.id, "bad_params", "grade must not be empty", None);
        }
    }

    if let Some(s) = &school {
        if let Err(e) = conn.execute(
            "UPDATE students SET school = ? WHERE id = ?",
            (s, &student_id),
        ) {
            return err(&req.id, "db_write_failed", e.to_string(), None);
        }
    }
    if let Some(g) = &grade {
        if let Err(e) = conn.execute(
            "UPDATE students SET grade = ? WHERE id = ?",
            (g, &student_id),
        ) {
            return err(&req.id, "db_write_failed", e.to_string(), None);
        }
    }

    let row = match load_student(conn, req, &student_id) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match student_json(conn, req, &row) {
        Ok(profile) => ok(&req.id, json!({ "student": profile })),
        Err(resp) => resp,
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, full_name, email, school, grade, overall_average, overall_performance_status
         FROM students
         ORDER BY full_name, email",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "school": r.get::<_, Option<String>>(3)?,
                "grade": r.get::<_, Option<String>>(4)?,
                "overallAverage": r.get::<_, Option<i64>>(5)?,
                "overallPerformanceStatus": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match students {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.register" => Some(handle_register(state, req)),
        "students.get" => Some(handle_get(state, req)),
        "students.updateProfile" => Some(handle_update_profile(state, req)),
        "students.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
