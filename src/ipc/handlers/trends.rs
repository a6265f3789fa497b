use crate::calc::{self, PerformanceLevel, TrendFilters};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err_response, db_conn, load_student, load_subject_records, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn parse_filters(req: &Request) -> Result<TrendFilters, serde_json::Value> {
    let mut filters = TrendFilters::default();

    if let Some(raw) = req.params.get("terms") {
        if !raw.is_null() {
            let Some(arr) = raw.as_array() else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "terms must be an array of term numbers",
                    None,
                ));
            };
            let mut terms: Vec<i64> = Vec::with_capacity(arr.len());
            for v in arr {
                match v.as_i64() {
                    Some(t) if (1..=calc::TERM_COUNT as i64).contains(&t) => terms.push(t),
                    _ => {
                        return Err(err(
                            &req.id,
                            "bad_params",
                            format!("terms entries must be 1-{}", calc::TERM_COUNT),
                            Some(json!({ "terms": raw })),
                        ))
                    }
                }
            }
            filters.terms = Some(terms);
        }
    }

    if let Some(raw) = req.params.get("subjects") {
        if !raw.is_null() {
            let Some(arr) = raw.as_array() else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "subjects must be an array of subject names",
                    None,
                ));
            };
            let names: Vec<String> = arr
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            filters.subjects = Some(names);
        }
    }

    if let Some(raw) = req.params.get("performanceLevel") {
        if !raw.is_null() {
            let parsed = raw.as_str().and_then(PerformanceLevel::parse);
            let Some(level) = parsed else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "performanceLevel must be one of: excellent, good, needs-improvement, at-risk",
                    Some(json!({ "performanceLevel": raw })),
                ));
            };
            filters.performance_level = Some(level);
        }
    }

    Ok(filters)
}

fn handle_analyze(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filters = match parse_filters(req) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    if let Err(resp) = load_student(conn, req, &student_id) {
        return resp;
    }

    let subjects = match load_subject_records(conn, &student_id, None) {
        Ok(v) => v,
        Err(e) => return calc_err_response(&req.id, e),
    };
    let trends = calc::analyze_trends(&subjects, &filters);
    ok(
        &req.id,
        json!({
            "count": trends.len(),
            "subjects": trends,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "trends.analyze" => Some(handle_analyze(state, req)),
        _ => None,
    }
}
