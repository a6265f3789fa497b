use crate::calc::{
    self, CalcError, PerformanceStatus, SubjectRecord, TermAggregate,
};
use serde::Serialize;

/// Profile fields a report needs about one student.
#[derive(Debug, Clone)]
pub struct StudentInfo {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub school: Option<String>,
    pub grade: Option<String>,
}

/// How the caller picks students for a bulk report.
#[derive(Debug, Clone)]
pub enum BulkSelection {
    All,
    StudentIds(Vec<String>),
    StatusBand(PerformanceStatus),
    GradeLevel(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkReportRow {
    pub name: String,
    pub email: String,
    pub school: String,
    pub grade: String,
    pub term_average: i64,
    pub term_status: PerformanceStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: PerformanceStatus,
    pub count: usize,
    /// Whole-percent share of the report's rows.
    pub percent: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReport {
    pub term: i64,
    pub generated_at: String,
    pub total_students: usize,
    pub summary: Vec<StatusCount>,
    pub students: Vec<BulkReportRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReportHeader {
    pub name: String,
    pub email: String,
    pub school: String,
    pub grade: String,
    pub average: i64,
    pub status: PerformanceStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student: StudentReportHeader,
    pub term: i64,
    pub aggregate: TermAggregate,
    pub subjects: Vec<SubjectRecord>,
}

fn status_summary(rows: &[BulkReportRow]) -> Vec<StatusCount> {
    let order = [
        PerformanceStatus::DoingWell,
        PerformanceStatus::NeedsSupport,
        PerformanceStatus::AtRisk,
        PerformanceStatus::NoData,
    ];
    let total = rows.len();
    order
        .iter()
        .map(|&status| {
            let count = rows.iter().filter(|r| r.term_status == status).count();
            let percent = if total > 0 {
                calc::round_half_up(100.0 * count as f64 / total as f64)
            } else {
                0
            };
            StatusCount {
                status,
                count,
                percent,
            }
        })
        .collect()
}

/// Bulk/Term Report Builder: one row per selected student, ordered by name,
/// with a counts-by-status header. A selection that matches nobody is an
/// error, never an empty document.
pub fn build_bulk_report(
    students: &[(StudentInfo, Vec<SubjectRecord>)],
    term: i64,
    selection: &BulkSelection,
    generated_at: String,
) -> Result<BulkReport, CalcError> {
    let mut rows: Vec<BulkReportRow> = Vec::new();
    for (info, subjects) in students {
        let selected = match selection {
            BulkSelection::All => true,
            BulkSelection::StudentIds(ids) => ids.iter().any(|id| id == &info.id),
            BulkSelection::GradeLevel(grade) => info
                .grade
                .as_deref()
                .map(|g| g.eq_ignore_ascii_case(grade))
                .unwrap_or(false),
            // Band selection applies to the computed term status below.
            BulkSelection::StatusBand(_) => true,
        };
        if !selected {
            continue;
        }

        let agg = calc::aggregate_term(subjects, term);
        if let BulkSelection::StatusBand(band) = selection {
            if agg.status != *band {
                continue;
            }
        }

        rows.push(BulkReportRow {
            name: info.full_name.clone(),
            email: info.email.clone(),
            school: info.school.clone().unwrap_or_default(),
            grade: info.grade.clone().unwrap_or_default(),
            term_average: agg.average,
            term_status: agg.status,
        });
    }

    if rows.is_empty() {
        return Err(CalcError::new(
            "empty_selection",
            "no students match the report selection",
        ));
    }

    rows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.email.cmp(&b.email)));
    let summary = status_summary(&rows);
    Ok(BulkReport {
        term,
        generated_at,
        total_students: rows.len(),
        summary,
        students: rows,
    })
}

pub fn build_student_report(
    info: &StudentInfo,
    subjects: &[SubjectRecord],
    term: i64,
) -> StudentReport {
    let aggregate = calc::aggregate_term(subjects, term);
    let term_subjects: Vec<SubjectRecord> = subjects
        .iter()
        .filter(|s| s.term == term)
        .cloned()
        .collect();
    StudentReport {
        student: StudentReportHeader {
            name: info.full_name.clone(),
            email: info.email.clone(),
            school: info.school.clone().unwrap_or_default(),
            grade: info.grade.clone().unwrap_or_default(),
            average: aggregate.average,
            status: aggregate.status,
        },
        term,
        aggregate,
        subjects: term_subjects,
    }
}

fn csv_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn fmt_percentage(p: Option<f64>) -> String {
    match p {
        Some(v) => format!("{}", calc::round_half_up(v)),
        None => String::new(),
    }
}

/// CSV fallback for the bulk report. Double-quoted string fields, header
/// `Name,Email,School,Grade,Term N Average,Term N Status`.
pub fn bulk_report_csv(report: &BulkReport) -> String {
    let mut out = format!(
        "Name,Email,School,Grade,Term {} Average,Term {} Status\n",
        report.term, report.term
    );
    for r in &report.students {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_quote(&r.name),
            csv_quote(&r.email),
            csv_quote(&r.school),
            csv_quote(&r.grade),
            r.term_average,
            csv_quote(r.term_status.as_str()),
        ));
    }
    out
}

/// CSV fallback for the single-student report: the one-row bulk equivalent
/// followed by a per-subject table.
pub fn student_report_csv(report: &StudentReport) -> String {
    let s = &report.student;
    let mut out = format!(
        "Name,Email,School,Grade,Term {} Average,Term {} Status\n",
        report.term, report.term
    );
    out.push_str(&format!(
        "{},{},{},{},{},{}\n",
        csv_quote(&s.name),
        csv_quote(&s.email),
        csv_quote(&s.school),
        csv_quote(&s.grade),
        s.average,
        csv_quote(s.status.as_str()),
    ));
    out.push('\n');
    out.push_str("Subject,Level,Final Percentage,Grade Average\n");
    for subj in &report.subjects {
        out.push_str(&format!(
            "{},{},{},{}\n",
            csv_quote(&subj.name),
            subj.level.map(|l| l.to_string()).unwrap_or_default(),
            fmt_percentage(subj.final_percentage),
            fmt_percentage(subj.grade_average),
        ));
    }
    out
}
