use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Terms per academic year. Term numbers are 1-based.
pub const TERM_COUNT: usize = 4;

/// A term must carry between 6 and 9 subjects to be submitted.
pub const MIN_SUBJECTS_PER_TERM: usize = 6;
pub const MAX_SUBJECTS_PER_TERM: usize = 9;

/// Trend deltas within +/-5 of zero read as stable.
pub const TREND_STABLE_DELTA: f64 = 5.0;

/// Fixed curriculum catalog. Advisory: pickers read it, the store does not
/// enforce membership.
pub const SUBJECT_CATALOG: &[&str] = &[
    "Accounting",
    "Afrikaans First Additional Language",
    "Afrikaans Home Language",
    "Agricultural Sciences",
    "Business Studies",
    "Computer Applications Technology",
    "Consumer Studies",
    "Dramatic Arts",
    "Economics",
    "Engineering Graphics and Design",
    "English First Additional Language",
    "English Home Language",
    "Geography",
    "History",
    "Information Technology",
    "IsiXhosa Home Language",
    "IsiZulu Home Language",
    "Life Orientation",
    "Life Sciences",
    "Mathematical Literacy",
    "Mathematics",
    "Music",
    "Physical Sciences",
    "Sesotho Home Language",
    "Tourism",
    "Visual Arts",
];

/// Half-up rounding to a whole percent: `Int(x + 0.5)`.
/// Canonical rounding rule for term and overall averages.
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// Half-up rounding kept at 1 decimal, used for trend figures:
/// `Int(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Three-band status used everywhere an average is classified.
/// Thresholds are the submission-path 60/40 pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceStatus {
    DoingWell,
    NeedsSupport,
    AtRisk,
    NoData,
}

impl PerformanceStatus {
    pub fn from_average(average: i64) -> Self {
        if average >= 60 {
            PerformanceStatus::DoingWell
        } else if average >= 40 {
            PerformanceStatus::NeedsSupport
        } else {
            PerformanceStatus::AtRisk
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceStatus::DoingWell => "Doing Well",
            PerformanceStatus::NeedsSupport => "Needs Support",
            PerformanceStatus::AtRisk => "At Risk",
            PerformanceStatus::NoData => "No Data",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "doing well" => Some(PerformanceStatus::DoingWell),
            "needs support" => Some(PerformanceStatus::NeedsSupport),
            "at risk" => Some(PerformanceStatus::AtRisk),
            "no data" => Some(PerformanceStatus::NoData),
            _ => None,
        }
    }
}

impl Serialize for PerformanceStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Four-band scheme used only for trend/chart classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceLevel {
    Excellent,
    Good,
    NeedsImprovement,
    AtRisk,
}

impl PerformanceLevel {
    pub fn from_average(average: f64) -> Self {
        if average >= 80.0 {
            PerformanceLevel::Excellent
        } else if average >= 60.0 {
            PerformanceLevel::Good
        } else if average >= 40.0 {
            PerformanceLevel::NeedsImprovement
        } else {
            PerformanceLevel::AtRisk
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceLevel::Excellent => "excellent",
            PerformanceLevel::Good => "good",
            PerformanceLevel::NeedsImprovement => "needs-improvement",
            PerformanceLevel::AtRisk => "at-risk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "excellent" => Some(PerformanceLevel::Excellent),
            "good" => Some(PerformanceLevel::Good),
            "needs-improvement" => Some(PerformanceLevel::NeedsImprovement),
            "at-risk" => Some(PerformanceLevel::AtRisk),
            _ => None,
        }
    }
}

impl Serialize for PerformanceLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Improvement,
    Decline,
    Stable,
}

impl TrendDirection {
    pub fn from_delta(delta: f64) -> Self {
        if delta > TREND_STABLE_DELTA {
            TrendDirection::Improvement
        } else if delta < -TREND_STABLE_DELTA {
            TrendDirection::Decline
        } else {
            TrendDirection::Stable
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrendDirection::Improvement => "improvement",
            TrendDirection::Decline => "decline",
            TrendDirection::Stable => "stable",
        }
    }
}

impl Serialize for TrendDirection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One subject's result for one term, as stored. Numeric fields are None when
/// the raw entry failed normalization; such rows sit in the missing-data
/// bucket and never contribute to an average.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRecord {
    pub id: String,
    pub term: i64,
    pub name: String,
    pub level: Option<i64>,
    pub final_percentage: Option<f64>,
    pub grade_average: Option<f64>,
}

/// Raw form values for one subject entry. Numeric fields arrive as JSON
/// numbers or strings; the normalizer owns coercion.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSubjectEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub level: serde_json::Value,
    #[serde(default)]
    pub final_percentage: serde_json::Value,
    #[serde(default)]
    pub grade_average: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FieldIssue {
    pub field: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSubject {
    pub name: String,
    pub level: Option<i64>,
    pub final_percentage: Option<f64>,
    pub grade_average: Option<f64>,
    /// Warnings and soft failures; never blocks storing the entry.
    pub issues: Vec<FieldIssue>,
}

fn coerce_f64(raw: &serde_json::Value) -> Option<f64> {
    match raw {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn coerce_i64(raw: &serde_json::Value) -> Option<i64> {
    match raw {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn percentage_field(
    raw: &serde_json::Value,
    field: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<f64> {
    if raw.is_null() {
        issues.push(FieldIssue {
            field: field.to_string(),
            reason: "missing percentage data".to_string(),
        });
        return None;
    }
    match coerce_f64(raw) {
        Some(v) if v.is_finite() && (0.0..=100.0).contains(&v) => Some(v),
        Some(v) => {
            issues.push(FieldIssue {
                field: field.to_string(),
                reason: format!("{} must be between 0 and 100", v),
            });
            None
        }
        None => {
            issues.push(FieldIssue {
                field: field.to_string(),
                reason: "not a number".to_string(),
            });
            None
        }
    }
}

/// Disjoint percentage band for a curriculum level.
/// 1: 0-29, 2: 30-39, 3: 40-49, 4: 50-59, 5: 60-69, 6: 70-79, 7: 80-100.
pub fn level_band(level: i64) -> Option<(f64, f64)> {
    match level {
        1 => Some((0.0, 29.0)),
        2 => Some((30.0, 39.0)),
        3 => Some((40.0, 49.0)),
        4 => Some((50.0, 59.0)),
        5 => Some((60.0, 69.0)),
        6 => Some((70.0, 79.0)),
        7 => Some((80.0, 100.0)),
        _ => None,
    }
}

/// Subject Record Normalizer. Pure: the caller owns persistence.
///
/// An empty name is the only hard rejection. Out-of-range or unparseable
/// numeric fields come back as None with a field-specific issue; the entry
/// stays usable for the missing-data bucket.
pub fn normalize_subject_entry(raw: &RawSubjectEntry) -> Result<NormalizedSubject, CalcError> {
    let name = raw.name.trim().to_string();
    if name.is_empty() {
        return Err(CalcError::new(
            "bad_params",
            "subject name must not be empty",
        ));
    }

    let mut issues: Vec<FieldIssue> = Vec::new();

    let level = if raw.level.is_null() {
        issues.push(FieldIssue {
            field: "level".to_string(),
            reason: "missing level".to_string(),
        });
        None
    } else {
        match coerce_i64(&raw.level) {
            Some(v) if (1..=7).contains(&v) => Some(v),
            Some(v) => {
                issues.push(FieldIssue {
                    field: "level".to_string(),
                    reason: format!("level {} is outside 1-7", v),
                });
                None
            }
            None => {
                issues.push(FieldIssue {
                    field: "level".to_string(),
                    reason: "not an integer".to_string(),
                });
                None
            }
        }
    };

    let final_percentage = percentage_field(&raw.final_percentage, "finalPercentage", &mut issues);
    let grade_average = percentage_field(&raw.grade_average, "gradeAverage", &mut issues);

    // Soft consistency check only; a mismatch never blocks the entry.
    if let (Some(level), Some(pct)) = (level, final_percentage) {
        if let Some((lo, hi)) = level_band(level) {
            if pct < lo || pct > hi {
                issues.push(FieldIssue {
                    field: "level".to_string(),
                    reason: format!(
                        "level {} expects {}-{}% but finalPercentage is {}",
                        level, lo, hi, pct
                    ),
                });
            }
        }
    }

    Ok(NormalizedSubject {
        name,
        level,
        final_percentage,
        grade_average,
        issues,
    })
}

/// Valid-for-aggregation rule: percentage present, finite, inside [0,100].
pub fn valid_percentage(p: Option<f64>) -> Option<f64> {
    match p {
        Some(v) if v.is_finite() && (0.0..=100.0).contains(&v) => Some(v),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MissingSubject {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TermAggregate {
    pub term: i64,
    /// Whole percent, half-up rounded. 0 when no subject is usable.
    pub average: i64,
    pub status: PerformanceStatus,
    pub valid_count: usize,
    pub subject_count: usize,
    /// Subjects excluded from the mean, surfaced separately. Never treated
    /// as zero.
    pub missing_data: Vec<MissingSubject>,
}

/// Term Aggregator. Deterministic and side-effect-free.
pub fn aggregate_term(subjects: &[SubjectRecord], term: i64) -> TermAggregate {
    let in_term: Vec<&SubjectRecord> = subjects.iter().filter(|s| s.term == term).collect();

    let mut sum = 0.0_f64;
    let mut valid_count = 0_usize;
    let mut missing_data: Vec<MissingSubject> = Vec::new();
    for s in &in_term {
        match valid_percentage(s.final_percentage) {
            Some(v) => {
                sum += v;
                valid_count += 1;
            }
            None => missing_data.push(MissingSubject {
                name: s.name.clone(),
                reason: "missing percentage data".to_string(),
            }),
        }
    }

    let (average, status) = if valid_count == 0 {
        (0, PerformanceStatus::NoData)
    } else {
        let avg = round_half_up(sum / valid_count as f64);
        (avg, PerformanceStatus::from_average(avg))
    };

    TermAggregate {
        term,
        average,
        status,
        valid_count,
        subject_count: in_term.len(),
        missing_data,
    }
}

/// Submission-path validation: everything that must hold before a term may
/// be aggregated and persisted. Returns the first violation with a
/// field-specific message; no writes happen on rejection.
pub fn validate_term_for_submit(
    subjects: &[SubjectRecord],
    term: i64,
    grade: Option<&str>,
    school: Option<&str>,
) -> Result<(), CalcError> {
    if grade.map(|g| g.trim().is_empty()).unwrap_or(true) {
        return Err(CalcError::new(
            "profile_incomplete",
            "select a grade before submitting a term",
        ));
    }
    if school.map(|s| s.trim().is_empty()).unwrap_or(true) {
        return Err(CalcError::new(
            "profile_incomplete",
            "select a school before submitting a term",
        ));
    }

    let in_term: Vec<&SubjectRecord> = subjects.iter().filter(|s| s.term == term).collect();
    if in_term.len() < MIN_SUBJECTS_PER_TERM {
        return Err(CalcError::new(
            "subject_count",
            format!(
                "term {} has {} subjects; at least {} are required",
                term,
                in_term.len(),
                MIN_SUBJECTS_PER_TERM
            ),
        )
        .with_details(serde_json::json!({ "term": term, "count": in_term.len() })));
    }
    if in_term.len() > MAX_SUBJECTS_PER_TERM {
        return Err(CalcError::new(
            "subject_count",
            format!(
                "term {} has {} subjects; at most {} are allowed",
                term,
                in_term.len(),
                MAX_SUBJECTS_PER_TERM
            ),
        )
        .with_details(serde_json::json!({ "term": term, "count": in_term.len() })));
    }

    for s in &in_term {
        if s.level.is_none() {
            return Err(CalcError::new(
                "bad_params",
                format!("subject '{}' is missing its level", s.name),
            ));
        }
        if valid_percentage(s.final_percentage).is_none() {
            return Err(CalcError::new(
                "bad_params",
                format!("subject '{}' is missing its final percentage", s.name),
            ));
        }
        if valid_percentage(s.grade_average).is_none() {
            return Err(CalcError::new(
                "bad_params",
                format!("subject '{}' is missing its grade average", s.name),
            ));
        }
    }

    Ok(())
}

/// Overall rollup across completed terms: half-up mean of their whole-percent
/// averages. `(0, NoData)` when nothing is completed yet.
pub fn overall_rollup(completed_averages: &[i64]) -> (i64, PerformanceStatus) {
    if completed_averages.is_empty() {
        return (0, PerformanceStatus::NoData);
    }
    let sum: i64 = completed_averages.iter().sum();
    let avg = round_half_up(sum as f64 / completed_averages.len() as f64);
    (avg, PerformanceStatus::from_average(avg))
}

#[derive(Debug, Clone, Default)]
pub struct TrendFilters {
    /// Subset of terms to consider; slots outside it stay empty. None = all.
    pub terms: Option<Vec<i64>>,
    /// Explicit subject-name allow-list (exact, trimmed-name match).
    pub subjects: Option<Vec<String>>,
    /// Keep only subjects classified into this band.
    pub performance_level: Option<PerformanceLevel>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubjectTrend {
    pub name: String,
    /// One slot per term, term N in slot N-1. None covers both "not taken"
    /// and "invalid data"; the two are not distinguished here.
    pub term_performances: [Option<f64>; TERM_COUNT],
    /// Mean of present slots, 1 decimal.
    pub average: f64,
    /// Last present minus first present, 1 decimal; 0 with fewer than two
    /// data points. A first-vs-last delta, not a slope.
    pub trend: f64,
    pub direction: TrendDirection,
    /// Population standard deviation of present slots, 1 decimal.
    pub consistency: f64,
    pub performance_level: PerformanceLevel,
}

fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Cross-Term Analyzer. Groups one student's records by name (trimmed,
/// case-sensitive) and derives per-subject trend figures. Subjects with no
/// usable data in any considered term are dropped from the output.
pub fn analyze_trends(subjects: &[SubjectRecord], filters: &TrendFilters) -> Vec<SubjectTrend> {
    let term_included = |term: i64| -> bool {
        match &filters.terms {
            Some(terms) => terms.contains(&term),
            None => true,
        }
    };

    let mut slots_by_name: BTreeMap<String, [Option<f64>; TERM_COUNT]> = BTreeMap::new();
    for s in subjects {
        if s.term < 1 || s.term > TERM_COUNT as i64 || !term_included(s.term) {
            continue;
        }
        if let Some(allow) = &filters.subjects {
            if !allow.iter().any(|n| n == &s.name) {
                continue;
            }
        }
        let slots = slots_by_name.entry(s.name.clone()).or_default();
        slots[(s.term - 1) as usize] = valid_percentage(s.final_percentage);
    }

    let mut out: Vec<SubjectTrend> = Vec::new();
    for (name, slots) in slots_by_name {
        let present: Vec<f64> = slots.iter().flatten().copied().collect();
        if present.is_empty() {
            continue;
        }

        let average = present.iter().sum::<f64>() / present.len() as f64;
        let delta = if present.len() >= 2 {
            present[present.len() - 1] - present[0]
        } else {
            0.0
        };
        let performance_level = PerformanceLevel::from_average(average);
        if let Some(band) = filters.performance_level {
            if band != performance_level {
                continue;
            }
        }

        out.push(SubjectTrend {
            name,
            term_performances: slots,
            average: round_off_1_decimal(average),
            trend: round_off_1_decimal(delta),
            direction: TrendDirection::from_delta(delta),
            consistency: round_off_1_decimal(population_std_dev(&present)),
            performance_level,
        });
    }
    out
}
