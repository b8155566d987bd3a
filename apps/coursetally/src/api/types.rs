//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API. Aggregate
//! payloads reuse the core's serializable view types directly.

use coursetally_core::{
    InstructorAggregate, MetricAggregate, MetricName, Rating, SectionRef, TallyError, Term,
    TermSummary,
};
use serde::{Deserialize, Serialize};

/// Maximum length accepted for any identifier-ish request field.
///
/// Subjects, course numbers, sections, and metric names are all short
/// in practice; the cap stops oversized payloads at the boundary.
pub const MAX_FIELD_LENGTH: usize = 64;

fn check_field(name: &str, value: &str) -> Result<(), TallyError> {
    if value.is_empty() {
        return Err(TallyError::BadInput(format!("{name} must not be empty")));
    }
    if value.len() > MAX_FIELD_LENGTH {
        return Err(TallyError::BadInput(format!(
            "{name} length {} exceeds maximum {} bytes",
            value.len(),
            MAX_FIELD_LENGTH
        )));
    }
    // Composite storage keys are NUL-delimited; a NUL inside an
    // identifier would corrupt them.
    if value.contains('\u{0}') {
        return Err(TallyError::BadInput(format!(
            "{name} must not contain NUL bytes"
        )));
    }
    Ok(())
}

/// Parse a comma-separated metric filter ("overall,difficulty").
#[must_use]
pub fn parse_metric_filter(raw: Option<&str>) -> Option<Vec<MetricName>> {
    let raw = raw?;
    let metrics: Vec<MetricName> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(MetricName::new)
        .collect();
    if metrics.is_empty() { None } else { Some(metrics) }
}

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Engine status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub rating_count: u64,
    pub roster_classes: usize,
    pub cached_views: usize,
}

// =============================================================================
// RATING SUBMISSION
// =============================================================================

/// One rating submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingRequest {
    pub subject: String,
    pub number: String,
    pub section: String,
    pub semester: String,
    pub year: u16,
    pub metric: String,
    pub value: i64,
}

impl RatingRequest {
    /// Validate the request fields and resolve the target section.
    pub fn to_section(&self) -> Result<SectionRef, TallyError> {
        check_field("subject", &self.subject)?;
        check_field("number", &self.number)?;
        check_field("section", &self.section)?;
        check_field("metric", &self.metric)?;
        Ok(SectionRef {
            subject: self.subject.clone(),
            course_number: self.number.clone(),
            class_number: self.section.clone(),
            term: Term::parse(&self.semester, self.year)?,
        })
    }
}

/// One metric/value pair inside a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricValue {
    pub metric: String,
    pub value: i64,
}

/// Full-slate batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub subject: String,
    pub number: String,
    pub section: String,
    pub semester: String,
    pub year: u16,
    pub ratings: Vec<MetricValue>,
}

impl BatchRequest {
    /// Validate the request fields and resolve the target section.
    pub fn to_section(&self) -> Result<SectionRef, TallyError> {
        check_field("subject", &self.subject)?;
        check_field("number", &self.number)?;
        check_field("section", &self.section)?;
        for entry in &self.ratings {
            check_field("metric", &entry.metric)?;
        }
        Ok(SectionRef {
            subject: self.subject.clone(),
            course_number: self.number.clone(),
            class_number: self.section.clone(),
            term: Term::parse(&self.semester, self.year)?,
        })
    }

    /// The batch entries as the engine expects them.
    #[must_use]
    pub fn entries(&self) -> Vec<(MetricName, i64)> {
        self.ratings
            .iter()
            .map(|e| (MetricName::new(&e.metric), e.value))
            .collect()
    }
}

/// Remove one rating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub subject: String,
    pub number: String,
    pub metric: String,
}

impl RemoveRequest {
    /// Validate the request fields.
    pub fn validate(&self) -> Result<(), TallyError> {
        check_field("subject", &self.subject)?;
        check_field("number", &self.number)?;
        check_field("metric", &self.metric)
    }
}

/// Remove every rating the caller holds on one course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveAllRequest {
    pub subject: String,
    pub number: String,
}

impl RemoveAllRequest {
    /// Validate the request fields.
    pub fn validate(&self) -> Result<(), TallyError> {
        check_field("subject", &self.subject)?;
        check_field("number", &self.number)
    }
}

// =============================================================================
// RATING VIEW
// =============================================================================

/// A rating as exposed over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingJson {
    pub subject: String,
    pub number: String,
    pub section: String,
    pub year: u16,
    pub semester: String,
    pub metric: String,
    pub value: i64,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl From<&Rating> for RatingJson {
    fn from(rating: &Rating) -> Self {
        Self {
            subject: rating.subject.clone(),
            number: rating.course_number.clone(),
            section: rating.class_number.clone(),
            year: rating.term.year,
            semester: rating.term.semester.to_string(),
            metric: rating.metric.as_str().to_string(),
            value: rating.value,
            created_at_ms: rating.created_at.as_millis(),
            updated_at_ms: rating.updated_at.as_millis(),
        }
    }
}

// =============================================================================
// MUTATION RESPONSES
// =============================================================================

/// Response to a single rating submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingResponse {
    pub success: bool,
    pub rating: Option<RatingJson>,
    pub error: Option<String>,
}

impl RatingResponse {
    #[must_use]
    pub fn success(rating: &Rating) -> Self {
        Self {
            success: true,
            rating: Some(rating.into()),
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            rating: None,
            error: Some(message.into()),
        }
    }
}

/// Response to a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub success: bool,
    pub ratings: Vec<RatingJson>,
    pub error: Option<String>,
}

impl BatchResponse {
    #[must_use]
    pub fn success(ratings: &[Rating]) -> Self {
        Self {
            success: true,
            ratings: ratings.iter().map(RatingJson::from).collect(),
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ratings: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// Response to a removal (single or all).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub success: bool,
    pub removed: usize,
    pub error: Option<String>,
}

impl RemoveResponse {
    #[must_use]
    pub fn success(removed: usize) -> Self {
        Self {
            success: true,
            removed,
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            removed: 0,
            error: Some(message.into()),
        }
    }
}

// =============================================================================
// READ RESPONSES
// =============================================================================

/// The caller's ratings grouped by course id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRatingsResponse {
    pub success: bool,
    pub courses: std::collections::BTreeMap<String, Vec<RatingJson>>,
    pub error: Option<String>,
}

impl UserRatingsResponse {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            courses: std::collections::BTreeMap::new(),
            error: Some(message.into()),
        }
    }
}

/// Response carrying per-metric aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResponse {
    pub success: bool,
    pub metrics: Vec<MetricAggregate>,
    pub error: Option<String>,
}

impl AggregateResponse {
    #[must_use]
    pub fn success(metrics: Vec<MetricAggregate>) -> Self {
        Self {
            success: true,
            metrics,
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            metrics: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// Response listing the terms in which a course accumulated ratings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemestersResponse {
    pub success: bool,
    pub semesters: Vec<TermSummary>,
    pub error: Option<String>,
}

impl SemestersResponse {
    #[must_use]
    pub fn success(semesters: Vec<TermSummary>) -> Self {
        Self {
            success: true,
            semesters,
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            semesters: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// Response carrying per-instructor aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructorsResponse {
    pub success: bool,
    pub instructors: Vec<InstructorAggregate>,
    pub error: Option<String>,
}

impl InstructorsResponse {
    #[must_use]
    pub fn success(instructors: Vec<InstructorAggregate>) -> Self {
        Self {
            success: true,
            instructors,
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            instructors: Vec::new(),
            error: Some(message.into()),
        }
    }
}

// =============================================================================
// QUERY PARAMETERS
// =============================================================================

/// Query parameters for the class-aggregate endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassAggregateParams {
    pub subject: String,
    pub number: String,
    /// Absent means "all sections of the term".
    pub section: Option<String>,
    pub semester: String,
    pub year: u16,
    /// Comma-separated metric filter.
    pub metrics: Option<String>,
}

/// Query parameters for the course-aggregate endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CourseAggregateParams {
    pub subject: String,
    pub number: String,
    /// Comma-separated metric filter.
    pub metrics: Option<String>,
}

/// Query parameters naming just a course.
#[derive(Debug, Clone, Deserialize)]
pub struct CourseParams {
    pub subject: String,
    pub number: String,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rating_request_rejects_empty_fields() {
        let request = RatingRequest {
            subject: String::new(),
            number: "2110".to_string(),
            section: "001".to_string(),
            semester: "fall".to_string(),
            year: 2024,
            metric: "overall".to_string(),
            value: 4,
        };
        assert!(request.to_section().is_err());
    }

    #[test]
    fn rating_request_rejects_bad_semester() {
        let request = RatingRequest {
            subject: "CS".to_string(),
            number: "2110".to_string(),
            section: "001".to_string(),
            semester: "autumn".to_string(),
            year: 2024,
            metric: "overall".to_string(),
            value: 4,
        };
        assert!(request.to_section().is_err());
    }

    #[test]
    fn request_fields_reject_embedded_nul() {
        let request = RemoveAllRequest {
            subject: "CS\u{0}evil".to_string(),
            number: "2110".to_string(),
        };
        assert!(matches!(
            request.validate(),
            Err(TallyError::BadInput(_))
        ));
    }

    #[test]
    fn metric_filter_parses_comma_list() {
        let filter = parse_metric_filter(Some("overall, difficulty")).unwrap();
        assert_eq!(filter.len(), 2);
        assert_eq!(filter[1].as_str(), "difficulty");
        assert!(parse_metric_filter(Some(",,")).is_none());
        assert!(parse_metric_filter(None).is_none());
    }
}
