//! # Core Type Definitions
//!
//! This module contains all core types for the rating engine:
//! - Identifiers (`UserId`, `ClassId`, `CourseId`, `MetricName`, `RatingId`)
//! - Term representation (`Semester`, `Term`)
//! - The durable rating fact (`Rating`) and the denormalized counter row
//!   (`CounterRow`)
//! - Caller identity (`Identity`)
//! - Error types (`TallyError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Carry timestamps only as `Timestamp` values produced by an injected
//!   `Clock`, never from ambient wall-time reads

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identity of the user who authored a rating (resolved upstream).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Create a new user id from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the user id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of one specific term-bound offering of a course.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub String);

impl ClassId {
    /// Create a new class id from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the class id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Stable identifier spanning all terms/offerings of the same course.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CourseId(pub String);

impl CourseId {
    /// Create a new course id from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the course id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A named rating dimension (e.g. difficulty, workload).
///
/// The value domain of a metric lives in the `MetricRegistry`, not here.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetricName(pub String);

impl MetricName {
    /// Create a new metric name from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the metric name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a rating fact, allocated by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RatingId(pub u64);

// =============================================================================
// TERMS
// =============================================================================

/// Academic semester, declared in chronological order within a year.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Semester {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Semester {
    /// Canonical display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Winter => "Winter",
            Self::Spring => "Spring",
            Self::Summer => "Summer",
            Self::Fall => "Fall",
        }
    }

    /// Parse a semester from its full name or two-letter code.
    ///
    /// Accepts "Fall"/"fall"/"FA" and the equivalents for the other
    /// semesters. Anything else is `BadInput`.
    pub fn parse(s: &str) -> Result<Self, TallyError> {
        match s.to_ascii_lowercase().as_str() {
            "winter" | "wi" => Ok(Self::Winter),
            "spring" | "sp" => Ok(Self::Spring),
            "summer" | "su" => Ok(Self::Summer),
            "fall" | "fa" => Ok(Self::Fall),
            _ => Err(TallyError::BadInput(format!("unknown semester '{s}'"))),
        }
    }
}

impl std::fmt::Display for Semester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(year, semester)` pair identifying a course offering instance.
///
/// Field order matters: the derived `Ord` sorts terms chronologically,
/// which the semesters-with-ratings read path relies on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Term {
    pub year: u16,
    pub semester: Semester,
}

impl Term {
    /// Create a new term.
    #[must_use]
    pub const fn new(year: u16, semester: Semester) -> Self {
        Self { year, semester }
    }

    /// Parse a term from "Fall 2024" / "fa 2024" style input.
    pub fn parse(semester: &str, year: u16) -> Result<Self, TallyError> {
        if !(1900..=2200).contains(&year) {
            return Err(TallyError::BadInput(format!("year {year} out of range")));
        }
        Ok(Self::new(year, Semester::parse(semester)?))
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.semester, self.year)
    }
}

// =============================================================================
// TIMESTAMPS
// =============================================================================

/// Milliseconds since the Unix epoch.
///
/// Produced exclusively by a `Clock` implementation so that tests can
/// drive time deterministically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp from raw milliseconds.
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Raw milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// This timestamp shifted forward, saturating on overflow.
    #[must_use]
    pub const fn saturating_add(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Caller identity as resolved by the request layer.
///
/// The core does not authenticate; it only enforces that mutating
/// operations carry a resolved user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No identity attached to the request.
    Anonymous,
    /// A resolved user.
    User(UserId),
}

impl Identity {
    /// Return the user, or `Unauthenticated` for anonymous callers.
    pub fn require_user(&self) -> Result<&UserId, TallyError> {
        match self {
            Self::User(user) => Ok(user),
            Self::Anonymous => Err(TallyError::Unauthenticated),
        }
    }
}

// =============================================================================
// RATING FACT
// =============================================================================

/// One durable rating fact.
///
/// Invariant: at most one live `Rating` exists per
/// `(created_by, course_id, metric)` tuple. Re-rating the same course in
/// a different term replaces the fact (delete + insert at the new
/// class); the same term updates `value` in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    /// Store-allocated identifier.
    pub id: RatingId,
    /// The user who authored the rating.
    pub created_by: UserId,
    /// The specific offering the rating was cast against.
    pub class_id: ClassId,
    /// The stable cross-term course identity.
    pub course_id: CourseId,
    /// Subject code, e.g. "CS".
    pub subject: String,
    /// Course number, e.g. "2110".
    pub course_number: String,
    /// Section number within the offering.
    pub class_number: String,
    /// The term of the offering.
    pub term: Term,
    /// The rated dimension.
    pub metric: MetricName,
    /// The rated value, inside the metric's declared domain.
    pub value: i64,
    /// When the fact was first created.
    pub created_at: Timestamp,
    /// When the value was last changed.
    pub updated_at: Timestamp,
}

// =============================================================================
// COUNTER ROW
// =============================================================================

/// One denormalized histogram cell: how many live ratings of `metric`
/// on `class_id` carry `category` as their value.
///
/// Rows are lazily materialized (the whole category domain appears on
/// the first increment for a class+metric) and never deleted; counts
/// may fall back to zero but the row persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRow {
    pub class_id: ClassId,
    pub metric: MetricName,
    pub category: i64,
    pub count: u64,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by the rating engine.
///
/// The first six kinds form the taxonomy the request layer translates
/// into its wire envelope. `Io`/`Serialization` are ambient storage
/// failures: the whole operation may be retried.
#[derive(Debug, Error)]
pub enum TallyError {
    /// A mutating operation arrived without a resolved identity.
    #[error("authentication required")]
    Unauthenticated,

    /// Malformed input: unknown metric, malformed term, missing
    /// required metrics in a batch.
    #[error("bad input: {0}")]
    BadInput(String),

    /// A value outside the metric's declared domain.
    #[error("value {value} outside the domain of metric '{}'", metric.as_str())]
    InvalidArgument { metric: MetricName, value: i64 },

    /// The user already rates the configured maximum number of
    /// distinct courses.
    #[error("rated-course ceiling of {limit} reached")]
    ConstraintViolation { limit: usize },

    /// The target class, course, or rating does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A counter decrement/negative-count anomaly. Indicates a prior
    /// bug, not user error; non-retryable.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// An I/O or storage-engine error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// A row failed to serialize or deserialize.
    #[error("serialization error: {0}")]
    Serialization(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn terms_order_chronologically() {
        let fa23 = Term::new(2023, Semester::Fall);
        let sp24 = Term::new(2024, Semester::Spring);
        let fa24 = Term::new(2024, Semester::Fall);

        assert!(fa23 < sp24);
        assert!(sp24 < fa24);
    }

    #[test]
    fn semester_parses_codes_and_names() {
        assert_eq!(Semester::parse("FA").unwrap(), Semester::Fall);
        assert_eq!(Semester::parse("spring").unwrap(), Semester::Spring);
        assert!(Semester::parse("autumn").is_err());
    }

    #[test]
    fn term_rejects_out_of_range_year() {
        assert!(Term::parse("fall", 123).is_err());
        assert!(Term::parse("fall", 2024).is_ok());
    }

    #[test]
    fn anonymous_identity_is_rejected() {
        assert!(matches!(
            Identity::Anonymous.require_user(),
            Err(TallyError::Unauthenticated)
        ));
        let id = Identity::User(UserId::new("mw731"));
        assert_eq!(id.require_user().unwrap().as_str(), "mw731");
    }

    #[test]
    fn timestamp_saturates() {
        let t = Timestamp::from_millis(u64::MAX);
        assert_eq!(t.saturating_add(10), t);
    }
}
