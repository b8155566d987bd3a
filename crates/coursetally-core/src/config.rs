//! # Engine Configuration
//!
//! Tunable knobs for the rating engine. Everything here is injected at
//! construction time; the core reads no environment variables and no
//! config files (the app layer owns those).

use crate::MetricName;
use serde::{Deserialize, Serialize};

/// Default distinct-course ceiling per user.
pub const DEFAULT_MAX_RATED_COURSES: usize = 20;

/// Default TTL for course-aggregate cache entries (2 minutes).
pub const DEFAULT_COURSE_TTL_MS: u64 = 2 * 60 * 1000;

/// Default TTL for semesters-with-ratings cache entries (5 minutes).
pub const DEFAULT_SEMESTER_TTL_MS: u64 = 5 * 60 * 1000;

/// Default TTL for instructor-aggregate cache entries (5 minutes).
pub const DEFAULT_INSTRUCTOR_TTL_MS: u64 = 5 * 60 * 1000;

/// Injected engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many distinct courses one user may rate. Revotes of an
    /// already-rated course always pass the ceiling.
    pub max_rated_courses: usize,
    /// Metrics a batch submission must cover.
    pub required_metrics: Vec<MetricName>,
    /// TTL for the course-aggregate cache.
    pub course_ttl_ms: u64,
    /// TTL for the semesters-with-ratings cache.
    pub semester_ttl_ms: u64,
    /// TTL for the instructor-aggregate cache.
    pub instructor_ttl_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rated_courses: DEFAULT_MAX_RATED_COURSES,
            required_metrics: vec![
                MetricName::new("overall"),
                MetricName::new("difficulty"),
                MetricName::new("workload"),
            ],
            course_ttl_ms: DEFAULT_COURSE_TTL_MS,
            semester_ttl_ms: DEFAULT_SEMESTER_TTL_MS,
            instructor_ttl_ms: DEFAULT_INSTRUCTOR_TTL_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttls_match_documented_windows() {
        let config = EngineConfig::default();
        assert_eq!(config.course_ttl_ms, 120_000);
        assert_eq!(config.semester_ttl_ms, 300_000);
        assert_eq!(config.instructor_ttl_ms, 300_000);
    }
}
