//! # Constraint Checker
//!
//! Pure validation, evaluated before any mutation begins. Nothing in
//! this module touches a store: a constraint failure must leave all
//! state exactly as it found it, which is trivially true when the
//! checks cannot write.

use crate::metrics::MetricRegistry;
use crate::{CourseId, MetricName, Rating, TallyError};
use std::collections::BTreeSet;

// =============================================================================
// VALUE DOMAIN
// =============================================================================

/// Check that `value` lies inside the metric's declared domain.
///
/// Undeclared metrics are `BadInput`; declared metrics with an
/// out-of-domain value are `InvalidArgument`.
pub fn check_value(
    registry: &MetricRegistry,
    metric: &MetricName,
    value: i64,
) -> Result<(), TallyError> {
    let kind = registry.require_kind(metric)?;
    if kind.contains(value) {
        Ok(())
    } else {
        Err(TallyError::InvalidArgument {
            metric: metric.clone(),
            value,
        })
    }
}

// =============================================================================
// REQUIRED-METRIC COVERAGE
// =============================================================================

/// Check that a batch submission covers the required-metric set and
/// names no metric twice.
///
/// The error message lists every missing metric so the caller can fix
/// the whole batch in one round trip.
pub fn check_required_metrics(
    required: &[MetricName],
    provided: &[MetricName],
) -> Result<(), TallyError> {
    let mut seen = BTreeSet::new();
    for metric in provided {
        if !seen.insert(metric) {
            return Err(TallyError::BadInput(format!(
                "metric '{}' appears more than once in the batch",
                metric.as_str()
            )));
        }
    }

    let missing: Vec<&str> = required
        .iter()
        .filter(|metric| !seen.contains(metric))
        .map(MetricName::as_str)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(TallyError::BadInput(format!(
            "missing required metrics: {}",
            missing.join(", ")
        )))
    }
}

// =============================================================================
// RATED-COURSE CEILING
// =============================================================================

/// Check the per-user distinct-course ceiling.
///
/// Counts distinct `course_id`s among the user's existing ratings. A
/// rating that targets a course already among them is a revote and
/// always passes, regardless of the ceiling.
pub fn check_course_ceiling(
    existing: &[Rating],
    target_course: &CourseId,
    max_rated_courses: usize,
) -> Result<(), TallyError> {
    let courses: BTreeSet<&CourseId> = existing.iter().map(|r| &r.course_id).collect();
    if courses.contains(target_course) {
        return Ok(());
    }
    if courses.len() >= max_rated_courses {
        return Err(TallyError::ConstraintViolation {
            limit: max_rated_courses,
        });
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{ClassId, RatingId, Semester, Term, Timestamp, UserId};

    fn rating_for_course(course: &str) -> Rating {
        Rating {
            id: RatingId(1),
            created_by: UserId::new("ab123"),
            class_id: ClassId::new(format!("{course}-fa24")),
            course_id: CourseId::new(course),
            subject: "CS".to_string(),
            course_number: "2110".to_string(),
            class_number: "001".to_string(),
            term: Term::new(2024, Semester::Fall),
            metric: MetricName::new("overall"),
            value: 4,
            created_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(0),
        }
    }

    #[test]
    fn scale_value_six_is_invalid_argument() {
        let registry = MetricRegistry::default();
        let err = check_value(&registry, &MetricName::new("overall"), 6).unwrap_err();
        assert!(matches!(err, TallyError::InvalidArgument { value: 6, .. }));
    }

    #[test]
    fn binary_value_two_is_invalid_argument() {
        let registry = MetricRegistry::default();
        let err = check_value(&registry, &MetricName::new("would_recommend"), 2).unwrap_err();
        assert!(matches!(err, TallyError::InvalidArgument { value: 2, .. }));
    }

    #[test]
    fn in_domain_values_pass() {
        let registry = MetricRegistry::default();
        check_value(&registry, &MetricName::new("difficulty"), 1).unwrap();
        check_value(&registry, &MetricName::new("difficulty"), 5).unwrap();
        check_value(&registry, &MetricName::new("would_recommend"), 0).unwrap();
    }

    #[test]
    fn missing_required_metrics_are_listed() {
        let required = vec![MetricName::new("overall"), MetricName::new("workload")];
        let provided = vec![MetricName::new("overall")];
        let err = check_required_metrics(&required, &provided).unwrap_err();
        match err {
            TallyError::BadInput(msg) => assert!(msg.contains("workload")),
            other => panic!("expected BadInput, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_batch_metric_is_bad_input() {
        let provided = vec![MetricName::new("overall"), MetricName::new("overall")];
        assert!(check_required_metrics(&[], &provided).is_err());
    }

    #[test]
    fn full_coverage_passes() {
        let required = vec![MetricName::new("overall"), MetricName::new("workload")];
        let provided = vec![
            MetricName::new("workload"),
            MetricName::new("overall"),
            MetricName::new("would_recommend"),
        ];
        check_required_metrics(&required, &provided).unwrap();
    }

    #[test]
    fn ceiling_blocks_new_course() {
        let existing = vec![rating_for_course("c-1"), rating_for_course("c-2")];
        let err =
            check_course_ceiling(&existing, &CourseId::new("c-3"), 2).unwrap_err();
        assert!(matches!(err, TallyError::ConstraintViolation { limit: 2 }));
    }

    #[test]
    fn revote_bypasses_ceiling() {
        let existing = vec![rating_for_course("c-1"), rating_for_course("c-2")];
        check_course_ceiling(&existing, &CourseId::new("c-1"), 2).unwrap();
    }

    #[test]
    fn under_ceiling_passes() {
        let existing = vec![rating_for_course("c-1")];
        check_course_ceiling(&existing, &CourseId::new("c-2"), 2).unwrap();
    }
}
