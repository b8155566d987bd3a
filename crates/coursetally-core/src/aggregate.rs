//! # Aggregation
//!
//! Read-side summarization built entirely on counter rows. No read path
//! ever scans rating facts to answer an aggregate query: the counters
//! ARE the aggregate, kept in lockstep by the mutation path.
//!
//! Summation is the one shared primitive. Every public view (class,
//! course, term, instructor) folds some set of classes' counter rows
//! into per-metric histograms and derives means from those.

use crate::roster::Roster;
use crate::store::RatingStore;
use crate::{ClassId, CourseId, MetricName, TallyError, Term};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// VIEW TYPES
// =============================================================================

/// One histogram bucket of an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub value: i64,
    pub count: u64,
}

/// The aggregate for one metric: full histogram, total, and weighted
/// mean. `mean` is `None` when no ratings exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregate {
    pub metric: MetricName,
    pub counts: Vec<CategoryCount>,
    pub total: u64,
    pub mean: Option<f64>,
}

/// How many ratings a course accumulated in one term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSummary {
    pub term: Term,
    pub total: u64,
}

/// Per-instructor aggregates across every class they taught for a
/// course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructorAggregate {
    pub instructor: String,
    pub metrics: Vec<MetricAggregate>,
}

// =============================================================================
// SUMMATION
// =============================================================================

/// Histograms keyed by metric, the intermediate form every view folds
/// counter rows into before deriving means.
type Histograms = BTreeMap<MetricName, BTreeMap<i64, u64>>;

fn fold_class(
    store: &dyn RatingStore,
    class: &ClassId,
    filter: Option<&[MetricName]>,
    into: &mut Histograms,
) -> Result<(), TallyError> {
    for row in store.counters_for_class(class)? {
        if let Some(wanted) = filter
            && !wanted.contains(&row.metric)
        {
            continue;
        }
        let cell = into.entry(row.metric).or_default().entry(row.category).or_insert(0);
        *cell = cell.saturating_add(row.count);
    }
    Ok(())
}

fn finish(histograms: Histograms) -> Vec<MetricAggregate> {
    histograms
        .into_iter()
        .map(|(metric, buckets)| {
            let total: u64 = buckets.values().sum();
            let weighted: i64 = buckets
                .iter()
                .map(|(value, count)| {
                    value.saturating_mul(i64::try_from(*count).unwrap_or(i64::MAX))
                })
                .sum();
            let mean = if total > 0 {
                Some(weighted as f64 / total as f64)
            } else {
                None
            };
            let counts = buckets
                .into_iter()
                .map(|(value, count)| CategoryCount { value, count })
                .collect();
            MetricAggregate {
                metric,
                counts,
                total,
                mean,
            }
        })
        .collect()
}

// =============================================================================
// AGGREGATOR
// =============================================================================

/// Stateless read-side view builder over a store and roster.
pub struct Aggregator;

impl Aggregator {
    /// Aggregate one class's counters.
    pub fn for_class(
        store: &dyn RatingStore,
        class: &ClassId,
        filter: Option<&[MetricName]>,
    ) -> Result<Vec<MetricAggregate>, TallyError> {
        Self::for_classes(store, std::slice::from_ref(class), filter)
    }

    /// Aggregate across a set of classes by summing their counters
    /// metric by metric, category by category.
    pub fn for_classes(
        store: &dyn RatingStore,
        classes: &[ClassId],
        filter: Option<&[MetricName]>,
    ) -> Result<Vec<MetricAggregate>, TallyError> {
        let mut histograms = Histograms::new();
        for class in classes {
            fold_class(store, class, filter, &mut histograms)?;
        }
        Ok(finish(histograms))
    }

    /// Aggregate every offering of a course, across all terms.
    pub fn for_course(
        store: &dyn RatingStore,
        roster: &Roster,
        course: &CourseId,
        filter: Option<&[MetricName]>,
    ) -> Result<Vec<MetricAggregate>, TallyError> {
        let classes: Vec<ClassId> = roster
            .classes_for_course(course)
            .into_iter()
            .map(|record| record.class_id.clone())
            .collect();
        Self::for_classes(store, &classes, filter)
    }

    /// Aggregate a course within one term, summing all its sections.
    pub fn for_term(
        store: &dyn RatingStore,
        roster: &Roster,
        course: &CourseId,
        term: Term,
        filter: Option<&[MetricName]>,
    ) -> Result<Vec<MetricAggregate>, TallyError> {
        let classes: Vec<ClassId> = roster
            .sections_for_term(course, term)
            .into_iter()
            .map(|record| record.class_id.clone())
            .collect();
        Self::for_classes(store, &classes, filter)
    }

    /// Ratings-per-term summary for one course, ascending by term.
    /// Terms whose sections hold no ratings are omitted.
    pub fn terms_with_ratings(
        store: &dyn RatingStore,
        roster: &Roster,
        course: &CourseId,
    ) -> Result<Vec<TermSummary>, TallyError> {
        let mut totals: BTreeMap<Term, u64> = BTreeMap::new();
        for record in roster.classes_for_course(course) {
            let class_total: u64 = store
                .counters_for_class(&record.class_id)?
                .iter()
                .map(|row| row.count)
                .sum();
            let entry = totals.entry(record.term).or_insert(0);
            *entry = entry.saturating_add(class_total);
        }
        Ok(totals
            .into_iter()
            .filter(|(_, total)| *total > 0)
            .map(|(term, total)| TermSummary { term, total })
            .collect())
    }

    /// Per-instructor aggregates for one course. Instructors whose
    /// classes hold no ratings are omitted.
    pub fn per_instructor(
        store: &dyn RatingStore,
        roster: &Roster,
        course: &CourseId,
    ) -> Result<Vec<InstructorAggregate>, TallyError> {
        let mut out = Vec::new();
        for (instructor, classes) in roster.instructors_for_course(course) {
            let metrics = Self::for_classes(store, &classes, None)?;
            let total: u64 = metrics.iter().map(|m| m.total).sum();
            if total > 0 {
                out.push(InstructorAggregate {
                    instructor,
                    metrics,
                });
            }
        }
        Ok(out)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::metrics::MetricRegistry;
    use crate::roster::ClassRecord;
    use crate::store::MemoryStore;
    use crate::unit::MutationUnit;
    use crate::{Rating, RatingId, Semester, Timestamp, UserId};

    fn roster() -> Roster {
        let fa24 = Term::new(2024, Semester::Fall);
        let sp25 = Term::new(2025, Semester::Spring);
        Roster::from_records(vec![
            ClassRecord {
                class_id: ClassId::new("c-fa24-1"),
                course_id: CourseId::new("cs2110"),
                subject: "CS".to_string(),
                course_number: "2110".to_string(),
                class_number: "001".to_string(),
                term: fa24,
                instructors: vec!["Gries".to_string()],
            },
            ClassRecord {
                class_id: ClassId::new("c-fa24-2"),
                course_id: CourseId::new("cs2110"),
                subject: "CS".to_string(),
                course_number: "2110".to_string(),
                class_number: "002".to_string(),
                term: fa24,
                instructors: vec!["Gries".to_string()],
            },
            ClassRecord {
                class_id: ClassId::new("c-sp25-1"),
                course_id: CourseId::new("cs2110"),
                subject: "CS".to_string(),
                course_number: "2110".to_string(),
                class_number: "001".to_string(),
                term: sp25,
                instructors: vec!["Muhlberger".to_string()],
            },
        ])
    }

    fn seeded_store() -> MemoryStore {
        let registry = MetricRegistry::default();
        let mut store = MemoryStore::new();
        let votes = [
            (0, "u1", "c-fa24-1", "overall", 4),
            (1, "u2", "c-fa24-2", "overall", 2),
            (2, "u3", "c-sp25-1", "overall", 5),
            (3, "u1", "c-fa24-1", "difficulty", 3),
        ];
        for (id, user, class, metric, value) in votes {
            let record = roster().class(&ClassId::new(class)).unwrap().clone();
            let mut unit = MutationUnit::new();
            unit.insert_rating(Rating {
                id: RatingId(id),
                created_by: UserId::new(user),
                class_id: record.class_id,
                course_id: record.course_id,
                subject: record.subject,
                course_number: record.course_number,
                class_number: record.class_number,
                term: record.term,
                metric: MetricName::new(metric),
                value,
                created_at: Timestamp::from_millis(0),
                updated_at: Timestamp::from_millis(0),
            });
            store.apply(&unit, &registry).unwrap();
        }
        store
    }

    #[test]
    fn class_aggregate_reports_full_histogram() {
        let store = seeded_store();
        let aggs = Aggregator::for_class(&store, &ClassId::new("c-fa24-1"), None).unwrap();

        assert_eq!(aggs.len(), 2);
        let overall = aggs.iter().find(|a| a.metric.as_str() == "overall").unwrap();
        assert_eq!(overall.total, 1);
        assert_eq!(overall.counts.len(), 5);
        assert_eq!(overall.mean, Some(4.0));
    }

    #[test]
    fn course_aggregate_sums_all_offerings() {
        let store = seeded_store();
        let aggs =
            Aggregator::for_course(&store, &roster(), &CourseId::new("cs2110"), None).unwrap();

        let overall = aggs.iter().find(|a| a.metric.as_str() == "overall").unwrap();
        assert_eq!(overall.total, 3);
        // (4 + 2 + 5) / 3
        assert!((overall.mean.unwrap() - 11.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn metric_filter_narrows_the_view() {
        let store = seeded_store();
        let filter = vec![MetricName::new("difficulty")];
        let aggs = Aggregator::for_course(
            &store,
            &roster(),
            &CourseId::new("cs2110"),
            Some(&filter),
        )
        .unwrap();

        assert_eq!(aggs.len(), 1);
        assert_eq!(aggs[0].metric.as_str(), "difficulty");
    }

    #[test]
    fn term_aggregate_merges_sections() {
        let store = seeded_store();
        let aggs = Aggregator::for_term(
            &store,
            &roster(),
            &CourseId::new("cs2110"),
            Term::new(2024, Semester::Fall),
            None,
        )
        .unwrap();

        let overall = aggs.iter().find(|a| a.metric.as_str() == "overall").unwrap();
        assert_eq!(overall.total, 2);
        assert_eq!(overall.mean, Some(3.0));
    }

    #[test]
    fn terms_with_ratings_skips_empty_terms() {
        let store = seeded_store();
        let summaries =
            Aggregator::terms_with_ratings(&store, &roster(), &CourseId::new("cs2110")).unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].term, Term::new(2024, Semester::Fall));
        assert_eq!(summaries[0].total, 3);
        assert_eq!(summaries[1].term, Term::new(2025, Semester::Spring));
        assert_eq!(summaries[1].total, 1);
    }

    #[test]
    fn instructor_aggregates_span_their_classes() {
        let store = seeded_store();
        let aggs =
            Aggregator::per_instructor(&store, &roster(), &CourseId::new("cs2110")).unwrap();

        assert_eq!(aggs.len(), 2);
        let gries = aggs.iter().find(|a| a.instructor == "Gries").unwrap();
        let overall = gries
            .metrics
            .iter()
            .find(|m| m.metric.as_str() == "overall")
            .unwrap();
        assert_eq!(overall.total, 2);
    }

    #[test]
    fn empty_course_aggregates_to_nothing() {
        let store = MemoryStore::new();
        let aggs =
            Aggregator::for_course(&store, &roster(), &CourseId::new("cs2110"), None).unwrap();
        assert!(aggs.is_empty());
    }
}
