//! # Course Roster
//!
//! Read-only reference data describing which classes exist: which
//! course each belongs to, when it ran, and who taught it. The engine
//! resolves every submission against the roster before touching
//! storage, so ratings can only ever be cast against real offerings.
//!
//! The roster is loaded once at startup (the request layer deserializes
//! it from JSON) and never mutated by the engine.

use crate::{ClassId, CourseId, Term};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// CLASS RECORD
// =============================================================================

/// One term-bound offering of a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    /// Unique identifier for this offering.
    pub class_id: ClassId,
    /// Stable identity shared by all offerings of the same course.
    pub course_id: CourseId,
    /// Subject code, e.g. "CS".
    pub subject: String,
    /// Course number, e.g. "2110".
    pub course_number: String,
    /// Section number within the term.
    pub class_number: String,
    /// The term the offering ran in.
    pub term: Term,
    /// Names of the instructors teaching the offering.
    #[serde(default)]
    pub instructors: Vec<String>,
}

// =============================================================================
// ROSTER
// =============================================================================

/// The full class catalog, indexed for the engine's lookup patterns.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    /// All records, keyed by class id.
    classes: BTreeMap<ClassId, ClassRecord>,
    /// Course id -> class ids of every offering.
    by_course: BTreeMap<CourseId, Vec<ClassId>>,
}

impl Roster {
    /// Build a roster from class records. Later records win on
    /// duplicate class ids.
    #[must_use]
    pub fn from_records(records: Vec<ClassRecord>) -> Self {
        let mut roster = Self::default();
        for record in records {
            roster.insert(record);
        }
        roster
    }

    fn insert(&mut self, record: ClassRecord) {
        if let Some(previous) = self.classes.get(&record.class_id)
            && let Some(siblings) = self.by_course.get_mut(&previous.course_id)
        {
            siblings.retain(|id| id != &record.class_id);
        }
        self.by_course
            .entry(record.course_id.clone())
            .or_default()
            .push(record.class_id.clone());
        self.classes.insert(record.class_id.clone(), record);
    }

    /// The record for one class id.
    #[must_use]
    pub fn class(&self, id: &ClassId) -> Option<&ClassRecord> {
        self.classes.get(id)
    }

    /// Find the offering matching a subject/number/section/term tuple.
    ///
    /// Matching is exact; the request layer normalizes case upstream.
    #[must_use]
    pub fn find_section(
        &self,
        subject: &str,
        course_number: &str,
        class_number: &str,
        term: Term,
    ) -> Option<&ClassRecord> {
        self.classes.values().find(|record| {
            record.subject == subject
                && record.course_number == course_number
                && record.class_number == class_number
                && record.term == term
        })
    }

    /// The course id for a subject/number pair, from any offering.
    #[must_use]
    pub fn course_id_for(&self, subject: &str, course_number: &str) -> Option<&CourseId> {
        self.classes
            .values()
            .find(|record| record.subject == subject && record.course_number == course_number)
            .map(|record| &record.course_id)
    }

    /// Every offering of one course, across all terms, in insertion
    /// order within deterministic course grouping.
    #[must_use]
    pub fn classes_for_course(&self, course: &CourseId) -> Vec<&ClassRecord> {
        self.by_course
            .get(course)
            .map(|ids| ids.iter().filter_map(|id| self.classes.get(id)).collect())
            .unwrap_or_default()
    }

    /// Offerings of one course restricted to a single term. A course
    /// can have several sections (and cross-listed entries) in a term.
    #[must_use]
    pub fn sections_for_term(&self, course: &CourseId, term: Term) -> Vec<&ClassRecord> {
        self.classes_for_course(course)
            .into_iter()
            .filter(|record| record.term == term)
            .collect()
    }

    /// Instructor name -> class ids they taught, for one course.
    #[must_use]
    pub fn instructors_for_course(&self, course: &CourseId) -> BTreeMap<String, Vec<ClassId>> {
        let mut out: BTreeMap<String, Vec<ClassId>> = BTreeMap::new();
        for record in self.classes_for_course(course) {
            for instructor in &record.instructors {
                out.entry(instructor.clone())
                    .or_default()
                    .push(record.class_id.clone());
            }
        }
        out
    }

    /// Number of classes in the roster.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the roster holds no classes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::Semester;

    fn record(
        class_id: &str,
        course_id: &str,
        number: &str,
        section: &str,
        term: Term,
        instructors: &[&str],
    ) -> ClassRecord {
        ClassRecord {
            class_id: ClassId::new(class_id),
            course_id: CourseId::new(course_id),
            subject: "CS".to_string(),
            course_number: number.to_string(),
            class_number: section.to_string(),
            term,
            instructors: instructors.iter().map(ToString::to_string).collect(),
        }
    }

    fn sample_roster() -> Roster {
        let fa24 = Term::new(2024, Semester::Fall);
        let sp25 = Term::new(2025, Semester::Spring);
        Roster::from_records(vec![
            record("cs2110-fa24-001", "cs2110", "2110", "001", fa24, &["Gries"]),
            record("cs2110-fa24-002", "cs2110", "2110", "002", fa24, &["Gries"]),
            record("cs2110-sp25-001", "cs2110", "2110", "001", sp25, &["Muhlberger"]),
            record("cs3110-fa24-001", "cs3110", "3110", "001", fa24, &["Clarkson"]),
        ])
    }

    #[test]
    fn find_section_matches_exact_tuple() {
        let roster = sample_roster();
        let fa24 = Term::new(2024, Semester::Fall);

        let found = roster.find_section("CS", "2110", "002", fa24).unwrap();
        assert_eq!(found.class_id.as_str(), "cs2110-fa24-002");

        assert!(roster.find_section("CS", "2110", "003", fa24).is_none());
        assert!(
            roster
                .find_section("CS", "2110", "001", Term::new(2026, Semester::Fall))
                .is_none()
        );
    }

    #[test]
    fn course_lookups_span_terms() {
        let roster = sample_roster();
        let classes = roster.classes_for_course(&CourseId::new("cs2110"));
        assert_eq!(classes.len(), 3);

        let fa24_only =
            roster.sections_for_term(&CourseId::new("cs2110"), Term::new(2024, Semester::Fall));
        assert_eq!(fa24_only.len(), 2);
    }

    #[test]
    fn instructors_group_their_classes() {
        let roster = sample_roster();
        let by_instructor = roster.instructors_for_course(&CourseId::new("cs2110"));
        assert_eq!(by_instructor.len(), 2);
        assert_eq!(by_instructor.get("Gries").unwrap().len(), 2);
        assert_eq!(by_instructor.get("Muhlberger").unwrap().len(), 1);
    }

    #[test]
    fn duplicate_class_id_replaces_earlier_record() {
        let fa24 = Term::new(2024, Semester::Fall);
        let roster = Roster::from_records(vec![
            record("c-1", "cs2110", "2110", "001", fa24, &["A"]),
            record("c-1", "cs2112", "2112", "001", fa24, &["B"]),
        ]);
        assert_eq!(roster.len(), 1);
        assert!(roster.classes_for_course(&CourseId::new("cs2110")).is_empty());
        assert_eq!(roster.classes_for_course(&CourseId::new("cs2112")).len(), 1);
    }
}
