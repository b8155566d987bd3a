//! # In-Memory Store
//!
//! `BTreeMap`-backed storage. Volatile, deterministic, and cheap to
//! construct — the backend of choice for tests and throwaway runs.
//!
//! Atomicity is validate-then-apply: every operation in a unit is
//! simulated against scratch state first, so by the time anything is
//! written the unit is known to succeed in full.

use super::RatingStore;
use crate::metrics::MetricRegistry;
use crate::unit::{CounterDelta, FactOp, MutationUnit};
use crate::{ClassId, CounterRow, CourseId, MetricName, Rating, RatingId, TallyError, UserId};
use std::collections::{BTreeMap, BTreeSet};

type IndexKey = (UserId, CourseId, MetricName);
type CounterKey = (ClassId, MetricName);

/// In-memory rating and counter storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ratings: BTreeMap<RatingId, Rating>,
    index: BTreeMap<IndexKey, RatingId>,
    counters: BTreeMap<CounterKey, BTreeMap<i64, u64>>,
    next_rating_id: u64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn index_key(rating: &Rating) -> IndexKey {
        (
            rating.created_by.clone(),
            rating.course_id.clone(),
            rating.metric.clone(),
        )
    }

    /// Simulate the counter deltas, returning the post-unit state of
    /// every touched `(class, metric)` pair.
    fn stage_counters(
        &self,
        deltas: &[CounterDelta],
        registry: &MetricRegistry,
    ) -> Result<BTreeMap<CounterKey, BTreeMap<i64, u64>>, TallyError> {
        let mut staged: BTreeMap<CounterKey, BTreeMap<i64, u64>> = BTreeMap::new();

        for delta in deltas {
            let key = (delta.class_id.clone(), delta.metric.clone());
            let existing = staged.get(&key).or_else(|| self.counters.get(&key));

            let mut cells = match existing {
                Some(cells) => cells.clone(),
                None => {
                    if delta.delta < 0 {
                        return Err(TallyError::InvariantViolation(format!(
                            "decrement of unseeded counter {}/{}",
                            delta.class_id.as_str(),
                            delta.metric.as_str()
                        )));
                    }
                    // Lazy materialization: seed the whole domain so
                    // reads never special-case missing rows.
                    let kind = registry.kind_of(&delta.metric).ok_or_else(|| {
                        TallyError::InvariantViolation(format!(
                            "counter delta for undeclared metric '{}'",
                            delta.metric.as_str()
                        ))
                    })?;
                    kind.domain().iter().map(|&v| (v, 0u64)).collect()
                }
            };

            let cell = cells.get_mut(&delta.category).ok_or_else(|| {
                TallyError::InvariantViolation(format!(
                    "category {} outside the seeded domain of '{}'",
                    delta.category,
                    delta.metric.as_str()
                ))
            })?;

            if delta.delta < 0 {
                *cell = cell.checked_sub(1).ok_or_else(|| {
                    TallyError::InvariantViolation(format!(
                        "counter {}/{}:{} would go negative",
                        delta.class_id.as_str(),
                        delta.metric.as_str(),
                        delta.category
                    ))
                })?;
            } else {
                *cell = cell.saturating_add(1);
            }

            staged.insert(key, cells);
        }

        Ok(staged)
    }

    /// Validate the fact ops against current state plus earlier ops in
    /// the same unit.
    fn validate_facts(&self, ops: &[FactOp]) -> Result<(), TallyError> {
        let mut deleted_ids: BTreeSet<RatingId> = BTreeSet::new();
        let mut freed_keys: BTreeSet<IndexKey> = BTreeSet::new();
        let mut inserted_keys: BTreeSet<IndexKey> = BTreeSet::new();

        for op in ops {
            match op {
                FactOp::Insert(rating) => {
                    let key = Self::index_key(rating);
                    let occupied = (self.index.contains_key(&key) && !freed_keys.contains(&key))
                        || inserted_keys.contains(&key);
                    if occupied || self.ratings.contains_key(&rating.id) {
                        return Err(TallyError::InvariantViolation(format!(
                            "duplicate live rating for {}/{}/{}",
                            rating.created_by.as_str(),
                            rating.course_id.as_str(),
                            rating.metric.as_str()
                        )));
                    }
                    inserted_keys.insert(key);
                }
                FactOp::UpdateValue { id, .. } => {
                    if !self.ratings.contains_key(id) || deleted_ids.contains(id) {
                        return Err(TallyError::InvariantViolation(format!(
                            "update of missing rating {}",
                            id.0
                        )));
                    }
                }
                FactOp::Delete(id) => {
                    let rating = self.ratings.get(id).filter(|_| !deleted_ids.contains(id));
                    match rating {
                        Some(rating) => {
                            deleted_ids.insert(*id);
                            freed_keys.insert(Self::index_key(rating));
                        }
                        None => {
                            return Err(TallyError::InvariantViolation(format!(
                                "delete of missing rating {}",
                                id.0
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl RatingStore for MemoryStore {
    fn allocate_rating_id(&mut self) -> RatingId {
        let id = RatingId(self.next_rating_id);
        self.next_rating_id = self.next_rating_id.saturating_add(1);
        id
    }

    fn rating_for(
        &self,
        user: &UserId,
        course: &CourseId,
        metric: &MetricName,
    ) -> Result<Option<Rating>, TallyError> {
        let key = (user.clone(), course.clone(), metric.clone());
        Ok(self
            .index
            .get(&key)
            .and_then(|id| self.ratings.get(id))
            .cloned())
    }

    fn ratings_for_user(&self, user: &UserId) -> Result<Vec<Rating>, TallyError> {
        Ok(self
            .index
            .iter()
            .filter(|((u, _, _), _)| u == user)
            .filter_map(|(_, id)| self.ratings.get(id))
            .cloned()
            .collect())
    }

    fn ratings_for_user_course(
        &self,
        user: &UserId,
        course: &CourseId,
    ) -> Result<Vec<Rating>, TallyError> {
        Ok(self
            .index
            .iter()
            .filter(|((u, c, _), _)| u == user && c == course)
            .filter_map(|(_, id)| self.ratings.get(id))
            .cloned()
            .collect())
    }

    fn counters_for_class(&self, class: &ClassId) -> Result<Vec<CounterRow>, TallyError> {
        let mut rows = Vec::new();
        for ((class_id, metric), cells) in &self.counters {
            if class_id != class {
                continue;
            }
            for (&category, &count) in cells {
                rows.push(CounterRow {
                    class_id: class_id.clone(),
                    metric: metric.clone(),
                    category,
                    count,
                });
            }
        }
        Ok(rows)
    }

    fn all_ratings(&self) -> Result<Vec<Rating>, TallyError> {
        Ok(self.ratings.values().cloned().collect())
    }

    fn rating_count(&self) -> Result<u64, TallyError> {
        Ok(self.ratings.len() as u64)
    }

    fn apply(
        &mut self,
        unit: &MutationUnit,
        registry: &MetricRegistry,
    ) -> Result<(), TallyError> {
        // Phase 1: prove the whole unit succeeds before writing anything.
        self.validate_facts(unit.fact_ops())?;
        let staged_counters = self.stage_counters(unit.counter_deltas(), registry)?;

        // Phase 2: commit. Nothing below can fail.
        for op in unit.fact_ops() {
            match op {
                FactOp::Insert(rating) => {
                    self.index.insert(Self::index_key(rating), rating.id);
                    self.ratings.insert(rating.id, rating.clone());
                }
                FactOp::UpdateValue {
                    id,
                    value,
                    updated_at,
                } => {
                    if let Some(rating) = self.ratings.get_mut(id) {
                        rating.value = *value;
                        rating.updated_at = *updated_at;
                    }
                }
                FactOp::Delete(id) => {
                    if let Some(rating) = self.ratings.remove(id) {
                        self.index.remove(&Self::index_key(&rating));
                    }
                }
            }
        }
        for (key, cells) in staged_counters {
            self.counters.insert(key, cells);
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{Semester, Term, Timestamp};

    fn rating(id: u64, user: &str, class: &str, course: &str, metric: &str, value: i64) -> Rating {
        Rating {
            id: RatingId(id),
            created_by: UserId::new(user),
            class_id: ClassId::new(class),
            course_id: CourseId::new(course),
            subject: "CS".to_string(),
            course_number: "2110".to_string(),
            class_number: "001".to_string(),
            term: Term::new(2024, Semester::Fall),
            metric: MetricName::new(metric),
            value,
            created_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(0),
        }
    }

    #[test]
    fn insert_seeds_full_domain() {
        let mut store = MemoryStore::new();
        let registry = MetricRegistry::default();

        let mut unit = MutationUnit::new();
        unit.insert_rating(rating(0, "ab1", "c1-fa24", "c1", "overall", 4));
        store.apply(&unit, &registry).unwrap();

        let rows = store.counters_for_class(&ClassId::new("c1-fa24")).unwrap();
        assert_eq!(rows.len(), 5);
        let counts: Vec<u64> = rows.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![0, 0, 0, 1, 0]);
    }

    #[test]
    fn decrement_of_unseeded_counter_is_invariant_violation() {
        let mut store = MemoryStore::new();
        let registry = MetricRegistry::default();

        let existing = rating(0, "ab1", "c1-fa24", "c1", "overall", 4);
        let mut unit = MutationUnit::new();
        unit.delete_rating(&existing);

        let err = store.apply(&unit, &registry).unwrap_err();
        assert!(matches!(err, TallyError::InvariantViolation(_)));
    }

    #[test]
    fn failed_unit_leaves_state_untouched() {
        let mut store = MemoryStore::new();
        let registry = MetricRegistry::default();

        let mut setup = MutationUnit::new();
        setup.insert_rating(rating(0, "ab1", "c1-fa24", "c1", "overall", 4));
        store.apply(&setup, &registry).unwrap();

        // Insert for one class paired with a bogus decrement elsewhere:
        // the insert must not survive the failed unit.
        let mut bad = MutationUnit::new();
        bad.insert_rating(rating(1, "cd2", "c1-fa24", "c1", "overall", 2));
        bad.delete_rating(&rating(9, "zz9", "ghost-fa24", "ghost", "overall", 1));

        assert!(store.apply(&bad, &registry).is_err());
        assert_eq!(store.rating_count().unwrap(), 1);
        let rows = store.counters_for_class(&ClassId::new("c1-fa24")).unwrap();
        assert_eq!(rows.iter().map(|r| r.count).sum::<u64>(), 1);
    }

    #[test]
    fn duplicate_live_rating_is_rejected() {
        let mut store = MemoryStore::new();
        let registry = MetricRegistry::default();

        let mut first = MutationUnit::new();
        first.insert_rating(rating(0, "ab1", "c1-fa24", "c1", "overall", 4));
        store.apply(&first, &registry).unwrap();

        let mut second = MutationUnit::new();
        second.insert_rating(rating(1, "ab1", "c1-sp25", "c1", "overall", 5));
        assert!(matches!(
            store.apply(&second, &registry),
            Err(TallyError::InvariantViolation(_))
        ));
    }

    #[test]
    fn replace_within_one_unit_is_allowed() {
        let mut store = MemoryStore::new();
        let registry = MetricRegistry::default();

        let old = rating(0, "ab1", "c1-fa24", "c1", "overall", 3);
        let mut setup = MutationUnit::new();
        setup.insert_rating(old.clone());
        store.apply(&setup, &registry).unwrap();

        let mut replace = MutationUnit::new();
        replace.delete_rating(&old);
        replace.insert_rating(rating(1, "ab1", "c1-sp25", "c1", "overall", 5));
        store.apply(&replace, &registry).unwrap();

        assert_eq!(store.rating_count().unwrap(), 1);
        let live = store
            .rating_for(
                &UserId::new("ab1"),
                &CourseId::new("c1"),
                &MetricName::new("overall"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(live.class_id.as_str(), "c1-sp25");
        assert_eq!(live.value, 5);
    }

    #[test]
    fn counter_rows_persist_at_zero() {
        let mut store = MemoryStore::new();
        let registry = MetricRegistry::default();

        let fact = rating(0, "ab1", "c1-fa24", "c1", "would_recommend", 1);
        let mut unit = MutationUnit::new();
        unit.insert_rating(fact.clone());
        store.apply(&unit, &registry).unwrap();

        let mut removal = MutationUnit::new();
        removal.delete_rating(&fact);
        store.apply(&removal, &registry).unwrap();

        let rows = store.counters_for_class(&ClassId::new("c1-fa24")).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.count == 0));
    }
}
