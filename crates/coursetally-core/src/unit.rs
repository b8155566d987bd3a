//! # Mutation Unit
//!
//! The explicit unit-of-work pairing every rating-fact change with its
//! counter deltas. A `MutationUnit` is built by the engine, then handed
//! to `RatingStore::apply`, which commits it atomically: either the
//! fact ops and every counter delta land, or nothing does.
//!
//! The builder methods are the only way to add operations, and each one
//! appends the fact op together with its paired delta(s). A call site
//! cannot mutate a fact without the matching counter adjustment.

use crate::{ClassId, MetricName, Rating, RatingId, Timestamp};

// =============================================================================
// OPERATIONS
// =============================================================================

/// A change to the rating fact table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactOp {
    /// Insert a new rating fact.
    Insert(Rating),
    /// Change the value of an existing fact in place (same term).
    UpdateValue {
        id: RatingId,
        value: i64,
        updated_at: Timestamp,
    },
    /// Delete an existing fact.
    Delete(RatingId),
}

/// A ±1 adjustment to one histogram cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDelta {
    pub class_id: ClassId,
    pub metric: MetricName,
    pub category: i64,
    /// Always +1 or -1.
    pub delta: i64,
}

// =============================================================================
// MUTATION UNIT
// =============================================================================

/// One atomic unit of work: fact operations plus their paired counter
/// deltas. Nested operations (replace = delete + insert) share a single
/// unit, never two.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationUnit {
    fact_ops: Vec<FactOp>,
    counter_deltas: Vec<CounterDelta>,
}

impl MutationUnit {
    /// Create an empty unit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new rating and increment its histogram cell.
    pub fn insert_rating(&mut self, rating: Rating) {
        self.counter_deltas.push(CounterDelta {
            class_id: rating.class_id.clone(),
            metric: rating.metric.clone(),
            category: rating.value,
            delta: 1,
        });
        self.fact_ops.push(FactOp::Insert(rating));
    }

    /// Update a rating's value in place, moving one count from the old
    /// cell to the new one on the same class.
    pub fn update_value(&mut self, existing: &Rating, new_value: i64, now: Timestamp) {
        self.counter_deltas.push(CounterDelta {
            class_id: existing.class_id.clone(),
            metric: existing.metric.clone(),
            category: existing.value,
            delta: -1,
        });
        self.counter_deltas.push(CounterDelta {
            class_id: existing.class_id.clone(),
            metric: existing.metric.clone(),
            category: new_value,
            delta: 1,
        });
        self.fact_ops.push(FactOp::UpdateValue {
            id: existing.id,
            value: new_value,
            updated_at: now,
        });
    }

    /// Delete a rating and decrement its histogram cell.
    pub fn delete_rating(&mut self, existing: &Rating) {
        self.counter_deltas.push(CounterDelta {
            class_id: existing.class_id.clone(),
            metric: existing.metric.clone(),
            category: existing.value,
            delta: -1,
        });
        self.fact_ops.push(FactOp::Delete(existing.id));
    }

    /// Whether the unit carries no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fact_ops.is_empty() && self.counter_deltas.is_empty()
    }

    /// The fact operations in application order.
    #[must_use]
    pub fn fact_ops(&self) -> &[FactOp] {
        &self.fact_ops
    }

    /// The counter deltas in application order.
    #[must_use]
    pub fn counter_deltas(&self) -> &[CounterDelta] {
        &self.counter_deltas
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{CourseId, Semester, Term, UserId};

    fn sample_rating(value: i64) -> Rating {
        Rating {
            id: RatingId(7),
            created_by: UserId::new("ab123"),
            class_id: ClassId::new("cs2110-fa24"),
            course_id: CourseId::new("cs2110"),
            subject: "CS".to_string(),
            course_number: "2110".to_string(),
            class_number: "001".to_string(),
            term: Term::new(2024, Semester::Fall),
            metric: MetricName::new("overall"),
            value,
            created_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(0),
        }
    }

    #[test]
    fn insert_pairs_fact_with_increment() {
        let mut unit = MutationUnit::new();
        unit.insert_rating(sample_rating(4));

        assert_eq!(unit.fact_ops().len(), 1);
        assert_eq!(unit.counter_deltas().len(), 1);
        assert_eq!(unit.counter_deltas()[0].delta, 1);
        assert_eq!(unit.counter_deltas()[0].category, 4);
    }

    #[test]
    fn update_moves_count_between_cells() {
        let existing = sample_rating(3);
        let mut unit = MutationUnit::new();
        unit.update_value(&existing, 5, Timestamp::from_millis(10));

        let deltas = unit.counter_deltas();
        assert_eq!(deltas.len(), 2);
        assert_eq!((deltas[0].category, deltas[0].delta), (3, -1));
        assert_eq!((deltas[1].category, deltas[1].delta), (5, 1));
        assert_eq!(deltas[0].class_id, deltas[1].class_id);
    }

    #[test]
    fn delete_pairs_fact_with_decrement() {
        let existing = sample_rating(2);
        let mut unit = MutationUnit::new();
        unit.delete_rating(&existing);

        assert_eq!(unit.fact_ops(), &[FactOp::Delete(RatingId(7))]);
        assert_eq!(unit.counter_deltas()[0].delta, -1);
    }

    #[test]
    fn replace_is_one_unit() {
        let old = sample_rating(3);
        let mut new = sample_rating(5);
        new.id = RatingId(8);
        new.class_id = ClassId::new("cs2110-sp25");

        let mut unit = MutationUnit::new();
        unit.delete_rating(&old);
        unit.insert_rating(new);

        assert_eq!(unit.fact_ops().len(), 2);
        assert_eq!(unit.counter_deltas().len(), 2);
        assert!(!unit.is_empty());
    }
}
