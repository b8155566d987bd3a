//! # Rating & Counter Storage
//!
//! Storage owns two tables that must never drift apart: the rating
//! facts and the per-class histogram counters. The only write entry
//! point is [`RatingStore::apply`], which takes a whole
//! [`MutationUnit`](crate::MutationUnit) and commits it atomically.
//!
//! Two backends are provided:
//! - [`MemoryStore`]: `BTreeMap`-backed, volatile; used by tests and
//!   the `memory` backend flag.
//! - [`RedbStore`]: disk-backed ACID storage using redb.

pub mod memory;
pub mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::metrics::MetricRegistry;
use crate::unit::MutationUnit;
use crate::{ClassId, CounterRow, CourseId, MetricName, Rating, RatingId, TallyError, UserId};

/// Storage interface shared by the memory and redb backends.
///
/// Reads are plain lookups and never require the atomic-commit
/// mechanism. All writes go through `apply`.
pub trait RatingStore {
    /// Allocate the next rating id. The id becomes durable only when a
    /// unit inserting it commits; abandoned ids leave harmless gaps.
    fn allocate_rating_id(&mut self) -> RatingId;

    /// The live rating for `(user, course, metric)`, if any.
    fn rating_for(
        &self,
        user: &UserId,
        course: &CourseId,
        metric: &MetricName,
    ) -> Result<Option<Rating>, TallyError>;

    /// Every live rating the user holds, in deterministic order.
    fn ratings_for_user(&self, user: &UserId) -> Result<Vec<Rating>, TallyError>;

    /// Every live rating the user holds for one course, across terms.
    fn ratings_for_user_course(
        &self,
        user: &UserId,
        course: &CourseId,
    ) -> Result<Vec<Rating>, TallyError>;

    /// All histogram cells for one class, in deterministic order.
    fn counters_for_class(&self, class: &ClassId) -> Result<Vec<CounterRow>, TallyError>;

    /// Every live rating in the store. Intended for status reporting
    /// and invariant checks, not hot paths.
    fn all_ratings(&self) -> Result<Vec<Rating>, TallyError>;

    /// Number of live ratings.
    fn rating_count(&self) -> Result<u64, TallyError>;

    /// Atomically apply one unit of work.
    ///
    /// Counter semantics: an increment on a `(class, metric)` pair with
    /// no rows yet seeds the metric's whole category domain (target
    /// cell at 1, the rest at 0). A decrement on a missing row, or any
    /// delta that would drive a count negative, is an
    /// `InvariantViolation` and aborts the entire unit. On any error
    /// nothing is persisted and the error propagates unchanged.
    fn apply(&mut self, unit: &MutationUnit, registry: &MetricRegistry)
    -> Result<(), TallyError>;
}
