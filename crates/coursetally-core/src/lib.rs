//! # coursetally-core
//!
//! The rating aggregation engine behind coursetally: per-user rating
//! facts, denormalized histogram counters that never drift from them,
//! and cached read-side aggregates.
//!
//! ## Architecture
//!
//! - **Types** ([`types`]): identifiers, terms, the rating fact, the
//!   counter row, and the error taxonomy.
//! - **Metrics** ([`metrics`]): the single source of truth for each
//!   metric's value domain.
//! - **Constraints** ([`constraints`]): pure pre-mutation validation.
//! - **Unit** ([`unit`]): the atomic unit of work pairing fact ops with
//!   counter deltas.
//! - **Store** ([`store`]): the `RatingStore` trait with in-memory and
//!   redb backends; `apply` is the only write entry point.
//! - **Aggregate** ([`aggregate`]): counter-only read-side views.
//! - **Cache** ([`cache`]): TTL caches over the multi-class views, plus
//!   the injected `Clock`.
//! - **Roster** ([`roster`]): read-only class reference data.
//! - **Engine** ([`engine`]): the operation surface wiring it all up.
//!
//! ## Design Principles
//!
//! - **Counters never drift**: every fact mutation and its counter
//!   deltas commit in one atomic unit or not at all.
//! - **Reads never scan facts**: aggregates come from counters alone.
//! - **Injected time**: TTLs and timestamps run on a `Clock`, so tests
//!   are deterministic.
//! - **Deterministic iteration**: `BTreeMap`/`BTreeSet` everywhere.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod constraints;
pub mod engine;
pub mod metrics;
pub mod roster;
pub mod store;
pub mod types;
pub mod unit;

pub use aggregate::{Aggregator, CategoryCount, InstructorAggregate, MetricAggregate, TermSummary};
pub use cache::{AggregateCache, Clock, ManualClock, SystemClock, TtlCache};
pub use config::EngineConfig;
pub use engine::{RatingEngine, SectionRef, StoreBackend};
pub use metrics::{MetricKind, MetricRegistry};
pub use roster::{ClassRecord, Roster};
pub use store::{MemoryStore, RatingStore, RedbStore};
pub use types::{
    ClassId, CounterRow, CourseId, Identity, MetricName, Rating, RatingId, Semester, TallyError,
    Term, Timestamp, UserId,
};
pub use unit::{CounterDelta, FactOp, MutationUnit};
