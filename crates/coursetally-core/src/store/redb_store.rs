//! # redb-backed Store
//!
//! Disk-backed rating and counter storage using the redb embedded
//! database, providing:
//! - ACID transactions (one `MutationUnit` = one write transaction)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (readers never block the single writer)
//!
//! The single-writer property is what linearizes concurrent mutations
//! of the same counter cell: a unit either commits in full or is
//! dropped in full, and a failed unit is retried whole by the caller.
//!
//! ## Key encoding
//!
//! Composite string keys use `'\u{0}'` as a separator, which also makes
//! prefix range scans cheap (`prefix + '\u{0}'` .. `prefix + '\u{1}'`).
//! Identifiers and metric names therefore must not contain NUL; the
//! roster loader and the request layer reject NUL-bearing identifiers
//! before they can reach a key.

use super::RatingStore;
use crate::metrics::MetricRegistry;
use crate::unit::{FactOp, MutationUnit};
use crate::{ClassId, CounterRow, CourseId, MetricName, Rating, RatingId, TallyError, UserId};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;

/// Table for rating facts: RatingId(u64) -> serialized Rating bytes.
const RATINGS: TableDefinition<u64, &[u8]> = TableDefinition::new("ratings");

/// Table for the live-rating index: "user\0course\0metric" -> RatingId(u64).
const RATING_INDEX: TableDefinition<&str, u64> = TableDefinition::new("rating_index");

/// Table for histogram cells: ("class\0metric", category) -> count.
const COUNTERS: TableDefinition<(&str, i64), u64> = TableDefinition::new("counters");

/// Table for metadata: key string -> value u64.
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const SEP: char = '\u{0}';

fn index_key(user: &UserId, course: &CourseId, metric: &MetricName) -> String {
    format!(
        "{}{SEP}{}{SEP}{}",
        user.as_str(),
        course.as_str(),
        metric.as_str()
    )
}

fn counter_key(class: &ClassId, metric: &MetricName) -> String {
    format!("{}{SEP}{}", class.as_str(), metric.as_str())
}

/// Half-open `[start, end)` bounds covering every key that begins with
/// `prefix + SEP`.
fn prefix_bounds(prefix: &str) -> (String, String) {
    (format!("{prefix}\u{0}"), format!("{prefix}\u{1}"))
}

fn io_err(e: impl std::fmt::Display) -> TallyError {
    TallyError::Io(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> TallyError {
    TallyError::Serialization(e.to_string())
}

/// Disk-backed rating store using redb.
pub struct RedbStore {
    /// The redb database handle.
    db: Database,
    /// Next available rating id, persisted with every commit.
    next_rating_id: u64,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("next_rating_id", &self.next_rating_id)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a rating database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TallyError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(RATINGS).map_err(io_err)?;
            let _ = write_txn.open_table(RATING_INDEX).map_err(io_err)?;
            let _ = write_txn.open_table(COUNTERS).map_err(io_err)?;
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        let read_txn = db.begin_read().map_err(io_err)?;
        let next_rating_id = {
            let table = read_txn.open_table(METADATA).map_err(io_err)?;
            table
                .get("next_rating_id")
                .map_err(io_err)?
                .map(|v| v.value())
                .unwrap_or(0)
        };

        Ok(Self { db, next_rating_id })
    }

    /// Compact the database (optional optimization).
    pub fn compact(&mut self) -> Result<(), TallyError> {
        self.db.compact().map_err(io_err)?;
        Ok(())
    }
}

impl RatingStore for RedbStore {
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
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let index = read_txn.open_table(RATING_INDEX).map_err(io_err)?;
        let ratings = read_txn.open_table(RATINGS).map_err(io_err)?;

        let key = index_key(user, course, metric);
        let Some(id) = index.get(key.as_str()).map_err(io_err)?.map(|v| v.value()) else {
            return Ok(None);
        };
        match ratings.get(id).map_err(io_err)? {
            Some(data) => {
                let rating: Rating = postcard::from_bytes(data.value()).map_err(ser_err)?;
                Ok(Some(rating))
            }
            None => Ok(None),
        }
    }

    fn ratings_for_user(&self, user: &UserId) -> Result<Vec<Rating>, TallyError> {
        let (start, end) = prefix_bounds(user.as_str());
        self.collect_indexed(&start, &end)
    }

    fn ratings_for_user_course(
        &self,
        user: &UserId,
        course: &CourseId,
    ) -> Result<Vec<Rating>, TallyError> {
        let (start, end) = prefix_bounds(&format!("{}{SEP}{}", user.as_str(), course.as_str()));
        self.collect_indexed(&start, &end)
    }

    fn counters_for_class(&self, class: &ClassId) -> Result<Vec<CounterRow>, TallyError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let counters = read_txn.open_table(COUNTERS).map_err(io_err)?;

        let (start, end) = prefix_bounds(class.as_str());
        let mut rows = Vec::new();
        for entry in counters
            .range((start.as_str(), i64::MIN)..(end.as_str(), i64::MIN))
            .map_err(io_err)?
        {
            let (key, value) = entry.map_err(io_err)?;
            let (composite, category) = key.value();
            let Some((class_part, metric_part)) = composite.split_once(SEP) else {
                return Err(TallyError::Serialization(format!(
                    "malformed counter key '{composite}'"
                )));
            };
            rows.push(CounterRow {
                class_id: ClassId::new(class_part),
                metric: MetricName::new(metric_part),
                category,
                count: value.value(),
            });
        }
        Ok(rows)
    }

    fn all_ratings(&self) -> Result<Vec<Rating>, TallyError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let ratings = read_txn.open_table(RATINGS).map_err(io_err)?;

        let mut out = Vec::new();
        for entry in ratings.iter().map_err(io_err)? {
            let (_, data) = entry.map_err(io_err)?;
            let rating: Rating = postcard::from_bytes(data.value()).map_err(ser_err)?;
            out.push(rating);
        }
        Ok(out)
    }

    fn rating_count(&self) -> Result<u64, TallyError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let ratings = read_txn.open_table(RATINGS).map_err(io_err)?;
        ratings.len().map_err(io_err)
    }

    fn apply(
        &mut self,
        unit: &MutationUnit,
        registry: &MetricRegistry,
    ) -> Result<(), TallyError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;

        // Any early return drops the transaction, which aborts it:
        // nothing from a failed unit ever reaches disk.
        {
            let mut ratings = write_txn.open_table(RATINGS).map_err(io_err)?;
            let mut index = write_txn.open_table(RATING_INDEX).map_err(io_err)?;
            let mut counters = write_txn.open_table(COUNTERS).map_err(io_err)?;
            let mut metadata = write_txn.open_table(METADATA).map_err(io_err)?;

            for op in unit.fact_ops() {
                match op {
                    FactOp::Insert(rating) => {
                        if ratings.get(rating.id.0).map_err(io_err)?.is_some() {
                            return Err(TallyError::InvariantViolation(format!(
                                "insert reuses rating id {}",
                                rating.id.0
                            )));
                        }
                        let key =
                            index_key(&rating.created_by, &rating.course_id, &rating.metric);
                        let occupied = index.get(key.as_str()).map_err(io_err)?.is_some();
                        if occupied {
                            return Err(TallyError::InvariantViolation(format!(
                                "duplicate live rating for {}/{}/{}",
                                rating.created_by.as_str(),
                                rating.course_id.as_str(),
                                rating.metric.as_str()
                            )));
                        }
                        let bytes = postcard::to_allocvec(rating).map_err(ser_err)?;
                        ratings
                            .insert(rating.id.0, bytes.as_slice())
                            .map_err(io_err)?;
                        index.insert(key.as_str(), rating.id.0).map_err(io_err)?;
                    }
                    FactOp::UpdateValue {
                        id,
                        value,
                        updated_at,
                    } => {
                        let bytes = ratings
                            .get(id.0)
                            .map_err(io_err)?
                            .map(|data| data.value().to_vec());
                        let Some(bytes) = bytes else {
                            return Err(TallyError::InvariantViolation(format!(
                                "update of missing rating {}",
                                id.0
                            )));
                        };
                        let mut rating: Rating =
                            postcard::from_bytes(&bytes).map_err(ser_err)?;
                        rating.value = *value;
                        rating.updated_at = *updated_at;
                        let bytes = postcard::to_allocvec(&rating).map_err(ser_err)?;
                        ratings.insert(id.0, bytes.as_slice()).map_err(io_err)?;
                    }
                    FactOp::Delete(id) => {
                        let bytes = ratings
                            .get(id.0)
                            .map_err(io_err)?
                            .map(|data| data.value().to_vec());
                        let Some(bytes) = bytes else {
                            return Err(TallyError::InvariantViolation(format!(
                                "delete of missing rating {}",
                                id.0
                            )));
                        };
                        let rating: Rating = postcard::from_bytes(&bytes).map_err(ser_err)?;
                        ratings.remove(id.0).map_err(io_err)?;
                        index
                            .remove(
                                index_key(&rating.created_by, &rating.course_id, &rating.metric)
                                    .as_str(),
                            )
                            .map_err(io_err)?;
                    }
                }
            }

            for delta in unit.counter_deltas() {
                let key = counter_key(&delta.class_id, &delta.metric);
                let current = counters
                    .get((key.as_str(), delta.category))
                    .map_err(io_err)?
                    .map(|v| v.value());

                match current {
                    Some(count) => {
                        let updated = if delta.delta < 0 {
                            count.checked_sub(1).ok_or_else(|| {
                                TallyError::InvariantViolation(format!(
                                    "counter {}/{}:{} would go negative",
                                    delta.class_id.as_str(),
                                    delta.metric.as_str(),
                                    delta.category
                                ))
                            })?
                        } else {
                            count.saturating_add(1)
                        };
                        counters
                            .insert((key.as_str(), delta.category), updated)
                            .map_err(io_err)?;
                    }
                    None => {
                        let pair_seeded = {
                            let mut range = counters
                                .range((key.as_str(), i64::MIN)..=(key.as_str(), i64::MAX))
                                .map_err(io_err)?;
                            range.next().is_some()
                        };
                        if pair_seeded {
                            return Err(TallyError::InvariantViolation(format!(
                                "category {} outside the seeded domain of '{}'",
                                delta.category,
                                delta.metric.as_str()
                            )));
                        }
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
                        for &category in kind.domain() {
                            let seed = u64::from(category == delta.category);
                            counters
                                .insert((key.as_str(), category), seed)
                                .map_err(io_err)?;
                        }
                    }
                }
            }

            metadata
                .insert("next_rating_id", self.next_rating_id)
                .map_err(io_err)?;
        }

        write_txn.commit().map_err(io_err)?;
        Ok(())
    }
}

impl RedbStore {
    /// Fetch every indexed rating whose index key lies in `[start, end)`.
    fn collect_indexed(&self, start: &str, end: &str) -> Result<Vec<Rating>, TallyError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let index = read_txn.open_table(RATING_INDEX).map_err(io_err)?;
        let ratings = read_txn.open_table(RATINGS).map_err(io_err)?;

        let mut out = Vec::new();
        for entry in index.range(start..end).map_err(io_err)? {
            let (_, id) = entry.map_err(io_err)?;
            if let Some(data) = ratings.get(id.value()).map_err(io_err)? {
                let rating: Rating = postcard::from_bytes(data.value()).map_err(ser_err)?;
                out.push(rating);
            }
        }
        Ok(out)
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
    use tempfile::tempdir;

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

    fn insert(store: &mut RedbStore, mut fact: Rating) {
        // Draw the id from the store so next_rating_id persists with
        // the commit, the same way the engine inserts.
        fact.id = store.allocate_rating_id();
        let registry = MetricRegistry::default();
        let mut unit = MutationUnit::new();
        unit.insert_rating(fact);
        store.apply(&unit, &registry).unwrap();
    }

    #[test]
    fn basic_round_trip() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("test.redb")).expect("open db");

        insert(&mut store, rating(0, "ab1", "c1-fa24", "c1", "overall", 4));

        let found = store
            .rating_for(
                &UserId::new("ab1"),
                &CourseId::new("c1"),
                &MetricName::new("overall"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(found.value, 4);
        assert_eq!(store.rating_count().unwrap(), 1);
    }

    #[test]
    fn counters_seed_and_adjust() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("test.redb")).expect("open db");
        let registry = MetricRegistry::default();

        insert(&mut store, rating(0, "ab1", "c1-fa24", "c1", "overall", 4));
        insert(&mut store, rating(1, "cd2", "c1-fa24", "c1", "overall", 4));

        let rows = store.counters_for_class(&ClassId::new("c1-fa24")).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows.iter().find(|r| r.category == 4).unwrap().count, 2);

        let mut removal = MutationUnit::new();
        removal.delete_rating(&rating(1, "cd2", "c1-fa24", "c1", "overall", 4));
        store.apply(&removal, &registry).unwrap();

        let rows = store.counters_for_class(&ClassId::new("c1-fa24")).unwrap();
        assert_eq!(rows.iter().find(|r| r.category == 4).unwrap().count, 1);
    }

    #[test]
    fn failed_unit_rolls_back_everything() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("test.redb")).expect("open db");
        let registry = MetricRegistry::default();

        // A unit whose counter deltas fail after its fact op: the fact
        // must not survive the abort.
        let mut bad = MutationUnit::new();
        bad.insert_rating(rating(0, "ab1", "c1-fa24", "c1", "overall", 4));
        bad.delete_rating(&rating(9, "zz9", "ghost-fa24", "ghost", "overall", 1));

        assert!(store.apply(&bad, &registry).is_err());
        assert_eq!(store.rating_count().unwrap(), 0);
        assert!(
            store
                .counters_for_class(&ClassId::new("c1-fa24"))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn reused_rating_id_cannot_overwrite_a_fact() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("test.redb")).expect("open db");
        let registry = MetricRegistry::default();

        insert(&mut store, rating(0, "ab1", "c1-fa24", "c1", "overall", 4));

        // A different user's insert carrying the already-stored id: the
        // unit must abort before the first fact is clobbered.
        let mut reuse = MutationUnit::new();
        reuse.insert_rating(rating(0, "cd2", "c1-fa24", "c1", "overall", 2));
        let err = store.apply(&reuse, &registry).unwrap_err();
        assert!(matches!(err, TallyError::InvariantViolation(_)));

        assert_eq!(store.rating_count().unwrap(), 1);
        let kept = store
            .rating_for(
                &UserId::new("ab1"),
                &CourseId::new("c1"),
                &MetricName::new("overall"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(kept.value, 4);

        // Exactly one count survives across the class's cells.
        let rows = store.counters_for_class(&ClassId::new("c1-fa24")).unwrap();
        assert_eq!(rows.iter().map(|r| r.count).sum::<u64>(), 1);
    }

    #[test]
    fn user_scans_are_prefix_exact() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("test.redb")).expect("open db");

        insert(&mut store, rating(0, "ab1", "c1-fa24", "c1", "overall", 4));
        insert(&mut store, rating(1, "ab1", "c2-fa24", "c2", "overall", 3));
        // "ab12" shares the byte prefix "ab1"; the separator keeps it out.
        insert(&mut store, rating(2, "ab12", "c1-fa24", "c1", "overall", 5));

        let mine = store.ratings_for_user(&UserId::new("ab1")).unwrap();
        assert_eq!(mine.len(), 2);

        let per_course = store
            .ratings_for_user_course(&UserId::new("ab1"), &CourseId::new("c2"))
            .unwrap();
        assert_eq!(per_course.len(), 1);
        assert_eq!(per_course[0].course_id.as_str(), "c2");
    }

    #[test]
    fn persistence_across_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        {
            let mut store = RedbStore::open(&db_path).expect("open db");
            insert(&mut store, rating(0, "ab1", "c1-fa24", "c1", "overall", 4));
        }

        {
            let mut store = RedbStore::open(&db_path).expect("reopen db");
            assert_eq!(store.rating_count().unwrap(), 1);
            // Allocated ids keep climbing after reopen.
            assert_eq!(store.allocate_rating_id(), RatingId(1));
            let rows = store.counters_for_class(&ClassId::new("c1-fa24")).unwrap();
            assert_eq!(rows.iter().map(|r| r.count).sum::<u64>(), 1);
        }
    }
}
