//! # Aggregation Cache
//!
//! A TTL read-through cache over the expensive multi-class aggregate
//! views. Entries expire on their own, but correctness does not wait
//! for the TTL: every committed mutation invalidates the touched
//! course's entries immediately, so a successful write is visible to
//! the very next read.
//!
//! Time is injected through the [`Clock`] trait. Production uses
//! [`SystemClock`]; tests drive a [`ManualClock`] so expiry is
//! deterministic.
//!
//! [`AggregateCache`] works through `&self`: each view sits behind its
//! own lock, so a reader holding only a shared reference to the engine
//! can still fill the cache on a miss. Two concurrent misses may both
//! recompute and both store the same-shaped fresh entry; the second
//! insert simply wins.

use crate::aggregate::{InstructorAggregate, MetricAggregate, TermSummary};
use crate::{CourseId, MetricName, Timestamp};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

// =============================================================================
// CLOCK
// =============================================================================

/// Source of the current time for TTL decisions and rating timestamps.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Timestamp::from_millis(millis)
    }
}

/// A clock that only moves when told to. Test-only in spirit, but kept
/// in the public API so integration tests outside the crate can use it.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// A manual clock starting at the given time.
    #[must_use]
    pub fn starting_at(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the clock to an absolute time.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Shared clocks tick the same as their inner clock, so a test can hold
/// an `Arc<ManualClock>` while the engine owns another handle.
impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

// =============================================================================
// TTL CACHE
// =============================================================================

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Timestamp,
}

/// A single-table TTL cache. Expired entries are dropped on access and
/// by periodic [`TtlCache::sweep`] calls.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    entries: BTreeMap<K, CacheEntry<V>>,
    ttl_ms: u64,
}

impl<K: Ord + Clone, V: Clone> TtlCache<K, V> {
    /// A cache whose entries live for `ttl_ms` after insertion.
    #[must_use]
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            ttl_ms,
        }
    }

    /// The cached value, if present and not expired. Expired entries
    /// are removed on the way out.
    pub fn get(&mut self, key: &K, now: Timestamp) -> Option<V> {
        match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert a value, stamping its expiry from `now`.
    pub fn insert(&mut self, key: K, value: V, now: Timestamp) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now.saturating_add(self.ttl_ms),
            },
        );
    }

    /// Remove one key.
    pub fn remove(&mut self, key: &K) {
        self.entries.remove(key);
    }

    /// Remove every key for which `predicate` holds. Returns how many
    /// entries were dropped.
    pub fn remove_where(&mut self, predicate: impl Fn(&K) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !predicate(key));
        before - self.entries.len()
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn sweep(&mut self, now: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before - self.entries.len()
    }

    /// Number of entries, live or expired-but-unswept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// AGGREGATE CACHE
// =============================================================================

/// Cache key for course aggregates: the course plus its normalized
/// (sorted, deduplicated) metric filter, so equivalent filters share an
/// entry.
pub type CourseKey = (CourseId, Vec<MetricName>);

/// Normalize a metric filter into its canonical cache-key form.
#[must_use]
pub fn normalize_filter(filter: Option<&[MetricName]>) -> Vec<MetricName> {
    let mut metrics: Vec<MetricName> = filter.unwrap_or_default().to_vec();
    metrics.sort();
    metrics.dedup();
    metrics
}

/// Take a view's lock, recovering the data from a poisoned mutex; the
/// caches hold plain values, so a panicking holder cannot leave one in
/// a torn state.
fn lock<T>(view: &Mutex<T>) -> MutexGuard<'_, T> {
    view.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The three cached read views, each with its own TTL and its own lock,
/// so lookups and fills work through `&self`.
#[derive(Debug)]
pub struct AggregateCache {
    course: Mutex<TtlCache<CourseKey, Vec<MetricAggregate>>>,
    terms: Mutex<TtlCache<CourseId, Vec<TermSummary>>>,
    instructors: Mutex<TtlCache<CourseId, Vec<InstructorAggregate>>>,
}

impl AggregateCache {
    /// Build the cache with per-view TTLs in milliseconds.
    #[must_use]
    pub fn new(course_ttl_ms: u64, term_ttl_ms: u64, instructor_ttl_ms: u64) -> Self {
        Self {
            course: Mutex::new(TtlCache::new(course_ttl_ms)),
            terms: Mutex::new(TtlCache::new(term_ttl_ms)),
            instructors: Mutex::new(TtlCache::new(instructor_ttl_ms)),
        }
    }

    /// The cached course aggregate for a key, if fresh.
    #[must_use]
    pub fn get_course(&self, key: &CourseKey, now: Timestamp) -> Option<Vec<MetricAggregate>> {
        lock(&self.course).get(key, now)
    }

    /// Store a freshly computed course aggregate.
    pub fn insert_course(&self, key: CourseKey, value: Vec<MetricAggregate>, now: Timestamp) {
        lock(&self.course).insert(key, value, now);
    }

    /// The cached terms-with-ratings view for a course, if fresh.
    #[must_use]
    pub fn get_terms(&self, course: &CourseId, now: Timestamp) -> Option<Vec<TermSummary>> {
        lock(&self.terms).get(course, now)
    }

    /// Store a freshly computed terms-with-ratings view.
    pub fn insert_terms(&self, course: CourseId, value: Vec<TermSummary>, now: Timestamp) {
        lock(&self.terms).insert(course, value, now);
    }

    /// The cached per-instructor view for a course, if fresh.
    #[must_use]
    pub fn get_instructors(
        &self,
        course: &CourseId,
        now: Timestamp,
    ) -> Option<Vec<InstructorAggregate>> {
        lock(&self.instructors).get(course, now)
    }

    /// Store a freshly computed per-instructor view.
    pub fn insert_instructors(
        &self,
        course: CourseId,
        value: Vec<InstructorAggregate>,
        now: Timestamp,
    ) {
        lock(&self.instructors).insert(course, value, now);
    }

    /// Drop every cached view derived from one course. Called after a
    /// mutation unit commits, and only then: failed mutations leave the
    /// cache untouched.
    pub fn invalidate_course(&self, course: &CourseId) {
        lock(&self.course).remove_where(|(cached, _)| cached == course);
        lock(&self.terms).remove(course);
        lock(&self.instructors).remove(course);
    }

    /// Drop every expired entry across all views.
    pub fn sweep(&self, now: Timestamp) -> usize {
        lock(&self.course).sweep(now) + lock(&self.terms).sweep(now)
            + lock(&self.instructors).sweep(now)
    }

    /// Total number of entries across all views.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.course).len() + lock(&self.terms).len() + lock(&self.instructors).len()
    }

    /// Whether no view holds any entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// TESTS
// =============================================================================
