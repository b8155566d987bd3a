//! # Rating Engine
//!
//! The operation surface tying everything together: constraint checks,
//! mutation-unit planning, atomic application, and cache maintenance.
//! The request layer calls only this module; the stores, aggregator and
//! cache are wired behind it.
//!
//! ## Mutation flow
//!
//! Every write follows the same shape:
//! 1. resolve the caller's identity and the target offering,
//! 2. validate against the metric registry and constraints,
//! 3. plan one [`MutationUnit`] pairing fact ops with counter deltas,
//! 4. `apply` it atomically,
//! 5. on success (and only then) invalidate the course's cached views.

use crate::aggregate::{Aggregator, InstructorAggregate, MetricAggregate, TermSummary};
use crate::cache::{AggregateCache, Clock, SystemClock, normalize_filter};
use crate::config::EngineConfig;
use crate::constraints::{check_course_ceiling, check_required_metrics, check_value};
use crate::metrics::MetricRegistry;
use crate::roster::{ClassRecord, Roster};
use crate::store::{MemoryStore, RatingStore, RedbStore};
use crate::unit::MutationUnit;
use crate::{CourseId, Identity, MetricName, Rating, TallyError, Term};
use std::collections::BTreeMap;
use std::path::Path;

// =============================================================================
// BACKEND SELECTION
// =============================================================================

/// The storage backend the engine runs on.
#[derive(Debug)]
pub enum StoreBackend {
    /// Volatile in-memory storage.
    Memory(MemoryStore),
    /// Persistent redb storage.
    Redb(RedbStore),
}

impl StoreBackend {
    fn as_store(&self) -> &dyn RatingStore {
        match self {
            Self::Memory(store) => store,
            Self::Redb(store) => store,
        }
    }

    fn as_store_mut(&mut self) -> &mut dyn RatingStore {
        match self {
            Self::Memory(store) => store,
            Self::Redb(store) => store,
        }
    }
}

// =============================================================================
// REQUEST SHAPES
// =============================================================================

/// The offering a submission targets, as the caller names it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRef {
    pub subject: String,
    pub course_number: String,
    pub class_number: String,
    pub term: Term,
}

// =============================================================================
// ENGINE
// =============================================================================

/// The rating engine.
pub struct RatingEngine {
    store: StoreBackend,
    roster: Roster,
    registry: MetricRegistry,
    config: EngineConfig,
    cache: AggregateCache,
    clock: Box<dyn Clock>,
}

impl std::fmt::Debug for RatingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatingEngine")
            .field("store", &self.store)
            .field("roster_len", &self.roster.len())
            .field("cache_len", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl RatingEngine {
    /// Build an engine on an explicit backend and clock.
    #[must_use]
    pub fn new(
        store: StoreBackend,
        roster: Roster,
        registry: MetricRegistry,
        config: EngineConfig,
        clock: Box<dyn Clock>,
    ) -> Self {
        let cache = AggregateCache::new(
            config.course_ttl_ms,
            config.semester_ttl_ms,
            config.instructor_ttl_ms,
        );
        Self {
            store,
            roster,
            registry,
            config,
            cache,
            clock,
        }
    }

    /// An engine on volatile in-memory storage and the system clock.
    #[must_use]
    pub fn with_memory(roster: Roster, registry: MetricRegistry, config: EngineConfig) -> Self {
        Self::new(
            StoreBackend::Memory(MemoryStore::new()),
            roster,
            registry,
            config,
            Box::new(SystemClock),
        )
    }

    /// An engine on persistent redb storage and the system clock.
    pub fn with_redb(
        path: impl AsRef<Path>,
        roster: Roster,
        registry: MetricRegistry,
        config: EngineConfig,
    ) -> Result<Self, TallyError> {
        Ok(Self::new(
            StoreBackend::Redb(RedbStore::open(path)?),
            roster,
            registry,
            config,
            Box::new(SystemClock),
        ))
    }

    /// The roster the engine resolves submissions against.
    #[must_use]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// The metric registry.
    #[must_use]
    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    /// Number of live ratings in the store.
    pub fn rating_count(&self) -> Result<u64, TallyError> {
        self.store.as_store().rating_count()
    }

    /// Total cached view entries.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Submit one rating of `metric` with `value` against a section.
    ///
    /// A first rating for the `(user, course, metric)` tuple inserts; a
    /// resubmission against the same offering updates the value in
    /// place; a resubmission against a different offering of the same
    /// course replaces the old fact, moving its count to the new class.
    /// Submitting the identical value against the same offering is a
    /// no-op and touches neither counters nor caches.
    pub fn submit_rating(
        &mut self,
        identity: &Identity,
        section: &SectionRef,
        metric: &MetricName,
        value: i64,
    ) -> Result<Rating, TallyError> {
        let user = identity.require_user()?.clone();
        let record = self.resolve_section(section)?;
        check_value(&self.registry, metric, value)?;

        let existing = self
            .store
            .as_store()
            .rating_for(&user, &record.course_id, metric)?;
        if existing.is_none() {
            let mine = self.store.as_store().ratings_for_user(&user)?;
            check_course_ceiling(&mine, &record.course_id, self.config.max_rated_courses)?;
        }

        let now = self.clock.now();
        let mut unit = MutationUnit::new();
        let result = match existing {
            None => {
                let id = self.store.as_store_mut().allocate_rating_id();
                let rating = build_rating(id, &user, &record, metric, value, now, now);
                unit.insert_rating(rating.clone());
                rating
            }
            Some(prior) if prior.class_id == record.class_id => {
                if prior.value == value {
                    return Ok(prior);
                }
                unit.update_value(&prior, value, now);
                Rating {
                    value,
                    updated_at: now,
                    ..prior
                }
            }
            Some(prior) => {
                unit.delete_rating(&prior);
                let id = self.store.as_store_mut().allocate_rating_id();
                let rating =
                    build_rating(id, &user, &record, metric, value, prior.created_at, now);
                unit.insert_rating(rating.clone());
                rating
            }
        };

        self.store.as_store_mut().apply(&unit, &self.registry)?;
        self.cache.invalidate_course(&record.course_id);
        Ok(result)
    }

    /// Submit a full slate of metrics for one section in one atomic
    /// unit.
    ///
    /// The batch must cover every required metric and may add optional
    /// ones. All of the user's prior ratings for the course (whatever
    /// offering they sat on) are replaced: nothing stale survives a
    /// batch, including metrics the batch does not name.
    pub fn submit_rating_batch(
        &mut self,
        identity: &Identity,
        section: &SectionRef,
        entries: &[(MetricName, i64)],
    ) -> Result<Vec<Rating>, TallyError> {
        let user = identity.require_user()?.clone();
        let record = self.resolve_section(section)?;

        let provided: Vec<MetricName> = entries.iter().map(|(m, _)| m.clone()).collect();
        check_required_metrics(&self.config.required_metrics, &provided)?;
        for (metric, value) in entries {
            check_value(&self.registry, metric, *value)?;
        }

        let prior = self
            .store
            .as_store()
            .ratings_for_user_course(&user, &record.course_id)?;
        if prior.is_empty() {
            let mine = self.store.as_store().ratings_for_user(&user)?;
            check_course_ceiling(&mine, &record.course_id, self.config.max_rated_courses)?;
        }
        let created_at = prior
            .iter()
            .map(|r| r.created_at)
            .min()
            .unwrap_or_else(|| self.clock.now());

        let now = self.clock.now();
        let mut unit = MutationUnit::new();
        for old in &prior {
            unit.delete_rating(old);
        }
        let mut inserted = Vec::with_capacity(entries.len());
        for (metric, value) in entries {
            let id = self.store.as_store_mut().allocate_rating_id();
            let rating = build_rating(id, &user, &record, metric, *value, created_at, now);
            unit.insert_rating(rating.clone());
            inserted.push(rating);
        }

        self.store.as_store_mut().apply(&unit, &self.registry)?;
        self.cache.invalidate_course(&record.course_id);
        Ok(inserted)
    }

    /// Remove the caller's rating of one metric on one course.
    pub fn remove_rating(
        &mut self,
        identity: &Identity,
        subject: &str,
        course_number: &str,
        metric: &MetricName,
    ) -> Result<(), TallyError> {
        let user = identity.require_user()?.clone();
        let course = self.resolve_course(subject, course_number)?;

        let Some(existing) = self.store.as_store().rating_for(&user, &course, metric)? else {
            return Err(TallyError::NotFound(format!(
                "no rating of '{}' by {} on {subject} {course_number}",
                metric.as_str(),
                user.as_str()
            )));
        };

        let mut unit = MutationUnit::new();
        unit.delete_rating(&existing);
        self.store.as_store_mut().apply(&unit, &self.registry)?;
        self.cache.invalidate_course(&course);
        Ok(())
    }

    /// Remove every rating the caller holds on one course, whichever
    /// offerings they sit on. Returns how many facts were removed; zero
    /// is not an error.
    pub fn remove_all_ratings(
        &mut self,
        identity: &Identity,
        subject: &str,
        course_number: &str,
    ) -> Result<usize, TallyError> {
        let user = identity.require_user()?.clone();
        let course = self.resolve_course(subject, course_number)?;
        let mine = self.store.as_store().ratings_for_user_course(&user, &course)?;
        if mine.is_empty() {
            return Ok(0);
        }

        let mut unit = MutationUnit::new();
        for rating in &mine {
            unit.delete_rating(rating);
        }
        self.store.as_store_mut().apply(&unit, &self.registry)?;
        self.cache.invalidate_course(&course);
        Ok(mine.len())
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// The caller's live ratings, grouped by course.
    pub fn user_ratings(
        &self,
        identity: &Identity,
    ) -> Result<BTreeMap<CourseId, Vec<Rating>>, TallyError> {
        let user = identity.require_user()?;
        let mut grouped: BTreeMap<CourseId, Vec<Rating>> = BTreeMap::new();
        for rating in self.store.as_store().ratings_for_user(user)? {
            grouped.entry(rating.course_id.clone()).or_default().push(rating);
        }
        Ok(grouped)
    }

    /// Aggregate one section, or a whole term of sections when
    /// `class_number` is absent. Never cached: class views are cheap
    /// (one class, or a handful) and callers expect them fresh.
    pub fn class_aggregate(
        &self,
        subject: &str,
        course_number: &str,
        class_number: Option<&str>,
        term: Term,
        filter: Option<&[MetricName]>,
    ) -> Result<Vec<MetricAggregate>, TallyError> {
        let course = self.resolve_course(subject, course_number)?;
        match class_number {
            Some(section) => {
                let record = self
                    .roster
                    .find_section(subject, course_number, section, term)
                    .ok_or_else(|| {
                        TallyError::NotFound(format!(
                            "no section {subject} {course_number}-{section} in {term}"
                        ))
                    })?;
                Aggregator::for_class(self.store.as_store(), &record.class_id, filter)
            }
            None => {
                if self.roster.sections_for_term(&course, term).is_empty() {
                    return Err(TallyError::NotFound(format!(
                        "no sections of {subject} {course_number} in {term}"
                    )));
                }
                Aggregator::for_term(self.store.as_store(), &self.roster, &course, term, filter)
            }
        }
    }

    /// Aggregate a course across all terms, through the cache. Cache
    /// fills go through the cache's own locks, so a shared reference is
    /// enough.
    pub fn course_aggregate(
        &self,
        subject: &str,
        course_number: &str,
        filter: Option<&[MetricName]>,
    ) -> Result<Vec<MetricAggregate>, TallyError> {
        let course = self.resolve_course(subject, course_number)?;
        let normalized = normalize_filter(filter);
        let key = (course.clone(), normalized.clone());
        let now = self.clock.now();

        if let Some(hit) = self.cache.get_course(&key, now) {
            return Ok(hit);
        }

        let effective = if normalized.is_empty() {
            None
        } else {
            Some(normalized.as_slice())
        };
        let computed =
            Aggregator::for_course(self.store.as_store(), &self.roster, &course, effective)?;
        self.cache.insert_course(key, computed.clone(), now);
        Ok(computed)
    }

    /// The terms in which a course accumulated ratings, ascending,
    /// through the cache.
    pub fn semesters_with_ratings(
        &self,
        subject: &str,
        course_number: &str,
    ) -> Result<Vec<TermSummary>, TallyError> {
        let course = self.resolve_course(subject, course_number)?;
        let now = self.clock.now();

        if let Some(hit) = self.cache.get_terms(&course, now) {
            return Ok(hit);
        }

        let computed =
            Aggregator::terms_with_ratings(self.store.as_store(), &self.roster, &course)?;
        self.cache.insert_terms(course, computed.clone(), now);
        Ok(computed)
    }

    /// Per-instructor aggregates for a course, through the cache.
    pub fn instructor_aggregates(
        &self,
        subject: &str,
        course_number: &str,
    ) -> Result<Vec<InstructorAggregate>, TallyError> {
        let course = self.resolve_course(subject, course_number)?;
        let now = self.clock.now();

        if let Some(hit) = self.cache.get_instructors(&course, now) {
            return Ok(hit);
        }

        let computed = Aggregator::per_instructor(self.store.as_store(), &self.roster, &course)?;
        self.cache.insert_instructors(course, computed.clone(), now);
        Ok(computed)
    }

    /// Drop expired cache entries. Returns how many were dropped.
    pub fn sweep_caches(&self) -> usize {
        let now = self.clock.now();
        self.cache.sweep(now)
    }

    // =========================================================================
    // RESOLUTION
    // =========================================================================

    fn resolve_section(&self, section: &SectionRef) -> Result<ClassRecord, TallyError> {
        self.roster
            .find_section(
                &section.subject,
                &section.course_number,
                &section.class_number,
                section.term,
            )
            .cloned()
            .ok_or_else(|| {
                TallyError::NotFound(format!(
                    "no section {} {}-{} in {}",
                    section.subject, section.course_number, section.class_number, section.term
                ))
            })
    }

    fn resolve_course(&self, subject: &str, course_number: &str) -> Result<CourseId, TallyError> {
        self.roster
            .course_id_for(subject, course_number)
            .cloned()
            .ok_or_else(|| {
                TallyError::NotFound(format!("no course {subject} {course_number}"))
            })
    }
}

fn build_rating(
    id: crate::RatingId,
    user: &crate::UserId,
    record: &ClassRecord,
    metric: &MetricName,
    value: i64,
    created_at: crate::Timestamp,
    updated_at: crate::Timestamp,
) -> Rating {
    Rating {
        id,
        created_by: user.clone(),
        class_id: record.class_id.clone(),
        course_id: record.course_id.clone(),
        subject: record.subject.clone(),
        course_number: record.course_number.clone(),
        class_number: record.class_number.clone(),
        term: record.term,
        metric: metric.clone(),
        value,
        created_at,
        updated_at,
    }
}

// =============================================================================
// TESTS
// =============================================================================
