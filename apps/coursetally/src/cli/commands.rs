//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands,
//! plus the engine assembly shared by all of them: roster loading,
//! optional TOML configuration, and backend selection.

use crate::api;
use coursetally_core::{
    ClassRecord, EngineConfig, Identity, MetricKind, MetricName, MetricRegistry, RatingEngine,
    Roster, SectionRef, TallyError, Term, UserId,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum roster file size (50 MB).
const MAX_ROSTER_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum file size for ingestion (100 MB).
///
/// This prevents memory exhaustion from malicious or accidental large files.
const MAX_INGEST_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), TallyError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| TallyError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(TallyError::BadInput(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Validate an input file path.
///
/// Canonicalizes the path (resolving symlinks and "..") and requires it
/// to be a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, TallyError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| TallyError::Io(format!("Invalid file path '{}': {}", path.display(), e)))?;

    if !canonical.is_file() {
        return Err(TallyError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

// =============================================================================
// ENGINE ASSEMBLY
// =============================================================================

/// Everything needed to assemble an engine from CLI arguments.
#[derive(Debug, Clone, Copy)]
pub struct EngineSetup<'a> {
    pub database: &'a Path,
    pub backend: &'a str,
    pub roster: &'a Path,
    pub config: Option<&'a Path>,
}

/// Optional TOML configuration file. Every field has a default, so an
/// empty file (or none at all) yields the stock engine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    max_rated_courses: Option<usize>,
    required_metrics: Option<Vec<String>>,
    course_ttl_ms: Option<u64>,
    semester_ttl_ms: Option<u64>,
    instructor_ttl_ms: Option<u64>,
    /// Extra or overridden metric declarations, name -> "scale"/"binary".
    #[serde(default)]
    metrics: BTreeMap<String, MetricKind>,
}

fn load_config(path: Option<&Path>) -> Result<(EngineConfig, MetricRegistry), TallyError> {
    let mut config = EngineConfig::default();
    let mut registry = MetricRegistry::default();

    let Some(path) = path else {
        return Ok((config, registry));
    };

    let raw = std::fs::read_to_string(path)
        .map_err(|e| TallyError::Io(format!("Cannot read config '{}': {}", path.display(), e)))?;
    let file: ConfigFile = toml::from_str(&raw)
        .map_err(|e| TallyError::BadInput(format!("Invalid config file: {}", e)))?;

    if let Some(max) = file.max_rated_courses {
        config.max_rated_courses = max;
    }
    if let Some(required) = file.required_metrics {
        config.required_metrics = required.into_iter().map(MetricName::new).collect();
    }
    if let Some(ttl) = file.course_ttl_ms {
        config.course_ttl_ms = ttl;
    }
    if let Some(ttl) = file.semester_ttl_ms {
        config.semester_ttl_ms = ttl;
    }
    if let Some(ttl) = file.instructor_ttl_ms {
        config.instructor_ttl_ms = ttl;
    }
    for (name, kind) in file.metrics {
        registry.register(MetricName::new(name), kind);
    }

    // Required metrics must be declared, or no batch could ever pass.
    for metric in &config.required_metrics {
        registry.require_kind(metric)?;
    }

    Ok((config, registry))
}

/// Composite storage keys are NUL-delimited, so identifiers that reach
/// the store must never carry one.
fn reject_nul(name: &str, value: &str) -> Result<(), TallyError> {
    if value.contains('\u{0}') {
        return Err(TallyError::BadInput(format!(
            "{name} must not contain NUL bytes"
        )));
    }
    Ok(())
}

fn load_roster(path: &Path) -> Result<Roster, TallyError> {
    let canonical = validate_file_path(path)?;
    validate_file_size(&canonical, MAX_ROSTER_FILE_SIZE)?;

    let raw = std::fs::read_to_string(&canonical)
        .map_err(|e| TallyError::Io(format!("Cannot read roster '{}': {}", path.display(), e)))?;
    let records: Vec<ClassRecord> = serde_json::from_str(&raw)
        .map_err(|e| TallyError::BadInput(format!("Invalid roster file: {}", e)))?;

    for record in &records {
        reject_nul("class_id", record.class_id.as_str())?;
        reject_nul("course_id", record.course_id.as_str())?;
        reject_nul("subject", &record.subject)?;
        reject_nul("course_number", &record.course_number)?;
        reject_nul("class_number", &record.class_number)?;
    }

    tracing::info!(classes = records.len(), "Roster loaded");
    Ok(Roster::from_records(records))
}

/// Assemble the engine from CLI arguments.
pub fn build_engine(setup: &EngineSetup<'_>) -> Result<RatingEngine, TallyError> {
    let (config, registry) = load_config(setup.config)?;
    let roster = load_roster(setup.roster)?;

    match setup.backend {
        "memory" => Ok(RatingEngine::with_memory(roster, registry, config)),
        "redb" => RatingEngine::with_redb(setup.database, roster, registry, config),
        other => Err(TallyError::BadInput(format!(
            "Unknown backend '{}' (expected \"redb\" or \"memory\")",
            other
        ))),
    }
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(setup: &EngineSetup<'_>, host: &str, port: u16) -> Result<(), TallyError> {
    let engine = build_engine(setup)?;

    println!("coursetally Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    println!("  Backend:  {}", setup.backend);
    println!("  Database: {:?}", setup.database);
    println!("  Roster:   {:?}", setup.roster);
    println!();
    println!("Endpoints:");
    println!("  POST /rating                - Submit one rating");
    println!("  POST /rating/batch          - Submit a metric slate");
    println!("  POST /rating/remove         - Remove one rating");
    println!("  POST /rating/remove-all     - Remove a user's ratings on one course");
    println!("  GET  /me/ratings            - The caller's ratings");
    println!("  GET  /aggregate/class       - Section/term aggregate");
    println!("  GET  /aggregate/course      - Cross-term course aggregate");
    println!("  GET  /aggregate/semesters   - Terms with ratings");
    println!("  GET  /aggregate/instructors - Per-instructor aggregates");
    println!("  GET  /status                - Engine status");
    println!("  GET  /health                - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let state = api::AppState::new(engine);
    let sweeper = api::spawn_cache_sweeper(&state);

    let addr = format!("{}:{}", host, port);
    let result = api::run_server(&addr, state).await;
    sweeper.abort();
    result
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show engine status.
pub fn cmd_status(setup: &EngineSetup<'_>, json_mode: bool) -> Result<(), TallyError> {
    let engine = build_engine(setup)?;
    let rating_count = engine.rating_count()?;

    if json_mode {
        let output = serde_json::json!({
            "database": setup.database.to_string_lossy(),
            "backend": setup.backend,
            "rating_count": rating_count,
            "roster_classes": engine.roster().len(),
            "metrics": engine.registry().names().map(MetricName::as_str).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
    } else {
        println!("coursetally Status");
        println!("  Database:       {:?}", setup.database);
        println!("  Backend:        {}", setup.backend);
        println!("  Ratings:        {}", rating_count);
        println!("  Roster classes: {}", engine.roster().len());
        print!("  Metrics:        ");
        let names: Vec<&str> = engine.registry().names().map(MetricName::as_str).collect();
        println!("{}", names.join(", "));
    }
    Ok(())
}

// =============================================================================
// INGEST COMMAND
// =============================================================================

/// One rating submission in an ingest file.
#[derive(Debug, Clone, Deserialize)]
struct SubmissionRecord {
    user: String,
    subject: String,
    number: String,
    section: String,
    semester: String,
    year: u16,
    metric: String,
    value: i64,
}

/// Replay rating submissions from a JSON file.
pub fn cmd_ingest(setup: &EngineSetup<'_>, json_mode: bool, file: &Path) -> Result<(), TallyError> {
    let canonical = validate_file_path(file)?;
    validate_file_size(&canonical, MAX_INGEST_FILE_SIZE)?;

    let raw = std::fs::read_to_string(&canonical)
        .map_err(|e| TallyError::Io(format!("Cannot read file '{}': {}", file.display(), e)))?;
    let records: Vec<SubmissionRecord> = serde_json::from_str(&raw)
        .map_err(|e| TallyError::BadInput(format!("Invalid ingest file: {}", e)))?;

    let mut engine = build_engine(setup)?;
    let mut accepted = 0usize;
    let mut rejected = 0usize;

    for record in &records {
        let result = reject_nul("user", &record.user)
            .and_then(|()| reject_nul("metric", &record.metric))
            .and_then(|()| Term::parse(&record.semester, record.year))
            .and_then(|term| {
                let section = SectionRef {
                    subject: record.subject.clone(),
                    course_number: record.number.clone(),
                    class_number: record.section.clone(),
                    term,
                };
                let identity = Identity::User(UserId::new(&record.user));
                engine.submit_rating(
                    &identity,
                    &section,
                    &MetricName::new(&record.metric),
                    record.value,
                )
            });
        match result {
            Ok(_) => accepted += 1,
            Err(e) => {
                rejected += 1;
                tracing::warn!(
                    user = record.user,
                    metric = record.metric,
                    "Submission rejected: {}",
                    e
                );
            }
        }
    }

    if json_mode {
        let output = serde_json::json!({
            "accepted": accepted,
            "rejected": rejected,
            "total": records.len(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
    } else {
        println!(
            "Ingest complete: {} accepted, {} rejected ({} total)",
            accepted,
            rejected,
            records.len()
        );
    }
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new empty database.
pub fn cmd_init(setup: &EngineSetup<'_>, force: bool) -> Result<(), TallyError> {
    if setup.backend != "redb" {
        return Err(TallyError::BadInput(
            "init only applies to the redb backend".to_string(),
        ));
    }

    if setup.database.exists() {
        if !force {
            return Err(TallyError::BadInput(format!(
                "Database {:?} already exists (use --force to overwrite)",
                setup.database
            )));
        }
        std::fs::remove_file(setup.database)
            .map_err(|e| TallyError::Io(format!("Cannot remove existing database: {}", e)))?;
    }

    let engine = build_engine(setup)?;
    println!(
        "Initialized empty database at {:?} ({} roster classes)",
        setup.database,
        engine.roster().len()
    );
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
