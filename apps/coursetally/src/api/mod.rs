//! # coursetally HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `POST /rating` - Submit one rating
//! - `POST /rating/batch` - Submit a full metric slate atomically
//! - `POST /rating/remove` - Remove one of the caller's ratings
//! - `POST /rating/remove-all` - Remove all of the caller's ratings on one course
//! - `GET /me/ratings` - The caller's ratings, grouped by course
//! - `GET /aggregate/class` - Aggregate one section or a whole term
//! - `GET /aggregate/course` - Aggregate a course across all terms
//! - `GET /aggregate/semesters` - Terms in which a course has ratings
//! - `GET /aggregate/instructors` - Per-instructor aggregates
//! - `GET /status` - Engine status
//! - `GET /health` - Health check
//!
//! ## Identity
//!
//! The caller principal arrives in the `x-tally-user` header, resolved
//! by an upstream gateway. Mutating endpoints reject anonymous callers.
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `COURSETALLY_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `COURSETALLY_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `COURSETALLY_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

// Re-exports for external use
pub use auth::{USER_HEADER, get_api_key_from_env, identity_from_headers};
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
// Re-export handlers and types for integration tests (via `coursetally::api::*`)
#[allow(unused_imports)]
pub use handlers::{
    class_aggregate_handler, course_aggregate_handler, health_handler, instructors_handler,
    me_ratings_handler, remove_all_handler, remove_rating_handler, semesters_handler,
    status_handler, submit_batch_handler, submit_rating_handler,
};
#[allow(unused_imports)]
pub use types::{
    AggregateResponse, BatchRequest, BatchResponse, ClassAggregateParams, CourseAggregateParams,
    CourseParams, HealthResponse, InstructorsResponse, MetricValue, RatingJson, RatingRequest,
    RatingResponse, RemoveAllRequest, RemoveRequest, RemoveResponse, SemestersResponse,
    StatusResponse, UserRatingsResponse,
};

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use coursetally_core::{RatingEngine, TallyError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// How often the background task drops expired cache entries.
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state containing the rating engine.
#[derive(Clone)]
pub struct AppState {
    /// The engine behind a read/write lock. Cached reads run under the
    /// read lock; a miss fills the cache through its own interior locks.
    pub engine: Arc<RwLock<RatingEngine>>,
}

impl AppState {
    /// Create new app state around an engine.
    #[must_use]
    pub fn new(engine: RatingEngine) -> Self {
        Self {
            engine: Arc::new(RwLock::new(engine)),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build CORS layer from environment configuration.
///
/// Reads `COURSETALLY_CORS_ORIGINS` environment variable:
/// - If "*": allows all origins (development mode - use with caution!)
/// - If not set: defaults to localhost only (restrictive default)
/// - Otherwise: parses comma-separated list of allowed origins
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("COURSETALLY_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (COURSETALLY_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in COURSETALLY_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => {
            tracing::info!("CORS: No COURSETALLY_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

/// Build a restrictive CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let localhost_origins = vec![
        "http://localhost:3000".parse::<HeaderValue>().ok(),
        "http://localhost:8080".parse::<HeaderValue>().ok(),
        "http://127.0.0.1:3000".parse::<HeaderValue>().ok(),
        "http://127.0.0.1:8080".parse::<HeaderValue>().ok(),
    ];
    let origins: Vec<HeaderValue> = localhost_origins.into_iter().flatten().collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. CORS - handles preflight requests
/// 2. Tracing - logs all requests
/// 3. Rate Limiting - protects against DoS (if enabled)
/// 4. Authentication - validates API key (if configured)
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    // Check if rate limiting is enabled
    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    // Check if authentication is enabled
    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible! \
             Set COURSETALLY_API_KEY environment variable to enable authentication."
        );
    }

    // Build base router with routes
    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/rating", post(handlers::submit_rating_handler))
        .route("/rating/batch", post(handlers::submit_batch_handler))
        .route("/rating/remove", post(handlers::remove_rating_handler))
        .route("/rating/remove-all", post(handlers::remove_all_handler))
        .route("/me/ratings", get(handlers::me_ratings_handler))
        .route("/aggregate/class", get(handlers::class_aggregate_handler))
        .route("/aggregate/course", get(handlers::course_aggregate_handler))
        .route("/aggregate/semesters", get(handlers::semesters_handler))
        .route("/aggregate/instructors", get(handlers::instructors_handler));

    // Apply authentication middleware (innermost - runs last on request)
    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    // Apply rate limiting middleware
    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    // Apply CORS, body limit, and tracing (outermost layers)
    router
        .layer(axum::extract::DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// BACKGROUND MAINTENANCE
// =============================================================================

/// Spawn the periodic cache sweeper for a server's engine.
pub fn spawn_cache_sweeper(state: &AppState) -> tokio::task::JoinHandle<()> {
    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let swept = engine.read().await.sweep_caches();
            if swept > 0 {
                tracing::debug!(swept, "Dropped expired aggregate cache entries");
            }
        }
    })
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server on existing state.
pub async fn run_server(addr: &str, state: AppState) -> Result<(), TallyError> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| TallyError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("coursetally HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| TallyError::Io(format!("Server error: {}", e)))
}
