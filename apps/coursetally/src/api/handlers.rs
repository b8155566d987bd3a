//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers. Each one
//! resolves the caller identity from headers, delegates to the engine,
//! and maps the error taxonomy onto HTTP status codes in one place.

use super::{
    AppState,
    auth::identity_from_headers,
    types::{
        AggregateResponse, BatchRequest, BatchResponse, ClassAggregateParams,
        CourseAggregateParams, CourseParams, HealthResponse, InstructorsResponse, RatingJson,
        RatingRequest, RatingResponse, RemoveAllRequest, RemoveRequest, RemoveResponse,
        SemestersResponse,
        StatusResponse, UserRatingsResponse, parse_metric_filter,
    },
};
use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use coursetally_core::{TallyError, Term};

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// Map the engine error taxonomy onto HTTP status codes.
fn error_status(error: &TallyError) -> StatusCode {
    match error {
        TallyError::Unauthenticated => StatusCode::UNAUTHORIZED,
        TallyError::BadInput(_) | TallyError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
        TallyError::ConstraintViolation { .. } => StatusCode::CONFLICT,
        TallyError::NotFound(_) => StatusCode::NOT_FOUND,
        TallyError::InvariantViolation(_) | TallyError::Io(_) | TallyError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// STATUS HANDLER
// =============================================================================

/// Get engine status.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.read().await;
    match engine.rating_count() {
        Ok(rating_count) => (
            StatusCode::OK,
            Json(StatusResponse {
                rating_count,
                roster_classes: engine.roster().len(),
                cached_views: engine.cache_len(),
            }),
        )
            .into_response(),
        Err(e) => (
            error_status(&e),
            Json(serde_json::json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

// =============================================================================
// RATING HANDLERS
// =============================================================================

/// Submit one rating.
pub async fn submit_rating_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RatingRequest>,
) -> impl IntoResponse {
    let identity = identity_from_headers(&headers);
    let section = match request.to_section() {
        Ok(s) => s,
        Err(e) => return (error_status(&e), Json(RatingResponse::error(e.to_string()))),
    };

    let mut engine = state.engine.write().await;
    let metric = coursetally_core::MetricName::new(&request.metric);
    match engine.submit_rating(&identity, &section, &metric, request.value) {
        Ok(rating) => (StatusCode::OK, Json(RatingResponse::success(&rating))),
        Err(e) => (error_status(&e), Json(RatingResponse::error(e.to_string()))),
    }
}

/// Submit a full slate of metrics in one atomic unit.
pub async fn submit_batch_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> impl IntoResponse {
    let identity = identity_from_headers(&headers);
    let section = match request.to_section() {
        Ok(s) => s,
        Err(e) => return (error_status(&e), Json(BatchResponse::error(e.to_string()))),
    };

    let mut engine = state.engine.write().await;
    match engine.submit_rating_batch(&identity, &section, &request.entries()) {
        Ok(ratings) => (StatusCode::OK, Json(BatchResponse::success(&ratings))),
        Err(e) => (error_status(&e), Json(BatchResponse::error(e.to_string()))),
    }
}

/// Remove one of the caller's ratings.
pub async fn remove_rating_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RemoveRequest>,
) -> impl IntoResponse {
    let identity = identity_from_headers(&headers);
    if let Err(e) = request.validate() {
        return (error_status(&e), Json(RemoveResponse::error(e.to_string())));
    }

    let mut engine = state.engine.write().await;
    let metric = coursetally_core::MetricName::new(&request.metric);
    match engine.remove_rating(&identity, &request.subject, &request.number, &metric) {
        Ok(()) => (StatusCode::OK, Json(RemoveResponse::success(1))),
        Err(e) => (error_status(&e), Json(RemoveResponse::error(e.to_string()))),
    }
}

/// Remove every rating the caller holds on one course.
pub async fn remove_all_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RemoveAllRequest>,
) -> impl IntoResponse {
    let identity = identity_from_headers(&headers);
    if let Err(e) = request.validate() {
        return (error_status(&e), Json(RemoveResponse::error(e.to_string())));
    }

    let mut engine = state.engine.write().await;
    match engine.remove_all_ratings(&identity, &request.subject, &request.number) {
        Ok(removed) => (StatusCode::OK, Json(RemoveResponse::success(removed))),
        Err(e) => (error_status(&e), Json(RemoveResponse::error(e.to_string()))),
    }
}

/// The caller's ratings, grouped by course.
pub async fn me_ratings_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let identity = identity_from_headers(&headers);
    let engine = state.engine.read().await;
    match engine.user_ratings(&identity) {
        Ok(grouped) => {
            let courses = grouped
                .iter()
                .map(|(course, ratings)| {
                    (
                        course.as_str().to_string(),
                        ratings.iter().map(RatingJson::from).collect(),
                    )
                })
                .collect();
            (
                StatusCode::OK,
                Json(UserRatingsResponse {
                    success: true,
                    courses,
                    error: None,
                }),
            )
        }
        Err(e) => (
            error_status(&e),
            Json(UserRatingsResponse::error(e.to_string())),
        ),
    }
}

// =============================================================================
// AGGREGATE HANDLERS
// =============================================================================

/// Aggregate one section, or a whole term when no section is given.
pub async fn class_aggregate_handler(
    State(state): State<AppState>,
    Query(params): Query<ClassAggregateParams>,
) -> impl IntoResponse {
    let term = match Term::parse(&params.semester, params.year) {
        Ok(t) => t,
        Err(e) => {
            return (
                error_status(&e),
                Json(AggregateResponse::error(e.to_string())),
            );
        }
    };
    let filter = parse_metric_filter(params.metrics.as_deref());

    let engine = state.engine.read().await;
    match engine.class_aggregate(
        &params.subject,
        &params.number,
        params.section.as_deref(),
        term,
        filter.as_deref(),
    ) {
        Ok(metrics) => (StatusCode::OK, Json(AggregateResponse::success(metrics))),
        Err(e) => (
            error_status(&e),
            Json(AggregateResponse::error(e.to_string())),
        ),
    }
}

/// Aggregate a course across all terms (cached).
pub async fn course_aggregate_handler(
    State(state): State<AppState>,
    Query(params): Query<CourseAggregateParams>,
) -> impl IntoResponse {
    let filter = parse_metric_filter(params.metrics.as_deref());

    // Cache fills happen under the cache's own locks, so a read lock
    // is enough and aggregates never queue behind writers.
    let engine = state.engine.read().await;
    match engine.course_aggregate(&params.subject, &params.number, filter.as_deref()) {
        Ok(metrics) => (StatusCode::OK, Json(AggregateResponse::success(metrics))),
        Err(e) => (
            error_status(&e),
            Json(AggregateResponse::error(e.to_string())),
        ),
    }
}

/// Terms in which a course accumulated ratings (cached).
pub async fn semesters_handler(
    State(state): State<AppState>,
    Query(params): Query<CourseParams>,
) -> impl IntoResponse {
    let engine = state.engine.read().await;
    match engine.semesters_with_ratings(&params.subject, &params.number) {
        Ok(semesters) => (
            StatusCode::OK,
            Json(SemestersResponse::success(semesters)),
        ),
        Err(e) => (
            error_status(&e),
            Json(SemestersResponse::error(e.to_string())),
        ),
    }
}

/// Per-instructor aggregates for a course (cached).
pub async fn instructors_handler(
    State(state): State<AppState>,
    Query(params): Query<CourseParams>,
) -> impl IntoResponse {
    let engine = state.engine.read().await;
    match engine.instructor_aggregates(&params.subject, &params.number) {
        Ok(instructors) => (
            StatusCode::OK,
            Json(InstructorsResponse::success(instructors)),
        ),
        Err(e) => (
            error_status(&e),
            Json(InstructorsResponse::error(e.to_string())),
        ),
    }
}
