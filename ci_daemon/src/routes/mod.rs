//! Daemon HTTP routes: webhook, trigger, and result API.

pub mod api;
pub mod webhook;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;

use crate::config::{CiConfig, CourseRegistry};
use crate::models::build::BuildResult;
use crate::services::daemon::Daemon;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct CiRouterState {
    pub daemon: Arc<Daemon>,
    pub courses: Arc<CourseRegistry>,
    pub config: CiConfig,
}

/// Build the daemon's Axum router.
pub fn ci_router(state: CiRouterState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Webhook
        .route("/webhook/github", post(webhook_handler))
        // Build API
        .route("/api/builds/trigger", post(trigger_build_handler))
        .route("/api/results/{build_id}", get(get_result))
        .route("/api/summary", get(summary_handler))
        // Grading actions
        .route("/api/approve", post(approve_handler))
        .route("/api/notes", post(notes_handler))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// ── Webhook ──

async fn webhook_handler(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    crate::metrics::webhook_received(
        headers
            .get("x-github-event")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
    );

    webhook::handle_webhook(&state, &headers, body).await
}

// ── Build API ──

async fn trigger_build_handler(
    State(state): State<CiRouterState>,
    Json(req): Json<api::TriggerRequest>,
) -> Result<(StatusCode, Json<api::TriggerResponse>), StatusCode> {
    api::trigger_build(&state, req).map(|r| (StatusCode::ACCEPTED, Json(r)))
}

async fn get_result(
    State(state): State<CiRouterState>,
    Path(build_id): Path<i64>,
) -> Result<Json<BuildResult>, StatusCode> {
    state
        .daemon
        .store()
        .build(build_id)
        .await
        .map_err(|e| {
            tracing::error!(build_id, "Result lookup failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn summary_handler(
    State(state): State<CiRouterState>,
    Query(query): Query<api::SummaryQuery>,
) -> Result<Json<Vec<api::LabSummary>>, StatusCode> {
    api::lab_summaries(&state, &query).await.map(Json)
}

// ── Grading actions ──

async fn approve_handler(
    State(state): State<CiRouterState>,
    Json(req): Json<api::ApproveRequest>,
) -> Result<Json<api::ApproveResponse>, StatusCode> {
    api::approve_build(&state, req).await.map(Json)
}

async fn notes_handler(
    State(state): State<CiRouterState>,
    Json(req): Json<api::NotesRequest>,
) -> Result<StatusCode, StatusCode> {
    api::set_notes(&state, req).await.map(|()| StatusCode::NO_CONTENT)
}
