//! GitHub webhook handler: receives push events, starts lab builds.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};

use crate::models::trigger::TriggerKind;
use crate::routes::CiRouterState;
use crate::services::github_service::{self, PushEvent};

/// Handle an incoming GitHub webhook payload.
pub async fn handle_webhook(
    state: &CiRouterState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    // Validate signature
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !github_service::validate_signature(&state.config.github_webhook_secret, &body, signature) {
        tracing::warn!("Webhook signature validation failed");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    match event_type {
        "push" => {
            let event: PushEvent =
                serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
            handle_push(state, &event).await
        }
        "ping" => {
            tracing::info!("Received GitHub ping webhook");
            Ok(StatusCode::OK)
        }
        _ => {
            tracing::debug!("Ignoring webhook event: {}", event_type);
            Ok(StatusCode::OK)
        }
    }
}

/// Build the pushing owner's current lab.
async fn handle_push(state: &CiRouterState, event: &PushEvent) -> Result<StatusCode, StatusCode> {
    let Some(course) = state.courses.course(event.org()) else {
        tracing::debug!("No course registered for organization: {}", event.org());
        return Ok(StatusCode::OK);
    };
    let Some(target) = course.target_for_repo(event.repo()) else {
        tracing::debug!(course = %course.name, "Push from unknown repository: {}", event.repo());
        return Ok(StatusCode::OK);
    };

    let key = course.owner_key(&target);
    let lab = state
        .daemon
        .store()
        .owner(&key)
        .await
        .map_err(|e| {
            tracing::error!(owner = %key, "Owner lookup failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(|o| o.current_lab_num(&course.name))
        .unwrap_or(1);

    let Some(request) = course.build_request(&target, lab, TriggerKind::Push) else {
        tracing::info!(owner = %key, lab, "All labs approved, nothing to build");
        return Ok(StatusCode::OK);
    };

    tracing::info!(course = %course.name, repo = %request.repo, lab, "Push received, starting build");
    state.daemon.spawn_build(request);
    Ok(StatusCode::ACCEPTED)
}
