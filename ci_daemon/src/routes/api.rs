//! REST API for triggering builds, reading results, and teacher actions.

use axum::http::StatusCode;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CiError;
use crate::models::build::BuildSummary;
use crate::models::course::{BuildTarget, Course};
use crate::models::trigger::TriggerKind;
use crate::routes::CiRouterState;

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub course: String,
    /// Member username or group repository name.
    pub user: String,
    /// Lab folder, e.g. `lab2`.
    pub lab: String,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub course: String,
    pub user: String,
    pub lab: String,
    pub lab_number: i32,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub course: String,
    pub user: String,
}

/// Latest result and approval state for one lab.
#[derive(Debug, Serialize, Deserialize)]
pub struct LabSummary {
    pub lab_number: i32,
    pub lab: Option<String>,
    pub builds: usize,
    pub approved_build: Option<i64>,
    pub notes: String,
    pub latest: Option<BuildSummary>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub course: String,
    pub user: String,
    pub lab: i32,
    pub build_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApproveResponse {
    pub current_lab_num: i32,
}

#[derive(Debug, Deserialize)]
pub struct NotesRequest {
    pub course: String,
    pub user: String,
    pub lab: i32,
    pub notes: String,
}

fn resolve<'a>(
    state: &'a CiRouterState,
    course: &str,
    user: &str,
) -> Result<(&'a Course, BuildTarget), StatusCode> {
    let course = state.courses.course(course).ok_or(StatusCode::NOT_FOUND)?;
    let target = course.target_for_name(user).ok_or(StatusCode::NOT_FOUND)?;
    Ok((course, target))
}

fn internal(e: CiError) -> StatusCode {
    tracing::error!("Request failed: {e}");
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Start a manual build. The build runs in the background.
pub fn trigger_build(state: &CiRouterState, req: TriggerRequest) -> Result<TriggerResponse, StatusCode> {
    let (course, target) = resolve(state, &req.course, &req.user)?;
    let lab_number = course
        .lab_number(&target, &req.lab)
        .ok_or(StatusCode::BAD_REQUEST)?;
    let request = course
        .build_request(&target, lab_number, TriggerKind::Manual)
        .ok_or(StatusCode::BAD_REQUEST)?;

    tracing::info!(course = %req.course, user = %req.user, lab = %req.lab, "Manual build triggered");
    state.daemon.spawn_build(request);

    Ok(TriggerResponse {
        course: req.course,
        user: req.user,
        lab: req.lab,
        lab_number,
    })
}

/// Per-lab latest results for one member or group, without logs.
pub async fn lab_summaries(
    state: &CiRouterState,
    query: &SummaryQuery,
) -> Result<Vec<LabSummary>, StatusCode> {
    let (course, target) = resolve(state, &query.course, &query.user)?;
    let store = state.daemon.store();

    let Some(owner) = store
        .owner(&course.owner_key(&target))
        .await
        .map_err(internal)?
    else {
        return Ok(Vec::new());
    };
    let Some(history) = owner.courses.get(&course.name) else {
        return Ok(Vec::new());
    };

    let mut out = Vec::with_capacity(history.assignments.len());
    for (&lab_number, assignment) in &history.assignments {
        let latest = match assignment.builds.last() {
            Some(&id) => store.build(id).await.map_err(internal)?.map(|r| r.summary()),
            None => None,
        };
        out.push(LabSummary {
            lab_number,
            lab: course.lab_folder(&target, lab_number).map(str::to_string),
            builds: assignment.builds.len(),
            approved_build: assignment.approved_build,
            notes: assignment.notes.clone(),
            latest,
        });
    }
    Ok(out)
}

/// Approve a build for a lab and move the owner on to the next lab.
pub async fn approve_build(state: &CiRouterState, req: ApproveRequest) -> Result<ApproveResponse, StatusCode> {
    let (course, target) = resolve(state, &req.course, &req.user)?;
    let store = state.daemon.store();

    let build = store
        .build(req.build_id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if build.course != course.name || build.labnum != req.lab || build.user != target.user() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let current_lab_num = store
        .with_owner(&course.owner_key(&target), |owner| {
            owner.set_approved_build(&course.name, req.lab, req.build_id, Utc::now());
            owner.current_lab_num(&course.name)
        })
        .await
        .map_err(internal)?;

    tracing::info!(course = %course.name, user = %req.user, lab = req.lab, build_id = req.build_id, "Build approved");
    Ok(ApproveResponse { current_lab_num })
}

pub async fn set_notes(state: &CiRouterState, req: NotesRequest) -> Result<(), StatusCode> {
    let (course, target) = resolve(state, &req.course, &req.user)?;
    state
        .daemon
        .store()
        .with_owner(&course.owner_key(&target), |owner| {
            owner.set_notes(&course.name, req.lab, &req.notes)
        })
        .await
        .map_err(internal)
}
