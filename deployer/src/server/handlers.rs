//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::errors::DeployerError;
use crate::queue::{Enqueued, JobId, JobState, JobStatus};
use crate::server::error::ApiResult;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deployer".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Accepts a deployment trigger. The credential travels as a bearer token.
pub async fn trigger_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Enqueued>)> {
    let credential = bearer_token(&headers);
    let enqueued = state.receiver.handle_trigger(&body, credential).await?;
    Ok((StatusCode::ACCEPTED, Json(enqueued)))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}

/// Job status handler
pub async fn job_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    let job_id: JobId = id
        .parse()
        .map_err(|_| DeployerError::ValidationError(format!("invalid job id '{}'", id)))?;
    let status = state.queue.status(&job_id).await?;
    Ok(Json(status))
}

/// Targets response
#[derive(Debug, Serialize)]
pub struct TargetsResponse {
    pub targets: Vec<TargetInfo>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct TargetInfo {
    pub name: String,
    pub image_pattern: String,
    pub container_name: String,
    pub max_attempts: u32,
    pub pending: usize,
    pub running: Option<JobId>,
}

/// Configured targets with their queue depth
pub async fn targets_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let mut targets = Vec::new();
    for target in state.config.targets() {
        let jobs = state.queue.jobs_for_target(&target.name).await;
        targets.push(TargetInfo {
            name: target.name.clone(),
            image_pattern: target.image_pattern.clone(),
            container_name: target.container_name.clone(),
            max_attempts: target.retry.max_attempts,
            pending: jobs
                .iter()
                .filter(|job| job.state == JobState::Pending)
                .count(),
            running: jobs
                .iter()
                .find(|job| job.state == JobState::Running)
                .map(|job| job.id),
        });
    }

    let total = targets.len();
    Json(TargetsResponse { targets, total })
}

/// Jobs response
#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<JobStatus>,
    pub total: usize,
}

/// Retained jobs of one target, oldest first
pub async fn target_jobs_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<JobsResponse>> {
    if state.config.target_by_name(&name).is_none() {
        return Err(DeployerError::UnknownTarget(name).into());
    }
    let jobs = state.queue.jobs_for_target(&name).await;
    let total = jobs.len();
    Ok(Json(JobsResponse { jobs, total }))
}
