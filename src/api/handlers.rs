//! Request handlers for the generation API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::error::{AppError, Result};
use crate::middleware::CallerIdentity;
use crate::model::{
    Artifact, ArtifactId, GenerationJob, GenerationParams, JobId, JobStatus, Plan, UsageRecord,
    User,
};
use crate::orchestrator::CreateJobRequest;
use crate::users::ProfileUpdate;
use crate::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

/// Client-facing projection of a generation job
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub status: JobStatus,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model: String,
    pub params: GenerationParams,
    pub credits_reserved: u64,
    pub retry_count: u32,
    pub error: Option<String>,
    pub artifact_ids: Vec<ArtifactId>,
    pub processing_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<GenerationJob> for JobView {
    fn from(job: GenerationJob) -> Self {
        Self {
            id: job.id,
            status: job.status,
            prompt: job.prompt,
            negative_prompt: job.negative_prompt,
            model: job.model,
            params: job.params,
            credits_reserved: job.credits_reserved,
            retry_count: job.retry_count,
            error: job.error,
            artifact_ids: job.artifact_ids,
            processing_time_ms: job.processing_time_ms,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ArtifactView {
    pub id: ArtifactId,
    pub job_id: JobId,
    pub prompt: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub seed: Option<i64>,
    pub public_url: String,
    pub file_size_bytes: u64,
    pub mime_type: String,
    pub is_public: bool,
    pub views: u64,
    pub created_at: DateTime<Utc>,
}

impl From<Artifact> for ArtifactView {
    fn from(artifact: Artifact) -> Self {
        Self {
            id: artifact.id,
            job_id: artifact.job_id,
            prompt: artifact.prompt,
            model: artifact.model,
            width: artifact.width,
            height: artifact.height,
            seed: artifact.seed,
            public_url: artifact.public_url,
            file_size_bytes: artifact.file_size_bytes,
            mime_type: artifact.mime_type,
            is_public: artifact.is_public,
            views: artifact.views,
            created_at: artifact.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserView {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub plan: Plan,
    pub credits: u64,
    pub storage_used_bytes: u64,
    pub storage_quota_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            username: user.username,
            plan: user.plan,
            credits: user.credits,
            storage_used_bytes: user.storage_used_bytes,
            storage_quota_bytes: user.storage_quota_bytes,
            created_at: user.created_at,
        }
    }
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// POST /v1/generations — admit a job and return immediately
pub async fn create_generation(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(request): Json<CreateJobRequest>,
) -> Result<impl IntoResponse> {
    let receipt = state.orchestrator.create_job(&caller.subject, request)?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// GET /v1/generations/{id}
pub async fn get_generation(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<JobId>,
) -> Result<Json<JobView>> {
    let job = state.orchestrator.get_job_for(&caller.subject, id)?;
    Ok(Json(job.into()))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// GET /v1/generations — most recent first
pub async fn list_generations(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<JobView>>> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(MAX_LIST_LIMIT);

    let jobs = state
        .orchestrator
        .list_jobs_for(&caller.subject, status, limit)?;
    Ok(Json(jobs.into_iter().map(JobView::from).collect()))
}

fn parse_status(s: &str) -> Result<JobStatus> {
    match s {
        "pending" => Ok(JobStatus::Pending),
        "processing" => Ok(JobStatus::Processing),
        "uploading" => Ok(JobStatus::Uploading),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        other => Err(AppError::InvalidRequest(format!(
            "Unknown status filter: {}",
            other
        ))),
    }
}

/// GET /v1/images/{id}
pub async fn get_image(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<ArtifactId>,
) -> Result<Json<ArtifactView>> {
    let artifact = state.orchestrator.get_artifact_for(&caller.subject, id)?;
    Ok(Json(artifact.into()))
}

/// GET /v1/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
) -> Result<Json<UserView>> {
    let user = state.users.get_by_subject(&caller.subject)?;
    Ok(Json(user.into()))
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub date: Option<NaiveDate>,
}

/// GET /v1/me/usage — daily counters; a day with no events reads as zeros
pub async fn me_usage(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageRecord>> {
    let date = query.date.unwrap_or_else(|| Utc::now().date_naive());
    let user_id = state.orchestrator.user_id_for(&caller.subject)?;
    let record = state
        .orchestrator
        .usage_for(&caller.subject, date)?
        .unwrap_or_else(|| UsageRecord::new(user_id, date));
    Ok(Json(record))
}

/// Identity provider webhook event
#[derive(Debug, Deserialize)]
pub struct IdentityEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: IdentityEventData,
}

#[derive(Debug, Deserialize)]
pub struct IdentityEventData {
    /// Subject identifier at the identity provider
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub plan: Option<Plan>,
}

/// POST /webhooks/identity — apply user lifecycle events from the identity
/// provider. Events are replayable; every branch is idempotent.
pub async fn identity_webhook(
    State(state): State<Arc<AppState>>,
    Json(event): Json<IdentityEvent>,
) -> Result<impl IntoResponse> {
    info!(kind = %event.kind, subject = %event.data.id, "Identity webhook event");

    let profile = ProfileUpdate {
        email: event.data.email.clone(),
        first_name: event.data.first_name,
        last_name: event.data.last_name,
        username: event.data.username,
        avatar_url: event.data.avatar_url,
    };

    match event.kind.as_str() {
        "user.created" | "user.updated" => {
            let email = event.data.email.unwrap_or_default();
            let user_id = state.users.upsert(&event.data.id, &email, profile)?;
            if let Some(plan) = event.data.plan {
                let current = state.users.get_by_subject(&event.data.id)?;
                if current.plan != plan {
                    state.users.update_plan(user_id, plan)?;
                }
            }
        }
        "user.deleted" => {
            state.users.delete(&event.data.id);
        }
        other => {
            return Err(AppError::InvalidRequest(format!(
                "Unknown identity event type: {}",
                other
            )));
        }
    }

    Ok(Json(json!({ "received": true })))
}
