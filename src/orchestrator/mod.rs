//! Generation job orchestrator
//!
//! Drives the job lifecycle `pending -> processing -> uploading -> completed`
//! (or `failed`), coordinating the credit ledger, provider gateway, and
//! artifact store. Every background step starts with a status guard so a
//! duplicate scheduler wake-up is an idempotent skip, and terminal
//! transitions are applied under the job document's lock so refunds and
//! usage events happen at most once per job.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::ModelCatalog;
use crate::config::RetryConfig;
use crate::db::Db;
use crate::error::{AppError, Result};
use crate::ledger::CreditLedger;
use crate::model::{
    Artifact, ArtifactId, GenerationJob, GenerationParams, JobId, JobStatus, UserId,
};
use crate::provider::{image_data, GenerateRequest, ImageProvider, ProducedImage};
use crate::scheduler::Dispatch;
use crate::storage::{self, ArtifactStore};
use crate::usage::{JobOutcome, UsageAggregator};

pub const MAX_PROMPT_LEN: usize = 2000;
pub const MIN_DIMENSION: u32 = 256;
pub const MAX_DIMENSION: u32 = 2048;
pub const MAX_IMAGES: u32 = 4;

const DEFAULT_WIDTH: u32 = 1024;
const DEFAULT_HEIGHT: u32 = 1024;
const DEFAULT_STEPS: u32 = 30;
const DEFAULT_GUIDANCE: f32 = 7.5;

/// Client-facing request to create a generation job
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub steps: Option<u32>,
    pub guidance: Option<f32>,
    pub seed: Option<i64>,
    pub num_images: Option<u32>,
}

/// Returned synchronously at admission; generation continues in background
#[derive(Debug, Clone, Serialize)]
pub struct CreateJobReceipt {
    pub job_id: JobId,
    pub credits_reserved: u64,
    pub credits_remaining: u64,
}

pub struct Orchestrator {
    db: Arc<Db>,
    ledger: CreditLedger,
    catalog: ModelCatalog,
    provider: Arc<dyn ImageProvider>,
    store: Arc<dyn ArtifactStore>,
    usage: UsageAggregator,
    dispatcher: Arc<dyn Dispatch>,
    retry: RetryConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Db>,
        catalog: ModelCatalog,
        provider: Arc<dyn ImageProvider>,
        store: Arc<dyn ArtifactStore>,
        dispatcher: Arc<dyn Dispatch>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            ledger: CreditLedger::new(db.clone()),
            usage: UsageAggregator::new(db.clone()),
            db,
            catalog,
            provider,
            store,
            dispatcher,
            retry,
        }
    }

    /// Synchronous admission: validate, reserve credits, persist the pending
    /// job, and enqueue the first background step. Admission failures leave
    /// no job behind and have no side effects.
    pub fn create_job(&self, subject: &str, request: CreateJobRequest) -> Result<CreateJobReceipt> {
        let user = self.db.get_user_by_subject(subject)?;
        let (prompt, negative_prompt, params) = self.validate(&request)?;

        let per_image = self
            .catalog
            .estimate_cost(&request.model, params.width, params.height);
        let total = per_image * params.num_images as u64;

        // Reservation is the admission choke point: it happens exactly once,
        // before any asynchronous work, so racing submissions cannot overspend.
        let remaining = self.ledger.reserve(user.id, total)?;

        let job = GenerationJob::new(
            user.id,
            prompt,
            negative_prompt,
            request.model,
            params,
            total,
        );
        let job_id = self.db.insert_job(job);
        self.dispatcher.dispatch(job_id, 0, Duration::ZERO);

        info!(job_id = %job_id, user_id = %user.id, credits = total, "Created generation job");
        Ok(CreateJobReceipt {
            job_id,
            credits_reserved: total,
            credits_remaining: remaining,
        })
    }

    fn validate(
        &self,
        request: &CreateJobRequest,
    ) -> Result<(String, Option<String>, GenerationParams)> {
        let prompt = request.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(AppError::InvalidRequest("Prompt cannot be empty".into()));
        }
        if prompt.len() > MAX_PROMPT_LEN {
            return Err(AppError::InvalidRequest(format!(
                "Prompt is too long (max {} characters)",
                MAX_PROMPT_LEN
            )));
        }

        let negative_prompt = request
            .negative_prompt
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        let width = request.width.unwrap_or(DEFAULT_WIDTH);
        let height = request.height.unwrap_or(DEFAULT_HEIGHT);
        if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&width)
            || !(MIN_DIMENSION..=MAX_DIMENSION).contains(&height)
        {
            return Err(AppError::InvalidRequest(format!(
                "Image dimensions must be between {} and {} pixels",
                MIN_DIMENSION, MAX_DIMENSION
            )));
        }
        self.catalog
            .validate_dimensions(&request.model, width, height)?;

        let num_images = request.num_images.unwrap_or(1);
        if !(1..=MAX_IMAGES).contains(&num_images) {
            return Err(AppError::InvalidRequest(format!(
                "Number of images must be between 1 and {}",
                MAX_IMAGES
            )));
        }

        Ok((
            prompt,
            negative_prompt,
            GenerationParams {
                width,
                height,
                steps: request.steps.unwrap_or(DEFAULT_STEPS),
                guidance: request.guidance.unwrap_or(DEFAULT_GUIDANCE),
                seed: request.seed,
                num_images,
            },
        ))
    }

    /// Background step: claim the job, call the provider, upload artifacts,
    /// and finalize. `attempt` is the retry epoch the scheduler dispatched;
    /// stale or duplicate wake-ups are skipped without redoing work.
    pub async fn advance(&self, job_id: JobId, attempt: u32) -> Result<()> {
        let job = self.db.get_job(job_id)?;

        match job.status {
            JobStatus::Completed | JobStatus::Failed | JobStatus::Uploading => {
                debug!(job_id = %job_id, status = %job.status, "Job already advanced, skipping");
                return Ok(());
            }
            JobStatus::Pending if attempt != 0 => {
                debug!(job_id = %job_id, attempt, "Stale dispatch for pending job, skipping");
                return Ok(());
            }
            JobStatus::Processing if attempt == 0 || attempt != job.retry_count => {
                debug!(job_id = %job_id, attempt, retry_count = job.retry_count,
                    "Duplicate or stale dispatch, skipping");
                return Ok(());
            }
            _ => {}
        }

        // Total deadline across all attempts, guarding against unbounded
        // retry chains
        let age = Utc::now().signed_duration_since(job.created_at);
        if age.num_seconds() as u64 > self.retry.max_job_duration_secs {
            warn!(job_id = %job_id, age_secs = age.num_seconds(), "Job exceeded total deadline");
            return self.fail_job(
                job_id,
                "Job exceeded total processing deadline".to_string(),
                true,
            );
        }

        let job = if job.status == JobStatus::Pending {
            self.db.update_job(job_id, |j| {
                j.status = JobStatus::Processing;
                j.started_at = Some(Utc::now());
            })?
        } else {
            job
        };

        match self.run_attempt(&job).await {
            Ok(artifact_ids) => self.complete_job(&job, artifact_ids),
            Err(e) => self.handle_failure(&job, e),
        }
    }

    /// One generation attempt: provider call plus the upload phase
    async fn run_attempt(&self, job: &GenerationJob) -> Result<Vec<ArtifactId>> {
        let request = GenerateRequest {
            prompt: job.prompt.clone(),
            negative_prompt: job.negative_prompt.clone(),
            model: self.catalog.provider_id(&job.model).to_string(),
            width: job.params.width,
            height: job.params.height,
            steps: job.params.steps,
            guidance: job.params.guidance,
            seed: job.params.seed,
            num_images: job.params.num_images,
        };

        debug!(job_id = %job.id, model = %request.model, n = request.num_images,
            "Invoking provider");
        let images = self.provider.generate(request).await?;

        self.db.update_job(job.id, |j| {
            j.status = JobStatus::Uploading;
        })?;

        self.upload_all(job, images).await
    }

    /// Sequential upload of produced images. The first image failing fails
    /// the whole job (nothing to show the user); later failures are
    /// tolerated and the job completes with the subset that succeeded.
    async fn upload_all(
        &self,
        job: &GenerationJob,
        images: Vec<ProducedImage>,
    ) -> Result<Vec<ArtifactId>> {
        let total = images.len();
        let mut artifact_ids = Vec::with_capacity(total);

        for (index, image) in images.into_iter().enumerate() {
            match self.upload_one(job, image).await {
                Ok(id) => artifact_ids.push(id),
                Err(e) if index == 0 => {
                    warn!(job_id = %job.id, error = %e, "First artifact upload failed");
                    return Err(e);
                }
                Err(e) => {
                    warn!(job_id = %job.id, index, total, error = %e,
                        "Artifact upload failed, continuing with remaining images");
                }
            }
        }

        if artifact_ids.is_empty() {
            return Err(AppError::Upload("failed to upload any images".into()));
        }
        Ok(artifact_ids)
    }

    async fn upload_one(&self, job: &GenerationJob, image: ProducedImage) -> Result<ArtifactId> {
        let size = image.bytes.len() as u64;

        // Reserve the incoming bytes under the user document's lock, the same
        // check-and-debit the credit ledger does. A rejected reservation
        // mutates nothing; concurrent uploads for one user cannot jointly
        // pass the quota check.
        let user = self.db.update_user(job.user_id, |user| {
            if storage::quota_exceeded(user.storage_used_bytes, user.storage_quota_bytes, size) {
                return Err(AppError::QuotaExceeded {
                    used: user.storage_used_bytes,
                    incoming: size,
                    quota: user.storage_quota_bytes,
                });
            }
            user.storage_used_bytes += size;
            Ok(user.clone())
        })?;

        let extension = image_data::extension_for_content_type(&image.content_type);
        let key = storage::object_key(&user.subject, extension);
        let stored = match self.store.put(&key, &image.bytes, &image.content_type).await {
            Ok(stored) => stored,
            Err(e) => {
                // The bytes never landed; release the reservation
                if let Err(release_err) = self.db.update_user(job.user_id, |user| {
                    user.storage_used_bytes = user.storage_used_bytes.saturating_sub(size);
                    Ok(())
                }) {
                    warn!(job_id = %job.id, error = %release_err,
                        "Failed to release storage reservation");
                }
                return Err(AppError::Upload(e.to_string()));
            }
        };

        let now = Utc::now();
        let artifact = Artifact {
            id: ArtifactId::new(),
            user_id: job.user_id,
            job_id: job.id,
            prompt: job.prompt.clone(),
            negative_prompt: job.negative_prompt.clone(),
            model: job.model.clone(),
            width: job.params.width,
            height: job.params.height,
            steps: job.params.steps,
            guidance: job.params.guidance,
            seed: image.seed.or(job.params.seed),
            storage_key: stored.key,
            public_url: stored.public_url,
            file_size_bytes: stored.size_bytes,
            mime_type: image.content_type,
            is_public: false,
            views: 0,
            downloads: 0,
            is_flagged: false,
            created_at: now,
            updated_at: now,
        };
        let artifact_id = self.db.insert_artifact(artifact);

        debug!(job_id = %job.id, artifact_id = %artifact_id, size = stored.size_bytes,
            "Stored artifact");
        Ok(artifact_id)
    }

    fn complete_job(&self, job: &GenerationJob, artifact_ids: Vec<ArtifactId>) -> Result<()> {
        let started = job.started_at.unwrap_or(job.created_at);
        let elapsed_ms = Utc::now()
            .signed_duration_since(started)
            .num_milliseconds()
            .max(0) as u64;

        let count = artifact_ids.len();
        let finished = self.db.finish_job(job.id, JobStatus::Completed, |j| {
            j.artifact_ids = artifact_ids;
            j.processing_time_ms = Some(elapsed_ms);
        })?;

        if finished.is_some() {
            self.usage
                .record(job.user_id, JobOutcome::Success, job.credits_reserved, &job.model);
            info!(job_id = %job.id, artifacts = count, elapsed_ms, "Generation job completed");
        }
        Ok(())
    }

    /// Retry or terminate after a processing-stage error
    fn handle_failure(&self, job: &GenerationJob, error: AppError) -> Result<()> {
        let current = self.db.get_job(job.id)?;

        if error.is_retryable() && current.retry_count < self.retry.max_retries {
            // Exponential backoff: base * 2^retry_count (2s, 4s, 8s)
            let delay =
                Duration::from_millis(self.retry.base_delay_ms << current.retry_count);
            let updated = self.db.update_job(job.id, |j| {
                j.retry_count += 1;
            })?;
            self.dispatcher
                .dispatch(job.id, updated.retry_count, delay);
            info!(job_id = %job.id, attempt = updated.retry_count, delay_ms = delay.as_millis() as u64,
                error = %error, "Scheduled retry");
            return Ok(());
        }

        // Refund on server-attributable errors, and on transient errors that
        // exhausted their retries. Caller-attributable failures (bad request,
        // invalid prompt, quota exceeded) keep the charge.
        let refund = error.is_server_fault() || error.is_retryable();
        self.fail_job(job.id, error.to_string(), refund)
    }

    fn fail_job(&self, job_id: JobId, error_text: String, refund: bool) -> Result<()> {
        let finished = self.db.finish_job(job_id, JobStatus::Failed, |j| {
            j.error = Some(error_text.clone());
        })?;

        // finish_job applies at most once; the refund and usage event ride
        // on that guarantee
        if let Some(job) = finished {
            if refund {
                self.ledger.refund(job.user_id, job.credits_reserved)?;
            }
            let charged = if refund { 0 } else { job.credits_reserved };
            self.usage
                .record(job.user_id, JobOutcome::Failure, charged, &job.model);
            info!(job_id = %job_id, refund, error = %error_text, "Generation job failed");
        }
        Ok(())
    }

    // ----- read side, consumed by the API layer -----

    pub fn get_job_for(&self, subject: &str, job_id: JobId) -> Result<GenerationJob> {
        let user = self.db.get_user_by_subject(subject)?;
        let job = self.db.get_job(job_id)?;
        if job.user_id != user.id {
            // Do not leak other users' job ids
            return Err(AppError::NotFound(format!("generation job {}", job_id)));
        }
        Ok(job)
    }

    pub fn list_jobs_for(
        &self,
        subject: &str,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<GenerationJob>> {
        let user = self.db.get_user_by_subject(subject)?;
        Ok(self.db.list_jobs_by_user(user.id, status, limit))
    }

    pub fn get_artifact_for(&self, subject: &str, artifact_id: ArtifactId) -> Result<Artifact> {
        let artifact = self.db.get_artifact(artifact_id)?;
        if artifact.is_public {
            return self.bump_views(artifact_id);
        }
        let user = self.db.get_user_by_subject(subject)?;
        if artifact.user_id != user.id {
            return Err(AppError::NotFound(format!("artifact {}", artifact_id)));
        }
        self.bump_views(artifact_id)
    }

    fn bump_views(&self, artifact_id: ArtifactId) -> Result<Artifact> {
        self.db.update_artifact(artifact_id, |a| {
            a.views += 1;
        })
    }

    pub fn usage_for(&self, subject: &str, date: chrono::NaiveDate) -> Result<Option<crate::model::UsageRecord>> {
        let user = self.db.get_user_by_subject(subject)?;
        Ok(self.usage.daily(user.id, date))
    }

    pub fn user_id_for(&self, subject: &str) -> Result<UserId> {
        Ok(self.db.get_user_by_subject(subject)?.id)
    }
}
