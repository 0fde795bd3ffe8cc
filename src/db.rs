//! In-memory document store with per-document atomic read-modify-write
//!
//! Stands in for the transactional document service the orchestrator consumes.
//! Every mutation goes through a shard-locked entry, so a read-check-write
//! closure over a single document is atomic and per-key linearizable.

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::model::{
    Artifact, ArtifactId, GenerationJob, JobId, JobStatus, UsageRecord, User, UserId,
};

/// Document collections, each keyed by its id type
pub struct Db {
    users: DashMap<UserId, User>,
    /// Secondary index: identity-provider subject -> user id
    subjects: DashMap<String, UserId>,
    jobs: DashMap<JobId, GenerationJob>,
    artifacts: DashMap<ArtifactId, Artifact>,
    usage: DashMap<(UserId, NaiveDate), UsageRecord>,
}

impl Db {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            subjects: DashMap::new(),
            jobs: DashMap::new(),
            artifacts: DashMap::new(),
            usage: DashMap::new(),
        }
    }

    // ----- users -----

    pub fn insert_user(&self, user: User) -> UserId {
        let id = user.id;
        self.subjects.insert(user.subject.clone(), id);
        self.users.insert(id, user);
        id
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.users
            .get(&id)
            .map(|u| u.clone())
            .ok_or_else(|| AppError::NotFound(format!("user {}", id)))
    }

    pub fn get_user_by_subject(&self, subject: &str) -> Result<User> {
        let id = self
            .subjects
            .get(subject)
            .map(|e| *e)
            .ok_or_else(|| AppError::NotFound(format!("user for subject {}", subject)))?;
        self.get_user(id)
    }

    /// Atomically mutate a user document. The closure runs under the shard
    /// lock for that key and may reject the mutation by returning an error.
    pub fn update_user<F, T>(&self, id: UserId, f: F) -> Result<T>
    where
        F: FnOnce(&mut User) -> Result<T>,
    {
        let mut entry = self
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("user {}", id)))?;
        let out = f(entry.value_mut())?;
        entry.updated_at = Utc::now();
        Ok(out)
    }

    pub fn remove_user(&self, subject: &str) -> Option<User> {
        let id = self.subjects.remove(subject)?.1;
        self.users.remove(&id).map(|(_, u)| u)
    }

    // ----- generation jobs -----

    pub fn insert_job(&self, job: GenerationJob) -> JobId {
        let id = job.id;
        self.jobs.insert(id, job);
        id
    }

    pub fn get_job(&self, id: JobId) -> Result<GenerationJob> {
        self.jobs
            .get(&id)
            .map(|j| j.clone())
            .ok_or_else(|| AppError::NotFound(format!("generation job {}", id)))
    }

    pub fn update_job<F>(&self, id: JobId, f: F) -> Result<GenerationJob>
    where
        F: FnOnce(&mut GenerationJob),
    {
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("generation job {}", id)))?;
        f(entry.value_mut());
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Transition a job to a terminal status under the document lock.
    /// Returns the updated job if the transition applied, or `None` if the
    /// job was already terminal. Callers use this to guarantee at-most-once
    /// side effects (refunds, usage events) per job.
    pub fn finish_job<F>(&self, id: JobId, status: JobStatus, f: F) -> Result<Option<GenerationJob>>
    where
        F: FnOnce(&mut GenerationJob),
    {
        debug_assert!(status.is_terminal());
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("generation job {}", id)))?;
        if entry.status.is_terminal() {
            debug!(job_id = %id, status = %entry.status, "Job already terminal, skipping transition");
            return Ok(None);
        }
        let now = Utc::now();
        entry.status = status;
        entry.completed_at = Some(now);
        entry.updated_at = now;
        f(entry.value_mut());
        Ok(Some(entry.clone()))
    }

    /// Most recent jobs for a user, optionally filtered by status
    pub fn list_jobs_by_user(
        &self,
        user_id: UserId,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Vec<GenerationJob> {
        let mut jobs: Vec<GenerationJob> = self
            .jobs
            .iter()
            .filter(|j| j.user_id == user_id && status.map_or(true, |s| j.status == s))
            .map(|j| j.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        jobs
    }

    // ----- artifacts -----

    pub fn insert_artifact(&self, artifact: Artifact) -> ArtifactId {
        let id = artifact.id;
        self.artifacts.insert(id, artifact);
        id
    }

    pub fn get_artifact(&self, id: ArtifactId) -> Result<Artifact> {
        self.artifacts
            .get(&id)
            .map(|a| a.clone())
            .ok_or_else(|| AppError::NotFound(format!("artifact {}", id)))
    }

    pub fn update_artifact<F>(&self, id: ArtifactId, f: F) -> Result<Artifact>
    where
        F: FnOnce(&mut Artifact),
    {
        let mut entry = self
            .artifacts
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("artifact {}", id)))?;
        f(entry.value_mut());
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    // ----- usage -----

    /// Upsert the per-(user, date) usage counters. The closure increments an
    /// existing record in place; a fresh record is created on the first event
    /// of the day.
    pub fn upsert_usage<F>(&self, user_id: UserId, date: NaiveDate, f: F) -> UsageRecord
    where
        F: FnOnce(&mut UsageRecord),
    {
        let mut entry = self
            .usage
            .entry((user_id, date))
            .or_insert_with(|| UsageRecord::new(user_id, date));
        f(entry.value_mut());
        entry.updated_at = Utc::now();
        entry.clone()
    }

    pub fn get_usage(&self, user_id: UserId, date: NaiveDate) -> Option<UsageRecord> {
        self.usage.get(&(user_id, date)).map(|r| r.clone())
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}
