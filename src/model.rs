//! Core document types: users, generation jobs, artifacts, and usage records

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

id_type!(UserId);
id_type!(JobId);
id_type!(ArtifactId);

/// Subscription tier, determines credit grants and storage quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
    Enterprise,
}

impl Plan {
    /// Monthly credit grant for this plan
    pub fn credit_grant(&self) -> u64 {
        match self {
            Plan::Free => 10,
            Plan::Pro => 500,
            Plan::Enterprise => 2000,
        }
    }

    /// Cumulative artifact storage quota in bytes
    pub fn storage_quota_bytes(&self) -> u64 {
        const GIB: u64 = 1024 * 1024 * 1024;
        match self {
            Plan::Free => GIB,
            Plan::Pro => 100 * GIB,
            Plan::Enterprise => 500 * GIB,
        }
    }
}

/// User account synced from the external identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Verified subject identifier from the identity provider
    pub subject: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub plan: Plan,
    /// Remaining generation credits, never negative
    pub credits: u64,
    pub storage_used_bytes: u64,
    pub storage_quota_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(subject: String, email: String) -> Self {
        let now = Utc::now();
        let plan = Plan::Free;
        Self {
            id: UserId::new(),
            subject,
            email,
            first_name: None,
            last_name: None,
            username: None,
            avatar_url: None,
            plan,
            credits: plan.credit_grant(),
            storage_used_bytes: 0,
            storage_quota_bytes: plan.storage_quota_bytes(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle status of a generation job. No state is ever revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Uploading,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Uploading => "uploading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Fixed generation parameters for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    pub seed: Option<i64>,
    pub num_images: u32,
}

/// One user-initiated generation request. Created once, mutated only by the
/// orchestrator, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub user_id: UserId,
    pub status: JobStatus,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model: String,
    pub params: GenerationParams,
    /// Credits debited at admission; fixed for the life of the job
    pub credits_reserved: u64,
    pub retry_count: u32,
    pub error: Option<String>,
    pub artifact_ids: Vec<ArtifactId>,
    pub processing_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn new(
        user_id: UserId,
        prompt: String,
        negative_prompt: Option<String>,
        model: String,
        params: GenerationParams,
        credits_reserved: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id,
            status: JobStatus::Pending,
            prompt,
            negative_prompt,
            model,
            params,
            credits_reserved,
            retry_count: 0,
            error: None,
            artifact_ids: Vec::new(),
            processing_time_ms: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }
}

/// A successfully produced and stored image. Immutable after creation except
/// for counters and visibility flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub user_id: UserId,
    pub job_id: JobId,

    // Generation parameters duplicated for provenance
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    pub seed: Option<i64>,

    pub storage_key: String,
    pub public_url: String,
    pub file_size_bytes: u64,
    pub mime_type: String,

    pub is_public: bool,
    pub views: u64,
    pub downloads: u64,
    pub is_flagged: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-(user, day) usage counters. Created on the first event of the day,
/// incremented in place afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub generations: u64,
    pub successes: u64,
    pub failures: u64,
    pub credits_spent: u64,
    /// Model identifier -> occurrence count
    pub model_usage: HashMap<String, u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(user_id: UserId, date: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            date,
            generations: 0,
            successes: 0,
            failures: 0,
            credits_spent: 0,
            model_usage: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
