//! Artifact store adapter: durable byte storage behind a public URL

pub mod file_store;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::Result;

/// Outcome of a successful put
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub public_url: String,
    pub size_bytes: u64,
}

/// Durable object storage. Production backs this with S3 behind CloudFront
/// (server-side encryption applied by the backing store); tests and local
/// runs use the filesystem implementation.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<StoredObject>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Collision-resistant storage key, namespaced by owning user with a
/// timestamp plus random component
pub fn object_key(subject: &str, extension: &str) -> String {
    format!(
        "images/{}/{}-{}.{}",
        subject,
        Utc::now().timestamp_millis(),
        Uuid::new_v4(),
        extension
    )
}

/// Quota check applied before every put
pub fn quota_exceeded(used_bytes: u64, quota_bytes: u64, incoming_bytes: u64) -> bool {
    used_bytes + incoming_bytes > quota_bytes
}
