//! Provider gateway: uniform contract over external image generation back-ends

pub mod image_data;
pub mod openrouter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Request to generate images, already validated and resolved to a
/// provider-facing model identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    /// Fully-qualified provider model id
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    pub seed: Option<i64>,
    pub num_images: u32,
}

/// Where a produced image's bytes come from. Providers may answer with
/// inline base64 payloads or remote URLs; the gateway resolves both before
/// the orchestrator ever sees them.
#[derive(Debug, Clone)]
pub enum ByteSource {
    Inline(Vec<u8>),
    Remote(String),
}

/// One generated image, fully resolved to bytes
#[derive(Debug, Clone)]
pub struct ProducedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub seed: Option<i64>,
}

/// Trait for image generation providers
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Provider identifier (e.g. "openrouter")
    fn name(&self) -> &str;

    /// Generate images. A successful response carries at least one image;
    /// an empty provider answer surfaces as `AppError::NoImages`, never as
    /// an empty success.
    async fn generate(&self, request: GenerateRequest) -> Result<Vec<ProducedImage>>;
}
