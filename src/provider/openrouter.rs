//! OpenRouter HTTP provider client

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{AppError, Result};
use crate::provider::image_data;
use crate::provider::{ByteSource, GenerateRequest, ImageProvider, ProducedImage};

/// HTTP client for the OpenRouter image generation API
pub struct OpenRouterProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

/// Wire request for the generation endpoint
#[derive(Debug, Serialize)]
struct ApiGenerateRequest {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    model: String,
    n: u32,
    width: u32,
    height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    guidance_scale: f32,
    num_inference_steps: u32,
}

/// Wire response. Different back-ends answer with either `images` or `data`,
/// and encode each image as base64 or a remote URL.
#[derive(Debug, Deserialize)]
struct ApiGenerateResponse {
    #[serde(default)]
    images: Vec<ApiImageData>,
    #[serde(default)]
    data: Vec<ApiImageData>,
}

#[derive(Debug, Deserialize)]
struct ApiImageData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    base64: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    seed: Option<i64>,
}

impl OpenRouterProvider {
    /// Create a provider client with a bounded request timeout
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Map a non-success provider status to the retry/refund taxonomy
    fn classify_status(status: StatusCode, body: String) -> AppError {
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                AppError::ProviderBadRequest(body)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::ProviderAuth(body),
            StatusCode::REQUEST_TIMEOUT => AppError::Timeout(body),
            StatusCode::TOO_MANY_REQUESTS => AppError::ProviderRateLimited(body),
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                AppError::ProviderUnavailable(format!("{}: {}", status.as_u16(), body))
            }
            s if s.is_client_error() => AppError::ProviderBadRequest(body),
            s => AppError::ProviderServer(format!("{}: {}", s.as_u16(), body)),
        }
    }

    /// Map transport-level reqwest errors
    fn classify_transport(e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(format!("Provider request timed out: {}", e))
        } else if e.is_connect() {
            AppError::ProviderUnavailable(format!("Connection failed: {}", e))
        } else {
            AppError::HttpClient(e)
        }
    }

    /// Resolve a byte source to a buffer, downloading remote URLs with the
    /// same bounded-timeout client
    async fn resolve(&self, source: ByteSource) -> Result<Vec<u8>> {
        match source {
            ByteSource::Inline(bytes) => Ok(bytes),
            ByteSource::Remote(url) => {
                debug!(url = %url, "Downloading generated image");
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(Self::classify_transport)?;

                if !response.status().is_success() {
                    return Err(AppError::ProviderServer(format!(
                        "Image download returned {}",
                        response.status()
                    )));
                }

                let bytes = response.bytes().await.map_err(Self::classify_transport)?;
                Ok(bytes.to_vec())
            }
        }
    }
}

#[async_trait]
impl ImageProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Vec<ProducedImage>> {
        let url = format!("{}/v1/images/generations", self.base_url);
        debug!(model = %request.model, n = request.num_images, "Sending generate request");

        let api_request = ApiGenerateRequest {
            prompt: request.prompt,
            negative_prompt: request.negative_prompt,
            model: request.model,
            n: request.num_images,
            width: request.width,
            height: request.height,
            seed: request.seed,
            guidance_scale: request.guidance,
            num_inference_steps: request.steps,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&api_request)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Provider returned error");
            return Err(Self::classify_status(status, body));
        }

        let api_response: ApiGenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::ProviderServer(format!("Failed to parse response: {}", e)))?;

        // Both response shapes may appear; merge them
        let mut raw = api_response.images;
        raw.extend(api_response.data);

        let mut images = Vec::with_capacity(raw.len());
        for img in raw {
            let seed = img.seed;
            let source = if let Some(b64) = img.b64_json.or(img.base64) {
                ByteSource::Inline(image_data::decode_base64(&b64)?)
            } else if let Some(url) = img.url {
                ByteSource::Remote(url)
            } else {
                warn!("Provider image entry carried neither data nor URL, skipping");
                continue;
            };

            let bytes = self.resolve(source).await?;
            let content_type = image_data::content_type_for(&bytes).to_string();
            images.push(ProducedImage {
                bytes,
                content_type,
                seed,
            });
        }

        // Zero images on a 200 is a domain failure, not a success
        if images.is_empty() {
            return Err(AppError::NoImages);
        }

        debug!(count = images.len(), "Generated images resolved");
        Ok(images)
    }
}
