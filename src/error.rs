//! Common error types and the retry/refund classification

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: u64, available: u64 },

    #[error("Storage quota exceeded: used {used} + incoming {incoming} exceeds quota {quota}")]
    QuotaExceeded { used: u64, incoming: u64, quota: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Provider rejected request: {0}")]
    ProviderBadRequest(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuth(String),

    #[error("Provider rate limit exceeded: {0}")]
    ProviderRateLimited(String),

    #[error("Provider temporarily unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider internal server error: {0}")]
    ProviderServer(String),

    #[error("Generation produced no images")]
    NoImages,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Failed to upload artifact: {0}")]
    Upload(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the failure is expected to be transient and eligible for a
    /// bounded automatic retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Timeout(_)
            | AppError::ProviderRateLimited(_)
            | AppError::ProviderUnavailable(_) => true,
            AppError::HttpClient(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether the failure is attributable to the service side rather than
    /// the caller. Governs credit refunds on terminal job failure.
    /// Quota-exceeded counts as caller-attributable.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            AppError::ProviderUnavailable(_)
                | AppError::ProviderServer(_)
                | AppError::Upload(_)
                | AppError::Internal(_)
                | AppError::Io(_)
        )
    }
}

/// Error response format
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Json(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                Some("invalid_json"),
            ),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, "provider_error", None),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", None),
            AppError::InsufficientCredits { .. } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                Some("insufficient_credits"),
            ),
            AppError::QuotaExceeded { .. } => (
                StatusCode::FORBIDDEN,
                "quota_exceeded",
                Some("storage_quota_exceeded"),
            ),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found_error", None),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "permission_error", None),
            AppError::ProviderBadRequest(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", None)
            }
            AppError::ProviderAuth(_) => (
                StatusCode::BAD_GATEWAY,
                "provider_error",
                Some("provider_auth"),
            ),
            AppError::ProviderRateLimited(_) => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error", None)
            }
            AppError::ProviderUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "provider_error", None)
            }
            AppError::ProviderServer(_) => (StatusCode::BAD_GATEWAY, "provider_error", None),
            AppError::NoImages => (
                StatusCode::BAD_GATEWAY,
                "provider_error",
                Some("no_images_produced"),
            ),
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout_error", None),
            AppError::Upload(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::Timeout("t".into()).is_retryable());
        assert!(AppError::ProviderRateLimited("429".into()).is_retryable());
        assert!(AppError::ProviderUnavailable("503".into()).is_retryable());
        assert!(!AppError::ProviderBadRequest("400".into()).is_retryable());
        assert!(!AppError::ProviderAuth("401".into()).is_retryable());
        assert!(!AppError::NoImages.is_retryable());
        assert!(!AppError::QuotaExceeded {
            used: 0,
            incoming: 1,
            quota: 0
        }
        .is_retryable());
    }

    #[test]
    fn test_server_fault_classification() {
        assert!(AppError::ProviderUnavailable("503".into()).is_server_fault());
        assert!(AppError::ProviderServer("500".into()).is_server_fault());
        assert!(AppError::Upload("disk".into()).is_server_fault());
        assert!(!AppError::ProviderBadRequest("400".into()).is_server_fault());
        assert!(!AppError::InvalidRequest("prompt".into()).is_server_fault());
        assert!(!AppError::QuotaExceeded {
            used: 0,
            incoming: 1,
            quota: 0
        }
        .is_server_fault());
    }
}
