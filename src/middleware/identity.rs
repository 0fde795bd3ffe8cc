//! Caller identity middleware
//!
//! Token verification happens upstream at the edge; by the time a request
//! reaches this service the bearer token is the already-verified subject
//! identifier. This layer extracts it into a request extension so handlers
//! can rely on an authenticated caller.

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use serde::Serialize;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

/// The authenticated caller, available as a request extension behind
/// [`IdentityLayer`]
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub subject: String,
}

#[derive(Serialize)]
struct IdentityError {
    error: IdentityErrorDetail,
}

#[derive(Serialize)]
struct IdentityErrorDetail {
    message: String,
    r#type: String,
    code: String,
}

/// Identity extraction layer
#[derive(Clone, Default)]
pub struct IdentityLayer;

impl IdentityLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for IdentityLayer {
    type Service = IdentityMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IdentityMiddleware { inner }
    }
}

/// Identity extraction middleware service
#[derive(Clone)]
pub struct IdentityMiddleware<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for IdentityMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        // Health checks and identity webhooks carry their own trust model
        let path = request.uri().path();
        if path == "/health" || path.starts_with("/webhooks/") {
            let future = self.inner.call(request);
            return Box::pin(async move { future.await });
        }

        let subject = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        match subject {
            Some(subject) => {
                request
                    .extensions_mut()
                    .insert(CallerIdentity { subject });
                let future = self.inner.call(request);
                Box::pin(async move { future.await })
            }
            None => {
                warn!(path, "Request without caller identity");
                Box::pin(async move {
                    Ok(create_identity_error_response(
                        "Authentication required. Provide via Authorization header: 'Bearer SUBJECT_TOKEN'",
                    ))
                })
            }
        }
    }
}

fn create_identity_error_response(message: &str) -> Response {
    let error = IdentityError {
        error: IdentityErrorDetail {
            message: message.to_string(),
            r#type: "authentication_error".to_string(),
            code: "missing_identity".to_string(),
        },
    };

    (StatusCode::UNAUTHORIZED, Json(error)).into_response()
}
