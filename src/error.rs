use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use thiserror::Error;

// Rejected limits at construction time
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max concurrent connections must be greater than zero")]
    ZeroConcurrency,

    #[error("block duration must be greater than zero")]
    ZeroBlockDuration,

    #[error("block duration of {0:?} exceeds the {1:?} maximum")]
    BlockDurationTooLong(Duration, Duration),

    #[error("requests per second must be a positive finite number, got {0}")]
    InvalidRate(f64),

    #[error("burst limit must be greater than zero")]
    ZeroBurst,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

// Why a request was turned away before reaching the router
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdmissionError {
    #[error("Too many connections. Please try again later.")]
    TooManyConnections,

    #[error("Rate limit exceeded. Please slow down.")]
    RateLimited { retry_after: Duration, retry_after_secs: u64 },
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        match self {
            AdmissionError::TooManyConnections => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({ "error": self.to_string() })),
            )
                .into_response(),
            // exact hint in the body, whole seconds in the header
            AdmissionError::RateLimited { retry_after, retry_after_secs } => {
                let body = Json(serde_json::json!({
                    "error": self.to_string(),
                    "retry_after": retry_after.as_secs_f64(),
                }));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
        }
    }
}
