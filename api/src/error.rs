use std::time::Duration;

use axum::Json;
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use steward_core::error::{self, ApiError};

use crate::coach::{CoachError, MAX_MESSAGE_CHARS};

const PROVIDER_UNAVAILABLE_MESSAGE: &str =
    "The coach is temporarily unavailable. Please try again in a few minutes.";

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Unsupported HTTP method (405). `allow` lists the supported methods.
    MethodNotAllowed { method: String, allow: &'static str },
    /// Too many requests from one client (429)
    RateLimited { retry_after: Duration },
    /// Every eligible provider failed (500). The detail is logged, never returned.
    ProviderUnavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, extra_header, api_error): (_, Option<(HeaderName, HeaderValue)>, _) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                None,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::MethodNotAllowed { method, allow } => (
                StatusCode::METHOD_NOT_ALLOWED,
                Some((header::ALLOW, HeaderValue::from_static(allow))),
                ApiError {
                    error: error::codes::METHOD_NOT_ALLOWED.to_string(),
                    message: format!("Method {method} is not allowed on this endpoint"),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: Some(format!("Send the request with {allow}.")),
                },
            ),
            AppError::RateLimited { retry_after } => {
                let secs = retry_after_secs(retry_after);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Some((header::RETRY_AFTER, HeaderValue::from(secs))),
                    ApiError {
                        error: error::codes::RATE_LIMITED.to_string(),
                        message: format!("Too many requests. Retry after {secs} seconds."),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::ProviderUnavailable(detail) => {
                tracing::error!(request_id = %request_id, error = %detail, "coach provider unavailable");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    None,
                    ApiError {
                        error: error::codes::PROVIDER_UNAVAILABLE.to_string(),
                        message: PROVIDER_UNAVAILABLE_MESSAGE.to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        let mut response = (status, Json(api_error)).into_response();
        if let Some((name, value)) = extra_header {
            response.headers_mut().insert(name, value);
        }
        response
    }
}

/// Whole seconds, rounded up, never zero.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl From<CoachError> for AppError {
    fn from(err: CoachError) -> Self {
        match err {
            CoachError::InvalidRequest(message) => AppError::Validation {
                message,
                field: Some("message".to_string()),
                received: None,
                docs_hint: Some(format!(
                    "Send a non-empty `message` of at most {MAX_MESSAGE_CHARS} characters."
                )),
            },
            CoachError::RateLimited(exceeded) => AppError::RateLimited {
                retry_after: exceeded.retry_after,
            },
            err @ (CoachError::Provider(_) | CoachError::AllProvidersFailed { .. }) => {
                AppError::ProviderUnavailable(err.to_string())
            }
        }
    }
}
