//! Custom extractors.
//!
//! `AppJson<T>` replaces `axum::Json<T>` so that body deserialization failures
//! produce a JSON `AppError` instead of axum's plain-text rejection.
//! `ClientKey` resolves the identity used for rate limiting.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request, rejection::JsonRejection},
    http::request::Parts,
};

use crate::error::AppError;
use crate::rate_limit::client_key;

/// JSON extractor that converts deserialization errors to structured `AppError` responses.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

/// Convert a `JsonRejection` to a structured `AppError::Validation`.
pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();

    // "missing field `message`" → field = "message"
    // "provider: unknown variant `claude`, ..." → field = "provider", received = "claude"
    let field_hint = extract_field_from_serde_message(&body_text);
    let received = extract_rejected_variant(&body_text).map(serde_json::Value::String);

    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(field_hint.unwrap_or_else(|| "body".to_string())),
        received,
        docs_hint: Some(
            "Send a JSON object with a `message` string and optional `context`, `biblicalMode`, \
             `provider` (openai, perplexity or auto) and `stream` fields."
                .to_string(),
        ),
    }
}

/// Try to extract a field name from serde's error messages.
///
/// Missing fields are named inside backticks; errors on a present field are
/// prefixed with its path (`provider: unknown variant ...`).
fn extract_field_from_serde_message(msg: &str) -> Option<String> {
    const MISSING: &str = "missing field `";
    if let Some(start) = msg.find(MISSING) {
        let after = &msg[start + MISSING.len()..];
        return after.find('`').map(|end| after[..end].to_string());
    }

    let detail = msg.rsplit("target type: ").next().unwrap_or(msg);
    let (path, _) = detail.split_once(": ")?;
    let is_path = !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    is_path.then(|| path.to_string())
}

/// The offending value of an "unknown variant" error, e.g. an unsupported provider name.
fn extract_rejected_variant(msg: &str) -> Option<String> {
    const UNKNOWN_VARIANT: &str = "unknown variant `";
    let start = msg.find(UNKNOWN_VARIANT)?;
    let after = &msg[start + UNKNOWN_VARIANT.len()..];
    after.find('`').map(|end| after[..end].to_string())
}

/// Rate-limit identity of the caller: forwarded address, peer IP or `unknown`.
pub struct ClientKey(pub String);

impl<S> FromRequestParts<S> for ClientKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientKey(client_key(&parts.headers, peer)))
    }
}
