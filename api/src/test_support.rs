//! Fixtures shared by the in-crate tests: fake upstream providers served on
//! an ephemeral local port, and pre-built settings/state.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::post;
use serde_json::{Value, json};

use crate::config::{ProviderCredentials, ProviderSettings, ServerConfig, SettingsSource};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::state::AppState;

/// Nothing listens on the discard port, so connections are refused.
pub const UNREACHABLE_URL: &str = "http://127.0.0.1:9";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub body: Value,
}

/// Canned `/chat/completions` endpoint.
pub struct MockUpstream {
    status: StatusCode,
    content_type: &'static str,
    body: String,
}

impl MockUpstream {
    pub fn completion(text: &str) -> Self {
        Self::raw_json(
            &json!({
                "id": "chatcmpl-test",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}]
            })
            .to_string(),
        )
    }

    pub fn raw_json(body: &str) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn failure(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn event_stream(body: &str) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "text/event-stream",
            body: body.to_string(),
        }
    }

    pub async fn spawn(self) -> RunningUpstream {
        let recorded: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();
        let log = recorded.clone();
        let Self {
            status,
            content_type,
            body,
        } = self;

        let app = Router::new().route(
            "/chat/completions",
            post(move |headers: HeaderMap, request_body: Bytes| {
                let log = log.clone();
                let body = body.clone();
                async move {
                    let header_text = |name: header::HeaderName| {
                        headers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string)
                    };
                    log.lock().unwrap().push(RecordedRequest {
                        authorization: header_text(header::AUTHORIZATION),
                        accept: header_text(header::ACCEPT),
                        body: serde_json::from_slice(&request_body).unwrap_or(Value::Null),
                    });
                    (status, [(header::CONTENT_TYPE, content_type)], body)
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        RunningUpstream {
            base_url: format!("http://{addr}"),
            recorded,
        }
    }
}

pub struct RunningUpstream {
    pub base_url: String,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl RunningUpstream {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.recorded.lock().unwrap().clone()
    }
}

/// Builds settings from optional `(api_key, base_url)` pairs. A provider
/// passed as `None` has no key and points at an unreachable address.
pub fn settings(openai: Option<(&str, &str)>, perplexity: Option<(&str, &str)>) -> ProviderSettings {
    let credentials = |entry: Option<(&str, &str)>, model: &str| match entry {
        Some((api_key, base_url)) => ProviderCredentials {
            api_key: Some(api_key.to_string()),
            model: model.to_string(),
            base_url: base_url.to_string(),
        },
        None => ProviderCredentials {
            api_key: None,
            model: model.to_string(),
            base_url: UNREACHABLE_URL.to_string(),
        },
    };

    ProviderSettings {
        openai: credentials(openai, "test-openai-model"),
        perplexity: credentials(perplexity, "test-perplexity-model"),
    }
}

pub fn state(settings: ProviderSettings, tokens_per_interval: u32) -> AppState {
    AppState {
        limiter: RateLimiter::new(RateLimitConfig {
            interval: Duration::from_secs(60),
            tokens_per_interval,
            unique_token_per_interval: 100,
        }),
        http: reqwest::Client::new(),
        settings: SettingsSource::Fixed(settings),
    }
}

/// The full application router with default server settings.
pub fn app(state: AppState) -> Router {
    crate::app(state, &ServerConfig::default())
}
