use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::post};
use futures::StreamExt;
use futures::stream::BoxStream;
use steward_core::coach::{CoachReply, CoachRequest, Provider, STREAM_DONE, StreamChunk};
use steward_core::error::ApiError;

use crate::coach::{CoachOutcome, dispatch};
use crate::error::AppError;
use crate::extract::{AppJson, ClientKey};
use crate::providers::RelayEvent;
use crate::state::AppState;

const PROVIDER_HEADER: &str = "x-coach-provider";

pub fn router() -> Router<AppState> {
    Router::new().route("/api/coach", post(coach).fallback(method_not_allowed))
}

/// Ask the budget coach for advice.
///
/// With `stream: true` the reply is sent as `text/event-stream`: one
/// `data: {"content": "..."}` event per fragment, then `data: [DONE]`.
#[utoipa::path(
    post,
    path = "/api/coach",
    request_body = CoachRequest,
    responses(
        (status = 200, description = "Coach reply (or an event stream when `stream` is true)", body = CoachReply),
        (status = 400, description = "Blank or malformed message", body = ApiError),
        (status = 405, description = "Only POST is supported", body = ApiError),
        (status = 429, description = "Too many requests from this client", body = ApiError),
        (status = 500, description = "No provider could answer", body = ApiError)
    ),
    tag = "coach"
)]
pub async fn coach(
    State(state): State<AppState>,
    ClientKey(client_key): ClientKey,
    AppJson(request): AppJson<CoachRequest>,
) -> Result<Response, AppError> {
    match dispatch(&state, &client_key, request).await? {
        CoachOutcome::Reply(reply) => Ok(Json(reply).into_response()),
        CoachOutcome::Stream { provider, events } => Ok(event_stream_response(provider, events)),
    }
}

async fn method_not_allowed(method: Method) -> AppError {
    AppError::MethodNotAllowed {
        method: method.to_string(),
        allow: "POST",
    }
}

fn event_stream_response(provider: Provider, events: BoxStream<'static, RelayEvent>) -> Response {
    let events = events.map(|event| match event {
        RelayEvent::Content(content) => Event::default().json_data(StreamChunk { content }),
        RelayEvent::Done => Ok(Event::default().data(STREAM_DONE)),
    });

    // Sse sets content-type and cache-control itself.
    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    headers.insert(
        HeaderName::from_static(PROVIDER_HEADER),
        HeaderValue::from_static(provider.as_str()),
    );
    response
}
