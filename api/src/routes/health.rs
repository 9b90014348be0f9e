use axum::extract::State;
use axum::{Json, Router, routing::get};
use steward_core::coach::Provider;

use crate::state::AppState;
use crate::{HealthResponse, ProviderStatus};

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check endpoint. Also reports which providers currently have a key.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let settings = state.settings.load();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: ProviderStatus {
            openai: settings.is_configured(Provider::Openai),
            perplexity: settings.is_configured(Provider::Perplexity),
        },
    })
}
