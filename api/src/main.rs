use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod coach;
mod config;
mod error;
mod extract;
mod middleware;
mod providers;
mod rate_limit;
mod routes;
mod state;
#[cfg(test)]
mod test_support;

use config::{ProviderSettings, ServerConfig, SettingsSource};
use rate_limit::{RateLimitConfig, RateLimiter};

const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Steward Budget Coach API",
        version = "0.1.0",
        description = "Conversational budgeting advice backed by OpenAI or Perplexity, with optional streaming."
    ),
    paths(routes::health::health_check, routes::coach::coach),
    components(schemas(
        HealthResponse,
        ProviderStatus,
        steward_core::error::ApiError,
        steward_core::coach::CoachRequest,
        steward_core::coach::CoachReply,
        steward_core::coach::StreamChunk,
        steward_core::coach::Provider,
        steward_core::coach::ProviderChoice,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub providers: ProviderStatus,
}

/// Whether each provider currently has an API key.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ProviderStatus {
    pub openai: bool,
    pub perplexity: bool,
}

/// Assemble routes and the middleware stack.
pub fn app(app_state: state::AppState, server: &ServerConfig) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::coach::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .option_layer(
                    server
                        .require_https
                        .then(|| axum::middleware::from_fn(middleware::https::require_https)),
                )
                .layer(middleware::cors::build_cors_layer(&server.cors_origins))
                .layer(axum::middleware::from_fn(middleware::security_headers::apply)),
        )
        .with_state(app_state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "steward_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let server = ServerConfig::from_env();
    let limit = RateLimitConfig::from_env();
    tracing::info!(
        interval_secs = limit.interval.as_secs(),
        per_interval = limit.tokens_per_interval,
        unique_keys = limit.unique_token_per_interval,
        "coach rate limit configured"
    );
    let (limiter, cleanup) = RateLimiter::start(limit);

    let providers = ProviderSettings::from_env();
    if !providers.openai.is_configured() && !providers.perplexity.is_configured() {
        tracing::warn!("no provider API key set; coach requests will fail until one is configured");
    }

    let http = reqwest::Client::builder()
        .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
        .build()?;

    let app_state = state::AppState {
        limiter,
        http,
        settings: SettingsSource::Env,
    };

    let app = app(app_state, &server);

    let addr = SocketAddr::from(([0, 0, 0, 0], server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Steward API listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cleanup.shutdown().await;
    tracing::info!("Steward API stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
