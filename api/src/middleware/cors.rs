use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

/// Build the CORS layer for the browser front end.
///
/// - Origins: the configured list (`STEWARD_CORS_ORIGINS`); unparsable entries are skipped
/// - Methods: GET, POST, OPTIONS
/// - Headers: Content-Type, Accept
/// - Exposed: Retry-After and the coach provider header
/// - Max age: 3600s
pub fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("accept"),
        ])
        .expose_headers([
            HeaderName::from_static("retry-after"),
            HeaderName::from_static("x-coach-provider"),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}
