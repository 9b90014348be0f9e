use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

const BASELINE: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("x-frame-options", "DENY"),
    // Narrow on purpose; the Swagger UI needs its inline scripts.
    ("content-security-policy", "frame-ancestors 'none'"),
];

/// Apply a minimal security-header baseline to all responses.
pub async fn apply(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    for (name, value) in BASELINE {
        headers.insert(*name, HeaderValue::from_static(value));
    }
    response
}
