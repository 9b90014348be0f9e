use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

const HSTS: &str = "max-age=63072000; includeSubDomains";

/// Middleware that enforces HTTPS via the `X-Forwarded-Proto` header.
///
/// Behind a TLS-terminating proxy, `X-Forwarded-Proto: http` gets a 301 to
/// the HTTPS equivalent. Every response carries an HSTS header.
pub async fn require_https(req: Request, next: Next) -> Response {
    if let Some(location) = https_redirect_target(req.headers(), req.uri()) {
        let mut response =
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response();
        add_hsts_header(&mut response);
        return response;
    }

    let mut response = next.run(req).await;
    add_hsts_header(&mut response);
    response
}

/// Where a plain-HTTP request should be sent instead, if anywhere.
fn https_redirect_target(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https");
    if !proto.eq_ignore_ascii_case("http") {
        return None;
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    let target = format!("https://{host}{path_and_query}");
    target.parse::<Uri>().ok().map(|uri| uri.to_string())
}

fn add_hsts_header(response: &mut Response) {
    response.headers_mut().insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static(HSTS),
    );
}
