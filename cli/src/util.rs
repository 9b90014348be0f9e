use serde_json::json;

/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub const EXIT_OK: i32 = 0;
pub const EXIT_CLIENT_ERROR: i32 = 1;
pub const EXIT_SERVER_ERROR: i32 = 2;
pub const EXIT_CONNECTION_ERROR: i32 = 3;
pub const EXIT_USAGE_ERROR: i32 = 4;

const API_URL_HINT: &str = "Is the API server running? Check --api-url or STEWARD_API_URL.";

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_code_for_status(status: u16) -> i32 {
    match status {
        200..=299 => EXIT_OK,
        400..=499 => EXIT_CLIENT_ERROR,
        _ => EXIT_SERVER_ERROR,
    }
}

/// Print a structured error to stderr.
pub fn print_error(error: &str, message: &str, docs_hint: Option<&str>) {
    let mut err = json!({
        "error": error,
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    print_json_stderr(&err);
}

pub fn print_json_stdout(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

pub fn print_json_stderr(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => eprintln!("{text}"),
        Err(_) => eprintln!("{value}"),
    }
}

pub fn endpoint(api_url: &str, path: &str) -> Result<reqwest::Url, i32> {
    let raw = format!("{}{path}", api_url.trim_end_matches('/'));
    reqwest::Url::parse(&raw).map_err(|e| {
        print_error("cli_error", &format!("Invalid URL: {raw}: {e}"), None);
        EXIT_USAGE_ERROR
    })
}

/// Report a failed send and return the connection-error exit code.
pub fn connection_failed(err: &reqwest::Error) -> i32 {
    print_error("connection_error", &err.to_string(), Some(API_URL_HINT));
    EXIT_CONNECTION_ERROR
}

/// Print a non-2xx response body to stderr and return its exit code.
pub async fn report_failure(resp: reqwest::Response) -> i32 {
    let status = resp.status().as_u16();
    let body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };
    print_json_stderr(&body);
    exit_code_for_status(status)
}

/// Execute a request, print the JSON response, and return a structured exit code.
pub async fn api_request(api_url: &str, method: reqwest::Method, path: &str) -> i32 {
    let url = match endpoint(api_url, path) {
        Ok(url) => url,
        Err(code) => return code,
    };

    let resp = match client().request(method, url).send().await {
        Ok(r) => r,
        Err(e) => return connection_failed(&e),
    };

    if !resp.status().is_success() {
        return report_failure(resp).await;
    }

    match resp.json::<serde_json::Value>().await {
        Ok(body) => {
            print_json_stdout(&body);
            EXIT_OK
        }
        Err(e) => {
            print_error(
                "cli_error",
                &format!("Failed to parse response as JSON: {e}"),
                None,
            );
            EXIT_SERVER_ERROR
        }
    }
}

/// Parse a `--context` style JSON argument.
pub fn parse_json_arg(flag: &str, raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("{flag} is not valid JSON: {e}"))
}
