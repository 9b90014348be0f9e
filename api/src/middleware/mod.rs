pub mod cors;
pub mod https;
pub mod security_headers;
