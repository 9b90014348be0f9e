pub mod coach;
pub mod error;
pub mod sse;
