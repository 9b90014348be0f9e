use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A chat-completion backend the coach can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Perplexity,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Perplexity => "perplexity",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which provider the caller asked for. `Auto` lets the server pick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    Openai,
    Perplexity,
    #[default]
    Auto,
}

impl ProviderChoice {
    /// The explicitly requested provider, or `None` for `auto`.
    pub fn explicit(self) -> Option<Provider> {
        match self {
            Self::Openai => Some(Provider::Openai),
            Self::Perplexity => Some(Provider::Perplexity),
            Self::Auto => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider '{0}' (expected openai, perplexity or auto)")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderChoice {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::Openai),
            "perplexity" => Ok(Self::Perplexity),
            "auto" => Ok(Self::Auto),
            _ => Err(UnknownProvider(value.to_string())),
        }
    }
}

/// Request body for `POST /api/coach`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CoachRequest {
    /// The user's question for the coach. Must not be blank.
    pub message: String,
    /// Opaque budget snapshot supplied by the client, forwarded as grounding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    /// Ask the coach to frame advice around scripture and stewardship.
    #[serde(default)]
    pub biblical_mode: bool,
    #[serde(default)]
    pub provider: ProviderChoice,
    /// Relay the reply as a server-sent event stream instead of one JSON body.
    #[serde(default)]
    pub stream: bool,
}

/// Buffered coach reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CoachReply {
    pub reply: String,
    /// The provider that actually produced the reply (after any fallback).
    pub provider: Provider,
}

/// Payload of one `data:` event on the coach stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StreamChunk {
    pub content: String,
}

/// Terminal payload of the coach stream.
pub const STREAM_DONE: &str = "[DONE]";
