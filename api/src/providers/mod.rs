//! Clients for the upstream chat-completion APIs.
//!
//! OpenAI and Perplexity both speak the OpenAI chat-completion dialect, so a
//! single client covers both; the per-provider differences are captured in
//! [`GenerationParams`].

pub mod client;
pub mod relay;

use steward_core::coach::Provider;

pub use client::ProviderClient;
pub use relay::{RelayEvent, STREAM_IDLE_TIMEOUT, relay_stream};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} API key is not configured")]
    Unconfigured { provider: Provider },

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} upstream error: {detail}")]
    Upstream { provider: Provider, detail: String },

    #[error("{provider} returned an empty completion")]
    EmptyResponse { provider: Provider },
}

impl ProviderError {
    pub fn provider(&self) -> Provider {
        match self {
            Self::Unconfigured { provider }
            | Self::Transport { provider, .. }
            | Self::Upstream { provider, .. }
            | Self::EmptyResponse { provider } => *provider,
        }
    }
}

/// Fixed sampling parameters sent with every completion request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub presence_penalty: Option<f32>,
}

const MAX_OUTPUT_TOKENS: u32 = 200;
const TEMPERATURE: f32 = 0.7;
const OPENAI_PRESENCE_PENALTY: f32 = 0.1;

pub fn generation_params(provider: Provider) -> GenerationParams {
    match provider {
        Provider::Openai => GenerationParams {
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
            presence_penalty: Some(OPENAI_PRESENCE_PENALTY),
        },
        Provider::Perplexity => GenerationParams {
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
            presence_penalty: None,
        },
    }
}
