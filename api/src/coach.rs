//! Coach request orchestration.
//!
//! A request moves through validation, the rate-limit check, provider
//! selection and the provider call. Buffered requests whose Perplexity call
//! fails get one retry against OpenAI; streamed requests are committed to
//! their provider once the upstream stream is open.

use futures::StreamExt;
use futures::stream::BoxStream;
use steward_core::coach::{CoachReply, CoachRequest, Provider, ProviderChoice};

use crate::config::ProviderSettings;
use crate::providers::{ProviderClient, ProviderError, RelayEvent, STREAM_IDLE_TIMEOUT, relay_stream};
use crate::rate_limit::RateLimitExceeded;
use crate::state::AppState;

pub const MAX_MESSAGE_CHARS: usize = 4000;

pub const BASE_SYSTEM_PROMPT: &str = "You are a friendly, practical personal finance coach inside a \
budgeting app. Give specific, actionable advice about budgeting, saving, debt repayment and spending \
habits. Keep answers short: at most three concrete steps, in plain language, without judgement. \
Do not recommend specific securities or give tax or legal advice; suggest a qualified professional \
for those.";

pub const BIBLICAL_MODE_PROMPT: &str = "The user has asked for faith-based guidance. Frame your advice \
around biblical principles of stewardship, generosity, contentment and diligent planning, and cite \
one or two relevant passages of scripture (for example Proverbs 21:5, Luke 14:28 or Malachi 3:10) \
where they genuinely apply. Stay respectful and practical.";

#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("all providers failed (primary: {primary}; fallback: {fallback})")]
    AllProvidersFailed {
        primary: ProviderError,
        fallback: ProviderError,
    },
}

pub enum CoachOutcome {
    Reply(CoachReply),
    Stream {
        provider: Provider,
        events: BoxStream<'static, RelayEvent>,
    },
}

/// Handles one coach request on behalf of `client_key`.
pub async fn dispatch(
    state: &AppState,
    client_key: &str,
    request: CoachRequest,
) -> Result<CoachOutcome, CoachError> {
    let message = validate_message(&request.message)?;

    if let Err(err) = state.limiter.check(client_key) {
        tracing::warn!(
            client_key = %client_key,
            retry_after_secs = err.retry_after.as_secs(),
            "coach request rate limited"
        );
        return Err(err.into());
    }
    tracing::debug!(
        client_key = %client_key,
        used = state.limiter.usage(client_key).unwrap_or_default(),
        "coach request admitted"
    );

    let settings = state.settings.load();
    let provider = select_provider(request.provider, &settings);
    let system_prompt = build_system_prompt(request.biblical_mode, request.context.as_ref());

    if request.stream {
        let upstream = ProviderClient::new(&state.http, provider, &settings)
            .open_stream(&system_prompt, message)
            .await?;
        tracing::info!(provider = %provider, client_key = %client_key, "relaying coach stream");
        return Ok(CoachOutcome::Stream {
            provider,
            events: relay_stream(provider, upstream.bytes_stream(), STREAM_IDLE_TIMEOUT).boxed(),
        });
    }

    let primary_err = match ProviderClient::new(&state.http, provider, &settings)
        .complete(&system_prompt, message)
        .await
    {
        Ok(reply) => return Ok(CoachOutcome::Reply(CoachReply { reply, provider })),
        Err(err) => err,
    };

    let Some(fallback) = fallback_provider(provider, &settings) else {
        return Err(primary_err.into());
    };

    tracing::warn!(
        provider = %primary_err.provider(),
        fallback = %fallback,
        error = %primary_err,
        "primary provider failed, trying fallback"
    );

    match ProviderClient::new(&state.http, fallback, &settings)
        .complete(&system_prompt, message)
        .await
    {
        Ok(reply) => Ok(CoachOutcome::Reply(CoachReply {
            reply,
            provider: fallback,
        })),
        Err(fallback_err) => Err(CoachError::AllProvidersFailed {
            primary: primary_err,
            fallback: fallback_err,
        }),
    }
}

/// Returns the trimmed message, or an error if it is blank or too long.
pub fn validate_message(message: &str) -> Result<&str, CoachError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(CoachError::InvalidRequest(
            "message must not be empty".to_string(),
        ));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(CoachError::InvalidRequest(format!(
            "message must be at most {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(message)
}

/// `auto` prefers Perplexity when it has a key. Explicit choices are honored
/// even when unconfigured; the call then fails as unconfigured.
pub fn select_provider(choice: ProviderChoice, settings: &ProviderSettings) -> Provider {
    match choice.explicit() {
        Some(provider) => provider,
        None if settings.is_configured(Provider::Perplexity) => Provider::Perplexity,
        None => Provider::Openai,
    }
}

/// Only a failed Perplexity call falls back, and only to a configured OpenAI.
pub fn fallback_provider(primary: Provider, settings: &ProviderSettings) -> Option<Provider> {
    (primary == Provider::Perplexity && settings.is_configured(Provider::Openai))
        .then_some(Provider::Openai)
}

pub fn build_system_prompt(biblical_mode: bool, context: Option<&serde_json::Value>) -> String {
    let mut prompt = BASE_SYSTEM_PROMPT.to_string();

    if biblical_mode {
        prompt.push_str("\n\n");
        prompt.push_str(BIBLICAL_MODE_PROMPT);
    }

    if let Some(context) = context.filter(|value| !value.is_null()) {
        prompt.push_str(
            "\n\nUser budget context (JSON supplied by the app; use it to ground your answer):\n",
        );
        prompt.push_str(&context.to_string());
    }

    prompt
}
