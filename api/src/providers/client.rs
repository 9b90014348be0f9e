use std::time::Duration;

use serde::{Deserialize, Serialize};
use steward_core::coach::Provider;

use super::{GenerationParams, ProviderError, generation_params};
use crate::config::{ProviderCredentials, ProviderSettings};

/// Upper bound for a buffered completion. Streams are not time-limited.
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Issues chat-completion calls against one provider.
pub struct ProviderClient<'a> {
    http: &'a reqwest::Client,
    provider: Provider,
    credentials: &'a ProviderCredentials,
}

impl<'a> ProviderClient<'a> {
    pub fn new(http: &'a reqwest::Client, provider: Provider, settings: &'a ProviderSettings) -> Self {
        Self {
            http,
            provider,
            credentials: settings.get(provider),
        }
    }

    /// Requests a complete reply and returns its trimmed text.
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, ProviderError> {
        let response = self.send(system_prompt, user_message, false).await?;
        let payload = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|err| {
                tracing::error!(
                    provider = %self.provider,
                    error = %err,
                    "provider returned an unreadable completion payload"
                );
                ProviderError::Upstream {
                    provider: self.provider,
                    detail: "malformed completion payload".to_string(),
                }
            })?;

        extract_reply(self.provider, payload)
    }

    /// Starts a streamed completion. The returned response has a success
    /// status; its body is the provider's event stream.
    pub async fn open_stream(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        self.send(system_prompt, user_message, true).await
    }

    async fn send(
        &self,
        system_prompt: &str,
        user_message: &str,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        // Checked before any network traffic.
        let api_key = self
            .credentials
            .api_key
            .as_deref()
            .ok_or(ProviderError::Unconfigured {
                provider: self.provider,
            })?;

        let body = build_request(
            &self.credentials.model,
            generation_params(self.provider),
            system_prompt,
            user_message,
            stream,
        );

        let mut request = self
            .http
            .post(self.credentials.completions_url())
            .bearer_auth(api_key)
            .json(&body);
        request = if stream {
            request.header(reqwest::header::ACCEPT, "text/event-stream")
        } else {
            request.timeout(COMPLETION_TIMEOUT)
        };

        let response = request
            .send()
            .await
            .map_err(|source| ProviderError::Transport {
                provider: self.provider,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let upstream_body = response.text().await.unwrap_or_default();
            tracing::error!(
                provider = %self.provider,
                status = status.as_u16(),
                body = %upstream_body,
                "provider returned non-success status"
            );
            return Err(ProviderError::Upstream {
                provider: self.provider,
                detail: format!("HTTP {status}"),
            });
        }

        Ok(response)
    }
}

fn build_request<'a>(
    model: &'a str,
    params: GenerationParams,
    system_prompt: &'a str,
    user_message: &'a str,
    stream: bool,
) -> ChatCompletionRequest<'a> {
    ChatCompletionRequest {
        model,
        messages: [
            ChatMessage {
                role: "system",
                content: system_prompt,
            },
            ChatMessage {
                role: "user",
                content: user_message,
            },
        ],
        max_tokens: params.max_tokens,
        temperature: params.temperature,
        presence_penalty: params.presence_penalty,
        stream,
    }
}

fn extract_reply(
    provider: Provider,
    payload: ChatCompletionResponse,
) -> Result<String, ProviderError> {
    payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(ProviderError::EmptyResponse { provider })
}
