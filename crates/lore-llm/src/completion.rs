use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::LlmError;
use crate::provider::{ChatStream, LlmProvider, Message};
use crate::sse::sse_to_stream;

/// Streaming chat-completion client for OpenAI-compatible backends.
pub struct CompletionClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl Clone for CompletionClient {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

impl CompletionClient {
    #[must_use]
    pub fn new(api_key: String, mut base_url: String, model: String, max_tokens: u32) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(),
            api_key,
            base_url,
            model,
            max_tokens,
            temperature: 0.2,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    async fn send_stream_request(
        &self,
        messages: &[Message],
    ) -> Result<reqwest::Response, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }

        if !status.is_success() {
            let text = response.text().await.map_err(LlmError::Http)?;
            tracing::error!("completion API streaming request error {status}: {text}");
            return Err(LlmError::Other(format!(
                "completion request failed (status {status})"
            )));
        }

        Ok(response)
    }
}

impl LlmProvider for CompletionClient {
    fn chat_stream<'a>(
        &'a self,
        messages: &'a [Message],
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<ChatStream, LlmError>> + Send + 'a>,
    > {
        Box::pin(async move {
            let response = match self.send_stream_request(messages).await {
                Ok(resp) => resp,
                Err(LlmError::RateLimited) => {
                    tracing::warn!("completion backend rate limited, retrying in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    self.send_stream_request(messages).await?
                }
                Err(e) => return Err(e),
            };

            Ok(sse_to_stream(response))
        })
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "completion"
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}
