use crate::config::LlmConfig;
use crate::error::{ApiError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

const COMPLETION_RETRY_ATTEMPTS: u32 = 2;
const COMPLETION_RETRY_DELAY_MS: u64 = 300;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat-completion seam; the expander only ever sees this trait.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> Result<String>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Clone)]
pub struct HttpChatClient {
    client: Client,
    config: LlmConfig,
    endpoint: String,
}

impl HttpChatClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ApiError::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    async fn send_once(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let request = CompletionRequest {
            model: &self.config.model,
            messages,
            temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "LLM endpoint returned {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        parse_completion_content(&body)
    }
}

/// Pull `choices[0].message.content` out of a completion body.
pub(crate) fn parse_completion_content(body: &str) -> Result<String> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| ApiError::Upstream(format!("malformed completion response: {}", e)))?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| ApiError::Upstream("completion response contained no choices".into()))
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let mut last_error = None;
        for attempt in 1..=COMPLETION_RETRY_ATTEMPTS {
            match self.send_once(messages, temperature).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    warn!(
                        "LLM completion failed (attempt {}/{}): {}",
                        attempt, COMPLETION_RETRY_ATTEMPTS, e
                    );
                    last_error = Some(e);
                    if attempt < COMPLETION_RETRY_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(COMPLETION_RETRY_DELAY_MS)).await;
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| ApiError::Upstream("LLM completion never attempted".into())))
    }
}
