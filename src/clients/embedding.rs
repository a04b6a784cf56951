use crate::config::EmbeddingConfig;
use crate::error::{ApiError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Character budget applied before sending; a rough stand-in for the
/// model's token limit.
const MAX_INPUT_CHARS: usize = 8000;

/// Turns text into a fixed-length vector. Object-safe so the resolver can
/// be handed a scripted implementation in tests.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Bulk variant for the offline backfill job. Output order matches
    /// input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    text: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

enum RequestFailure {
    RateLimited,
    Transient(String),
}

#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    config: EmbeddingConfig,
    endpoint: String,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(|e| ApiError::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        let endpoint = format!("{}/embeddings", config.base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    async fn request_embedding(
        &self,
        text: &str,
    ) -> std::result::Result<Vec<f32>, RequestFailure> {
        let request = EmbeddingRequest {
            text,
            model: &self.config.model,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| RequestFailure::Transient(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| RequestFailure::Transient(e.to_string()))?;
                parse_embedding_response(&body)
                    .map_err(|e| RequestFailure::Transient(e.to_string()))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(RequestFailure::RateLimited),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(RequestFailure::Transient(format!(
                    "embedding endpoint returned {}: {}",
                    status, body
                )))
            }
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.config.retry_attempts,
            base_delay_ms: self.config.retry_delay_ms,
            requests_per_minute: self.config.requests_per_minute,
        }
    }
}

/// Knobs for the bounded retry loop, lifted out of [`EmbeddingConfig`].
pub(crate) struct RetryPolicy {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub requests_per_minute: u32,
}

impl RetryPolicy {
    /// Sleep budget after a rate-limit reply: one request slot at the
    /// configured per-minute budget, scaled by how often we have been told
    /// to back off in this call.
    fn cooldown(&self, attempt: u32) -> Duration {
        let slot = 60.0 / self.requests_per_minute.max(1) as f64;
        Duration::from_secs_f64(slot * attempt as f64)
    }
}

/// Drives one logical embedding through the bounded retry loop. Rate
/// limits and transient failures retry up to the attempt ceiling; a vector
/// of the wrong shape aborts immediately.
async fn embed_with_retries<F, Fut>(
    policy: &RetryPolicy,
    expected_dimension: usize,
    mut request: F,
) -> Result<Vec<f32>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Vec<f32>, RequestFailure>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();

    // Bounded loop rather than retry-by-recursion; the ceiling is the
    // configured attempt count.
    for attempt in 1..=attempts {
        match request().await {
            Ok(vector) => {
                if vector.len() != expected_dimension {
                    // Wrong shape is never retried or silently accepted.
                    return Err(ApiError::DimensionMismatch {
                        expected: expected_dimension,
                        actual: vector.len(),
                    });
                }
                debug!(
                    "Embedded into {} dims on attempt {}",
                    vector.len(),
                    attempt
                );
                return Ok(vector);
            }
            Err(RequestFailure::RateLimited) => {
                let pause = policy.cooldown(attempt);
                warn!(
                    "Embedding endpoint rate-limited (attempt {}/{}), cooling down {:?}",
                    attempt, attempts, pause
                );
                last_error = "rate limited".to_string();
                if attempt < attempts {
                    tokio::time::sleep(pause).await;
                }
            }
            Err(RequestFailure::Transient(message)) => {
                warn!(
                    "Embedding request failed (attempt {}/{}): {}",
                    attempt, attempts, message
                );
                last_error = message;
                if attempt < attempts {
                    tokio::time::sleep(backoff_delay(policy.base_delay_ms, attempt)).await;
                }
            }
        }
    }

    Err(ApiError::EmbeddingUnavailable(format!(
        "{} attempts exhausted: {}",
        attempts, last_error
    )))
}

/// Sequential batch driver: output index i holds the embedding of input i,
/// and the first failure aborts the whole batch.
async fn collect_batch<F, Fut>(count: usize, mut embed_one: F) -> Result<Vec<Vec<f32>>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<f32>>>,
{
    if count == 0 {
        return Err(ApiError::InvalidInput("empty batch provided".into()));
    }

    let mut vectors = Vec::with_capacity(count);
    for i in 0..count {
        match embed_one(i).await {
            Ok(vector) => vectors.push(vector),
            Err(e) => {
                warn!("Batch embedding failed at index {}: {}", i, e);
                return Err(e);
            }
        }
    }
    Ok(vectors)
}

/// Extract the vector from a `{ data: [{ embedding: [...] }] }` body.
pub(crate) fn parse_embedding_response(body: &str) -> Result<Vec<f32>> {
    let parsed: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| ApiError::Upstream(format!("malformed embedding response: {}", e)))?;
    let first = parsed
        .data
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Upstream("embedding response contained no data".into()))?;
    if first.embedding.is_empty() {
        return Err(ApiError::Upstream("embedding response was empty".into()));
    }
    Ok(first.embedding)
}

/// Trim and cap input before it goes on the wire.
pub(crate) fn normalize_input(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_INPUT_CHARS {
        trimmed.to_string()
    } else {
        trimmed.chars().take(MAX_INPUT_CHARS).collect()
    }
}

pub(crate) fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))))
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = normalize_input(text);
        if input.is_empty() {
            return Err(ApiError::InvalidInput("cannot embed empty text".into()));
        }

        let policy = self.retry_policy();
        let this = self;
        let input = &input;
        embed_with_retries(&policy, self.config.dimension, move || {
            this.request_embedding(input)
        })
        .await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // One request per text, in order. The backfill job that calls this
        // cares about alignment with its input rows, not throughput.
        let this = self;
        collect_batch(texts.len(), move |i| this.embed(&texts[i])).await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
