use anyhow::{Context, Result};
use dotenv::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECONDS: u64 = 15;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_MAX_AI_ATTEMPTS: u32 = 3;
const DEFAULT_SUGGESTION_CONCURRENCY: usize = 3;

/// Parse an env var with a default when it is missing or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{} must be set", key))
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub catalog: CatalogConfig,
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Fixed output dimensionality; any other vector length is rejected.
    pub dimension: usize,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Outbound budget used to size the cooldown after a rate-limit reply.
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub max_ai_attempts: u32,
    /// Descending similarity ladder walked until a tier yields results.
    pub thresholds: Vec<f64>,
    /// In-flight limit for per-suggestion embedding/search work.
    pub suggestion_concurrency: usize,
    pub cache_ttl: Duration,
    pub cache_sweep_interval: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_ai_attempts: DEFAULT_MAX_AI_ATTEMPTS,
            thresholds: vec![0.9, 0.8, 0.7, 0.6, 0.5],
            suggestion_concurrency: DEFAULT_SUGGESTION_CONCURRENCY,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            cache_sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Config {
            port: env_or("PORT", 3000),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            embedding: EmbeddingConfig {
                base_url: env_required("EMBEDDING_BASE_URL")?,
                api_key: env_required("EMBEDDING_API_KEY")?,
                model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string()),
                dimension: env_or("EMBEDDING_DIMENSION", DEFAULT_EMBEDDING_DIMENSION),
                timeout: Duration::from_secs(env_or(
                    "EMBEDDING_TIMEOUT_SECONDS",
                    DEFAULT_TIMEOUT_SECONDS,
                )),
                retry_attempts: env_or("EMBEDDING_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS),
                retry_delay_ms: env_or("EMBEDDING_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS),
                requests_per_minute: env_or(
                    "EMBEDDING_REQUESTS_PER_MINUTE",
                    DEFAULT_REQUESTS_PER_MINUTE,
                ),
            },
            llm: LlmConfig {
                base_url: env_required("LLM_BASE_URL")?,
                api_key: env_required("LLM_API_KEY")?,
                model: env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
                timeout: Duration::from_secs(env_or(
                    "LLM_TIMEOUT_SECONDS",
                    DEFAULT_TIMEOUT_SECONDS,
                )),
                max_tokens: env_or("LLM_MAX_TOKENS", 256),
            },
            catalog: CatalogConfig {
                base_url: env_required("CATALOG_BASE_URL")?,
                api_key: env_required("CATALOG_API_KEY")?,
                timeout: Duration::from_secs(env_or(
                    "CATALOG_TIMEOUT_SECONDS",
                    DEFAULT_TIMEOUT_SECONDS,
                )),
            },
            resolver: ResolverConfig {
                max_ai_attempts: env_or("RESOLVER_MAX_AI_ATTEMPTS", DEFAULT_MAX_AI_ATTEMPTS),
                thresholds: env::var("RESOLVER_THRESHOLDS")
                    .ok()
                    .map(|s| {
                        s.split(',')
                            .filter_map(|t| t.trim().parse().ok())
                            .collect::<Vec<f64>>()
                    })
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| ResolverConfig::default().thresholds),
                suggestion_concurrency: env_or(
                    "RESOLVER_SUGGESTION_CONCURRENCY",
                    DEFAULT_SUGGESTION_CONCURRENCY,
                ),
                cache_ttl: Duration::from_secs(env_or(
                    "RESOLVER_CACHE_TTL_SECONDS",
                    DEFAULT_CACHE_TTL_SECONDS,
                )),
                cache_sweep_interval: Duration::from_secs(env_or(
                    "RESOLVER_CACHE_SWEEP_SECONDS",
                    DEFAULT_SWEEP_INTERVAL_SECONDS,
                )),
            },
        })
    }
}
