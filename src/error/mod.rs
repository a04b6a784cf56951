use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Transient upstream failure (timeout or 5xx from the embedding, LLM
    /// or catalog endpoints). Retried by the clients, then degraded by the
    /// resolver; only reaches a caller if every fallback tier is gone.
    #[error("Upstream service error: {0}")]
    Upstream(String),

    /// The embedding endpoint exhausted its retries. Recoverable: the
    /// resolver answers from the text-search tier instead.
    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// An embedding came back with the wrong vector length. Fatal for that
    /// single embedding call, never for the whole request.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The catalog store is unreachable on every path, popularity included.
    #[error("Catalog store unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let error = ErrorResponse {
            error: self.to_string(),
        };

        match self {
            ApiError::InvalidInput(_) => HttpResponse::BadRequest().json(error),
            ApiError::NotFound(_) => HttpResponse::NotFound().json(error),
            ApiError::Upstream(_)
            | ApiError::EmbeddingUnavailable(_)
            | ApiError::CatalogUnavailable(_) => HttpResponse::BadGateway().json(error),
            _ => HttpResponse::InternalServerError().json(error),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}
