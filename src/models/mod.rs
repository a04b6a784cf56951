mod catalog;
mod search;

pub use catalog::{CatalogItem, EmbeddingRecord};
pub use search::{
    resolve_cache_key, HealthResponse, MatchMethod, RecommendationRequest,
    RecommendationResponse, RecommendationResult, SearchOptions,
};
