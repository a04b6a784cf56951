use serde::{Deserialize, Serialize};

/// How a result was found. Recorded for observability and for the tests
/// that pin down degradation behavior; the score scaling per method keeps
/// scores comparable across methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Native vector search against the catalog store.
    Vector,
    /// Client-side cosine ranking, used when the native operation errors.
    VectorFallbackClient,
    /// Keyword search on the raw query, after query expansion got nowhere.
    Text,
    /// Keyword search on an expanded suggestion whose embedding failed.
    TextFallback,
    /// Unranked default list, the last resort.
    Popularity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub item_id: i64,
    pub title: String,
    /// In [0, 1]; comparable across match methods.
    pub score: f64,
    pub match_method: MatchMethod,
    /// Similarity floor in force when a vector-path result was accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_used: Option<f64>,
}

impl PartialEq for RecommendationResult {
    fn eq(&self, other: &Self) -> bool {
        self.item_id == other.item_id
            && self.title == other.title
            && self.score == other.score
            && self.match_method == other.match_method
            && self.threshold_used == other.threshold_used
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Include soft-deleted catalog rows. Off by default.
    #[serde(default)]
    pub include_deleted: bool,
    /// Item ids the caller never wants back (already on the shelf, etc.).
    #[serde(default)]
    pub exclude_ids: Vec<i64>,
    /// Skip the embedding path entirely; text and popularity tiers only.
    #[serde(default)]
    pub disable_vector: bool,
}

/// Deterministic cache key for a resolve call. Plain string assembly keeps
/// it stable across processes, which a hasher would not guarantee.
pub fn resolve_cache_key(query: &str, limit: usize, opts: &SearchOptions) -> String {
    let normalized = query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let mut excluded = opts.exclude_ids.clone();
    excluded.sort_unstable();
    excluded.dedup();
    let excluded = excluded
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "rec:{}:{}:d{}v{}:[{}]",
        normalized, limit, opts.include_deleted as u8, opts.disable_vector as u8, excluded
    )
}

/// Request body for `POST /api/recommendations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    /// Free-text request: a title fragment, genre, author or mood,
    /// Czech or English.
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub options: SearchOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub results: Vec<RecommendationResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

fn default_limit() -> usize {
    10
}
