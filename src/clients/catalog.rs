use crate::config::CatalogConfig;
use crate::error::{ApiError, Result};
use crate::models::{CatalogItem, EmbeddingRecord, SearchOptions};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// A pre-ranked row from the store's native vector-search operation.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoredItem {
    pub item_id: i64,
    pub title: String,
    pub score: f64,
}

/// Read-only access to the catalog and its precomputed embeddings.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Case-insensitive substring match on title. Unordered; at most
    /// `limit` rows after the deleted/exclusion filters.
    async fn search_by_keyword(
        &self,
        term: &str,
        opts: &SearchOptions,
        limit: usize,
    ) -> Result<Vec<CatalogItem>>;

    /// Bulk read of every embedding row for one model. Safe to call
    /// repeatedly; no side effects.
    async fn fetch_all_embeddings(&self, model: &str) -> Result<Vec<EmbeddingRecord>>;

    /// Point lookup; absence is `Ok(None)`, never an error.
    async fn get_by_id(&self, id: i64) -> Result<Option<CatalogItem>>;

    /// Deterministic default list, lowest ids first. The search of last
    /// resort.
    async fn popular_items(&self, limit: usize, opts: &SearchOptions) -> Result<Vec<CatalogItem>>;

    /// The store's native similarity operation: pre-filtered by the floor,
    /// pre-sorted descending. Soft-deleted rows never come back from this
    /// path. An `Err` here sends the caller down the client-side cosine
    /// path.
    async fn vector_search(
        &self,
        vector: &[f32],
        similarity_floor: f64,
        limit: usize,
    ) -> Result<Vec<ScoredItem>>;
}

/// Whether an item survives the caller's deleted/exclusion filters. The
/// deletion signal is already normalized by [`CatalogItem::is_deleted`].
pub(crate) fn passes_filters(item: &CatalogItem, opts: &SearchOptions) -> bool {
    if !opts.include_deleted && item.is_deleted() {
        return false;
    }
    !opts.exclude_ids.contains(&item.id)
}

/// Strip characters that would break a PostgREST filter expression.
pub(crate) fn sanitize_term(term: &str) -> String {
    term.chars()
        .filter(|c| !matches!(c, ',' | '*' | '(' | ')' | '\\'))
        .collect()
}

/// Query parameters for a title substring search. Percent-encoding happens
/// in the HTTP client, so characters like `&` or `#` stay inside the
/// filter value instead of splitting the query string.
pub(crate) fn keyword_query(term: &str, limit: usize) -> [(&'static str, String); 2] {
    [
        ("title", format!("ilike.*{}*", term)),
        ("limit", limit.to_string()),
    ]
}

#[derive(Clone)]
pub struct RestCatalogStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestCatalogStore {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ApiError::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let response = self
            .client
            .get(&url)
            .query(query)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ApiError::CatalogUnavailable(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| ApiError::SerializationError(e.to_string())),
            status => Err(ApiError::Upstream(format!(
                "catalog store returned {}",
                status
            ))),
        }
    }

    async fn post_rpc<B: Serialize, T: DeserializeOwned>(
        &self,
        name: &str,
        body: &B,
    ) -> Result<Vec<T>> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, name);
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| ApiError::SerializationError(e.to_string())),
            status => Err(ApiError::Upstream(format!(
                "catalog rpc {} returned {}",
                name, status
            ))),
        }
    }
}

#[async_trait]
impl CatalogStore for RestCatalogStore {
    async fn search_by_keyword(
        &self,
        term: &str,
        opts: &SearchOptions,
        limit: usize,
    ) -> Result<Vec<CatalogItem>> {
        let term = sanitize_term(term);
        if term.trim().is_empty() {
            return Ok(Vec::new());
        }

        // Over-fetch so the client-side deleted/exclusion filters still
        // leave `limit` rows; the deleted encoding is too inconsistent to
        // filter server-side.
        let query = keyword_query(term.trim(), limit * 2);
        debug!("Keyword search for '{}'", term.trim());

        let rows: Vec<CatalogItem> = self.get_rows("catalog_items", &query).await?;
        Ok(rows
            .into_iter()
            .filter(|item| passes_filters(item, opts))
            .take(limit)
            .collect())
    }

    async fn fetch_all_embeddings(&self, model: &str) -> Result<Vec<EmbeddingRecord>> {
        let query = [
            ("model_name", format!("eq.{}", model)),
            ("select", "item_id,model_name,vector".to_string()),
        ];
        self.get_rows("item_embeddings", &query).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<CatalogItem>> {
        let query = [("id", format!("eq.{}", id))];
        let mut rows: Vec<CatalogItem> = self.get_rows("catalog_items", &query).await?;
        Ok(rows.pop())
    }

    async fn popular_items(&self, limit: usize, opts: &SearchOptions) -> Result<Vec<CatalogItem>> {
        let query = [
            ("order", "id.asc".to_string()),
            ("limit", (limit * 2).to_string()),
        ];
        let rows: Vec<CatalogItem> = self.get_rows("catalog_items", &query).await?;
        Ok(rows
            .into_iter()
            .filter(|item| passes_filters(item, opts))
            .take(limit)
            .collect())
    }

    async fn vector_search(
        &self,
        vector: &[f32],
        similarity_floor: f64,
        limit: usize,
    ) -> Result<Vec<ScoredItem>> {
        let body = json!({
            "query_vector": vector,
            "similarity_floor": similarity_floor,
            "match_count": limit,
        });
        self.post_rpc("match_catalog_items", &body).await
    }
}
