//! The recommendation resolver: multi-tier search (vector, text,
//! popularity), iterative threshold relaxation, deduplication/ranking and
//! the result cache. All collaborators come in through constructor
//! injection; the resolver holds no state beyond the shared cache.

use crate::cache::TtlCache;
use crate::clients::{CatalogStore, Embedder};
use crate::config::ResolverConfig;
use crate::error::{ApiError, Result};
use crate::models::{
    resolve_cache_key, CatalogItem, EmbeddingRecord, MatchMethod, RecommendationResult,
    SearchOptions,
};
use crate::services::expander::QueryExpander;
use crate::services::similarity::{apply_threshold_and_sort, compare_results, rank_by_query};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Hard cap on the caller's limit; anything above is clamped (documented
/// on [`RecommendationResolver::resolve`]).
const MAX_LIMIT: usize = 200;
/// How many candidates to collect per search relative to the limit, so
/// dedup and filtering still leave enough rows.
const CANDIDATE_MULTIPLIER: usize = 3;
/// Keyword results stand in for a missing embedding at this fraction of
/// the current threshold, so they can never outrank a genuine vector match
/// from the same tier.
const TEXT_FALLBACK_DISCOUNT: f64 = 0.8;
/// Scores for the raw-query keyword tier: full-phrase matches over
/// single-word matches.
const RAW_PHRASE_SCORE: f64 = 0.45;
const RAW_WORD_SCORE: f64 = 0.40;
/// Neutral mid-range score for the unranked popularity list.
const POPULARITY_SCORE: f64 = 0.5;
/// Words shorter than this carry no search signal.
const MIN_WORD_LEN: usize = 3;
/// Ceiling of the suggestion-rank bonus. Far below one ladder step (0.1)
/// so the LLM's ordering can never cross similarity tiers.
const SUGGESTION_RANK_BONUS: f64 = 0.02;

/// Earlier suggestions in the LLM's output get a slightly larger bonus,
/// reflecting its ranking intent without overriding similarity.
fn suggestion_bonus(index: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    SUGGESTION_RANK_BONUS * (total - index) as f64 / total as f64
}

fn discounted_text_score(threshold: f64) -> f64 {
    (threshold * TEXT_FALLBACK_DISCOUNT).clamp(0.0, 1.0)
}

type EmbeddingSet = Arc<OnceCell<Vec<EmbeddingRecord>>>;

pub struct RecommendationResolver {
    embedder: Arc<dyn Embedder>,
    catalog: Arc<dyn CatalogStore>,
    expander: QueryExpander,
    cache: TtlCache<Vec<RecommendationResult>>,
    config: ResolverConfig,
}

impl RecommendationResolver {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        catalog: Arc<dyn CatalogStore>,
        expander: QueryExpander,
        config: ResolverConfig,
    ) -> Self {
        let cache = TtlCache::new(config.cache_ttl);
        Self {
            embedder,
            catalog,
            expander,
            cache,
            config,
        }
    }

    /// The result cache, exposed so the surrounding CRUD layer can apply
    /// mutation invalidation and the composition root can start the
    /// background sweeper.
    pub fn cache(&self) -> &TtlCache<Vec<RecommendationResult>> {
        &self.cache
    }

    /// Resolve a free-text request into ranked catalog records.
    ///
    /// `limit` must be at least 1 and is clamped to 200. An empty or
    /// whitespace-only query is valid input and degrades straight to the
    /// popularity list. Dropping the returned future cancels in-flight
    /// upstream calls.
    pub async fn resolve(
        &self,
        query: &str,
        limit: usize,
        opts: &SearchOptions,
    ) -> Result<Vec<RecommendationResult>> {
        if limit == 0 {
            return Err(ApiError::InvalidInput("limit must be at least 1".into()));
        }
        let limit = limit.min(MAX_LIMIT);

        let cache_key = resolve_cache_key(query, limit, opts);
        if let Some(hit) = self.cache.get(&cache_key) {
            info!("Cache HIT for '{}'", query.trim());
            return Ok(hit);
        }
        info!("Cache MISS for '{}'", query.trim());

        let trimmed = query.trim();
        let embedding_set: EmbeddingSet = Arc::new(OnceCell::new());
        let mut results = Vec::new();

        if !trimmed.is_empty() {
            'attempts: for attempt in 0..self.config.max_ai_attempts {
                let suggestions = self.expander.expand(trimmed, attempt).await;
                for &threshold in &self.config.thresholds {
                    let tier = self
                        .search_tier(&suggestions, threshold, limit, opts, &embedding_set)
                        .await;
                    if !tier.is_empty() {
                        info!(
                            "Found {} results at threshold {:.1} (attempt {})",
                            tier.len(),
                            threshold,
                            attempt + 1
                        );
                        results = tier;
                        // First non-empty tier wins; lower thresholds and
                        // further attempts would only dilute it.
                        break 'attempts;
                    }
                }
                debug!(
                    "No results in any tier on attempt {}/{}",
                    attempt + 1,
                    self.config.max_ai_attempts
                );
            }

            if results.is_empty() {
                results = self.raw_text_results(trimmed, limit, opts).await;
            }
        }

        if results.is_empty() {
            results = self.popularity_results(limit, opts).await?;
        }

        results.truncate(limit);
        self.cache.set(cache_key, results.clone());
        Ok(results)
    }

    /// One rung of the threshold ladder: every suggestion searched
    /// concurrently (bounded), merged, deduplicated by item id keeping the
    /// best score, sorted (score desc, id asc).
    async fn search_tier(
        &self,
        suggestions: &[String],
        threshold: f64,
        limit: usize,
        opts: &SearchOptions,
        embedding_set: &EmbeddingSet,
    ) -> Vec<RecommendationResult> {
        let total = suggestions.len();
        let batches: Vec<Vec<RecommendationResult>> = stream::iter(
            suggestions.iter().enumerate().map(|(index, suggestion)| {
                self.process_suggestion(index, total, suggestion, threshold, limit, opts, embedding_set)
            }),
        )
        .buffer_unordered(self.config.suggestion_concurrency.max(1))
        .collect()
        .await;

        let mut best: HashMap<i64, RecommendationResult> = HashMap::new();
        for result in batches.into_iter().flatten() {
            match best.get(&result.item_id) {
                Some(existing) if existing.score >= result.score => {}
                _ => {
                    best.insert(result.item_id, result);
                }
            }
        }

        let mut merged: Vec<RecommendationResult> = best.into_values().collect();
        merged.sort_by(compare_results);
        merged
    }

    /// Vector search for one suggestion, degrading to keyword search when
    /// its embedding cannot be obtained. All failures are absorbed here;
    /// a suggestion that finds nothing contributes nothing.
    async fn process_suggestion(
        &self,
        index: usize,
        total: usize,
        suggestion: &str,
        threshold: f64,
        limit: usize,
        opts: &SearchOptions,
        embedding_set: &EmbeddingSet,
    ) -> Vec<RecommendationResult> {
        let bonus = suggestion_bonus(index, total);

        if !opts.disable_vector {
            match self.embedder.embed(suggestion).await {
                Ok(vector) => {
                    match self
                        .vector_results(&vector, threshold, limit, opts, embedding_set)
                        .await
                    {
                        Ok(results) => return apply_bonus(results, bonus),
                        Err(e) => {
                            warn!(
                                "Vector search failed for '{}', degrading to text: {}",
                                suggestion, e
                            );
                        }
                    }
                }
                Err(e) => {
                    debug!(
                        "No embedding for suggestion '{}', degrading to text: {}",
                        suggestion, e
                    );
                }
            }
        }

        let results = self
            .text_fallback_results(suggestion, threshold, limit, opts)
            .await;
        apply_bonus(results, bonus)
    }

    /// Native vector search, falling back to client-side cosine ranking
    /// when the native operation errors. Both paths run through the same
    /// threshold/sort rule, so callers only see the difference in
    /// `match_method`.
    async fn vector_results(
        &self,
        vector: &[f32],
        threshold: f64,
        limit: usize,
        opts: &SearchOptions,
        embedding_set: &EmbeddingSet,
    ) -> Result<Vec<RecommendationResult>> {
        let candidate_cap = limit.saturating_mul(CANDIDATE_MULTIPLIER);

        // The native operation cannot return soft-deleted rows, so callers
        // asking for those are ranked client-side from the start.
        if !opts.include_deleted {
            match self.catalog.vector_search(vector, threshold, candidate_cap).await {
                Ok(rows) => {
                    let titles: HashMap<i64, String> = rows
                        .iter()
                        .map(|row| (row.item_id, row.title.clone()))
                        .collect();
                    let scored = rows.iter().map(|row| (row.item_id, row.score)).collect();
                    let ranked = apply_threshold_and_sort(scored, threshold);

                    return Ok(ranked
                        .into_iter()
                        .filter(|(id, _)| !opts.exclude_ids.contains(id))
                        .filter_map(|(id, score)| {
                            titles.get(&id).map(|title| RecommendationResult {
                                item_id: id,
                                title: title.clone(),
                                score: score.clamp(0.0, 1.0),
                                match_method: MatchMethod::Vector,
                                threshold_used: Some(threshold),
                            })
                        })
                        .collect());
                }
                Err(e) => {
                    warn!(
                        "Native vector search unavailable, ranking client-side: {}",
                        e
                    );
                }
            }
        }

        let records = embedding_set
            .get_or_try_init(|| {
                self.catalog.fetch_all_embeddings(self.embedder.model_name())
            })
            .await?;

        let ranked = rank_by_query(vector, records, threshold);
        let mut results = Vec::new();
        for (id, score) in ranked.into_iter().take(candidate_cap) {
            if opts.exclude_ids.contains(&id) {
                continue;
            }
            // Point lookup resolves the title and the normalized deletion
            // flag the embedding row does not carry.
            if let Ok(Some(item)) = self.catalog.get_by_id(id).await {
                if !opts.include_deleted && item.is_deleted() {
                    continue;
                }
                results.push(RecommendationResult {
                    item_id: id,
                    title: item.title,
                    score: score.clamp(0.0, 1.0),
                    match_method: MatchMethod::VectorFallbackClient,
                    threshold_used: Some(threshold),
                });
            }
        }
        Ok(results)
    }

    /// Keyword search for a suggestion whose embedding failed: the full
    /// phrase first, then each significant word. Scores are discounted
    /// below the current threshold.
    async fn text_fallback_results(
        &self,
        suggestion: &str,
        threshold: f64,
        limit: usize,
        opts: &SearchOptions,
    ) -> Vec<RecommendationResult> {
        let score = discounted_text_score(threshold);
        let items = self.keyword_scan(suggestion, limit, opts).await;
        items
            .into_iter()
            .map(|item| RecommendationResult {
                item_id: item.id,
                title: item.title,
                score,
                match_method: MatchMethod::TextFallback,
                threshold_used: Some(threshold),
            })
            .collect()
    }

    /// Last tier before popularity: keyword search on the raw query once
    /// query expansion has been exhausted.
    async fn raw_text_results(
        &self,
        query: &str,
        limit: usize,
        opts: &SearchOptions,
    ) -> Vec<RecommendationResult> {
        let mut results = Vec::new();
        let mut seen = HashSet::new();

        if let Ok(items) = self.catalog.search_by_keyword(query, opts, limit).await {
            for item in items {
                if seen.insert(item.id) {
                    results.push(RecommendationResult {
                        item_id: item.id,
                        title: item.title,
                        score: RAW_PHRASE_SCORE,
                        match_method: MatchMethod::Text,
                        threshold_used: None,
                    });
                }
            }
        }

        for word in significant_words(query) {
            if results.len() >= limit * 2 {
                break;
            }
            if let Ok(items) = self.catalog.search_by_keyword(word, opts, limit).await {
                for item in items {
                    if seen.insert(item.id) {
                        results.push(RecommendationResult {
                            item_id: item.id,
                            title: item.title,
                            score: RAW_WORD_SCORE,
                            match_method: MatchMethod::Text,
                            threshold_used: None,
                        });
                    }
                }
            }
        }

        results.sort_by(compare_results);
        results
    }

    async fn popularity_results(
        &self,
        limit: usize,
        opts: &SearchOptions,
    ) -> Result<Vec<RecommendationResult>> {
        let items = self
            .catalog
            .popular_items(limit, opts)
            .await
            .map_err(|e| ApiError::CatalogUnavailable(e.to_string()))?;

        info!("Serving {} popularity fallback results", items.len());
        Ok(items
            .into_iter()
            .map(|item| RecommendationResult {
                item_id: item.id,
                title: item.title,
                score: POPULARITY_SCORE,
                match_method: MatchMethod::Popularity,
                threshold_used: None,
            })
            .collect())
    }

    /// Phrase-then-words keyword scan shared by the text fallback path.
    async fn keyword_scan(
        &self,
        phrase: &str,
        limit: usize,
        opts: &SearchOptions,
    ) -> Vec<CatalogItem> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();

        let mut terms: Vec<&str> = vec![phrase];
        terms.extend(significant_words(phrase));

        for term in terms {
            if out.len() >= limit * 2 {
                break;
            }
            match self.catalog.search_by_keyword(term, opts, limit).await {
                Ok(items) => {
                    for item in items {
                        if seen.insert(item.id) {
                            out.push(item);
                        }
                    }
                }
                Err(e) => {
                    debug!("Keyword search failed for term '{}': {}", term, e);
                }
            }
        }
        out
    }
}

fn significant_words(phrase: &str) -> Vec<&str> {
    phrase
        .split_whitespace()
        .filter(|word| word.chars().count() >= MIN_WORD_LEN)
        .collect()
}

fn apply_bonus(results: Vec<RecommendationResult>, bonus: f64) -> Vec<RecommendationResult> {
    results
        .into_iter()
        .map(|mut result| {
            result.score = (result.score + bonus).clamp(0.0, 1.0);
            result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ChatClient, ChatMessage, ScoredItem};
    use crate::services::similarity::cosine_similarity;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ---- scripted collaborators -------------------------------------

    struct ScriptedChat {
        lines: Option<String>,
        calls: AtomicUsize,
    }

    impl ScriptedChat {
        fn replying(lines: &str) -> Self {
            Self {
                lines: Some(lines.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                lines: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn complete(&self, _messages: &[ChatMessage], _temperature: f32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.lines {
                Some(lines) => Ok(lines.clone()),
                None => Err(ApiError::Upstream("scripted LLM outage".into())),
            }
        }
    }

    struct ScriptedEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
    }

    impl ScriptedEmbedder {
        fn new(vectors: Vec<(&str, Vec<f32>)>) -> Self {
            Self {
                vectors: vectors
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }

        fn always_failing() -> Self {
            Self::new(Vec::new())
        }
    }

    #[async_trait]
    impl Embedder for ScriptedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.vectors
                .get(text)
                .cloned()
                .ok_or_else(|| ApiError::EmbeddingUnavailable("scripted outage".into()))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn model_name(&self) -> &str {
            "test-model"
        }
    }

    struct InMemoryCatalog {
        items: Vec<CatalogItem>,
        embeddings: Vec<EmbeddingRecord>,
        native_vector_down: bool,
        popularity_down: bool,
        calls: AtomicUsize,
    }

    impl InMemoryCatalog {
        fn standard() -> Self {
            Self {
                items: vec![
                    item(1, "Harry Potter and the Philosopher's Stone", None),
                    item(2, "The Hobbit", None),
                    item(3, "1984", None),
                ],
                embeddings: vec![
                    embedding(1, vec![1.0, 0.0]),
                    embedding(2, vec![0.0, 1.0]),
                    embedding(3, vec![0.6, 0.8]),
                ],
                native_vector_down: false,
                popularity_down: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn outbound_calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn item(id: i64, title: &str, deleted_at: Option<&str>) -> CatalogItem {
        CatalogItem {
            id,
            title: title.to_string(),
            parent_id: None,
            is_variant_spelling: false,
            deleted_at: deleted_at.map(str::to_string),
        }
    }

    fn embedding(item_id: i64, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            item_id,
            model_name: "test-model".to_string(),
            vector,
        }
    }

    #[async_trait]
    impl CatalogStore for InMemoryCatalog {
        async fn search_by_keyword(
            &self,
            term: &str,
            opts: &SearchOptions,
            limit: usize,
        ) -> Result<Vec<CatalogItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let needle = term.to_lowercase();
            Ok(self
                .items
                .iter()
                .filter(|i| i.title.to_lowercase().contains(&needle))
                .filter(|i| opts.include_deleted || !i.is_deleted())
                .filter(|i| !opts.exclude_ids.contains(&i.id))
                .take(limit)
                .cloned()
                .collect())
        }

        async fn fetch_all_embeddings(&self, model: &str) -> Result<Vec<EmbeddingRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .embeddings
                .iter()
                .filter(|e| e.model_name == model)
                .cloned()
                .collect())
        }

        async fn get_by_id(&self, id: i64) -> Result<Option<CatalogItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.items.iter().find(|i| i.id == id).cloned())
        }

        async fn popular_items(
            &self,
            limit: usize,
            opts: &SearchOptions,
        ) -> Result<Vec<CatalogItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.popularity_down {
                return Err(ApiError::CatalogUnavailable("scripted outage".into()));
            }
            let mut items: Vec<CatalogItem> = self
                .items
                .iter()
                .filter(|i| opts.include_deleted || !i.is_deleted())
                .filter(|i| !opts.exclude_ids.contains(&i.id))
                .cloned()
                .collect();
            items.sort_by_key(|i| i.id);
            items.truncate(limit);
            Ok(items)
        }

        async fn vector_search(
            &self,
            vector: &[f32],
            similarity_floor: f64,
            limit: usize,
        ) -> Result<Vec<ScoredItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.native_vector_down {
                return Err(ApiError::Upstream("scripted vector outage".into()));
            }
            let mut rows = Vec::new();
            for record in &self.embeddings {
                let score = cosine_similarity(vector, &record.vector)?;
                if score < similarity_floor {
                    continue;
                }
                let Some(item) = self.items.iter().find(|i| i.id == record.item_id) else {
                    continue;
                };
                if item.is_deleted() {
                    continue;
                }
                rows.push(ScoredItem {
                    item_id: item.id,
                    title: item.title.clone(),
                    score,
                });
            }
            rows.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            rows.truncate(limit);
            Ok(rows)
        }
    }

    fn resolver(
        chat: ScriptedChat,
        embedder: ScriptedEmbedder,
        catalog: InMemoryCatalog,
    ) -> (RecommendationResolver, Arc<InMemoryCatalog>, Arc<ScriptedEmbedder>, Arc<ScriptedChat>)
    {
        let chat = Arc::new(chat);
        let embedder = Arc::new(embedder);
        let catalog = Arc::new(catalog);
        let resolver = RecommendationResolver::new(
            embedder.clone(),
            catalog.clone(),
            QueryExpander::new(chat.clone()),
            ResolverConfig::default(),
        );
        (resolver, catalog, embedder, chat)
    }

    // ---- end-to-end resolution scenarios ----------------------------

    #[tokio::test]
    async fn vector_match_ranks_first_at_high_threshold() {
        let chat = ScriptedChat::replying("Harry Potter and the Philosopher's Stone");
        let embedder =
            ScriptedEmbedder::new(vec![("Harry Potter and the Philosopher's Stone", vec![1.0, 0.0])]);
        let (resolver, ..) = resolver(chat, embedder, InMemoryCatalog::standard());

        let results = resolver
            .resolve("magic school story", 5, &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(results[0].item_id, 1);
        assert_eq!(results[0].match_method, MatchMethod::Vector);
        assert_eq!(results[0].threshold_used, Some(0.9));
    }

    #[tokio::test]
    async fn client_side_path_matches_native_ordering() {
        let chat = ScriptedChat::replying("Harry Potter and the Philosopher's Stone");
        let embedder =
            ScriptedEmbedder::new(vec![("Harry Potter and the Philosopher's Stone", vec![1.0, 0.0])]);
        let native = resolver(chat, embedder, InMemoryCatalog::standard());
        let native_results = native
            .0
            .resolve("magic school story", 5, &SearchOptions::default())
            .await
            .unwrap();

        let chat = ScriptedChat::replying("Harry Potter and the Philosopher's Stone");
        let embedder =
            ScriptedEmbedder::new(vec![("Harry Potter and the Philosopher's Stone", vec![1.0, 0.0])]);
        let mut catalog = InMemoryCatalog::standard();
        catalog.native_vector_down = true;
        let degraded = resolver(chat, embedder, catalog);
        let client_results = degraded
            .0
            .resolve("magic school story", 5, &SearchOptions::default())
            .await
            .unwrap();

        // Same ids, same order, same threshold semantics; only the method
        // differs.
        assert_eq!(
            native_results.iter().map(|r| r.item_id).collect::<Vec<_>>(),
            client_results.iter().map(|r| r.item_id).collect::<Vec<_>>()
        );
        assert_eq!(
            client_results[0].match_method,
            MatchMethod::VectorFallbackClient
        );
    }

    #[tokio::test]
    async fn ties_break_by_id_ascending() {
        let chat = ScriptedChat::replying("wizards");
        let embedder = ScriptedEmbedder::new(vec![("wizards", vec![1.0, 0.0])]);
        let mut catalog = InMemoryCatalog::standard();
        // Two items with identical similarity to the query.
        catalog.embeddings = vec![
            embedding(2, vec![1.0, 0.0]),
            embedding(1, vec![1.0, 0.0]),
        ];
        let (resolver, ..) = resolver(chat, embedder, catalog);

        let first = resolver
            .resolve("wizards", 5, &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(first.iter().map(|r| r.item_id).collect::<Vec<_>>(), vec![1, 2]);

        // Byte-identical on repetition (served from cache, but the order
        // was already a pure function of score desc / id asc).
        let second = resolver
            .resolve("wizards", 5, &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn fallback_scores_never_exceed_vector_scores() {
        // One suggestion embeds fine, the other has no embedding and
        // degrades to keyword search within the same call.
        let chat = ScriptedChat::replying("wizard school\n1984");
        let embedder = ScriptedEmbedder::new(vec![("wizard school", vec![1.0, 0.0])]);
        let (resolver, ..) = resolver(chat, embedder, InMemoryCatalog::standard());

        let results = resolver
            .resolve("dystopia and magic", 10, &SearchOptions::default())
            .await
            .unwrap();

        let min_vector = results
            .iter()
            .filter(|r| r.match_method == MatchMethod::Vector)
            .map(|r| r.score)
            .fold(f64::INFINITY, f64::min);
        let max_fallback = results
            .iter()
            .filter(|r| r.match_method == MatchMethod::TextFallback)
            .map(|r| r.score)
            .fold(f64::NEG_INFINITY, f64::max);

        assert!(min_vector.is_finite(), "expected a vector result");
        assert!(max_fallback.is_finite(), "expected a text fallback result");
        assert!(max_fallback < min_vector);
    }

    #[tokio::test]
    async fn cache_hit_makes_zero_outbound_calls() {
        let chat = ScriptedChat::replying("Harry Potter and the Philosopher's Stone");
        let embedder =
            ScriptedEmbedder::new(vec![("Harry Potter and the Philosopher's Stone", vec![1.0, 0.0])]);
        let (resolver, catalog, embedder, chat) =
            resolver(chat, embedder, InMemoryCatalog::standard());

        let first = resolver
            .resolve("magic school story", 5, &SearchOptions::default())
            .await
            .unwrap();
        let catalog_calls = catalog.outbound_calls();
        let embed_calls = embedder.calls.load(Ordering::SeqCst);
        let chat_calls = chat.calls.load(Ordering::SeqCst);

        let second = resolver
            .resolve("magic school story", 5, &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(catalog.outbound_calls(), catalog_calls);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), embed_calls);
        assert_eq!(chat.calls.load(Ordering::SeqCst), chat_calls);
    }

    #[tokio::test]
    async fn degrades_to_text_when_embeddings_are_down() {
        let chat = ScriptedChat::replying("Hobbit");
        let (resolver, ..) = resolver(
            chat,
            ScriptedEmbedder::always_failing(),
            InMemoryCatalog::standard(),
        );

        let results = resolver
            .resolve("fantasy adventure", 5, &SearchOptions::default())
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert!(results
            .iter()
            .all(|r| r.match_method == MatchMethod::TextFallback));
        assert_eq!(results[0].item_id, 2);
    }

    #[tokio::test]
    async fn empty_query_returns_popularity_in_id_order() {
        let chat = ScriptedChat::failing();
        let (resolver, _, _, chat) = resolver(
            chat,
            ScriptedEmbedder::always_failing(),
            InMemoryCatalog::standard(),
        );

        let results = resolver
            .resolve("   ", 2, &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(results.iter().map(|r| r.item_id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(results
            .iter()
            .all(|r| r.match_method == MatchMethod::Popularity
                && r.score == POPULARITY_SCORE));
        // Empty input never reaches the expander.
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gibberish_exhausts_attempts_then_serves_popularity() {
        // Expander replies with a suggestion matching nothing; embeddings
        // down; raw query matches nothing either.
        let chat = ScriptedChat::replying("xyzzy");
        let (resolver, _, _, chat) = resolver(
            chat,
            ScriptedEmbedder::always_failing(),
            InMemoryCatalog::standard(),
        );

        let results = resolver
            .resolve("qqqq", 5, &SearchOptions::default())
            .await
            .unwrap();

        assert!(results
            .iter()
            .all(|r| r.match_method == MatchMethod::Popularity));
        // One expansion per AI attempt before giving up.
        assert_eq!(chat.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn raw_query_text_tier_runs_before_popularity() {
        // Suggestions are useless but the raw query itself keyword-matches
        // a title.
        let chat = ScriptedChat::replying("xyzzy");
        let (resolver, ..) = resolver(
            chat,
            ScriptedEmbedder::always_failing(),
            InMemoryCatalog::standard(),
        );

        let results = resolver
            .resolve("Hobbit", 5, &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(results[0].item_id, 2);
        assert_eq!(results[0].match_method, MatchMethod::Text);
    }

    #[tokio::test]
    async fn disabling_vector_search_uses_text_fallback() {
        let chat = ScriptedChat::replying("Harry Potter and the Philosopher's Stone");
        let embedder =
            ScriptedEmbedder::new(vec![("Harry Potter and the Philosopher's Stone", vec![1.0, 0.0])]);
        let (resolver, _, embedder, _) = resolver(chat, embedder, InMemoryCatalog::standard());

        let opts = SearchOptions {
            disable_vector: true,
            ..Default::default()
        };
        let results = resolver.resolve("magic school story", 5, &opts).await.unwrap();

        assert_eq!(results[0].item_id, 1);
        assert_eq!(results[0].match_method, MatchMethod::TextFallback);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_matches_collapse_to_highest_score() {
        // Two suggestions both resolving to item 1.
        let chat = ScriptedChat::replying("wizard school\nboy wizard");
        let embedder = ScriptedEmbedder::new(vec![
            ("wizard school", vec![1.0, 0.0]),
            ("boy wizard", vec![0.97, 0.05]),
        ]);
        let (resolver, ..) = resolver(chat, embedder, InMemoryCatalog::standard());

        let results = resolver
            .resolve("magic school story", 5, &SearchOptions::default())
            .await
            .unwrap();

        let ids: Vec<i64> = results.iter().map(|r| r.item_id).collect();
        let mut deduped = ids.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(ids.len(), deduped.len());
    }

    #[tokio::test]
    async fn deleted_items_are_excluded_by_default() {
        let chat = ScriptedChat::replying("xyzzy");
        let mut catalog = InMemoryCatalog::standard();
        catalog.items[1] = item(2, "The Hobbit", Some("2024-05-01T12:00:00Z"));
        let (resolver, ..) = resolver(chat, ScriptedEmbedder::always_failing(), catalog);

        let results = resolver
            .resolve("Hobbit", 5, &SearchOptions::default())
            .await
            .unwrap();
        // The only keyword match is soft-deleted, so the resolver fell
        // through to popularity, which filters it too.
        assert!(results.iter().all(|r| r.item_id != 2));
    }

    #[tokio::test]
    async fn include_deleted_ranks_client_side() {
        // The native RPC filters soft-deleted rows unconditionally, so an
        // include_deleted call must take the client-side path to see them.
        let chat = ScriptedChat::replying("Hobbit");
        let embedder = ScriptedEmbedder::new(vec![("Hobbit", vec![0.0, 1.0])]);
        let mut catalog = InMemoryCatalog::standard();
        catalog.items[1] = item(2, "The Hobbit", Some("2024-05-01T12:00:00Z"));
        let (resolver, ..) = resolver(chat, embedder, catalog);

        let opts = SearchOptions {
            include_deleted: true,
            ..Default::default()
        };
        let results = resolver.resolve("hobbit adventures", 5, &opts).await.unwrap();

        assert_eq!(results[0].item_id, 2);
        assert_eq!(results[0].match_method, MatchMethod::VectorFallbackClient);
        assert_eq!(results[0].threshold_used, Some(0.9));
    }

    #[tokio::test]
    async fn excluded_ids_never_come_back() {
        let chat = ScriptedChat::replying("Harry Potter and the Philosopher's Stone");
        let embedder =
            ScriptedEmbedder::new(vec![("Harry Potter and the Philosopher's Stone", vec![1.0, 0.0])]);
        let (resolver, ..) = resolver(chat, embedder, InMemoryCatalog::standard());

        let opts = SearchOptions {
            exclude_ids: vec![1],
            ..Default::default()
        };
        let results = resolver.resolve("magic school story", 5, &opts).await.unwrap();
        assert!(results.iter().all(|r| r.item_id != 1));
    }

    #[tokio::test]
    async fn zero_limit_is_invalid_input() {
        let chat = ScriptedChat::failing();
        let (resolver, ..) = resolver(
            chat,
            ScriptedEmbedder::always_failing(),
            InMemoryCatalog::standard(),
        );
        let err = resolver
            .resolve("anything", 0, &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn total_catalog_outage_is_the_only_hard_failure() {
        let chat = ScriptedChat::failing();
        let mut catalog = InMemoryCatalog::standard();
        catalog.items.clear();
        catalog.popularity_down = true;
        let (resolver, ..) = resolver(chat, ScriptedEmbedder::always_failing(), catalog);

        let err = resolver
            .resolve("anything at all", 5, &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::CatalogUnavailable(_)));
    }

    // ---- scoring helpers --------------------------------------------

    #[test]
    fn suggestion_bonus_decreases_with_rank_and_stays_small() {
        let first = suggestion_bonus(0, 8);
        let last = suggestion_bonus(7, 8);
        assert!(first > last);
        assert!(first <= SUGGESTION_RANK_BONUS);
        assert!(last > 0.0);
        assert_eq!(suggestion_bonus(0, 0), 0.0);
    }

    #[test]
    fn text_discount_stays_below_threshold() {
        for threshold in [0.9, 0.8, 0.7, 0.6, 0.5] {
            let discounted = discounted_text_score(threshold);
            assert!(discounted + SUGGESTION_RANK_BONUS < threshold);
        }
    }

    #[test]
    fn bonus_is_clamped_into_unit_range() {
        let results = apply_bonus(
            vec![RecommendationResult {
                item_id: 1,
                title: "x".into(),
                score: 0.999,
                match_method: MatchMethod::Vector,
                threshold_used: Some(0.9),
            }],
            0.02,
        );
        assert_eq!(results[0].score, 1.0);
    }

    #[test]
    fn significant_words_drop_short_tokens() {
        assert_eq!(
            significant_words("the cat sat on a mat"),
            vec!["the", "cat", "sat", "mat"]
        );
        assert!(significant_words("a b").is_empty());
    }
}
