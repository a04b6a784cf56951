use crate::error::{ApiError, Result};
use crate::models::{EmbeddingRecord, RecommendationResult};
use std::cmp::Ordering;
use tracing::debug;

/// Cosine similarity of two equal-length vectors, clamped to [0, 1].
/// Zero-magnitude input yields 0 rather than a division by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(ApiError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    let magnitude = norm_a.sqrt() * norm_b.sqrt();
    if magnitude == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / magnitude).clamp(0.0, 1.0))
}

/// The one threshold/sort rule shared by the native-RPC and client-side
/// similarity paths: drop below the floor, sort score descending, break
/// ties by id ascending. Callers differ only in where the scores came
/// from, so neither path can drift from the other.
pub fn apply_threshold_and_sort(mut scored: Vec<(i64, f64)>, threshold: f64) -> Vec<(i64, f64)> {
    scored.retain(|(_, score)| *score >= threshold);
    scored.sort_by(|(a_id, a_score), (b_id, b_score)| {
        b_score
            .partial_cmp(a_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a_id.cmp(b_id))
    });
    scored
}

/// Client-side ranking of the full catalog embedding set against a query
/// vector. Rows whose stored vector has the wrong length are skipped; one
/// corrupt row must not sink the whole search.
pub fn rank_by_query(
    query_vector: &[f32],
    candidates: &[EmbeddingRecord],
    threshold: f64,
) -> Vec<(i64, f64)> {
    let mut scored = Vec::with_capacity(candidates.len());
    for record in candidates {
        match cosine_similarity(query_vector, &record.vector) {
            Ok(score) => scored.push((record.item_id, score)),
            Err(e) => {
                debug!("Skipping embedding row for item {}: {}", record.item_id, e);
            }
        }
    }
    apply_threshold_and_sort(scored, threshold)
}

/// Final ordering for a result set: score descending, id ascending.
pub fn compare_results(a: &RecommendationResult, b: &RecommendationResult) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.item_id.cmp(&b.item_id))
}
