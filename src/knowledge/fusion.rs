//! Reciprocal Rank Fusion over the keyword and vector indices.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use super::{IndexHit, KeywordIndex, RetrievalCandidate, VectorIndex};
use crate::config::{millis, RetrievalConfig};

/// Fusion knobs, usually taken from [`RetrievalConfig`].
#[derive(Debug, Clone)]
pub struct FusionSettings {
    /// RRF damping constant `c`.
    pub rrf_k: usize,
    /// Hits requested from each source.
    pub candidate_limit: usize,
    pub keyword_timeout: Duration,
    pub vector_timeout: Duration,
}

impl From<&RetrievalConfig> for FusionSettings {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            rrf_k: config.rrf_k,
            candidate_limit: config.candidate_limit,
            keyword_timeout: millis(config.keyword_timeout_ms),
            vector_timeout: millis(config.vector_timeout_ms),
        }
    }
}

pub struct FusionEngine {
    keyword: Arc<dyn KeywordIndex>,
    vector: Arc<dyn VectorIndex>,
    settings: FusionSettings,
}

impl FusionEngine {
    pub fn new(
        keyword: Arc<dyn KeywordIndex>,
        vector: Arc<dyn VectorIndex>,
        settings: FusionSettings,
    ) -> Self {
        Self {
            keyword,
            vector,
            settings,
        }
    }

    /// Query both indices concurrently and fuse. At most `k` candidates,
    /// best-first by `fused_score`.
    ///
    /// A source that errors or times out contributes nothing; if both fail
    /// the result is empty rather than an error.
    pub async fn retrieve(&self, query: &str, k: usize) -> Vec<RetrievalCandidate> {
        let limit = self.settings.candidate_limit;
        let (keyword, vector) = tokio::join!(
            bounded("keyword", self.settings.keyword_timeout, self.keyword.search(query, limit)),
            bounded("vector", self.settings.vector_timeout, self.vector.search(query, limit)),
        );

        let mut fused = rrf_fuse(&keyword, &vector, self.settings.rrf_k);
        fused.truncate(k);
        tracing::debug!(
            keyword_hits = keyword.len(),
            vector_hits = vector.len(),
            fused = fused.len(),
            "hybrid retrieval complete"
        );
        fused
    }
}

/// Await one source lookup under its own timeout, degrading to no hits.
async fn bounded<F>(source: &'static str, timeout: Duration, lookup: F) -> Vec<IndexHit>
where
    F: std::future::Future<Output = Result<Vec<IndexHit>>>,
{
    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(hits)) => hits,
        Ok(Err(e)) => {
            tracing::warn!(source, error = %e, "retrieval degraded: source failed");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!(source, ?timeout, "retrieval degraded: source timed out");
            Vec::new()
        }
    }
}

/// Reciprocal Rank Fusion.
///
/// Each list contributes `1 / (rank + c)` with 1-based ranks; chunks present
/// in both lists accumulate both terms. Ties are broken by keyword score
/// (absent sorts last), then by chunk id, so the order is fully determined by
/// the inputs.
pub fn rrf_fuse(keyword: &[IndexHit], vector: &[IndexHit], c: usize) -> Vec<RetrievalCandidate> {
    let c = c as f64;
    let mut merged: HashMap<&str, RetrievalCandidate> = HashMap::new();

    for (rank, hit) in keyword.iter().enumerate() {
        let entry = merged
            .entry(hit.chunk_id.as_str())
            .or_insert_with(|| empty_candidate(hit));
        // A chunk listed twice by one source only counts at its best rank.
        if entry.keyword_score.is_none() {
            entry.keyword_score = Some(hit.score);
            entry.fused_score += 1.0 / (rank as f64 + 1.0 + c);
        }
    }

    for (rank, hit) in vector.iter().enumerate() {
        let entry = merged
            .entry(hit.chunk_id.as_str())
            .or_insert_with(|| empty_candidate(hit));
        if entry.vector_score.is_none() {
            entry.vector_score = Some(hit.score);
            entry.fused_score += 1.0 / (rank as f64 + 1.0 + c);
        }
    }

    let mut fused: Vec<RetrievalCandidate> = merged.into_values().collect();
    fused.sort_by(fusion_order);
    fused
}

fn empty_candidate(hit: &IndexHit) -> RetrievalCandidate {
    RetrievalCandidate {
        chunk_id: hit.chunk_id.clone(),
        text: hit.text.clone(),
        source: hit.source.clone(),
        keyword_score: None,
        vector_score: None,
        fused_score: 0.0,
        rerank_score: None,
    }
}

fn fusion_order(a: &RetrievalCandidate, b: &RetrievalCandidate) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| match (a.keyword_score, b.keyword_score) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}
