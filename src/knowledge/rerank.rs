//! Model-based reranking of the fused head.
//!
//! All candidates are judged in one batched structured request. Reranking is
//! a refinement only: any failure returns the fused order.

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;

use super::RetrievalCandidate;
use crate::provider::{complete_structured, CompletionRequest, ModelProvider, StructuredSchema};

/// Characters of each candidate shown to the model.
const PREVIEW_CHARS: usize = 300;

const RERANK_SYSTEM: &str = "You are a relevance judge for a retrieval system. \
Score how useful each document is for answering the query, from 0.0 (irrelevant) \
to 1.0 (directly answers it). Return only JSON.";

#[derive(Debug, Deserialize, JsonSchema)]
struct RerankScores {
    scores: Vec<RelevanceScore>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RelevanceScore {
    /// Index of the document as listed in the prompt.
    id: usize,
    /// Relevance in [0, 1].
    relevance: f64,
}

pub struct Reranker {
    provider: Arc<dyn ModelProvider>,
    timeout: Duration,
}

impl Reranker {
    pub fn new(provider: Arc<dyn ModelProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Re-score `candidates` (fused order) and keep the best `top_n`.
    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<RetrievalCandidate>,
        top_n: usize,
    ) -> Vec<RetrievalCandidate> {
        if candidates.is_empty() || top_n == 0 {
            candidates.truncate(top_n);
            return candidates;
        }

        let request = CompletionRequest::new(build_prompt(query, &candidates, top_n), 0.0)
            .with_system(RERANK_SYSTEM)
            .with_schema(StructuredSchema::of::<RerankScores>("rerank_scores"));

        let scores = match complete_structured::<RerankScores>(
            self.provider.as_ref(),
            request,
            self.timeout,
        )
        .await
        {
            Ok((reply, _usage)) => collect_scores(&reply, candidates.len()),
            Err(e) => {
                tracing::warn!(error = %e, "reranking failed, keeping fused order");
                None
            }
        };

        match scores {
            Some(scores) => apply_scores(candidates, &scores, top_n),
            None => {
                candidates.truncate(top_n);
                candidates
            }
        }
    }
}

fn build_prompt(query: &str, candidates: &[RetrievalCandidate], top_n: usize) -> String {
    let mut prompt = format!("QUERY: \"{query}\"\n\nCANDIDATE DOCUMENTS:\n");
    for (i, candidate) in candidates.iter().enumerate() {
        let preview: String = candidate.text.chars().take(PREVIEW_CHARS).collect();
        prompt.push_str(&format!("[ID: {i}] {preview}\n\n"));
    }
    prompt.push_str(&format!(
        "Score every document. The {top_n} highest-scoring documents will be used to answer the query.\n\
         Respond as {{\"scores\": [{{\"id\": <ID>, \"relevance\": <0.0-1.0>}}, ...]}}."
    ));
    prompt
}

/// Map model scores onto candidate positions. Out-of-range ids, repeated ids
/// and non-finite values are ignored. `None` when nothing usable came back.
fn collect_scores(reply: &RerankScores, len: usize) -> Option<Vec<Option<f64>>> {
    let mut scores = vec![None; len];
    let mut any = false;
    for entry in &reply.scores {
        if entry.id < len && scores[entry.id].is_none() && entry.relevance.is_finite() {
            scores[entry.id] = Some(entry.relevance.clamp(0.0, 1.0));
            any = true;
        }
    }
    any.then_some(scores)
}

fn apply_scores(
    candidates: Vec<RetrievalCandidate>,
    scores: &[Option<f64>],
    top_n: usize,
) -> Vec<RetrievalCandidate> {
    let mut scored: Vec<RetrievalCandidate> = candidates
        .into_iter()
        .zip(scores.iter().copied())
        .map(|(mut candidate, score)| {
            candidate.rerank_score = Some(score.unwrap_or(0.0));
            candidate
        })
        .collect();
    // Stable: equal relevance keeps fused order.
    scored.sort_by(|a, b| {
        b.rerank_score
            .unwrap_or(0.0)
            .total_cmp(&a.rerank_score.unwrap_or(0.0))
    });
    scored.truncate(top_n);
    scored
}
