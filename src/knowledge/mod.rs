//! Hybrid knowledge retrieval.
//!
//! Two read-only source indices ([`KeywordIndex`], [`VectorIndex`]) are queried
//! concurrently and merged with Reciprocal Rank Fusion ([`fusion`]); the fused
//! head is then re-scored by the model ([`rerank`]). [`sqlite`] holds the
//! FTS5 / sqlite-vec implementations of both indices.

pub mod fusion;
pub mod rerank;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// A unit of the knowledge corpus. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: String,
    pub text: String,
    pub source: String,
    pub embedding: Vec<f32>,
    pub keyword_terms: Vec<String>,
}

/// One hit from a single source index, best-first within its list.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub chunk_id: String,
    /// Source-local score; higher is better.
    pub score: f64,
    pub text: String,
    pub source: String,
}

/// A chunk travelling through fusion and reranking for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalCandidate {
    pub chunk_id: String,
    pub text: String,
    pub source: String,
    /// `None` when the keyword index did not return this chunk.
    pub keyword_score: Option<f64>,
    /// `None` when the vector index did not return this chunk.
    pub vector_score: Option<f64>,
    pub fused_score: f64,
    pub rerank_score: Option<f64>,
}

/// Lexical scoring over the corpus.
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexHit>>;
}

/// Semantic nearest-neighbour scoring over the corpus.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexHit>>;
}

/// Render the retrieved-context block injected into the generation prompt.
pub fn format_context(candidates: &[RetrievalCandidate]) -> String {
    let mut out = String::new();
    for (i, candidate) in candidates.iter().enumerate() {
        let _ = writeln!(
            out,
            "[Document {} | Source: {}]\n{}\n",
            i + 1,
            candidate.source,
            candidate.text.trim()
        );
    }
    out.trim_end().to_string()
}
