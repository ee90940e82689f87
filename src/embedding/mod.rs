//! Query embedding for the vector index.
//!
//! Provides the [`EmbeddingProvider`] trait and a remote implementation that
//! calls an OpenAI-compatible `/embeddings` endpoint. Vectors are
//! L2-normalized to [`EMBEDDING_DIM`] dimensions so sqlite-vec L2 distance
//! maps onto cosine similarity.

pub mod remote;

use anyhow::Result;
use async_trait::async_trait;

/// Number of dimensions in the embedding vectors.
pub const EMBEDDING_DIM: usize = 768;

/// Trait for embedding text into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}
