//! Remote embedding provider over an OpenAI-compatible `/embeddings` endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{l2_normalize, EmbeddingProvider, EMBEDDING_DIM};
use crate::config::ProviderConfig;

pub struct RemoteEmbeddingProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl RemoteEmbeddingProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.embedding_model.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": text,
                "dimensions": EMBEDDING_DIM,
            }))
            .send()
            .await
            .with_context(|| format!("embedding request failed for {url}"))?;

        anyhow::ensure!(
            response.status().is_success(),
            "embedding request failed with HTTP {}",
            response.status()
        );

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("failed to decode embedding response")?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .context("embedding response contained no vectors")?;

        anyhow::ensure!(
            vector.len() == EMBEDDING_DIM,
            "embedding has {} dimensions, expected {EMBEDDING_DIM}",
            vector.len()
        );
        Ok(l2_normalize(vector))
    }
}
