#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use zenith::db::{self, SharedConnection};
use zenith::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use zenith::error::ProviderError;
use zenith::knowledge::sqlite::insert_chunk;
use zenith::knowledge::KnowledgeChunk;
use zenith::provider::{Completion, CompletionRequest, ModelProvider, TokenUsage};

/// Key for plain-text generation calls in a [`ScriptedProvider`].
pub const GENERATION: &str = "generation";

/// Open a fresh, fully migrated in-memory database.
pub fn test_db() -> SharedConnection {
    db::share(db::open_in_memory().unwrap())
}

/// Generate a deterministic 768-dim embedding with a spike at position `seed`.
/// Distinct seeds are orthogonal.
pub fn spike_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[seed % EMBEDDING_DIM] = 1.0;
    v
}

/// Insert a knowledge chunk whose embedding spikes at `seed`.
pub fn seed_chunk(db: &SharedConnection, id: &str, text: &str, source: &str, seed: usize) {
    let chunk = KnowledgeChunk {
        id: id.into(),
        text: text.into(),
        source: source.into(),
        embedding: spike_embedding(seed),
        keyword_terms: Vec::new(),
    };
    let mut conn = db.lock().unwrap();
    insert_chunk(&mut conn, &chunk).unwrap();
}

/// Model double whose replies are queued per structured-schema name
/// (`route_decision`, `judge_verdict`, ...) or [`GENERATION`] for plain
/// calls. The last reply in a queue repeats; an unscripted key fails with a
/// transport error.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<HashMap<String, VecDeque<Result<String, ProviderError>>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, key: &str, text: &str) -> &Self {
        self.push(key, Ok(text.to_string()))
    }

    pub fn fail(&self, key: &str, error: ProviderError) -> &Self {
        self.push(key, Err(error))
    }

    fn push(&self, key: &str, reply: Result<String, ProviderError>) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Requests received under `key`, in call order.
    pub fn requests(&self, key: &str) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| key_of(r) == key)
            .cloned()
            .collect()
    }

    pub fn calls(&self, key: &str) -> usize {
        self.requests(key).len()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn key_of(request: &CompletionRequest) -> &str {
    request
        .schema
        .as_ref()
        .map(|s| s.name.as_str())
        .unwrap_or(GENERATION)
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let key = key_of(&request).to_string();
        self.requests.lock().unwrap().push(request);

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        match reply {
            Some(Ok(text)) => Ok(Completion {
                text,
                usage: Some(TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                    total_tokens: 15,
                }),
            }),
            Some(Err(e)) => Err(e),
            None => Err(ProviderError::Transport(format!("no scripted reply for {key}"))),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Embeds every query to the same vector, or fails when built with `failing`.
pub struct StubEmbedder {
    vector: Option<Vec<f32>>,
}

impl StubEmbedder {
    pub fn fixed(vector: Vec<f32>) -> Arc<Self> {
        Arc::new(Self {
            vector: Some(vector),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { vector: None })
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        match &self.vector {
            Some(v) => Ok(v.clone()),
            None => anyhow::bail!("embedding endpoint unreachable"),
        }
    }
}

/// Router reply for the given nature/complexity.
pub fn route_json(nature: &str, complexity: &str, needs_retrieval: bool) -> String {
    format!(
        r#"{{"nature":"{nature}","complexity":"{complexity}","needs_retrieval":{needs_retrieval},"needs_chain_of_thought":true}}"#
    )
}

/// Judge reply with every dimension set to `score`.
pub fn verdict_json(score: u8, safety_violation: bool) -> String {
    format!(
        r#"{{"fidelity":{score},"safety":{score},"clarity":{score},"efficiency":{score},"safety_violation":{safety_violation},"feedback":"tighten the answer (was {score})"}}"#
    )
}
