//! Dual-horizon memory: the short-term turn window and the long-term profile.
//!
//! [`MemoryStore`] rebuilds a [`ShortTermBuffer`] per request from persisted
//! history and mines each finished exchange for durable [`ProfileFact`]s. The
//! two horizons are only eventually consistent: the buffer is the record of
//! what was just said, the profile of what to keep.

pub mod store;
pub mod types;

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::config::{millis, MemoryConfig};
use crate::provider::{complete_structured, CompletionRequest, ModelProvider, StructuredSchema};

pub use store::{Persistence, SqliteStore};
pub use types::{FactUpdate, ProfileFact, Role, ShortTermBuffer, Turn, VerdictRecord};

/// Confidence assigned when the model omits one.
const DEFAULT_FACT_CONFIDENCE: f64 = 0.7;

const EXTRACTION_SYSTEM: &str = "You maintain a long-term profile of a user. \
Extract only durable facts the user stated about themselves: name, role, \
projects, technology stack, preferences. Ignore anything transient. Return only JSON.";

/// The latest user/assistant exchange handed to extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractedFacts {
    /// New or changed facts only. Empty when nothing durable was said.
    facts: Vec<ExtractedFact>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractedFact {
    /// Short snake_case attribute name, e.g. `preferred_language`.
    key: String,
    value: String,
    /// Confidence in [0, 1].
    confidence: Option<f64>,
}

/// Request-scoped access to both memory horizons.
///
/// Cheap to clone; clones share the backend and provider.
#[derive(Clone)]
pub struct MemoryStore {
    backend: Arc<dyn Persistence>,
    provider: Arc<dyn ModelProvider>,
    config: MemoryConfig,
}

impl MemoryStore {
    pub fn new(
        backend: Arc<dyn Persistence>,
        provider: Arc<dyn ModelProvider>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            backend,
            provider,
            config,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Persistence> {
        &self.backend
    }

    /// Capacity N of the short-term window.
    pub fn window_turns(&self) -> usize {
        self.config.window_turns
    }

    /// The last N turns of the session. Empty when the session has no history.
    pub async fn load_recent(&self, session_id: &str) -> Result<ShortTermBuffer> {
        let turns = self
            .backend
            .recent_turns(session_id, self.config.window_turns)
            .await?;
        Ok(ShortTermBuffer::from_turns(self.config.window_turns, turns))
    }

    /// Persist a turn. Older turns are never deleted; the window is applied
    /// on read.
    pub async fn append(&self, session_id: &str, turn: &Turn) -> Result<()> {
        self.backend.append_turn(session_id, turn).await
    }

    pub async fn load_profile(&self, user_id: &str) -> Result<Vec<ProfileFact>> {
        self.backend.load_profile(user_id).await
    }

    /// Ask the model for durable facts in `exchange` and upsert them.
    ///
    /// Only keys the model returned are touched. Returns the number of facts
    /// written; zero when the utterance is too short to bother.
    pub async fn extract_and_upsert_facts(&self, user_id: &str, exchange: &Exchange) -> Result<usize> {
        if exchange.user.trim().chars().count() < self.config.min_extract_chars {
            tracing::debug!(user = user_id, "utterance too short, skipping fact extraction");
            return Ok(0);
        }

        let profile = self.backend.load_profile(user_id).await?;
        let request = CompletionRequest::new(extraction_prompt(&profile, exchange), 0.1)
            .with_system(EXTRACTION_SYSTEM)
            .with_schema(StructuredSchema::of::<ExtractedFacts>("profile_facts"));

        let (extracted, _usage) = complete_structured::<ExtractedFacts>(
            self.provider.as_ref(),
            request,
            millis(self.config.extraction_timeout_ms),
        )
        .await?;

        if extracted.facts.is_empty() {
            tracing::debug!(user = user_id, "no new facts found");
            return Ok(0);
        }

        let updates: Vec<FactUpdate> = extracted
            .facts
            .into_iter()
            .map(|f| FactUpdate {
                key: f.key,
                value: f.value,
                confidence: f.confidence.unwrap_or(DEFAULT_FACT_CONFIDENCE),
            })
            .collect();
        let written = self.backend.upsert_facts(user_id, &updates).await?;
        tracing::info!(user = user_id, written, "profile facts upserted");
        Ok(written)
    }

    /// Run extraction on its own task, detached from the caller.
    ///
    /// The task keeps running if the caller's future is dropped. Failures are
    /// logged and go nowhere else.
    pub fn spawn_extraction(&self, user_id: String, exchange: Exchange) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(e) = store.extract_and_upsert_facts(&user_id, &exchange).await {
                tracing::warn!(user = %user_id, error = %e, "fact extraction failed");
            }
        })
    }
}

fn extraction_prompt(profile: &[ProfileFact], exchange: &Exchange) -> String {
    let mut prompt = String::from("CURRENT PROFILE:\n");
    if profile.is_empty() {
        prompt.push_str("(empty)\n");
    }
    for fact in profile {
        let _ = writeln!(prompt, "- {}: {}", fact.key, fact.value);
    }
    let _ = write!(
        prompt,
        "\nLATEST EXCHANGE:\nUser: {}\nAssistant: {}\n\n\
         List facts that are new or that change a profile entry. \
         Reuse existing keys when updating. Return {{\"facts\": []}} if nothing changed.",
        exchange.user, exchange.assistant
    );
    prompt
}
