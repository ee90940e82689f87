//! Cognitive router: classifies each turn into a [`RouteDecision`].
//!
//! A misrouted turn degrades quality, not correctness, so classification
//! never fails the request. Malformed or failed attempts are retried at the
//! next (higher) temperature, and once attempts run out the conservative
//! default route is used.

use std::fmt::Write as _;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{millis, RouterConfig};
use crate::error::ClassificationError;
use crate::memory::ShortTermBuffer;
use crate::provider::{complete_structured, CompletionRequest, ModelProvider, StructuredSchema};

const ROUTER_SYSTEM: &str = "You are a cognitive router. Classify the user's latest message. \
nature: reasoning (logic, analysis, planning, factual questions), coding (writing or \
debugging code), creative (open-ended writing), extraction (summarising, reformatting, \
pulling data out of text). complexity: low (direct), medium (several variables), high \
(abstract or multi-step). needs_retrieval: true when the answer depends on facts from the \
knowledge base. needs_chain_of_thought: true when the answer benefits from step-by-step \
reasoning. Return only JSON.";

/// What kind of work the turn asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Nature {
    Reasoning,
    Coding,
    Creative,
    Extraction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Per-turn strategy. Consumed immediately, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RouteDecision {
    pub nature: Nature,
    pub complexity: Complexity,
    pub needs_retrieval: bool,
    pub needs_chain_of_thought: bool,
}

impl RouteDecision {
    /// Route used when classification gives up.
    pub fn conservative_default() -> Self {
        Self {
            nature: Nature::Reasoning,
            complexity: Complexity::Medium,
            needs_retrieval: true,
            needs_chain_of_thought: true,
        }
    }
}

pub struct CognitiveRouter {
    provider: Arc<dyn ModelProvider>,
    config: RouterConfig,
}

impl CognitiveRouter {
    pub fn new(provider: Arc<dyn ModelProvider>, config: RouterConfig) -> Self {
        Self { provider, config }
    }

    /// Classify `turn_text` given the recent history. Never fails.
    pub async fn classify(&self, turn_text: &str, history: &ShortTermBuffer) -> RouteDecision {
        let attempts = self.config.temperatures.len();
        for (attempt, &temperature) in self.config.temperatures.iter().enumerate() {
            match self.classify_once(turn_text, history, temperature).await {
                Ok(decision) => {
                    tracing::debug!(attempt = attempt + 1, temperature, ?decision, "turn classified");
                    return decision;
                }
                Err(ClassificationError::Provider(e)) if e.is_auth() => {
                    tracing::warn!(error = %e, "router provider rejected credentials");
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        attempts,
                        temperature,
                        error = %e,
                        "route classification failed"
                    );
                }
            }
        }

        let fallback = RouteDecision::conservative_default();
        tracing::warn!(?fallback, "router fallback activated");
        fallback
    }

    /// One structured classification call at `temperature`.
    pub async fn classify_once(
        &self,
        turn_text: &str,
        history: &ShortTermBuffer,
        temperature: f32,
    ) -> Result<RouteDecision, ClassificationError> {
        let request = CompletionRequest::new(
            router_prompt(turn_text, history, self.config.history_turns),
            temperature,
        )
        .with_system(ROUTER_SYSTEM)
        .with_schema(StructuredSchema::of::<RouteDecision>("route_decision"));

        let (decision, _usage) = complete_structured::<RouteDecision>(
            self.provider.as_ref(),
            request,
            millis(self.config.timeout_ms),
        )
        .await?;
        Ok(decision)
    }
}

fn router_prompt(turn_text: &str, history: &ShortTermBuffer, history_turns: usize) -> String {
    let mut prompt = String::new();
    if history_turns > 0 && !history.is_empty() {
        prompt.push_str("RECENT CONVERSATION:\n");
        for turn in history.tail(history_turns) {
            let _ = writeln!(prompt, "{}: {}", turn.role, turn.text);
        }
        prompt.push('\n');
    }
    let _ = write!(prompt, "USER MESSAGE: {turn_text}");
    prompt
}
