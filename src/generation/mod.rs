//! Generation core: one model call per attempt, with persona, routed
//! guidance, retrieved context, profile, history, and reviewer feedback
//! assembled into a single prompt.
//!
//! The private `<thinking>` section is split off before anything leaves this
//! module; callers only ever see [`Generation::answer`] as user-visible text.

pub mod persona;
pub mod prompt;

use std::sync::Arc;

use crate::config::{millis, GenerationConfig};
use crate::error::GenerationError;
use crate::knowledge::RetrievalCandidate;
use crate::memory::{ProfileFact, ShortTermBuffer};
use crate::provider::{complete_within, CompletionRequest, ModelProvider, TokenUsage};
use crate::router::RouteDecision;

pub use prompt::split_reasoning;

/// Inputs for one generation attempt. Borrowed from the session.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub persona: &'a str,
    pub route: &'a RouteDecision,
    /// Reranked candidates; ignored unless the route needs retrieval.
    pub context: &'a [RetrievalCandidate],
    pub profile: &'a [ProfileFact],
    pub history: &'a ShortTermBuffer,
    pub instruction: &'a str,
    /// Corrective guidance from the judge on a revision attempt.
    pub feedback: Option<&'a str>,
}

impl<'a> GenerationRequest<'a> {
    pub fn with_feedback(self, feedback: Option<&'a str>) -> Self {
        Self { feedback, ..self }
    }
}

/// A candidate answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// User-visible text, reasoning removed.
    pub answer: String,
    /// Private reasoning, only ever handed to the judge.
    pub reasoning: Option<String>,
    pub usage: Option<TokenUsage>,
}

pub struct GenerationCore {
    provider: Arc<dyn ModelProvider>,
    config: GenerationConfig,
}

impl GenerationCore {
    pub fn new(provider: Arc<dyn ModelProvider>, config: GenerationConfig) -> Self {
        Self { provider, config }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Produce one candidate answer.
    ///
    /// A timeout is reported as a provider failure. Text that is empty once
    /// the reasoning is removed is [`GenerationError::EmptyResponse`].
    pub async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Generation, GenerationError> {
        let (system, prompt) = prompt::build(request);
        let completion = complete_within(
            self.provider.as_ref(),
            CompletionRequest::new(prompt, self.config.temperature)
                .with_system(system)
                .with_max_output_tokens(self.config.max_output_tokens),
            millis(self.config.timeout_ms),
        )
        .await?;

        let (answer, reasoning) = split_reasoning(&completion.text);
        if answer.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        tracing::debug!(
            answer_chars = answer.len(),
            has_reasoning = reasoning.is_some(),
            revision = request.feedback.is_some(),
            "generation complete"
        );
        Ok(Generation {
            answer,
            reasoning,
            usage: completion.usage,
        })
    }
}
