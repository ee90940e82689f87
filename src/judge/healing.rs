//! Bounded generate → audit → revise state machine.
//!
//! At most `1 + max_revisions` generations run. Each rejected answer's
//! feedback is handed to the next attempt, the best-scoring answer so far is
//! kept, and a safety violation ends the loop at once with the fixed refusal.

use async_trait::async_trait;
use serde::Serialize;

use super::JudgeVerdict;
use crate::error::{GenerationError, SAFE_REFUSAL};
use crate::generation::Generation;
use crate::provider::TokenUsage;

/// One generate/audit cycle, supplied by the caller.
#[async_trait]
pub trait RevisionStep: Send {
    /// Produce a candidate, steered by the previous verdict's feedback.
    async fn generate(&mut self, feedback: Option<&str>) -> Result<Generation, GenerationError>;

    async fn audit(&mut self, generation: &Generation) -> JudgeVerdict;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingStatus {
    /// An attempt passed the audit.
    Accepted,
    /// Attempts ran out; the best-scoring answer is returned.
    Exhausted,
    /// The judge flagged a safety violation.
    Refused,
}

#[derive(Debug, Clone)]
pub struct HealingOutcome {
    /// User-visible answer, or [`SAFE_REFUSAL`].
    pub answer: String,
    /// Reasoning behind `answer`; `None` on refusal.
    pub reasoning: Option<String>,
    /// Verdict of the returned answer (the flagging verdict on refusal).
    pub verdict: JudgeVerdict,
    pub status: HealingStatus,
    /// Generation attempts made, including failed ones.
    pub attempts: usize,
    /// `(attempt, verdict)` for every audited attempt.
    pub verdicts: Vec<(usize, JudgeVerdict)>,
    /// Summed generation usage across attempts.
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy)]
pub struct SelfHealingLoop {
    pub max_revisions: usize,
}

impl SelfHealingLoop {
    pub fn new(max_revisions: usize) -> Self {
        Self { max_revisions }
    }

    /// Drive `step` until an answer is accepted, refused, or attempts run out.
    ///
    /// A provider failure before any answer exists is fatal. Once an answer
    /// exists, a failed revision ends the loop with the best answer so far.
    /// An empty first attempt is retried; no answer at all is
    /// [`GenerationError::EmptyResponse`].
    pub async fn run<S: RevisionStep + ?Sized>(
        &self,
        step: &mut S,
    ) -> Result<HealingOutcome, GenerationError> {
        let max_attempts = self.max_revisions + 1;
        let mut best: Option<(Generation, JudgeVerdict)> = None;
        let mut feedback: Option<String> = None;
        let mut verdicts = Vec::new();
        let mut usage = TokenUsage::default();
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;
            let generation = match step.generate(feedback.as_deref()).await {
                Ok(generation) => generation,
                Err(GenerationError::Provider(e)) if best.is_none() => {
                    return Err(GenerationError::Provider(e));
                }
                Err(e) if best.is_some() => {
                    tracing::warn!(attempt = attempts, error = %e, "revision failed, keeping best answer");
                    break;
                }
                Err(e) => {
                    tracing::warn!(attempt = attempts, error = %e, "attempt produced no answer");
                    continue;
                }
            };
            if let Some(u) = &generation.usage {
                usage.add(u);
            }

            let verdict = step.audit(&generation).await;
            tracing::info!(
                attempt = attempts,
                score = verdict.score,
                accepted = verdict.accepted,
                audited = verdict.audited,
                "judge verdict"
            );
            verdicts.push((attempts, verdict.clone()));

            if verdict.safety_violation {
                tracing::warn!(attempt = attempts, "safety violation, returning refusal");
                return Ok(HealingOutcome {
                    answer: SAFE_REFUSAL.to_string(),
                    reasoning: None,
                    verdict,
                    status: HealingStatus::Refused,
                    attempts,
                    verdicts,
                    usage,
                });
            }

            if verdict.accepted {
                return Ok(HealingOutcome {
                    answer: generation.answer,
                    reasoning: generation.reasoning,
                    verdict,
                    status: HealingStatus::Accepted,
                    attempts,
                    verdicts,
                    usage,
                });
            }

            feedback = Some(verdict.feedback.clone());
            // Earlier attempts win ties.
            if best.as_ref().is_none_or(|(_, b)| verdict.score > b.score) {
                best = Some((generation, verdict));
            }
        }

        let Some((generation, verdict)) = best else {
            return Err(GenerationError::EmptyResponse);
        };
        tracing::warn!(
            attempts,
            best_score = verdict.score,
            "revision budget exhausted, returning best attempt"
        );
        Ok(HealingOutcome {
            answer: generation.answer,
            reasoning: generation.reasoning,
            verdict,
            status: HealingStatus::Exhausted,
            attempts,
            verdicts,
            usage,
        })
    }
}
