//! Quality audit of candidate answers.
//!
//! [`Judge::audit`] scores an answer on four rubric dimensions and folds them
//! into one 0–100 score with configurable [`ScoreWeights`]. An audit that
//! cannot be completed passes the answer through rather than blocking it.
//! [`healing`] drives the bounded generate/audit/revise loop.

pub mod healing;

use std::fmt::Write as _;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{millis, JudgeConfig, ScoreWeights};
use crate::provider::{complete_structured, CompletionRequest, ModelProvider, StructuredSchema};

const JUDGE_SYSTEM: &str = "You are a strict quality auditor for AI answers. \
Score the answer against the user's request on four dimensions, each 0 to 100:\n\
- fidelity: does it answer exactly what was asked, and is it consistent with the supplied reasoning and facts?\n\
- safety: is it safe and free of harmful instructions?\n\
- clarity: is it well organised and well formatted?\n\
- efficiency: is it direct, without padding?\n\
Set safety_violation to true only if the answer gives harmful, dangerous or \
clearly disallowed content. feedback must be concrete, actionable criticism \
the author can use to revise. Return only JSON.";

/// Per-dimension scores, each 0–100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub fidelity: u8,
    pub safety: u8,
    pub clarity: u8,
    pub efficiency: u8,
}

impl Dimensions {
    pub fn uniform(score: u8) -> Self {
        Self {
            fidelity: score,
            safety: score,
            clarity: score,
            efficiency: score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeVerdict {
    pub score: u8,
    pub dimensions: Dimensions,
    pub feedback: String,
    pub safety_violation: bool,
    pub accepted: bool,
    /// `false` when the audit could not run and the answer was passed through.
    pub audited: bool,
}

impl ScoreWeights {
    /// Weighted mean of the dimensions, rounded to 0–100.
    ///
    /// Weights are normalised by their sum; a non-positive sum falls back to
    /// equal weighting.
    pub fn combine(&self, dimensions: &Dimensions) -> u8 {
        let pairs = [
            (self.fidelity, dimensions.fidelity),
            (self.safety, dimensions.safety),
            (self.clarity, dimensions.clarity),
            (self.efficiency, dimensions.efficiency),
        ];
        let total: f64 = pairs.iter().map(|(w, _)| w.max(0.0)).sum();
        let score = if total > 0.0 {
            pairs
                .iter()
                .map(|(w, d)| w.max(0.0) * f64::from(*d))
                .sum::<f64>()
                / total
        } else {
            pairs.iter().map(|(_, d)| f64::from(*d)).sum::<f64>() / pairs.len() as f64
        };
        score.round().clamp(0.0, 100.0) as u8
    }
}

/// Shape the judge model is asked to return.
#[derive(Debug, Deserialize, JsonSchema)]
struct RawVerdict {
    fidelity: f64,
    safety: f64,
    clarity: f64,
    efficiency: f64,
    safety_violation: bool,
    feedback: String,
}

pub struct Judge {
    provider: Arc<dyn ModelProvider>,
    config: JudgeConfig,
}

impl Judge {
    pub fn new(provider: Arc<dyn ModelProvider>, config: JudgeConfig) -> Self {
        Self { provider, config }
    }

    /// Audit `answer` against `user_input`. Never fails.
    ///
    /// `reasoning_trace` is private supporting evidence for the fidelity
    /// check. Provider failure, timeout or a malformed verdict yields a
    /// pass-through verdict.
    pub async fn audit(
        &self,
        user_input: &str,
        answer: &str,
        reasoning_trace: Option<&str>,
    ) -> JudgeVerdict {
        let request = CompletionRequest::new(audit_prompt(user_input, answer, reasoning_trace), 0.0)
            .with_system(JUDGE_SYSTEM)
            .with_schema(StructuredSchema::of::<RawVerdict>("judge_verdict"));

        match complete_structured::<RawVerdict>(
            self.provider.as_ref(),
            request,
            millis(self.config.timeout_ms),
        )
        .await
        {
            Ok((raw, _usage)) => self.verdict_from(raw),
            Err(e) => {
                tracing::warn!(error = %e, "judge unavailable, passing answer through");
                self.pass_through()
            }
        }
    }

    fn verdict_from(&self, raw: RawVerdict) -> JudgeVerdict {
        let dimensions = Dimensions {
            fidelity: to_points(raw.fidelity),
            safety: to_points(raw.safety),
            clarity: to_points(raw.clarity),
            efficiency: to_points(raw.efficiency),
        };
        let score = self.config.weights.combine(&dimensions);
        JudgeVerdict {
            score,
            dimensions,
            feedback: raw.feedback.trim().to_string(),
            safety_violation: raw.safety_violation,
            accepted: score >= self.config.threshold && !raw.safety_violation,
            audited: true,
        }
    }

    fn pass_through(&self) -> JudgeVerdict {
        JudgeVerdict {
            score: self.config.threshold,
            dimensions: Dimensions::uniform(self.config.threshold),
            feedback: String::from("Audit unavailable; answer accepted without review."),
            safety_violation: false,
            accepted: true,
            audited: false,
        }
    }
}

fn to_points(value: f64) -> u8 {
    if value.is_finite() {
        value.round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

fn audit_prompt(user_input: &str, answer: &str, reasoning_trace: Option<&str>) -> String {
    let mut prompt = format!("USER REQUEST:\n{user_input}\n\nANSWER UNDER REVIEW:\n{answer}\n");
    if let Some(trace) = reasoning_trace.filter(|t| !t.trim().is_empty()) {
        let _ = write!(
            prompt,
            "\nAUTHOR'S PRIVATE REASONING (evidence for fidelity only, not part of the answer):\n{trace}\n"
        );
    }
    prompt.push_str("\nAudit the answer and return the verdict JSON.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::Completion;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        reply: Result<String, ProviderError>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelProvider for Canned {
        async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
            assert_eq!(request.temperature, 0.0);
            self.prompts.lock().unwrap().push(request.prompt);
            self.reply.clone().map(|text| Completion { text, usage: None })
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn judge(reply: Result<&str, ProviderError>) -> (Judge, Arc<Canned>) {
        let provider = Arc::new(Canned {
            reply: reply.map(str::to_string),
            prompts: Mutex::new(Vec::new()),
        });
        (Judge::new(provider.clone(), JudgeConfig::default()), provider)
    }

    fn reply(fidelity: u8, safety: u8, clarity: u8, efficiency: u8, violation: bool) -> String {
        format!(
            r#"{{"fidelity":{fidelity},"safety":{safety},"clarity":{clarity},"efficiency":{efficiency},"safety_violation":{violation},"feedback":"  tighten the intro "}}"#
        )
    }

    #[test]
    fn default_weights_follow_rubric() {
        let weights = ScoreWeights::default();
        let d = Dimensions {
            fidelity: 100,
            safety: 0,
            clarity: 0,
            efficiency: 0,
        };
        assert_eq!(weights.combine(&d), 35);
        assert_eq!(weights.combine(&Dimensions::uniform(90)), 90);
    }

    #[test]
    fn weights_are_normalised() {
        let doubled = ScoreWeights {
            fidelity: 0.7,
            safety: 0.5,
            clarity: 0.4,
            efficiency: 0.4,
        };
        let d = Dimensions {
            fidelity: 80,
            safety: 100,
            clarity: 60,
            efficiency: 70,
        };
        assert_eq!(doubled.combine(&d), ScoreWeights::default().combine(&d));

        let zero = ScoreWeights {
            fidelity: 0.0,
            safety: 0.0,
            clarity: 0.0,
            efficiency: 0.0,
        };
        assert_eq!(zero.combine(&d), 78);
    }

    #[tokio::test]
    async fn high_scores_are_accepted() {
        let (judge, _) = judge(Ok(reply(90, 95, 85, 80, false).as_str()));
        let verdict = judge.audit("q", "a", None).await;
        assert!(verdict.accepted);
        assert!(verdict.audited);
        assert_eq!(verdict.feedback, "tighten the intro");
        assert_eq!(verdict.score, 88);
    }

    #[tokio::test]
    async fn low_scores_are_rejected() {
        let (judge, _) = judge(Ok(reply(60, 90, 60, 60, false).as_str()));
        let verdict = judge.audit("q", "a", None).await;
        assert!(!verdict.accepted);
        assert!(verdict.score < 80);
    }

    #[tokio::test]
    async fn safety_violation_rejects_despite_high_score() {
        let (judge, _) = judge(Ok(reply(100, 100, 100, 100, true).as_str()));
        let verdict = judge.audit("q", "a", None).await;
        assert_eq!(verdict.score, 100);
        assert!(verdict.safety_violation);
        assert!(!verdict.accepted);
    }

    #[tokio::test]
    async fn provider_failure_passes_through() {
        let (judge, _) = judge(Err(ProviderError::Http {
            status: 503,
            body: String::new(),
        }));
        let verdict = judge.audit("q", "a", None).await;
        assert!(verdict.accepted);
        assert!(!verdict.audited);
        assert_eq!(verdict.score, 80);
    }

    #[tokio::test]
    async fn malformed_verdict_passes_through() {
        let (judge, _) = judge(Ok(r#"{"score": 12}"#));
        let verdict = judge.audit("q", "a", None).await;
        assert!(verdict.accepted);
        assert!(!verdict.audited);
    }

    #[tokio::test]
    async fn out_of_range_dimensions_are_clamped() {
        let raw = reply(100, 100, 100, 100, false).replace("\"clarity\":100", "\"clarity\":250.7");
        let (judge, _) = judge(Ok(raw.as_str()));
        let verdict = judge.audit("q", "a", None).await;
        assert_eq!(verdict.dimensions.clarity, 100);
    }

    #[tokio::test]
    async fn reasoning_is_offered_as_evidence() {
        let (judge, provider) = judge(Ok(reply(90, 90, 90, 90, false).as_str()));
        judge.audit("q", "a", Some("checked the docs")).await;
        judge.audit("q", "a", None).await;
        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].contains("checked the docs"));
        assert!(!prompts[1].contains("PRIVATE REASONING"));
    }
}
