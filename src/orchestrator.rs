//! Per-request coordination of every pipeline stage.
//!
//! The orchestrator is the only component that knows about the others. Each
//! call to [`Orchestrator::handle`] builds its own [`Session`] on the stack;
//! all state that outlives the request goes through the persistence layer.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::{millis, ZenithConfig};
use crate::db;
use crate::embedding::remote::RemoteEmbeddingProvider;
use crate::error::{GenerationError, OrchestratorError};
use crate::generation::persona::resolve as resolve_persona;
use crate::generation::{Generation, GenerationCore, GenerationRequest};
use crate::judge::healing::{HealingOutcome, HealingStatus, RevisionStep, SelfHealingLoop};
use crate::judge::{Dimensions, Judge, JudgeVerdict};
use crate::knowledge::fusion::{FusionEngine, FusionSettings};
use crate::knowledge::rerank::Reranker;
use crate::knowledge::sqlite::{SqliteKeywordIndex, SqliteVectorIndex};
use crate::knowledge::{KeywordIndex, RetrievalCandidate, VectorIndex};
use crate::memory::{
    Exchange, MemoryStore, Persistence, ShortTermBuffer, SqliteStore, Turn, VerdictRecord,
};
use crate::provider::openai::OpenAiCompatProvider;
use crate::provider::ModelProvider;
use crate::router::{CognitiveRouter, RouteDecision};

/// State owned by one request. Never stored beyond [`Orchestrator::handle`].
#[derive(Debug)]
pub struct Session {
    pub user_id: String,
    pub session_id: String,
    pub buffer: ShortTermBuffer,
    pub route: RouteDecision,
}

/// What the caller gets back. The reasoning trace is never included.
#[derive(Debug, Serialize)]
pub struct FinalAnswer {
    pub answer_text: String,
    pub route_decision: RouteDecision,
    pub verdict_summary: VerdictSummary,
    /// Background profile extraction, if one was started. Dropping the handle
    /// does not cancel the task.
    #[serde(skip)]
    pub extraction: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerdictSummary {
    pub score: u8,
    pub accepted: bool,
    pub audited: bool,
    pub status: HealingStatus,
    pub attempts: usize,
    pub dimensions: Dimensions,
}

impl VerdictSummary {
    fn from_outcome(outcome: &HealingOutcome) -> Self {
        Self {
            score: outcome.verdict.score,
            accepted: outcome.verdict.accepted,
            audited: outcome.verdict.audited,
            status: outcome.status,
            attempts: outcome.attempts,
            dimensions: outcome.verdict.dimensions,
        }
    }
}

/// External collaborators the pipeline is wired to.
pub struct Components {
    pub provider: Arc<dyn ModelProvider>,
    pub keyword: Arc<dyn KeywordIndex>,
    pub vector: Arc<dyn VectorIndex>,
    pub persistence: Arc<dyn Persistence>,
}

pub struct Orchestrator {
    router: CognitiveRouter,
    retrieval: FusionEngine,
    reranker: Reranker,
    generation: GenerationCore,
    judge: Judge,
    healing: SelfHealingLoop,
    memory: MemoryStore,
    max_input_chars: usize,
    fused_k: usize,
    top_n: usize,
}

impl Orchestrator {
    pub fn new(components: Components, config: &ZenithConfig) -> Self {
        let Components {
            provider,
            keyword,
            vector,
            persistence,
        } = components;
        Self {
            router: CognitiveRouter::new(provider.clone(), config.router.clone()),
            retrieval: FusionEngine::new(keyword, vector, FusionSettings::from(&config.retrieval)),
            reranker: Reranker::new(provider.clone(), millis(config.retrieval.rerank_timeout_ms)),
            generation: GenerationCore::new(provider.clone(), config.generation.clone()),
            judge: Judge::new(provider.clone(), config.judge.clone()),
            healing: SelfHealingLoop::new(config.judge.max_revisions),
            memory: MemoryStore::new(persistence, provider, config.memory.clone()),
            max_input_chars: config.orchestrator.max_input_chars,
            fused_k: config.retrieval.fused_k,
            top_n: config.retrieval.top_n,
        }
    }

    /// Wire the pipeline to the configured SQLite database and
    /// OpenAI-compatible endpoint.
    pub fn from_config(config: &ZenithConfig) -> anyhow::Result<Self> {
        let conn = db::open_database(config.resolved_db_path())?;
        let db = db::share(conn);
        let provider = OpenAiCompatProvider::new(&config.provider)
            .context("failed to create model provider")?;
        let embedder = RemoteEmbeddingProvider::new(&config.provider)
            .context("failed to create embedding provider")?;

        let components = Components {
            provider: Arc::new(provider),
            keyword: Arc::new(SqliteKeywordIndex::new(db.clone())),
            vector: Arc::new(SqliteVectorIndex::new(db.clone(), Arc::new(embedder))),
            persistence: Arc::new(SqliteStore::new(db)),
        };
        Ok(Self::new(components, config))
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Run one turn through the whole pipeline.
    ///
    /// `persona` replaces the routed persona when given.
    pub async fn handle(
        &self,
        user_id: &str,
        session_id: &str,
        input_text: &str,
        persona: Option<&str>,
    ) -> Result<FinalAnswer, OrchestratorError> {
        let input = self.validate(user_id, session_id, input_text)?;
        tracing::info!(user = user_id, session = session_id, chars = input.len(), "request received");

        let owned = self
            .memory
            .backend()
            .touch_session(user_id, session_id)
            .await
            .map_err(|e| {
                tracing::error!(session = session_id, error = %e, "session registry unavailable");
                OrchestratorError::Storage(e)
            })?;
        if !owned {
            tracing::warn!(user = user_id, session = session_id, "session belongs to another user");
            return Err(OrchestratorError::InvalidInput(
                "unknown session for this user".into(),
            ));
        }

        let buffer = match self.memory.load_recent(session_id).await {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!(session = session_id, error = %e, "history unavailable, starting empty");
                ShortTermBuffer::new(self.memory.window_turns())
            }
        };
        let profile = self.memory.load_profile(user_id).await.unwrap_or_else(|e| {
            tracing::warn!(user = user_id, error = %e, "profile unavailable");
            Vec::new()
        });

        let route = self.router.classify(input, &buffer).await;
        let session = Session {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            buffer,
            route,
        };
        tracing::info!(
            session = %session.session_id,
            nature = ?session.route.nature,
            complexity = ?session.route.complexity,
            needs_retrieval = session.route.needs_retrieval,
            "turn routed"
        );

        let context = self.retrieve(input, &session.route).await;

        let request = GenerationRequest {
            persona: resolve_persona(persona, session.route.nature),
            route: &session.route,
            context: &context,
            profile: &profile,
            history: &session.buffer,
            instruction: input,
            feedback: None,
        };
        let mut step = PipelineStep {
            generation: &self.generation,
            judge: &self.judge,
            request,
        };
        let outcome = self.healing.run(&mut step).await.map_err(|e| {
            tracing::error!(session = %session.session_id, error = %e, "generation failed");
            OrchestratorError::from(e)
        })?;

        self.record(&session, input, &outcome).await;

        let extraction = match outcome.status {
            HealingStatus::Refused => None,
            HealingStatus::Accepted | HealingStatus::Exhausted => Some(self.memory.spawn_extraction(
                session.user_id.clone(),
                Exchange {
                    user: input.to_string(),
                    assistant: outcome.answer.clone(),
                },
            )),
        };

        tracing::info!(
            session = %session.session_id,
            status = ?outcome.status,
            score = outcome.verdict.score,
            attempts = outcome.attempts,
            "request complete"
        );
        Ok(FinalAnswer {
            verdict_summary: VerdictSummary::from_outcome(&outcome),
            answer_text: outcome.answer,
            route_decision: session.route,
            extraction,
        })
    }

    fn validate<'a>(
        &self,
        user_id: &str,
        session_id: &str,
        input_text: &'a str,
    ) -> Result<&'a str, OrchestratorError> {
        if user_id.trim().is_empty() || session_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "user and session ids are required".into(),
            ));
        }
        let input = input_text.trim();
        if input.is_empty() {
            return Err(OrchestratorError::InvalidInput("empty input".into()));
        }
        let chars = input.chars().count();
        if chars > self.max_input_chars {
            return Err(OrchestratorError::InvalidInput(format!(
                "input is {chars} characters, limit is {}",
                self.max_input_chars
            )));
        }
        Ok(input)
    }

    /// Fused, reranked context for routes that need it.
    async fn retrieve(&self, query: &str, route: &RouteDecision) -> Vec<RetrievalCandidate> {
        if !route.needs_retrieval {
            return Vec::new();
        }
        let fused = self.retrieval.retrieve(query, self.fused_k).await;
        let fused_count = fused.len();
        let reranked = self.reranker.rerank(query, fused, self.top_n).await;
        tracing::debug!(fused = fused_count, kept = reranked.len(), "context retrieved");
        reranked
    }

    /// Persist the exchange and audit trail. Failures are logged; the answer
    /// has already been produced.
    async fn record(&self, session: &Session, input: &str, outcome: &HealingOutcome) {
        let backend = self.memory.backend();
        for turn in [Turn::user(input), Turn::assistant(outcome.answer.as_str())] {
            if let Err(e) = self.memory.append(&session.session_id, &turn).await {
                tracing::warn!(session = %session.session_id, error = %e, "failed to persist turn");
            }
        }

        if outcome.usage.total_tokens > 0 {
            if let Err(e) = backend
                .record_usage(
                    &session.user_id,
                    &session.session_id,
                    self.generation.model_name(),
                    &outcome.usage,
                )
                .await
            {
                tracing::warn!(error = %e, "failed to record usage");
            }
        }

        for (attempt, verdict) in &outcome.verdicts {
            let record = verdict_record(*attempt, verdict);
            if let Err(e) = backend.record_verdict(&session.session_id, &record).await {
                tracing::warn!(error = %e, "failed to record verdict");
            }
        }
    }
}

fn verdict_record(attempt: usize, verdict: &JudgeVerdict) -> VerdictRecord {
    let details = serde_json::json!({
        "dimensions": verdict.dimensions,
        "feedback": verdict.feedback,
    });
    VerdictRecord {
        attempt,
        score: verdict.score,
        accepted: verdict.accepted,
        safety_violation: verdict.safety_violation,
        audited: verdict.audited,
        details: details.to_string(),
    }
}

/// Generation and audit bound to one request's inputs.
struct PipelineStep<'a> {
    generation: &'a GenerationCore,
    judge: &'a Judge,
    request: GenerationRequest<'a>,
}

#[async_trait]
impl<'a> RevisionStep for PipelineStep<'a> {
    async fn generate(&mut self, feedback: Option<&str>) -> Result<Generation, GenerationError> {
        let request = self.request.with_feedback(feedback);
        self.generation.generate(&request).await
    }

    async fn audit(&mut self, generation: &Generation) -> JudgeVerdict {
        self.judge
            .audit(
                self.request.instruction,
                &generation.answer,
                generation.reasoning.as_deref(),
            )
            .await
    }
}
