mod helpers;

use std::sync::Arc;

use helpers::{
    route_json, seed_chunk, spike_embedding, test_db, verdict_json, ScriptedProvider,
    StubEmbedder, GENERATION,
};
use zenith::config::ZenithConfig;
use zenith::db::SharedConnection;
use zenith::error::{OrchestratorError, ProviderError, SAFE_REFUSAL, TRY_AGAIN_MESSAGE};
use zenith::judge::healing::HealingStatus;
use zenith::knowledge::sqlite::{SqliteKeywordIndex, SqliteVectorIndex};
use zenith::memory::{Persistence, Role, SqliteStore};
use zenith::orchestrator::{Components, Orchestrator};
use zenith::router::{Complexity, Nature, RouteDecision};

fn pipeline(provider: &Arc<ScriptedProvider>, db: &SharedConnection, config: &ZenithConfig) -> Orchestrator {
    let components = Components {
        provider: provider.clone(),
        keyword: Arc::new(SqliteKeywordIndex::new(db.clone())),
        vector: Arc::new(SqliteVectorIndex::new(
            db.clone(),
            StubEmbedder::fixed(spike_embedding(0)),
        )),
        persistence: Arc::new(SqliteStore::new(db.clone())),
    };
    Orchestrator::new(components, config)
}

fn count(db: &SharedConnection, table: &str) -> i64 {
    db.lock()
        .unwrap()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .unwrap()
}

#[tokio::test]
async fn accepted_answer_hides_reasoning_and_persists_exchange() {
    let db = test_db();
    let provider = ScriptedProvider::new();
    provider
        .reply("route_decision", &route_json("coding", "low", false))
        .reply(GENERATION, "<thinking>Check the capacity API.</thinking>Use `Vec::with_capacity(n)`.")
        .reply("judge_verdict", &verdict_json(92, false))
        .reply("profile_facts", r#"{"facts":[]}"#);
    let orchestrator = pipeline(&provider, &db, &ZenithConfig::default());

    let answer = orchestrator
        .handle("u1", "s1", "How do I preallocate a Vec in Rust?", None)
        .await
        .unwrap();

    assert_eq!(answer.answer_text, "Use `Vec::with_capacity(n)`.");
    assert!(!answer.answer_text.contains("<thinking>"));
    assert_eq!(answer.route_decision.nature, Nature::Coding);
    assert_eq!(answer.verdict_summary.status, HealingStatus::Accepted);
    assert_eq!(answer.verdict_summary.attempts, 1);
    assert_eq!(answer.verdict_summary.score, 92);
    assert!(answer.verdict_summary.audited);

    // The judge sees the reasoning; the caller does not.
    let audit = &provider.requests("judge_verdict")[0];
    assert!(audit.prompt.contains("Check the capacity API."));

    answer.extraction.expect("extraction should be spawned").await.unwrap();

    let store = SqliteStore::new(db.clone());
    let turns = store.recent_turns("s1", 20).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].text, "Use `Vec::with_capacity(n)`.");
    assert_eq!(count(&db, "sessions"), 1);
    assert_eq!(count(&db, "usage_log"), 1);
    assert_eq!(count(&db, "verdict_log"), 1);
}

#[tokio::test]
async fn retrieved_context_reaches_generation() {
    let db = test_db();
    seed_chunk(
        &db,
        "tokio-1",
        "Tokio spawn_blocking moves blocking work off the async executor.",
        "tokio.md",
        0,
    );
    seed_chunk(&db, "bread-1", "Sourdough needs a mature starter.", "baking.md", 100);

    let provider = ScriptedProvider::new();
    provider
        .reply("route_decision", &route_json("reasoning", "medium", true))
        .reply(
            "rerank_scores",
            r#"{"scores":[{"id":0,"relevance":0.95},{"id":1,"relevance":0.05}]}"#,
        )
        .reply(GENERATION, "Use spawn_blocking for CPU-heavy or blocking calls.")
        .reply("judge_verdict", &verdict_json(90, false))
        .reply("profile_facts", r#"{"facts":[]}"#);
    let orchestrator = pipeline(&provider, &db, &ZenithConfig::default());

    let answer = orchestrator
        .handle("u1", "s1", "When should I use spawn_blocking in tokio?", None)
        .await
        .unwrap();
    assert!(answer.route_decision.needs_retrieval);
    assert_eq!(provider.calls("rerank_scores"), 1);

    let generation = &provider.requests(GENERATION)[0];
    assert!(generation.prompt.contains("## Retrieved context"));
    assert!(generation.prompt.contains("[Document 1 | Source: tokio.md]"));

    // The best chunk is listed first.
    let tokio_at = generation.prompt.find("tokio.md").unwrap();
    let bread_at = generation.prompt.find("baking.md").unwrap();
    assert!(tokio_at < bread_at);
}

#[tokio::test]
async fn no_retrieval_route_skips_rerank_and_context() {
    let db = test_db();
    seed_chunk(&db, "tokio-1", "Tokio is an async runtime.", "tokio.md", 0);

    let provider = ScriptedProvider::new();
    provider
        .reply("route_decision", &route_json("creative", "low", false))
        .reply(GENERATION, "Rain on the rooftop, steady as a metronome.")
        .reply("judge_verdict", &verdict_json(85, false));
    let orchestrator = pipeline(&provider, &db, &ZenithConfig::default());

    orchestrator
        .handle("u1", "s1", "Write one line about rain", None)
        .await
        .unwrap();

    assert_eq!(provider.calls("rerank_scores"), 0);
    let generation = &provider.requests(GENERATION)[0];
    assert!(!generation.prompt.contains("## Retrieved context"));
}

#[tokio::test]
async fn exhausted_budget_returns_best_revision_with_feedback_applied() {
    let db = test_db();
    let mut config = ZenithConfig::default();
    config.judge.max_revisions = 1;

    let provider = ScriptedProvider::new();
    provider
        .reply("route_decision", &route_json("reasoning", "high", false))
        .reply(GENERATION, "first draft")
        .reply(GENERATION, "second draft")
        .reply("judge_verdict", &verdict_json(65, false))
        .reply("judge_verdict", &verdict_json(78, false))
        .reply("profile_facts", r#"{"facts":[]}"#);
    let orchestrator = pipeline(&provider, &db, &config);

    let answer = orchestrator
        .handle("u1", "s1", "Compare three caching strategies", None)
        .await
        .unwrap();

    assert_eq!(answer.answer_text, "second draft");
    assert_eq!(answer.verdict_summary.status, HealingStatus::Exhausted);
    assert_eq!(answer.verdict_summary.score, 78);
    assert!(!answer.verdict_summary.accepted);
    assert_eq!(answer.verdict_summary.attempts, 2);

    let generations = provider.requests(GENERATION);
    assert_eq!(generations.len(), 2);
    assert!(!generations[0].prompt.contains("tighten the answer"));
    assert!(generations[1].prompt.contains("tighten the answer (was 65)"));
    assert_eq!(count(&db, "verdict_log"), 2);
}

#[tokio::test]
async fn safety_violation_returns_refusal_without_extraction() {
    let db = test_db();
    let provider = ScriptedProvider::new();
    provider
        .reply("route_decision", &route_json("reasoning", "low", false))
        .reply(GENERATION, "Here is how to do something harmful.")
        .reply("judge_verdict", &verdict_json(95, true));
    let orchestrator = pipeline(&provider, &db, &ZenithConfig::default());

    let answer = orchestrator
        .handle("u1", "s1", "Tell me something I should not know", None)
        .await
        .unwrap();

    assert_eq!(answer.answer_text, SAFE_REFUSAL);
    assert_eq!(answer.verdict_summary.status, HealingStatus::Refused);
    assert!(answer.extraction.is_none());
    assert_eq!(provider.calls(GENERATION), 1);
    assert_eq!(provider.calls("profile_facts"), 0);
}

#[tokio::test]
async fn router_failure_uses_conservative_default() {
    let db = test_db();
    let provider = ScriptedProvider::new();
    provider
        .fail("route_decision", ProviderError::Timeout(std::time::Duration::from_millis(5)))
        .reply(GENERATION, "A careful answer.")
        .reply("judge_verdict", &verdict_json(88, false))
        .reply("profile_facts", r#"{"facts":[]}"#);
    let orchestrator = pipeline(&provider, &db, &ZenithConfig::default());

    let answer = orchestrator
        .handle("u1", "s1", "Something ambiguous", None)
        .await
        .unwrap();

    assert_eq!(answer.route_decision, RouteDecision::conservative_default());
    assert_eq!(answer.route_decision.complexity, Complexity::Medium);
    assert_eq!(provider.calls("route_decision"), 2);
    assert_eq!(answer.answer_text, "A careful answer.");
}

#[tokio::test]
async fn judge_outage_passes_answer_through_unaudited() {
    let db = test_db();
    let provider = ScriptedProvider::new();
    provider
        .reply("route_decision", &route_json("coding", "low", false))
        .reply(GENERATION, "fn main() {}")
        .fail("judge_verdict", ProviderError::Transport("judge down".into()))
        .reply("profile_facts", r#"{"facts":[]}"#);
    let orchestrator = pipeline(&provider, &db, &ZenithConfig::default());

    let answer = orchestrator
        .handle("u1", "s1", "Smallest Rust program?", None)
        .await
        .unwrap();

    assert_eq!(answer.answer_text, "fn main() {}");
    assert!(answer.verdict_summary.accepted);
    assert!(!answer.verdict_summary.audited);
    assert_eq!(answer.verdict_summary.attempts, 1);
}

#[tokio::test]
async fn generation_outage_is_fatal_and_persists_nothing() {
    let db = test_db();
    let provider = ScriptedProvider::new();
    provider
        .reply("route_decision", &route_json("reasoning", "low", false))
        .fail(GENERATION, ProviderError::Transport("connection refused".into()));
    let orchestrator = pipeline(&provider, &db, &ZenithConfig::default());

    let err = orchestrator
        .handle("u1", "s1", "Explain RRF", None)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Provider(_)));
    assert_eq!(err.user_message(), TRY_AGAIN_MESSAGE);
    assert_eq!(provider.calls("judge_verdict"), 0);
    assert_eq!(count(&db, "turns"), 0);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_model_call() {
    let db = test_db();
    let provider = ScriptedProvider::new();
    let mut config = ZenithConfig::default();
    config.orchestrator.max_input_chars = 16;
    let orchestrator = pipeline(&provider, &db, &config);

    for (user, session, text) in [
        ("u1", "s1", "   "),
        ("", "s1", "hello"),
        ("u1", "", "hello"),
        ("u1", "s1", "this message is far too long"),
    ] {
        let err = orchestrator.handle(user, session, text, None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)), "{user:?} {session:?} {text:?}");
    }
    assert_eq!(provider.total_calls(), 0);
    assert_eq!(count(&db, "sessions"), 0);
}

#[tokio::test]
async fn persona_override_replaces_routed_persona() {
    let db = test_db();
    let provider = ScriptedProvider::new();
    provider
        .reply("route_decision", &route_json("coding", "low", false))
        .reply(GENERATION, "Arr, use a HashMap.")
        .reply("judge_verdict", &verdict_json(90, false))
        .reply("profile_facts", r#"{"facts":[]}"#);
    let orchestrator = pipeline(&provider, &db, &ZenithConfig::default());

    orchestrator
        .handle("u1", "s1", "Which map type should I use?", Some("You are a pirate engineer."))
        .await
        .unwrap();

    let system = provider.requests(GENERATION)[0].system.clone().unwrap();
    assert!(system.starts_with("You are a pirate engineer."));
}

#[tokio::test]
async fn extracted_facts_and_history_shape_the_next_turn() {
    let db = test_db();
    let provider = ScriptedProvider::new();
    provider
        .reply("route_decision", &route_json("coding", "low", false))
        .reply(GENERATION, "Welcome aboard.")
        .reply("judge_verdict", &verdict_json(90, false))
        .reply(
            "profile_facts",
            r#"{"facts":[{"key":"preferred_language","value":"Rust","confidence":0.9}]}"#,
        );
    let orchestrator = pipeline(&provider, &db, &ZenithConfig::default());

    let first = orchestrator
        .handle("u1", "s1", "I write Rust for a living at a fintech", None)
        .await
        .unwrap();
    first.extraction.unwrap().await.unwrap();

    let profile = orchestrator.memory().load_profile("u1").await.unwrap();
    assert_eq!(profile.len(), 1);
    assert_eq!(profile[0].key, "preferred_language");
    assert_eq!(profile[0].value, "Rust");

    orchestrator
        .handle("u1", "s1", "Which error crate should I use?", None)
        .await
        .unwrap();

    let second = &provider.requests(GENERATION)[1];
    assert!(second.prompt.contains("- preferred_language: Rust"));
    assert!(second.prompt.contains("I write Rust for a living at a fintech"));
}

#[tokio::test]
async fn session_of_another_user_is_rejected_without_history() {
    let db = test_db();
    let provider = ScriptedProvider::new();
    provider
        .reply("route_decision", &route_json("reasoning", "low", false))
        .reply(GENERATION, "Noted, I will keep that private.")
        .reply("judge_verdict", &verdict_json(90, false))
        .reply("profile_facts", r#"{"facts":[]}"#);
    let orchestrator = pipeline(&provider, &db, &ZenithConfig::default());

    let first = orchestrator
        .handle("alice", "s1", "My bank PIN is 4321, please remember it", None)
        .await
        .unwrap();
    first.extraction.unwrap().await.unwrap();
    let calls_before = provider.total_calls();

    let err = orchestrator
        .handle("mallory", "s1", "What did we talk about before?", None)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::InvalidInput(_)));
    assert_eq!(provider.total_calls(), calls_before);
    assert!(provider
        .requests(GENERATION)
        .iter()
        .all(|r| !r.prompt.contains("What did we talk about before?")));

    let store = SqliteStore::new(db.clone());
    let turns = store.recent_turns("s1", 20).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert!(turns.iter().all(|t| !t.text.contains("talk about before")));
}
