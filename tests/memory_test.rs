mod helpers;

use std::sync::Arc;

use helpers::{test_db, ScriptedProvider};
use zenith::config::MemoryConfig;
use zenith::db::{self, SharedConnection};
use zenith::memory::{Exchange, FactUpdate, MemoryStore, Persistence, Role, SqliteStore, Turn};

fn memory_on(db: &SharedConnection, provider: &Arc<ScriptedProvider>) -> MemoryStore {
    MemoryStore::new(
        Arc::new(SqliteStore::new(db.clone())),
        provider.clone(),
        MemoryConfig::default(),
    )
}

fn exchange(user: &str) -> Exchange {
    Exchange {
        user: user.into(),
        assistant: "Got it.".into(),
    }
}

#[tokio::test]
async fn window_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zenith.db");

    {
        let db = db::share(db::open_database(&path).unwrap());
        let memory = memory_on(&db, &ScriptedProvider::new());
        for i in 1..=25 {
            let turn = if i % 2 == 1 {
                Turn::user(format!("message {i}"))
            } else {
                Turn::assistant(format!("message {i}"))
            };
            memory.append("s1", &turn).await.unwrap();
        }
    }

    let db = db::share(db::open_database(&path).unwrap());
    let memory = memory_on(&db, &ScriptedProvider::new());
    let buffer = memory.load_recent("s1").await.unwrap();

    assert_eq!(buffer.len(), 20);
    let texts: Vec<&str> = buffer.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts.first(), Some(&"message 6"));
    assert_eq!(texts.last(), Some(&"message 25"));
    assert_eq!(buffer.iter().last().map(|t| t.role), Some(Role::User));
}

#[tokio::test]
async fn sessions_do_not_share_history() {
    let db = test_db();
    let memory = memory_on(&db, &ScriptedProvider::new());
    memory.append("a", &Turn::user("only in a")).await.unwrap();
    memory.append("b", &Turn::user("only in b")).await.unwrap();

    let a = memory.load_recent("a").await.unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(a.iter().next().map(|t| t.text.as_str()), Some("only in a"));
}

#[tokio::test]
async fn later_extraction_overwrites_only_its_keys() {
    let db = test_db();
    let provider = ScriptedProvider::new();
    provider
        .reply(
            "profile_facts",
            r#"{"facts":[{"key":"role","value":"analyst"},{"key":"city","value":"Lisbon"}]}"#,
        )
        .reply(
            "profile_facts",
            r#"{"facts":[{"key":"role","value":"platform engineer","confidence":0.95}]}"#,
        );
    let memory = memory_on(&db, &provider);

    memory
        .extract_and_upsert_facts("u1", &exchange("I'm an analyst based in Lisbon"))
        .await
        .unwrap();
    memory
        .extract_and_upsert_facts("u1", &exchange("I moved to the platform team last week"))
        .await
        .unwrap();

    let profile = memory.load_profile("u1").await.unwrap();
    let pairs: Vec<(&str, &str)> = profile
        .iter()
        .map(|f| (f.key.as_str(), f.value.as_str()))
        .collect();
    assert_eq!(pairs, vec![("city", "Lisbon"), ("role", "platform engineer")]);

    // The second call saw the first call's facts.
    let second = &provider.requests("profile_facts")[1];
    assert!(second.prompt.contains("- role: analyst"));
}

#[tokio::test]
async fn concurrent_extractions_for_one_user_both_land() {
    let db = test_db();
    let provider = ScriptedProvider::new();
    provider
        .reply("profile_facts", r#"{"facts":[{"key":"editor","value":"helix"}]}"#)
        .reply("profile_facts", r#"{"facts":[{"key":"shell","value":"fish"}]}"#);
    let memory = memory_on(&db, &provider);

    let first = memory.spawn_extraction("u1".into(), exchange("I edit everything in helix"));
    let second = memory.spawn_extraction("u1".into(), exchange("My shell of choice is fish"));
    first.await.unwrap();
    second.await.unwrap();

    let keys: Vec<String> = memory
        .load_profile("u1")
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.key)
        .collect();
    assert_eq!(keys, vec!["editor".to_string(), "shell".to_string()]);
}

#[tokio::test]
async fn blank_facts_are_dropped_on_upsert() {
    let db = test_db();
    let store = SqliteStore::new(db);
    let written = store
        .upsert_facts(
            "u1",
            &[
                FactUpdate::new("  ", "value", 0.5),
                FactUpdate::new("timezone", "   ", 0.5),
                FactUpdate::new("Time Zone", "UTC+1", 1.7),
            ],
        )
        .await
        .unwrap();

    assert_eq!(written, 1);
    let profile = store.load_profile("u1").await.unwrap();
    assert_eq!(profile[0].key, "time_zone");
    assert_eq!(profile[0].confidence, 1.0);
}
