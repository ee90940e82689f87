//! Persistence of turns, profile facts, and accounting.
//!
//! [`Persistence`] is the storage contract the memory store and orchestrator
//! consume; [`SqliteStore`] implements it on the shared SQLite connection.
//! Profile upserts run inside one transaction per batch so concurrent
//! extraction jobs for the same user never interleave partial writes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};

use super::types::{FactUpdate, ProfileFact, Role, Turn, VerdictRecord};
use crate::db::{with_conn, SharedConnection};
use crate::provider::TokenUsage;

/// Turn append/read and profile-fact upsert/read.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Register the session, or bump its `last_active`.
    ///
    /// Returns `false`, touching nothing, when the session id is already
    /// registered to a different user.
    async fn touch_session(&self, user_id: &str, session_id: &str) -> Result<bool>;

    async fn append_turn(&self, session_id: &str, turn: &Turn) -> Result<()>;

    /// The last `limit` turns, oldest first.
    async fn recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>>;

    /// Upsert by `(user_id, key)`. Returns the number of facts written.
    async fn upsert_facts(&self, user_id: &str, facts: &[FactUpdate]) -> Result<usize>;

    async fn load_profile(&self, user_id: &str) -> Result<Vec<ProfileFact>>;

    /// Best-effort token accounting.
    async fn record_usage(
        &self,
        _user_id: &str,
        _session_id: &str,
        _model: &str,
        _usage: &TokenUsage,
    ) -> Result<()> {
        Ok(())
    }

    /// Best-effort judge audit trail.
    async fn record_verdict(&self, _session_id: &str, _verdict: &VerdictRecord) -> Result<()> {
        Ok(())
    }
}

pub struct SqliteStore {
    db: SharedConnection,
}

impl SqliteStore {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Persistence for SqliteStore {
    async fn touch_session(&self, user_id: &str, session_id: &str) -> Result<bool> {
        let (user_id, session_id) = (user_id.to_string(), session_id.to_string());
        with_conn(&self.db, move |conn| touch_session(conn, &user_id, &session_id)).await
    }

    async fn append_turn(&self, session_id: &str, turn: &Turn) -> Result<()> {
        let (session_id, turn) = (session_id.to_string(), turn.clone());
        with_conn(&self.db, move |conn| insert_turn(conn, &session_id, &turn)).await
    }

    async fn recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let session_id = session_id.to_string();
        with_conn(&self.db, move |conn| recent_turns(conn, &session_id, limit)).await
    }

    async fn upsert_facts(&self, user_id: &str, facts: &[FactUpdate]) -> Result<usize> {
        let (user_id, facts) = (user_id.to_string(), facts.to_vec());
        with_conn(&self.db, move |conn| upsert_facts(conn, &user_id, &facts)).await
    }

    async fn load_profile(&self, user_id: &str) -> Result<Vec<ProfileFact>> {
        let user_id = user_id.to_string();
        with_conn(&self.db, move |conn| load_profile(conn, &user_id)).await
    }

    async fn record_usage(
        &self,
        user_id: &str,
        session_id: &str,
        model: &str,
        usage: &TokenUsage,
    ) -> Result<()> {
        let row = (
            user_id.to_string(),
            session_id.to_string(),
            model.to_string(),
            *usage,
        );
        with_conn(&self.db, move |conn| {
            let (user_id, session_id, model, usage) = row;
            conn.execute(
                "INSERT INTO usage_log \
                 (user_id, session_id, model, input_tokens, output_tokens, total_tokens, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user_id,
                    session_id,
                    model,
                    usage.input_tokens,
                    usage.output_tokens,
                    usage.total_tokens,
                    now()
                ],
            )
            .context("failed to record usage")?;
            Ok(())
        })
        .await
    }

    async fn record_verdict(&self, session_id: &str, verdict: &VerdictRecord) -> Result<()> {
        let (session_id, verdict) = (session_id.to_string(), verdict.clone());
        with_conn(&self.db, move |conn| {
            conn.execute(
                "INSERT INTO verdict_log \
                 (session_id, attempt, score, accepted, safety_violation, audited, details, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session_id,
                    verdict.attempt as i64,
                    verdict.score,
                    verdict.accepted,
                    verdict.safety_violation,
                    verdict.audited,
                    verdict.details,
                    now()
                ],
            )
            .context("failed to record verdict")?;
            Ok(())
        })
        .await
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn touch_session(conn: &Connection, user_id: &str, session_id: &str) -> Result<bool> {
    let now = now();
    let changed = conn
        .execute(
            "INSERT INTO sessions (id, user_id, created_at, last_active) VALUES (?1, ?2, ?3, ?3) \
             ON CONFLICT(id) DO UPDATE SET last_active = excluded.last_active \
             WHERE sessions.user_id = excluded.user_id",
            params![session_id, user_id, now],
        )
        .with_context(|| format!("failed to touch session {session_id}"))?;
    Ok(changed == 1)
}

fn insert_turn(conn: &Connection, session_id: &str, turn: &Turn) -> Result<()> {
    conn.execute(
        "INSERT INTO turns (session_id, role, text, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![session_id, turn.role.as_str(), turn.text, turn.timestamp],
    )
    .with_context(|| format!("failed to append turn to session {session_id}"))?;
    Ok(())
}

fn recent_turns(conn: &Connection, session_id: &str, limit: usize) -> Result<Vec<Turn>> {
    let mut stmt = conn.prepare(
        "SELECT role, text, created_at FROM turns \
         WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let mut turns = stmt
        .query_map(params![session_id, limit as i64], |row| {
            let role: String = row.get(0)?;
            Ok((role, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .map(|row| -> Result<Turn> {
            let (role, text, timestamp) = row?;
            let role = role.parse::<Role>().map_err(anyhow::Error::msg)?;
            Ok(Turn {
                role,
                text,
                timestamp,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    turns.reverse();
    Ok(turns)
}

fn upsert_facts(conn: &mut Connection, user_id: &str, facts: &[FactUpdate]) -> Result<usize> {
    let now = now();
    let tx = conn.transaction()?;
    let mut written = 0;
    for fact in facts.iter().filter_map(FactUpdate::normalized) {
        tx.execute(
            "INSERT INTO profile_facts (user_id, key, value, confidence, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(user_id, key) DO UPDATE SET \
             value = excluded.value, confidence = excluded.confidence, updated_at = excluded.updated_at",
            params![user_id, fact.key, fact.value, fact.confidence, now],
        )
        .with_context(|| format!("failed to upsert fact {}", fact.key))?;
        written += 1;
    }
    tx.commit()?;
    Ok(written)
}

fn load_profile(conn: &Connection, user_id: &str) -> Result<Vec<ProfileFact>> {
    let mut stmt = conn.prepare(
        "SELECT key, value, confidence, updated_at FROM profile_facts \
         WHERE user_id = ?1 ORDER BY key",
    )?;
    let facts = stmt
        .query_map(params![user_id], |row| {
            Ok(ProfileFact {
                subject_user_id: user_id.to_string(),
                key: row.get(0)?,
                value: row.get(1)?,
                confidence: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(facts)
}
