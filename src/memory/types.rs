//! Core memory type definitions.
//!
//! Defines [`Turn`] (one utterance in a session), [`ShortTermBuffer`] (the
//! sliding window of recent turns), and [`ProfileFact`] (a durable, keyed
//! attribute of a user).

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// One recorded utterance. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

impl Turn {
    pub fn now(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::now(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::now(Role::Assistant, text)
    }
}

/// The most recent `capacity` turns of a session, oldest first.
///
/// Rebuilt per request and dropped at request end. `len() <= capacity`
/// always holds; pushing onto a full buffer evicts the oldest turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ShortTermBuffer {
    capacity: usize,
    turns: VecDeque<Turn>,
}

impl ShortTermBuffer {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            turns: VecDeque::with_capacity(capacity),
        }
    }

    /// Build from turns in chronological order, keeping only the tail.
    pub fn from_turns(capacity: usize, turns: impl IntoIterator<Item = Turn>) -> Self {
        let mut buffer = Self::new(capacity);
        for turn in turns {
            buffer.push(turn);
        }
        buffer
    }

    /// Append a turn, evicting the oldest if full. Returns the evicted turn.
    pub fn push(&mut self, turn: Turn) -> Option<Turn> {
        let evicted = if self.turns.len() == self.capacity {
            self.turns.pop_front()
        } else {
            None
        };
        self.turns.push_back(turn);
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// The last `n` turns, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &Turn> {
        self.turns.iter().skip(self.turns.len().saturating_sub(n))
    }
}

/// A durable attribute learned about a user, one per `(subject_user_id, key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileFact {
    pub subject_user_id: String,
    pub key: String,
    pub value: String,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// RFC 3339 timestamp of the last upsert.
    pub updated_at: String,
}

/// A fact to upsert, as returned by extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactUpdate {
    pub key: String,
    pub value: String,
    pub confidence: f64,
}

impl FactUpdate {
    pub fn new(key: &str, value: &str, confidence: f64) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            confidence,
        }
    }

    /// Normalise the key, trim the value and clamp confidence.
    ///
    /// `None` when key or value is empty afterwards.
    pub fn normalized(&self) -> Option<FactUpdate> {
        let key = normalize_key(&self.key);
        let value = self.value.trim();
        if key.is_empty() || value.is_empty() {
            return None;
        }
        let confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some(FactUpdate {
            key,
            value: value.to_string(),
            confidence,
        })
    }
}

/// `"Preferred Language "` → `"preferred_language"`.
pub fn normalize_key(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// A judge verdict as written to the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerdictRecord {
    /// 1-based generation attempt the verdict belongs to.
    pub attempt: usize,
    pub score: u8,
    pub accepted: bool,
    pub safety_violation: bool,
    pub audited: bool,
    /// Serialized dimensions and feedback.
    pub details: String,
}
