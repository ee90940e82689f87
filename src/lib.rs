//! Zenith: a request-scoped cognitive orchestration pipeline.
//!
//! Each user turn flows through four stages before an answer reaches the
//! caller:
//!
//! | Stage | Module | Failure policy |
//! |-------|--------|----------------|
//! | Intent routing | [`router`] | retry hotter, then conservative default |
//! | Hybrid retrieval + rerank | [`knowledge`] | degrade to one source / fused order |
//! | Generate → audit → revise | [`generation`], [`judge`] | bounded; best-of on exhaustion |
//! | Dual-horizon memory | [`memory`] | extraction is detached and only logs |
//!
//! [`orchestrator::Orchestrator::handle`] ties them together and is the only
//! component that knows about the others.
//!
//! # Architecture
//!
//! - **Model**: any OpenAI-compatible chat endpoint behind the
//!   [`provider::ModelProvider`] trait, with JSON-schema structured output
//! - **Storage**: SQLite with FTS5 for keyword search and
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) for vector search
//! - **Fusion**: Reciprocal Rank Fusion, then a batched model rerank
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite database initialization, schema, migrations, and health checks
//! - [`error`]: Error taxonomy surfaced to callers
//! - [`embedding`]: Query embedding for the vector index
//! - [`provider`]: Model provider trait and OpenAI-compatible client
//! - [`knowledge`]: Keyword/vector indices, RRF fusion, reranking
//! - [`memory`]: Short-term window, long-term profile, fact extraction
//! - [`router`]: Per-turn strategy classification
//! - [`generation`]: Persona selection, prompt assembly, reasoning stripping
//! - [`judge`]: Answer audit and the self-healing loop
//! - [`orchestrator`]: The per-request pipeline

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod judge;
pub mod knowledge;
pub mod memory;
pub mod orchestrator;
pub mod provider;
pub mod router;
