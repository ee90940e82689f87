//! SQLite implementations of the keyword (FTS5 BM25) and vector (sqlite-vec
//! KNN) indices, reading the `knowledge_chunks` corpus.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};

use super::{IndexHit, KeywordIndex, KnowledgeChunk, VectorIndex};
use crate::db::{with_conn, SharedConnection};
use crate::embedding::{embedding_to_bytes, EmbeddingProvider, EMBEDDING_DIM};

pub struct SqliteKeywordIndex {
    db: SharedConnection,
}

impl SqliteKeywordIndex {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl KeywordIndex for SqliteKeywordIndex {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexHit>> {
        let query = query.to_string();
        with_conn(&self.db, move |conn| fts_search(conn, &query, limit)).await
    }
}

pub struct SqliteVectorIndex {
    db: SharedConnection,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SqliteVectorIndex {
    pub fn new(db: SharedConnection, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { db, embedder }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexHit>> {
        let embedding = self
            .embedder
            .embed(query)
            .await
            .context("failed to embed query")?;
        let expected = self.embedder.dimensions();
        anyhow::ensure!(
            embedding.len() == expected,
            "query embedding has {} dimensions, expected {expected}",
            embedding.len()
        );
        with_conn(&self.db, move |conn| vector_search(conn, &embedding, limit)).await
    }
}

/// Write one chunk into the corpus table and both indices.
///
/// Used by the ingestion collaborator and test fixtures; the retrieval path
/// never writes.
pub fn insert_chunk(conn: &mut Connection, chunk: &KnowledgeChunk) -> Result<()> {
    anyhow::ensure!(
        chunk.embedding.len() == EMBEDDING_DIM,
        "chunk {} has {} dimensions, expected {EMBEDDING_DIM}",
        chunk.id,
        chunk.embedding.len()
    );
    let terms = chunk.keyword_terms.join(" ");
    let now = chrono::Utc::now().to_rfc3339();

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO knowledge_chunks (id, text, source, keyword_terms, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![chunk.id, chunk.text, chunk.source, terms, now],
    )
    .with_context(|| format!("failed to insert chunk {}", chunk.id))?;
    let rowid = tx.last_insert_rowid();

    // FTS5 external-content sync must reuse the corpus rowid.
    tx.execute(
        "INSERT INTO chunks_fts (rowid, text, keyword_terms, id) VALUES (?1, ?2, ?3, ?4)",
        params![rowid, chunk.text, terms, chunk.id],
    )?;
    tx.execute(
        "INSERT INTO chunks_vec (id, embedding) VALUES (?1, ?2)",
        params![chunk.id, embedding_to_bytes(&chunk.embedding)],
    )?;
    tx.commit()?;
    Ok(())
}

/// FTS5 BM25 keyword search.
///
/// FTS5 rank is negative (more negative = better), so it is negated into a
/// higher-is-better score.
fn fts_search(conn: &Connection, query_text: &str, limit: usize) -> Result<Vec<IndexHit>> {
    let escaped = escape_fts_query(query_text);
    if escaped.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT c.id, c.text, c.source, chunks_fts.rank \
         FROM chunks_fts JOIN knowledge_chunks c ON c.rowid = chunks_fts.rowid \
         WHERE chunks_fts MATCH ?1 ORDER BY chunks_fts.rank LIMIT ?2",
    )?;
    let hits = stmt
        .query_map(params![escaped, limit as i64], |row| {
            Ok(IndexHit {
                chunk_id: row.get(0)?,
                text: row.get(1)?,
                source: row.get(2)?,
                score: -row.get::<_, f64>(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hits)
}

/// Escape a user query for FTS5 MATCH syntax.
///
/// Each word is reduced to its alphanumeric characters, quoted, and the terms
/// are OR-ed so BM25 ranks partial matches instead of requiring every word.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| word.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{w}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Vector KNN search via sqlite-vec, hydrated from the corpus table.
///
/// Vectors are unit length, so L2 distance `d` maps to cosine similarity
/// `1 - d²/2`.
fn vector_search(conn: &Connection, embedding: &[f32], limit: usize) -> Result<Vec<IndexHit>> {
    let mut stmt = conn.prepare(
        "SELECT id, distance FROM chunks_vec \
         WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
    )?;
    let neighbours = stmt
        .query_map(params![embedding_to_bytes(embedding), limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let ids: Vec<&str> = neighbours.iter().map(|(id, _)| id.as_str()).collect();
    let mut chunks = fetch_chunks(conn, &ids)?;

    Ok(neighbours
        .iter()
        .filter_map(|(id, distance)| {
            chunks.remove(id.as_str()).map(|(text, source)| IndexHit {
                chunk_id: id.clone(),
                score: 1.0 - distance * distance / 2.0,
                text,
                source,
            })
        })
        .collect())
}

/// Batch-fetch `(text, source)` by chunk id.
fn fetch_chunks(conn: &Connection, ids: &[&str]) -> Result<HashMap<String, (String, String)>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT id, text, source FROM knowledge_chunks WHERE id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, (row.get(1)?, row.get(2)?)))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}
