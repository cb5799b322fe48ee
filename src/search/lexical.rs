//! Chunk records and the lexical/chunk-store collaborator seams.
//!
//! The keyword engine and the chunk store live outside the search core; the
//! orchestrator only sees these two traits. Lexical hits are unordered on
//! purpose: no relevance ranking happens on the keyword path.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Identifier of an indexed chunk (SQLite rowid in the shipped index).
pub type ChunkId = i64;

/// A unit of indexed document content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub url: String,
    pub title: String,
    pub content: String,
}

/// A chunk paired with its semantic similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub score: f32,
}

/// Keyword matcher. Returns matching chunk ids in whatever order the engine
/// produces them.
pub trait LexicalSearch: Send + Sync {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<ChunkId>>;
}

/// Random-access chunk lookup.
///
/// Ids that do not exist are silently skipped; the result order is up to the
/// store.
pub trait ChunkStore: Send + Sync {
    fn get_by_ids(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>>;
}

/// Build an FTS5 `MATCH` expression from free text.
///
/// Terms are split on whitespace, single-character terms are dropped, embedded
/// double quotes are removed, and every remaining term is quoted and OR-ed.
/// Returns `None` when nothing searchable is left.
pub fn build_fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|term| term.replace('"', ""))
        .filter(|term| term.chars().count() > 1)
        .map(|term| format!("\"{term}\""))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Reorder `chunks` to follow `ids`, dropping ids the store did not return.
pub(crate) fn order_by_ids(ids: &[ChunkId], chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut by_id: std::collections::HashMap<ChunkId, Chunk> =
        chunks.into_iter().map(|c| (c.id, c)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}
