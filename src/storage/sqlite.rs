//! `SQLite` index file: schema, writers, and the search-side adapters.
//!
//! One file carries the whole corpus:
//!
//! - `chunks`: the chunk records (`id` is the rowid)
//! - `chunks_fts`: FTS5 external-content table over title and content,
//!   filled by an insert trigger
//! - `embeddings`: one little-endian `f32` blob per chunk
//! - `sift_metadata`: key/value pairs (`model`, `embedding_dim`)

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};
use thiserror::Error;
use tracing::{debug, info};

use crate::search::lexical::{Chunk, ChunkId, ChunkStore, LexicalSearch, build_fts_query};
use crate::search::vector_cache::EmbeddingVector;

pub const META_MODEL: &str = "model";
pub const META_EMBEDDING_DIM: &str = "embedding_dim";

/// Tables every index must carry.
pub const REQUIRED_TABLES: [&str; 4] = ["chunks", "chunks_fts", "embeddings", "sift_metadata"];

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY,
    url TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    title, content, content=chunks, content_rowid=id
);

CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, title, content)
    VALUES (new.id, new.title, new.content);
END;

CREATE TABLE IF NOT EXISTS embeddings (
    chunk_id INTEGER PRIMARY KEY REFERENCES chunks(id),
    vector BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS sift_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index not found at {0}")]
    NotFound(PathBuf),
    #[error("failed to open index at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("embedding for chunk {chunk_id} is {len} bytes, not a whole number of f32 values")]
    CorruptVector { chunk_id: ChunkId, len: usize },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Key/value metadata stored with the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMetadata {
    pub model: Option<String>,
    pub embedding_dim: Option<usize>,
}

/// Thread-safe handle to one index file.
pub struct SiftIndex {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SiftIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiftIndex").field("path", &self.path).finish()
    }
}

impl SiftIndex {
    /// Create (or extend) a writable index and apply the schema.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening index {} for writing", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA).context("applying index schema")?;
        info!(path = %path.display(), "created index");
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing index read-only.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        if !path.exists() {
            return Err(IndexError::NotFound(path.to_path_buf()));
        }
        let start = Instant::now();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| IndexError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            path = %path.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "opened index"
        );
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert chunks and their embeddings in one transaction.
    ///
    /// `vectors[i]` belongs to `chunks[i]`; ids come from the chunks.
    pub fn write_corpus(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        anyhow::ensure!(
            chunks.len() == vectors.len(),
            "chunk/vector count mismatch: {} chunks, {} vectors",
            chunks.len(),
            vectors.len()
        );
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut insert_chunk =
                tx.prepare("INSERT INTO chunks (id, url, title, content) VALUES (?1, ?2, ?3, ?4)")?;
            let mut insert_vector =
                tx.prepare("INSERT INTO embeddings (chunk_id, vector) VALUES (?1, ?2)")?;
            for (chunk, vector) in chunks.iter().zip(vectors) {
                insert_chunk
                    .execute(params![chunk.id, chunk.url, chunk.title, chunk.content])
                    .with_context(|| format!("inserting chunk {}", chunk.id))?;
                insert_vector
                    .execute(params![chunk.id, vector_to_blob(vector)])
                    .with_context(|| format!("inserting embedding for chunk {}", chunk.id))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO chunks (id, url, title, content) VALUES (?1, ?2, ?3, ?4)",
            params![chunk.id, chunk.url, chunk.title, chunk.content],
        )?;
        Ok(())
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO sift_metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn metadata(&self) -> Result<IndexMetadata, IndexError> {
        let conn = self.conn.lock();
        let get = |key: &str| -> Result<Option<String>, rusqlite::Error> {
            conn.query_row(
                "SELECT value FROM sift_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        };
        Ok(IndexMetadata {
            model: get(META_MODEL)?,
            embedding_dim: get(META_EMBEDDING_DIM)?.and_then(|v| v.parse().ok()),
        })
    }

    pub fn chunk_count(&self) -> Result<usize, IndexError> {
        self.count("SELECT COUNT(*) FROM chunks")
    }

    pub fn embedding_count(&self) -> Result<usize, IndexError> {
        self.count("SELECT COUNT(*) FROM embeddings")
    }

    pub fn fts_count(&self) -> Result<usize, IndexError> {
        self.count("SELECT COUNT(*) FROM chunks_fts")
    }

    fn count(&self, sql: &str) -> Result<usize, IndexError> {
        let n: i64 = self.conn.lock().query_row(sql, [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }

    /// Names of all tables and views in the file.
    pub fn table_names(&self) -> Result<Vec<String>, IndexError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type IN ('table','view')")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// First stored embedding, if any.
    pub fn first_vector(&self) -> Result<Option<EmbeddingVector>, IndexError> {
        let row: Option<(ChunkId, Vec<u8>)> = self
            .conn
            .lock()
            .query_row(
                "SELECT chunk_id, vector FROM embeddings ORDER BY chunk_id LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(chunk_id, blob)| decode_vector(chunk_id, &blob))
            .transpose()
    }

    /// Decode every stored embedding, ordered by chunk id.
    pub fn load_vectors(&self) -> Result<Vec<EmbeddingVector>, IndexError> {
        let start = Instant::now();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT chunk_id, vector FROM embeddings ORDER BY chunk_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, ChunkId>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut vectors = Vec::new();
        for row in rows {
            let (chunk_id, blob) = row?;
            vectors.push(decode_vector(chunk_id, &blob)?);
        }
        debug!(
            count = vectors.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded embeddings"
        );
        Ok(vectors)
    }
}

impl LexicalSearch for SiftIndex {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<ChunkId>> {
        let Some(fts_query) = build_fts_query(query) else {
            return Ok(Vec::new());
        };
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT rowid FROM chunks_fts WHERE chunks_fts MATCH ?1 LIMIT ?2")?;
        let ids = stmt
            .query_map(params![fts_query, limit as i64], |row| row.get(0))?
            .collect::<Result<Vec<ChunkId>, _>>()
            .with_context(|| format!("running FTS query {fts_query}"))?;
        Ok(ids)
    }
}

impl ChunkStore for SiftIndex {
    fn get_by_ids(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("SELECT id, url, title, content FROM chunks WHERE id IN ({placeholders})");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let chunks = stmt
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok(Chunk {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    title: row.get(2)?,
                    content: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }
}

/// Pack `f32` values as little-endian bytes.
pub fn vector_to_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Unpack little-endian `f32` bytes. `None` when the length is not a
/// multiple of four.
pub fn blob_to_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

fn decode_vector(chunk_id: ChunkId, blob: &[u8]) -> Result<EmbeddingVector, IndexError> {
    blob_to_vector(blob)
        .map(|values| EmbeddingVector::new(chunk_id, values))
        .ok_or(IndexError::CorruptVector {
            chunk_id,
            len: blob.len(),
        })
}
