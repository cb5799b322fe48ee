//! Build an index file from a directory of markdown.

pub mod chunker;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::search::embedder::Embedder;
use crate::search::lexical::{Chunk, ChunkId};
use crate::storage::sqlite::{META_EMBEDDING_DIM, META_MODEL, SiftIndex};

pub use chunker::{RawChunk, chunk_directory, chunk_markdown};

/// Texts per embedding call.
pub const EMBED_BATCH_SIZE: usize = 32;

/// What [`build_index`] wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    pub output: PathBuf,
    pub documents: usize,
    pub chunks: usize,
    pub model: String,
    pub dimension: usize,
}

/// Chunk `content_dir`, embed every chunk and write a fresh index to
/// `output`. An existing file at `output` is replaced.
pub fn build_index(content_dir: &Path, output: &Path, embedder: &dyn Embedder) -> Result<IndexSummary> {
    if !content_dir.is_dir() {
        bail!("content directory not found: {}", content_dir.display());
    }

    let start = Instant::now();
    let raw = chunk_directory(content_dir)?;
    if raw.is_empty() {
        bail!(
            "no chunks found in {}; check that it contains .md files",
            content_dir.display()
        );
    }
    let mut urls: Vec<&str> = raw.iter().map(|c| c.url.as_str()).collect();
    urls.dedup();
    let documents = urls.len();
    info!(documents, chunks = raw.len(), "chunked content");

    let vectors = embed_all(&raw, embedder)?;

    if output.exists() {
        fs::remove_file(output)
            .with_context(|| format!("removing previous index {}", output.display()))?;
    }
    let index = SiftIndex::create(output)?;
    let chunks: Vec<Chunk> = raw
        .into_iter()
        .enumerate()
        .map(|(i, c)| Chunk {
            id: i as ChunkId + 1,
            url: c.url,
            title: c.title,
            content: c.content,
        })
        .collect();
    index.write_corpus(&chunks, &vectors)?;
    index.set_metadata(META_MODEL, embedder.id())?;
    index.set_metadata(META_EMBEDDING_DIM, &embedder.dimension().to_string())?;

    info!(
        output = %output.display(),
        chunks = chunks.len(),
        model = embedder.id(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "index written"
    );

    Ok(IndexSummary {
        output: output.to_path_buf(),
        documents,
        chunks: chunks.len(),
        model: embedder.id().to_string(),
        dimension: embedder.dimension(),
    })
}

fn embed_all(chunks: &[RawChunk], embedder: &dyn Embedder) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());
    for (batch_no, batch) in chunks.chunks(EMBED_BATCH_SIZE).enumerate() {
        let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
        let embedded = embedder.embed_batch(&texts).with_context(|| {
            format!(
                "embedding chunks {}..{}",
                batch_no * EMBED_BATCH_SIZE + 1,
                batch_no * EMBED_BATCH_SIZE + batch.len()
            )
        })?;
        debug!(batch = batch_no, size = batch.len(), "embedded batch");
        vectors.extend(embedded);
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::embedder::HashEmbedder;
    use tempfile::TempDir;

    fn write_docs(dir: &Path) {
        fs::write(
            dir.join("intro.md"),
            "# Intro\n\nSift answers keyword queries instantly.\n\n## Semantic\n\nEmbeddings upgrade results once the model is ready.\n",
        )
        .unwrap();
        fs::write(
            dir.join("pools.md"),
            "## Pooling\n\nConnection pools reuse database handles across requests.\n",
        )
        .unwrap();
    }

    #[test]
    fn test_build_index_writes_chunks_vectors_and_metadata() {
        let content = TempDir::new().unwrap();
        write_docs(content.path());
        let out = TempDir::new().unwrap();
        let output = out.path().join("sift-index.db");
        let embedder = HashEmbedder::new(64);

        let summary = build_index(content.path(), &output, &embedder).unwrap();
        assert_eq!(summary.documents, 2);
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.model, "fnv1a-64");

        let index = SiftIndex::open(&output).unwrap();
        assert_eq!(index.chunk_count().unwrap(), 3);
        assert_eq!(index.embedding_count().unwrap(), 3);
        let meta = index.metadata().unwrap();
        assert_eq!(meta.model.as_deref(), Some("fnv1a-64"));
        assert_eq!(meta.embedding_dim, Some(64));
        let vectors = index.load_vectors().unwrap();
        assert_eq!(vectors[0].chunk_id, 1);
        assert_eq!(vectors[0].values.len(), 64);
    }

    #[test]
    fn test_rebuild_replaces_existing_index() {
        let content = TempDir::new().unwrap();
        write_docs(content.path());
        let out = TempDir::new().unwrap();
        let output = out.path().join("sift-index.db");
        let embedder = HashEmbedder::new(16);

        build_index(content.path(), &output, &embedder).unwrap();
        let summary = build_index(content.path(), &output, &embedder).unwrap();
        assert_eq!(summary.chunks, 3);
        assert_eq!(SiftIndex::open(&output).unwrap().chunk_count().unwrap(), 3);
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let content = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let err = build_index(content.path(), &out.path().join("x.db"), &HashEmbedder::new(8))
            .unwrap_err();
        assert!(err.to_string().contains("no chunks found"));
    }
}
