use std::fs;
use std::path::{Path, PathBuf};

use sift_search::indexer::{IndexSummary, build_index};
use sift_search::search::embedder::HashEmbedder;
use tempfile::TempDir;

/// Dimension of hash-embedded fixture indexes. Small keeps tests fast.
#[allow(dead_code)]
pub const FIXTURE_DIM: usize = 64;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A content directory plus an index built from it.
#[allow(dead_code)]
pub struct FixtureCorpus {
    pub dir: TempDir,
    pub summary: IndexSummary,
}

#[allow(dead_code)]
impl FixtureCorpus {
    /// Write the standard docs corpus and hash-index it.
    pub fn build() -> Self {
        Self::build_with(&standard_docs())
    }

    /// Write `docs` (relative path, markdown) under `content/` and index them.
    pub fn build_with(docs: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let content = dir.path().join("content");
        for (rel, text) in docs {
            let path = content.join(rel);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(&path, text).expect("write doc");
        }
        let output = dir.path().join("sift-index.db");
        let summary =
            build_index(&content, &output, &HashEmbedder::new(FIXTURE_DIM)).expect("build index");
        Self { dir, summary }
    }

    pub fn index_path(&self) -> PathBuf {
        self.summary.output.clone()
    }

    pub fn content_dir(&self) -> PathBuf {
        self.dir.path().join("content")
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// Three small documents with distinct vocabulary per section.
#[allow(dead_code)]
pub fn standard_docs() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "pooling.md",
            "# Connection Pooling\n\n\
             ## Why pool connections\n\n\
             Opening a database connection is slow, so a pool keeps idle connections ready for reuse.\n\n\
             ## Sizing the pool\n\n\
             Set the maximum pool size from the number of worker threads and the database limit.\n",
        ),
        (
            "guides/retries.md",
            "# Retries\n\n\
             ## Backoff strategy\n\n\
             Retry failed requests with exponential backoff and jitter to avoid thundering herds.\n",
        ),
        (
            "guides/caching.md",
            "# Caching\n\n\
             ## Cache invalidation\n\n\
             Invalidate cached entries when the source record changes, or expire them after a ttl.\n",
        ),
    ]
}
