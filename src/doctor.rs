//! `sift doctor`: sanity checks for an index file.
//!
//! Checks run in order. A failure that makes the rest meaningless (missing
//! file, unreadable database, missing core tables) stops the run and leaves
//! a hint on the report.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::storage::sqlite::{REQUIRED_TABLES, SiftIndex};

/// Allowed distance of a stored vector's L2 norm from 1.
pub const NORM_TOLERANCE: f32 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoctorCheck {
    pub label: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoctorReport {
    pub index: PathBuf,
    pub checks: Vec<DoctorCheck>,
    /// Set when the run stopped early.
    pub hint: Option<String>,
}

impl DoctorReport {
    fn new(index: &Path) -> Self {
        Self {
            index: index.to_path_buf(),
            checks: Vec::new(),
            hint: None,
        }
    }

    fn check(&mut self, label: impl Into<String>, passed: bool, detail: impl Into<String>) -> bool {
        let check = DoctorCheck {
            label: label.into(),
            passed,
            detail: detail.into(),
        };
        debug!(label = %check.label, passed, detail = %check.detail, "doctor check");
        self.checks.push(check);
        passed
    }

    fn stop(mut self, hint: &str) -> Self {
        self.hint = Some(hint.to_string());
        self
    }

    pub fn passed(&self) -> bool {
        self.hint.is_none() && self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DoctorCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// Human-readable report, one line per check.
    pub fn render(&self) -> String {
        let mut out = format!("sift doctor: checking {}\n\n", self.index.display());
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            out.push_str(&format!("  [{status}] {}", check.label));
            if !check.detail.is_empty() {
                out.push_str(&format!(": {}", check.detail));
            }
            out.push('\n');
        }
        out.push('\n');
        match (&self.hint, self.passed()) {
            (Some(hint), _) => out.push_str(&format!("  {hint}\n")),
            (None, true) => out.push_str("All checks passed. Index is ready to serve.\n"),
            (None, false) => {
                out.push_str("Some checks failed. Fix the issues above and re-run sift doctor.\n")
            }
        }
        out
    }
}

/// Inspect the index at `path`.
pub fn run_doctor(path: &Path) -> DoctorReport {
    let mut report = DoctorReport::new(path);

    let exists = path.is_file();
    if !report.check("Index file exists", exists, path.display().to_string()) {
        return report.stop("Index file not found. Run: sift index ./your-docs -o sift-index.db");
    }

    let opened = SiftIndex::open(path).map_err(|e| e.to_string()).and_then(|index| {
        let tables = index.table_names().map_err(|e| e.to_string())?;
        Ok((index, tables))
    });
    let (index, tables) = match opened {
        Ok(found) => {
            report.check("Valid SQLite database", true, "");
            found
        }
        Err(e) => {
            report.check("Valid SQLite database", false, e);
            return report.stop("The file is not a readable SQLite database.");
        }
    };

    for table in REQUIRED_TABLES {
        report.check(
            format!("Table '{table}' exists"),
            tables.iter().any(|t| t == table),
            "",
        );
    }
    let core_present = ["chunks", "embeddings", "sift_metadata"]
        .iter()
        .all(|required| tables.iter().any(|t| t == required));
    if !core_present {
        return report.stop("Missing required tables. Re-run: sift index ./your-docs");
    }

    let chunk_count = match index.chunk_count() {
        Ok(n) => {
            report.check("Chunks indexed", n > 0, format!("{n} chunks"));
            Some(n)
        }
        Err(e) => {
            report.check("Chunks indexed", false, e.to_string());
            None
        }
    };

    match index.embedding_count() {
        Ok(n) => {
            report.check(
                "Embedding count matches chunks",
                Some(n) == chunk_count,
                format!("{n} embeddings, {} chunks", chunk_count.unwrap_or_default()),
            );
        }
        Err(e) => {
            report.check("Embedding count matches chunks", false, e.to_string());
        }
    }

    let metadata = match index.metadata() {
        Ok(meta) => meta,
        Err(e) => {
            report.check("Model metadata", false, e.to_string());
            Default::default()
        }
    };

    match index.first_vector() {
        Ok(Some(vector)) => {
            let dim = vector.values.len();
            let (ok, detail) = match metadata.embedding_dim {
                Some(expected) => (dim == expected, format!("{dim}-dim, expected {expected}")),
                None => (false, format!("{dim}-dim, no embedding_dim metadata")),
            };
            report.check("Embedding dimensions", ok, detail);

            let norm = vector.values.iter().map(|v| v * v).sum::<f32>().sqrt();
            report.check(
                "Vectors L2-normalized",
                (norm - 1.0).abs() < NORM_TOLERANCE,
                format!("norm={norm:.4}"),
            );
        }
        Ok(None) => {
            report.check("Embedding data", false, "no embeddings found");
        }
        Err(e) => {
            report.check("Embedding data", false, e.to_string());
        }
    }

    report.check(
        "Model metadata",
        metadata.model.is_some(),
        metadata.model.clone().unwrap_or_else(|| "missing".to_string()),
    );

    match index.fts_count() {
        Ok(n) => {
            report.check(
                "FTS5 index populated",
                Some(n) == chunk_count,
                format!("{n} FTS entries"),
            );
        }
        Err(e) => {
            report.check("FTS5 index", false, e.to_string());
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::lexical::Chunk;
    use crate::storage::sqlite::{META_EMBEDDING_DIM, META_MODEL};
    use tempfile::TempDir;

    fn build(dir: &TempDir, vectors: &[Vec<f32>], dim_meta: &str) -> PathBuf {
        let path = dir.path().join("sift-index.db");
        let index = SiftIndex::create(&path).unwrap();
        let chunks: Vec<Chunk> = (0..vectors.len())
            .map(|i| Chunk {
                id: i as i64 + 1,
                url: format!("doc/{i}"),
                title: format!("Doc {i}"),
                content: "Some content long enough to be indexed.".to_string(),
            })
            .collect();
        index.write_corpus(&chunks, vectors).unwrap();
        index.set_metadata(META_MODEL, "fnv1a-2").unwrap();
        index.set_metadata(META_EMBEDDING_DIM, dim_meta).unwrap();
        path
    }

    #[test]
    fn test_missing_file_stops_early() {
        let dir = TempDir::new().unwrap();
        let report = run_doctor(&dir.path().join("nope.db"));
        assert!(!report.passed());
        assert_eq!(report.checks.len(), 1);
        assert!(report.hint.as_deref().unwrap().contains("sift index"));
    }

    #[test]
    fn test_healthy_index_passes() {
        let dir = TempDir::new().unwrap();
        let path = build(&dir, &[vec![1.0, 0.0], vec![0.6, 0.8]], "2");
        let report = run_doctor(&path);
        assert!(report.passed(), "{}", report.render());
        assert!(report.render().contains("All checks passed"));
    }

    #[test]
    fn test_dimension_mismatch_and_unnormalized_vectors_fail() {
        let dir = TempDir::new().unwrap();
        let path = build(&dir, &[vec![2.0, 0.0]], "384");
        let report = run_doctor(&path);
        let failed: Vec<&str> = report.failures().map(|c| c.label.as_str()).collect();
        assert_eq!(failed, vec!["Embedding dimensions", "Vectors L2-normalized"]);
        assert!(report.hint.is_none());
    }

    #[test]
    fn test_non_sqlite_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bogus.db");
        std::fs::write(&path, b"definitely not a database file, just some text").unwrap();
        let report = run_doctor(&path);
        assert!(!report.passed());
        assert!(report.hint.is_some());
        assert!(!report.checks[1].passed);
    }
}
