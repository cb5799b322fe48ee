//! Runtime configuration.
//!
//! Defaults can be overridden through `SIFT_*` environment variables (a
//! `.env` file is honoured); command-line flags override both.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::search::embedder::{DEFAULT_HASH_DIMENSION, HashModelProvider, ModelProvider};
use crate::search::orchestrator::OrchestratorConfig;
use crate::storage::sqlite::IndexMetadata;

pub const DEFAULT_INDEX_PATH: &str = "sift-index.db";
pub const DEFAULT_LIMIT: usize = 10;

/// Which embedding model to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// all-MiniLM-L6-v2 via ONNX Runtime (requires the `fastembed` feature).
    Minilm,
    /// Deterministic feature hashing; no model download.
    Hash,
}

impl Default for ModelKind {
    fn default() -> Self {
        if cfg!(feature = "fastembed") {
            ModelKind::Minilm
        } else {
            ModelKind::Hash
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub index_path: PathBuf,
    pub default_limit: usize,
    pub semantic_timeout: Option<Duration>,
    pub model: ModelKind,
    pub hash_dimension: usize,
    /// Load vectors and the embedding model at open. Off for keyword-only
    /// use.
    pub semantic: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from(DEFAULT_INDEX_PATH),
            default_limit: DEFAULT_LIMIT,
            semantic_timeout: None,
            model: ModelKind::default(),
            hash_dimension: DEFAULT_HASH_DIMENSION,
            semantic: true,
        }
    }
}

impl EngineConfig {
    /// Load config from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(path) = dotenvy::var("SIFT_INDEX") {
            cfg.index_path = PathBuf::from(path);
        }

        if let Ok(val) = dotenvy::var("SIFT_DEFAULT_LIMIT")
            && let Ok(n) = val.parse()
        {
            cfg.default_limit = n;
        }

        if let Ok(val) = dotenvy::var("SIFT_SEMANTIC_TIMEOUT_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            cfg.semantic_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        if let Ok(val) = dotenvy::var("SIFT_MODEL") {
            match ModelKind::from_str(&val, true) {
                Ok(kind) => cfg.model = kind,
                Err(_) => warn!(value = %val, "ignoring unknown SIFT_MODEL"),
            }
        }

        if let Ok(val) = dotenvy::var("SIFT_HASH_DIM")
            && let Ok(n) = val.parse::<usize>()
            && n > 0
        {
            cfg.hash_dimension = n;
        }

        cfg
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            default_limit: self.default_limit,
            semantic_timeout: self.semantic_timeout,
        }
    }

    /// Provider for the configured model.
    pub fn provider(&self) -> Arc<dyn ModelProvider> {
        match self.model {
            ModelKind::Hash => Arc::new(HashModelProvider::new(self.hash_dimension)),
            ModelKind::Minilm => minilm_provider(),
        }
    }

    /// Provider matching the model an index was built with.
    ///
    /// Query vectors must come from the same model as the stored vectors, so
    /// a hash-built index (`fnv1a-<dim>`) always gets a hash provider of that
    /// dimension.
    pub fn provider_for_index(&self, metadata: &IndexMetadata) -> Arc<dyn ModelProvider> {
        if let Some(model) = metadata.model.as_deref()
            && let Some(dim) = model.strip_prefix("fnv1a-")
            && let Ok(dim) = dim.parse::<usize>()
        {
            if self.model != ModelKind::Hash {
                warn!(index_model = model, "index was built with the hash embedder; using it for queries");
            }
            return Arc::new(HashModelProvider::new(dim));
        }
        self.provider()
    }
}

#[cfg(feature = "fastembed")]
fn minilm_provider() -> Arc<dyn ModelProvider> {
    Arc::new(crate::search::fastembed_embedder::FastEmbedProvider::new(false))
}

#[cfg(not(feature = "fastembed"))]
fn minilm_provider() -> Arc<dyn ModelProvider> {
    Arc::new(UnavailableProvider)
}

/// Stands in for MiniLM in builds without ONNX support. Loading always fails,
/// so searches degrade to keyword results.
#[cfg(not(feature = "fastembed"))]
struct UnavailableProvider;

#[cfg(not(feature = "fastembed"))]
impl ModelProvider for UnavailableProvider {
    fn id(&self) -> &str {
        "all-MiniLM-L6-v2"
    }

    fn load(
        &self,
    ) -> Result<Arc<dyn crate::search::embedder::Embedder>, crate::search::embedder::EmbedderError>
    {
        Err(crate::search::embedder::EmbedderError::Unavailable(
            "built without the `fastembed` feature".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "SIFT_INDEX",
            "SIFT_DEFAULT_LIMIT",
            "SIFT_SEMANTIC_TIMEOUT_MS",
            "SIFT_MODEL",
            "SIFT_HASH_DIM",
        ] {
            // SAFETY: tests touching the environment are serialized.
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.index_path, PathBuf::from("sift-index.db"));
        assert_eq!(cfg.default_limit, 10);
        assert_eq!(cfg.semantic_timeout, None);
        assert_eq!(cfg.hash_dimension, 384);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        unsafe {
            std::env::set_var("SIFT_INDEX", "/tmp/docs.db");
            std::env::set_var("SIFT_DEFAULT_LIMIT", "25");
            std::env::set_var("SIFT_SEMANTIC_TIMEOUT_MS", "1500");
            std::env::set_var("SIFT_MODEL", "HASH");
            std::env::set_var("SIFT_HASH_DIM", "128");
        }
        let cfg = EngineConfig::from_env();
        clear_env();

        assert_eq!(cfg.index_path, PathBuf::from("/tmp/docs.db"));
        assert_eq!(cfg.default_limit, 25);
        assert_eq!(cfg.semantic_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(cfg.model, ModelKind::Hash);
        assert_eq!(cfg.hash_dimension, 128);
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_garbage() {
        clear_env();
        unsafe {
            std::env::set_var("SIFT_DEFAULT_LIMIT", "lots");
            std::env::set_var("SIFT_MODEL", "gpt");
            std::env::set_var("SIFT_HASH_DIM", "0");
        }
        let cfg = EngineConfig::from_env();
        clear_env();

        assert_eq!(cfg.default_limit, 10);
        assert_eq!(cfg.model, ModelKind::default());
        assert_eq!(cfg.hash_dimension, 384);
    }

    #[test]
    fn test_hash_index_gets_matching_provider() {
        let cfg = EngineConfig {
            model: ModelKind::Minilm,
            ..EngineConfig::default()
        };
        let meta = IndexMetadata {
            model: Some("fnv1a-64".into()),
            embedding_dim: Some(64),
        };
        let provider = cfg.provider_for_index(&meta);
        assert_eq!(provider.id(), "fnv1a-64");
        assert_eq!(provider.load().unwrap().dimension(), 64);
    }
}
