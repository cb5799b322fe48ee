//! FastEmbed-backed MiniLM embedder (feature `fastembed`).
//!
//! Loads `all-MiniLM-L6-v2` through ONNX Runtime. FastEmbed applies mean
//! pooling and L2 normalization, which is exactly the contract the vector
//! cache relies on.

use std::sync::Arc;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use tracing::info;

use super::embedder::{Embedder, EmbedderError, ModelProvider};

pub const MINILM_ID: &str = "all-MiniLM-L6-v2";
pub const MINILM_DIMENSION: usize = 384;

/// Inference handle. The ONNX session needs exclusive access per call.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
}

impl Embedder for FastEmbedder {
    fn id(&self) -> &str {
        MINILM_ID
    }

    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if text.trim().is_empty() {
            return Err(EmbedderError::InvalidInput("empty text".to_string()));
        }
        let mut model = self.model.lock();
        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbedderError::EmbeddingFailed(e.to_string()))?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedderError::EmbeddingFailed("no embedding returned".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut model = self.model.lock();
        let embeddings = model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbedderError::EmbeddingFailed(e.to_string()))?;
        if embeddings.len() != texts.len() {
            return Err(EmbedderError::EmbeddingFailed(format!(
                "embedding count mismatch: expected {}, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}

/// Downloads (first run) and initializes MiniLM.
#[derive(Debug, Clone, Default)]
pub struct FastEmbedProvider {
    show_download_progress: bool,
}

impl FastEmbedProvider {
    pub fn new(show_download_progress: bool) -> Self {
        Self {
            show_download_progress,
        }
    }
}

impl ModelProvider for FastEmbedProvider {
    fn id(&self) -> &str {
        MINILM_ID
    }

    fn load(&self) -> Result<Arc<dyn Embedder>, EmbedderError> {
        let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(self.show_download_progress);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| EmbedderError::Unavailable(format!("failed to load {MINILM_ID}: {e}")))?;
        info!(model = MINILM_ID, dimension = MINILM_DIMENSION, "embedding model loaded");
        Ok(Arc::new(FastEmbedder {
            model: Mutex::new(model),
        }))
    }
}
