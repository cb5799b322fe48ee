//! Embedding model seam.
//!
//! [`Embedder`] is the query-time model: text in, fixed-dimension vector out.
//! Implementations must return mean-pooled, L2-normalized vectors; callers do
//! not re-normalize. [`ModelProvider`] performs the (possibly slow) model
//! acquisition and is invoked once per load attempt by the worker.
//!
//! Two implementations ship with the crate:
//! - [`HashEmbedder`]: FNV-1a feature hashing. Deterministic, instant, no
//!   model files. Useful for tests and offline indexes.
//! - `FastEmbedder` (feature `fastembed`): all-MiniLM-L6-v2 via ONNX Runtime.

use std::sync::Arc;

use thiserror::Error;

/// Errors from model acquisition or inference.
#[derive(Debug, Clone, Error)]
pub enum EmbedderError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A loaded embedding model.
pub trait Embedder: Send + Sync {
    /// Stable identifier stored alongside indexes (e.g. `fnv1a-384`).
    fn id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Embed one text. Output is mean-pooled and unit-length.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Acquires an [`Embedder`]. Called on a blocking thread.
pub trait ModelProvider: Send + Sync {
    fn id(&self) -> &str;

    fn load(&self) -> Result<Arc<dyn Embedder>, EmbedderError>;
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Default dimension, matching MiniLM so hash and ML indexes are shaped alike.
pub const DEFAULT_HASH_DIMENSION: usize = 384;

/// Feature-hashing embedder.
///
/// Lowercased alphanumeric tokens are hashed with FNV-1a into `dimension`
/// buckets with a hash-derived sign, averaged, then L2-normalized.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            id: format!("fnv1a-{dimension}"),
        }
    }

    pub fn default_dimension() -> Self {
        Self::new(DEFAULT_HASH_DIMENSION)
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(str::to_lowercase)
    }
}

impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut pooled = vec![0.0f32; self.dimension];
        let mut token_count = 0usize;

        for token in Self::tokens(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            pooled[bucket] += sign;
            token_count += 1;
        }

        if token_count == 0 {
            return Err(EmbedderError::InvalidInput(
                "text contains no embeddable tokens".to_string(),
            ));
        }

        for value in &mut pooled {
            *value /= token_count as f32;
        }
        l2_normalize(&mut pooled);
        Ok(pooled)
    }
}

/// Provider that hands out a [`HashEmbedder`]; never fails.
#[derive(Debug, Clone)]
pub struct HashModelProvider {
    embedder: HashEmbedder,
}

impl HashModelProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            embedder: HashEmbedder::new(dimension),
        }
    }
}

impl ModelProvider for HashModelProvider {
    fn id(&self) -> &str {
        self.embedder.id()
    }

    fn load(&self) -> Result<Arc<dyn Embedder>, EmbedderError> {
        Ok(Arc::new(self.embedder.clone()))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Scale `values` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in values.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedding_is_unit_length() {
        let embedder = HashEmbedder::default_dimension();
        let vector = embedder.embed("Connection pooling in async Rust").unwrap();
        assert_eq!(vector.len(), 384);
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedding_is_deterministic_and_case_insensitive() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("Vector Search").unwrap();
        let b = embedder.embed("vector   search!").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_embedding_rejects_empty_text() {
        let embedder = HashEmbedder::new(64);
        assert!(matches!(
            embedder.embed("  ... "),
            Err(EmbedderError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_embed_batch_preserves_order() {
        let embedder = HashEmbedder::new(32);
        let batch = embedder.embed_batch(&["alpha", "beta"]).unwrap();
        assert_eq!(batch[0], embedder.embed("alpha").unwrap());
        assert_eq!(batch[1], embedder.embed("beta").unwrap());
    }

    #[test]
    fn test_hash_provider_loads_matching_embedder() {
        let provider = HashModelProvider::new(128);
        let model = provider.load().unwrap();
        assert_eq!(provider.id(), "fnv1a-128");
        assert_eq!(model.id(), "fnv1a-128");
        assert_eq!(model.dimension(), 128);
    }

    #[test]
    fn test_l2_normalize_skips_zero_vector() {
        let mut zeros = vec![0.0f32; 4];
        l2_normalize(&mut zeros);
        assert_eq!(zeros, vec![0.0; 4]);

        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
    }
}
