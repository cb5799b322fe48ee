//! In-memory vector cache with exact dot-product ranking.
//!
//! The cache holds one precomputed embedding per chunk and ranks them against
//! a query embedding with a linear scan. Vectors are expected to be
//! L2-normalized by whoever produced them, so the dot product is the cosine
//! similarity. Nothing here re-normalizes.
//!
//! The cache is replaced wholesale by [`VectorCache::load`]; entries are never
//! mutated in place. Each load publishes a new immutable [`CacheSnapshot`]
//! behind an `Arc`, so a ranking pass that holds a snapshot sees exactly one
//! generation of the cache even if a replace lands mid-flight.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::lexical::ChunkId;

/// A precomputed document embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub chunk_id: ChunkId,
    pub values: Vec<f32>,
}

impl EmbeddingVector {
    pub fn new(chunk_id: ChunkId, values: Vec<f32>) -> Self {
        Self { chunk_id, values }
    }
}

/// One ranked hit produced by a single ranking call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub chunk_id: ChunkId,
    pub score: f32,
}

/// Errors raised when replacing the cache contents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error(
        "vector dimension mismatch at position {position} (chunk {chunk_id}): expected {expected}, got {actual}"
    )]
    DimensionMismatch {
        position: usize,
        chunk_id: ChunkId,
        expected: usize,
        actual: usize,
    },
}

/// Immutable view of one generation of the cache.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    /// Sorted by ascending chunk id.
    entries: Arc<Vec<EmbeddingVector>>,
    dimension: Option<usize>,
    generation: u64,
}

impl CacheSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shared dimension of every cached vector, `None` while empty.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of successful loads that produced this snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn contains(&self, chunk_id: ChunkId) -> bool {
        self.entries
            .binary_search_by_key(&chunk_id, |entry| entry.chunk_id)
            .is_ok()
    }

    /// Rank every cached vector against `query`.
    ///
    /// Returns at most `limit` hits ordered by descending score, ties broken by
    /// ascending chunk id. An empty cache or `limit == 0` yields an empty list.
    pub fn rank(&self, query: &[f32], limit: usize) -> Vec<ScoredResult> {
        if self.entries.is_empty() || limit == 0 {
            return Vec::new();
        }

        if let Some(dim) = self.dimension
            && dim != query.len()
        {
            warn!(
                expected = dim,
                actual = query.len(),
                "query embedding dimension does not match cache; returning no results"
            );
            return Vec::new();
        }

        let mut heap = BinaryHeap::with_capacity(limit + 1);
        for entry in self.entries.iter() {
            let score = dot_product(&entry.values, query);
            heap.push(std::cmp::Reverse(RankedEntry {
                score,
                chunk_id: entry.chunk_id,
            }));
            if heap.len() > limit {
                heap.pop();
            }
        }

        heap.into_sorted_vec()
            .into_iter()
            .map(|std::cmp::Reverse(entry)| ScoredResult {
                chunk_id: entry.chunk_id,
                score: entry.score,
            })
            .collect()
    }
}

/// The worker-owned vector cache.
///
/// Only the worker's cache-vectors handler writes to it; readers take a
/// [`CacheSnapshot`].
#[derive(Debug, Default)]
pub struct VectorCache {
    current: CacheSnapshot,
}

impl VectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire cache with `vectors`.
    ///
    /// Every vector must have the same length as the first one. On a mismatch
    /// the whole batch is rejected and the previous contents stay in place.
    /// Duplicate chunk ids keep the last vector supplied. Returns the number of
    /// distinct vectors now cached.
    pub fn load(&mut self, vectors: Vec<EmbeddingVector>) -> Result<usize, CacheError> {
        let dimension = vectors.first().map(|v| v.values.len());

        if let Some(expected) = dimension
            && let Some((position, bad)) = vectors
                .iter()
                .enumerate()
                .find(|(_, v)| v.values.len() != expected)
        {
            return Err(CacheError::DimensionMismatch {
                position,
                chunk_id: bad.chunk_id,
                expected,
                actual: bad.values.len(),
            });
        }

        let by_id: BTreeMap<ChunkId, EmbeddingVector> = vectors
            .into_iter()
            .map(|vector| (vector.chunk_id, vector))
            .collect();
        let entries: Vec<EmbeddingVector> = by_id.into_values().collect();
        let count = entries.len();

        self.current = CacheSnapshot {
            entries: Arc::new(entries),
            dimension,
            generation: self.current.generation + 1,
        };

        debug!(
            count,
            dimension = ?dimension,
            generation = self.current.generation,
            "vector cache replaced"
        );
        Ok(count)
    }

    /// Cheap handle to the current generation.
    pub fn snapshot(&self) -> CacheSnapshot {
        self.current.clone()
    }

    pub fn rank(&self, query: &[f32], limit: usize) -> Vec<ScoredResult> {
        self.current.rank(query, limit)
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.current.dimension()
    }

    pub fn generation(&self) -> u64 {
        self.current.generation()
    }
}

/// Heap entry for top-k selection. "Greater" means a better hit: higher score,
/// then lower chunk id.
#[derive(Debug, Clone, Copy)]
struct RankedEntry {
    score: f32,
    chunk_id: ChunkId,
}

impl PartialEq for RankedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankedEntry {}

impl PartialOrd for RankedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.chunk_id.cmp(&self.chunk_id))
    }
}

/// SIMD dot product over 8-lane chunks with a scalar tail.
///
/// Lane-wise accumulation reorders the additions, so results can differ from
/// a scalar loop by ~1e-7 relative error.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    use wide::f32x8;

    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let remainder_a = chunks_a.remainder();
    let remainder_b = chunks_b.remainder();

    let mut sum = f32x8::ZERO;
    for (ca, cb) in chunks_a.zip(chunks_b) {
        let lanes_a: [f32; 8] = std::array::from_fn(|i| ca[i]);
        let lanes_b: [f32; 8] = std::array::from_fn(|i| cb[i]);
        sum += f32x8::from(lanes_a) * f32x8::from(lanes_b);
    }

    let mut total: f32 = sum.reduce_add();
    for (x, y) in remainder_a.iter().zip(remainder_b) {
        total += x * y;
    }
    total
}
