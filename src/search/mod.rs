//! Search layer facade.
//!
//! - **[`vector_cache`]**: in-memory document vectors and dot-product ranking.
//! - **[`lexical`]**: chunk records plus the keyword-search and chunk-store seams.
//! - **[`embedder`]**: embedding model traits and the FNV-1a hash embedder.
//! - **`fastembed_embedder`**: FastEmbed-backed MiniLM (feature `fastembed`).
//! - **[`orchestrator`]**: fans one query out to the keyword and semantic paths.

pub mod embedder;
#[cfg(feature = "fastembed")]
pub mod fastembed_embedder;
pub mod lexical;
pub mod orchestrator;
pub mod vector_cache;
