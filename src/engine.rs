//! Ready-to-use search engine over one index file.
//!
//! [`SiftEngine::open`] wires the pieces together in the order the worker
//! expects: open the index, spawn the worker, hand it every stored vector,
//! then ask it to load the model. It returns as soon as that is queued, so
//! keyword search works while the model is still loading. With
//! `EngineConfig::semantic` off neither step runs and the model is never
//! loaded.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::EngineConfig;
use crate::search::embedder::ModelProvider;
use crate::search::orchestrator::{QueryOrchestrator, SearchOptions};
use crate::storage::sqlite::{IndexMetadata, SiftIndex};
use crate::worker::{EmbeddingChannel, RequestId};

pub struct SiftEngine {
    index: Arc<SiftIndex>,
    metadata: IndexMetadata,
    vectors: usize,
    orchestrator: QueryOrchestrator,
}

impl SiftEngine {
    pub async fn open(config: &EngineConfig, provider: Arc<dyn ModelProvider>) -> Result<Self> {
        let start = Instant::now();
        let path = config.index_path.clone();
        let semantic = config.semantic;
        let (index, metadata, vectors) = tokio::task::spawn_blocking(move || {
            let index = SiftIndex::open(&path)?;
            let metadata = index.metadata()?;
            let vectors = if semantic { index.load_vectors()? } else { Vec::new() };
            anyhow::Ok((index, metadata, vectors))
        })
        .await
        .context("index loader task failed")?
        .with_context(|| format!("loading index {}", config.index_path.display()))?;

        let index = Arc::new(index);
        let vector_count = vectors.len();
        let (channel, events) = EmbeddingChannel::spawn(provider);
        let orchestrator = QueryOrchestrator::new(
            channel,
            events,
            index.clone(),
            index.clone(),
            config.orchestrator_config(),
        );
        if semantic {
            orchestrator.cache_vectors(vectors)?;
            orchestrator.init_model()?;
        }

        info!(
            index = %config.index_path.display(),
            semantic,
            vectors = vector_count,
            model = ?metadata.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "search engine opened"
        );

        Ok(Self {
            index,
            metadata,
            vectors: vector_count,
            orchestrator,
        })
    }

    pub fn search(&self, query: &str, options: SearchOptions) -> RequestId {
        self.orchestrator.search(query, options)
    }

    pub fn orchestrator(&self) -> &QueryOrchestrator {
        &self.orchestrator
    }

    pub fn index(&self) -> &SiftIndex {
        &self.index
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    /// Vectors handed to the worker at open.
    pub fn vector_count(&self) -> usize {
        self.vectors
    }

    /// Stop the worker and wait for outstanding callbacks.
    pub async fn shutdown(self) {
        self.orchestrator.close().await;
    }
}
