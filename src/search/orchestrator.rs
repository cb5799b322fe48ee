//! Hybrid query orchestration.
//!
//! [`QueryOrchestrator::search`] fans one query out to two paths and returns
//! immediately:
//!
//! - **Lexical**: the keyword collaborator runs on a blocking thread and its
//!   hits are resolved into chunks and handed to `on_lexical`.
//! - **Semantic**: the query is posted to the embedding worker. While the
//!   model is still loading the request waits in a FIFO queue that is drained
//!   exactly once when the worker announces `Ready`. Ranked ids coming back
//!   are resolved through the chunk store, scored and handed to
//!   `on_semantic`.
//!
//! Each callback fires exactly once per search. Failures on either path are
//! logged and surface as an empty delivery, never as an error to the caller.
//!
//! ```ignore
//! let id = orchestrator.search(
//!     "connection pooling",
//!     SearchOptions::new()
//!         .limit(5)
//!         .on_lexical(|id, chunks| show_keyword_hits(id, chunks))
//!         .on_semantic(|id, scored| show_semantic_hits(id, scored)),
//! );
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::lexical::{Chunk, ChunkId, ChunkStore, LexicalSearch, ScoredChunk, order_by_ids};
use super::vector_cache::{EmbeddingVector, ScoredResult};
use crate::worker::{
    ChannelEvents, EmbeddingChannel, ErrorCode, FramedMessage, RequestId, Response, WorkerError,
    WorkerState,
};

/// Receives keyword hits in collaborator order.
pub type LexicalCallback = Box<dyn FnOnce(RequestId, Vec<Chunk>) + Send + 'static>;

/// Receives semantic hits sorted by descending score.
pub type SemanticCallback = Box<dyn FnOnce(RequestId, Vec<ScoredChunk>) + Send + 'static>;

/// Per-search options. Omitting a callback skips that path entirely.
#[derive(Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    on_lexical: Option<LexicalCallback>,
    on_semantic: Option<SemanticCallback>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn on_lexical(mut self, f: impl FnOnce(RequestId, Vec<Chunk>) + Send + 'static) -> Self {
        self.on_lexical = Some(Box::new(f));
        self
    }

    pub fn on_semantic(
        mut self,
        f: impl FnOnce(RequestId, Vec<ScoredChunk>) + Send + 'static,
    ) -> Self {
        self.on_semantic = Some(Box::new(f));
        self
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Result count when a search does not set one.
    pub default_limit: usize,
    /// Deliver an empty semantic result if the worker has not answered in
    /// time. `None` waits indefinitely.
    pub semantic_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            semantic_timeout: None,
        }
    }
}

/// A semantic search waiting for the model.
#[derive(Debug, Clone)]
struct PendingSearch {
    request_id: RequestId,
    query: String,
    limit: usize,
    arrival_order: u64,
}

/// Everything the submit path and the response pump must agree on. One lock
/// covers the state check, the enqueue and the drain on `Ready`.
#[derive(Default)]
struct DispatchState {
    worker: WorkerState,
    pending: VecDeque<PendingSearch>,
    awaiting: HashMap<RequestId, SemanticCallback>,
    next_arrival: u64,
    cached_vectors: Option<usize>,
    model_id: Option<String>,
}

struct Inner {
    channel: EmbeddingChannel,
    lexical: Arc<dyn LexicalSearch>,
    chunks: Arc<dyn ChunkStore>,
    config: OrchestratorConfig,
    runtime: Handle,
    dispatch: Mutex<DispatchState>,
}

/// Caller-side coordinator for hybrid searches.
pub struct QueryOrchestrator {
    inner: Arc<Inner>,
    pump: JoinHandle<()>,
}

impl QueryOrchestrator {
    /// Wire the orchestrator to a spawned worker.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(
        channel: EmbeddingChannel,
        events: ChannelEvents,
        lexical: Arc<dyn LexicalSearch>,
        chunks: Arc<dyn ChunkStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let runtime = Handle::current();
        let inner = Arc::new(Inner {
            channel,
            lexical,
            chunks,
            config,
            runtime: runtime.clone(),
            dispatch: Mutex::new(DispatchState::default()),
        });
        let pump = runtime.spawn(pump_responses(Arc::downgrade(&inner), events));
        Self { inner, pump }
    }

    /// Start a hybrid search and return its request id.
    ///
    /// Never blocks; results arrive through the callbacks in `options`.
    pub fn search(&self, query: &str, options: SearchOptions) -> RequestId {
        let request_id = self.inner.channel.next_request_id();
        let limit = options.limit.unwrap_or(self.inner.config.default_limit);
        debug!(
            request_id,
            limit,
            lexical = options.on_lexical.is_some(),
            semantic = options.on_semantic.is_some(),
            "search submitted"
        );

        if let Some(on_lexical) = options.on_lexical {
            self.inner
                .spawn_lexical(request_id, query.to_string(), limit, on_lexical);
        }
        if let Some(on_semantic) = options.on_semantic {
            Inner::submit_semantic(&self.inner, request_id, query.to_string(), limit, on_semantic);
        }
        request_id
    }

    /// Ask the worker to load its model.
    ///
    /// Starts a load when the model is not loaded yet or the previous load
    /// failed, and returns the init request id. Returns `Ok(None)` while a
    /// load is in flight or the model is already ready.
    pub fn init_model(&self) -> Result<Option<RequestId>, WorkerError> {
        let mut dispatch = self.inner.dispatch.lock();
        if !dispatch.worker.begin_init() {
            return Ok(None);
        }
        match self.inner.channel.init() {
            Ok(request_id) => {
                info!(request_id, "model load requested");
                Ok(Some(request_id))
            }
            Err(e) => {
                dispatch.worker.fail_load(e.to_string());
                let failed = drain_pending(&mut dispatch);
                drop(dispatch);
                deliver_empty(failed);
                Err(e)
            }
        }
    }

    /// Replace the worker's vector cache.
    pub fn cache_vectors(&self, vectors: Vec<EmbeddingVector>) -> Result<RequestId, WorkerError> {
        self.inner.channel.cache_vectors(vectors)
    }

    /// Ask the worker for a status frame.
    pub fn request_status(&self) -> Result<RequestId, WorkerError> {
        self.inner.channel.status()
    }

    /// Stop the worker. Searches still waiting receive empty deliveries.
    pub fn shutdown(&self) -> Result<(), WorkerError> {
        self.inner.channel.shutdown().map(|_| ())
    }

    /// Stop the worker and wait until every outstanding callback has fired.
    pub async fn close(self) {
        if let Err(e) = self.shutdown() {
            debug!(error = %e, "worker already stopped");
        }
        let QueryOrchestrator { inner, pump } = self;
        if let Err(e) = pump.await {
            warn!(error = %e, "response pump ended abnormally");
        }
        drop(inner);
    }

    /// Model state as last reported by the worker.
    pub fn state(&self) -> WorkerState {
        self.inner.dispatch.lock().worker.clone()
    }

    /// Semantic searches queued until the model is ready.
    pub fn pending_len(&self) -> usize {
        self.inner.dispatch.lock().pending.len()
    }

    /// Semantic searches whose callback has not fired yet (queued or sent).
    pub fn awaiting_len(&self) -> usize {
        self.inner.dispatch.lock().awaiting.len()
    }

    /// Vector count from the last accepted cache load.
    pub fn cached_vectors(&self) -> Option<usize> {
        self.inner.dispatch.lock().cached_vectors
    }

    pub fn model_id(&self) -> Option<String> {
        self.inner.dispatch.lock().model_id.clone()
    }

    /// Id of the most recent search; deliveries with an older id are stale.
    pub fn latest_request_id(&self) -> RequestId {
        self.inner.channel.latest_request_id()
    }
}

impl Inner {
    fn spawn_lexical(
        &self,
        request_id: RequestId,
        query: String,
        limit: usize,
        on_lexical: LexicalCallback,
    ) {
        let lexical = Arc::clone(&self.lexical);
        let chunks = Arc::clone(&self.chunks);
        self.runtime.spawn_blocking(move || {
            let start = Instant::now();
            let hits = match lexical_hits(lexical.as_ref(), chunks.as_ref(), &query, limit) {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(request_id, error = %e, "lexical search failed");
                    Vec::new()
                }
            };
            debug!(
                request_id,
                hits = hits.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "lexical results ready"
            );
            on_lexical(request_id, hits);
        });
    }

    fn submit_semantic(
        this: &Arc<Self>,
        request_id: RequestId,
        query: String,
        limit: usize,
        on_semantic: SemanticCallback,
    ) {
        let mut dispatch = this.dispatch.lock();
        let state = dispatch.worker.clone();
        match state {
            WorkerState::Ready => {
                dispatch.awaiting.insert(request_id, on_semantic);
                let sent = this.channel.search(request_id, query, limit);
                match sent {
                    Ok(()) => {
                        drop(dispatch);
                        Inner::arm_timeout(this, request_id);
                    }
                    Err(e) => {
                        warn!(request_id, error = %e, "failed to post semantic search");
                        let callback = dispatch.awaiting.remove(&request_id);
                        drop(dispatch);
                        deliver_empty(callback.into_iter().map(|cb| (request_id, cb)));
                    }
                }
            }
            WorkerState::Uninitialized | WorkerState::Loading => {
                let arrival_order = dispatch.next_arrival;
                dispatch.next_arrival += 1;
                dispatch.awaiting.insert(request_id, on_semantic);
                dispatch.pending.push_back(PendingSearch {
                    request_id,
                    query,
                    limit,
                    arrival_order,
                });
                debug!(
                    request_id,
                    arrival_order,
                    queued = dispatch.pending.len(),
                    "semantic search queued until model is ready"
                );
                drop(dispatch);
                // The deadline runs from submission, so a hung load still
                // answers.
                Inner::arm_timeout(this, request_id);
            }
            WorkerState::Failed(reason) => {
                debug!(request_id, reason = %reason, "model unavailable, semantic search skipped");
                drop(dispatch);
                on_semantic(request_id, Vec::new());
            }
        }
    }

    fn handle_response(this: &Arc<Self>, frame: FramedMessage<Response>) {
        let request_id = frame.request_id;
        match frame.payload {
            Response::Ready {
                model_id,
                dimension,
            } => Inner::on_ready(this, model_id, dimension),

            Response::VectorsCached { count } => {
                debug!(request_id, count, "worker cached vectors");
                this.dispatch.lock().cached_vectors = Some(count);
            }

            Response::SemanticResults { results } => {
                let callback = this.dispatch.lock().awaiting.remove(&request_id);
                match callback {
                    Some(callback) => this.spawn_resolve(request_id, results, callback),
                    None => debug!(request_id, "dropping semantic results with no waiter"),
                }
            }

            Response::Status(status) => {
                debug!(
                    request_id,
                    state = status.state.label(),
                    cached_vectors = status.cached_vectors,
                    total_requests = status.total_requests,
                    "worker status"
                );
            }

            Response::Shutdown => debug!(request_id, "worker acknowledged shutdown"),

            Response::Error(err) if err.code == ErrorCode::ModelLoadFailed => {
                warn!(request_id, error = %err.message, "embedding model failed to load");
                let mut dispatch = this.dispatch.lock();
                dispatch.worker = WorkerState::Failed(err.message);
                dispatch.model_id = None;
                let failed = drain_pending(&mut dispatch);
                drop(dispatch);
                deliver_empty(failed);
            }

            Response::Error(err) => {
                let callback = this.dispatch.lock().awaiting.remove(&request_id);
                let err = WorkerError::from(err);
                match callback {
                    Some(callback) => {
                        warn!(request_id, error = %err, "semantic search failed");
                        callback(request_id, Vec::new());
                    }
                    None => warn!(request_id, error = %err, "worker reported an error"),
                }
            }
        }
    }

    fn on_ready(this: &Arc<Self>, model_id: String, dimension: usize) {
        let mut dispatch = this.dispatch.lock();
        let was_ready = dispatch.worker.is_ready();
        dispatch.worker = WorkerState::Ready;
        dispatch.model_id = Some(model_id.clone());

        let queued = std::mem::take(&mut dispatch.pending);
        if !was_ready {
            info!(model = %model_id, dimension, queued = queued.len(), "semantic search ready");
        }

        // Dispatch under the lock so a search submitted right now cannot
        // overtake the queue. Entries that already timed out are skipped;
        // their deadline timers keep running for the rest.
        let mut failed = Vec::new();
        for pending in queued {
            if !dispatch.awaiting.contains_key(&pending.request_id) {
                continue;
            }
            debug!(
                request_id = pending.request_id,
                arrival_order = pending.arrival_order,
                "dispatching queued semantic search"
            );
            if let Err(e) = this
                .channel
                .search(pending.request_id, pending.query, pending.limit)
            {
                warn!(request_id = pending.request_id, error = %e, "failed to post queued search");
                if let Some(callback) = dispatch.awaiting.remove(&pending.request_id) {
                    failed.push((pending.request_id, callback));
                }
            }
        }
        drop(dispatch);

        deliver_empty(failed);
    }

    fn spawn_resolve(
        &self,
        request_id: RequestId,
        results: Vec<ScoredResult>,
        callback: SemanticCallback,
    ) {
        let chunks = Arc::clone(&self.chunks);
        self.runtime.spawn_blocking(move || {
            let ids: Vec<ChunkId> = results.iter().map(|r| r.chunk_id).collect();
            let fused = match chunks.get_by_ids(&ids) {
                Ok(records) => fuse_scores(&results, records),
                Err(e) => {
                    warn!(request_id, error = %e, "failed to resolve semantic hits");
                    Vec::new()
                }
            };
            debug!(request_id, hits = fused.len(), "semantic results ready");
            callback(request_id, fused);
        });
    }

    fn arm_timeout(this: &Arc<Self>, request_id: RequestId) {
        let Some(timeout) = this.config.semantic_timeout else {
            return;
        };
        let weak = Arc::downgrade(this);
        this.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let callback = {
                let mut dispatch = inner.dispatch.lock();
                dispatch.pending.retain(|p| p.request_id != request_id);
                dispatch.awaiting.remove(&request_id)
            };
            if let Some(callback) = callback {
                warn!(
                    request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "semantic search timed out"
                );
                callback(request_id, Vec::new());
            }
        });
    }

    /// Fail everything still waiting once no more responses can arrive.
    fn close(&self) {
        let mut dispatch = self.dispatch.lock();
        dispatch.pending.clear();
        let orphaned: Vec<_> = dispatch.awaiting.drain().collect();
        drop(dispatch);
        if !orphaned.is_empty() {
            debug!(count = orphaned.len(), "worker stopped with searches outstanding");
        }
        deliver_empty(orphaned);
    }
}

async fn pump_responses(weak: Weak<Inner>, mut events: ChannelEvents) {
    while let Some(frame) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        match frame {
            Ok(frame) => Inner::handle_response(&inner, frame),
            Err(e) => warn!(error = %e, "failed to decode worker response"),
        }
    }
    if let Some(inner) = weak.upgrade() {
        inner.close();
    }
    debug!("response pump stopped");
}

fn lexical_hits(
    lexical: &dyn LexicalSearch,
    chunks: &dyn ChunkStore,
    query: &str,
    limit: usize,
) -> anyhow::Result<Vec<Chunk>> {
    let ids = lexical.search(query, limit)?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let records = chunks.get_by_ids(&ids)?;
    Ok(order_by_ids(&ids, records))
}

/// Attach scores to resolved chunks and sort by descending score. Stable, so
/// equal scores keep the store's order.
fn fuse_scores(results: &[ScoredResult], chunks: Vec<Chunk>) -> Vec<ScoredChunk> {
    let scores: HashMap<ChunkId, f32> = results.iter().map(|r| (r.chunk_id, r.score)).collect();
    let mut fused: Vec<ScoredChunk> = chunks
        .into_iter()
        .map(|chunk| {
            let score = scores.get(&chunk.id).copied().unwrap_or(0.0);
            ScoredChunk { chunk, score }
        })
        .collect();
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused
}

fn drain_pending(dispatch: &mut DispatchState) -> Vec<(RequestId, SemanticCallback)> {
    let queued = std::mem::take(&mut dispatch.pending);
    queued
        .into_iter()
        .filter_map(|p| {
            dispatch
                .awaiting
                .remove(&p.request_id)
                .map(|cb| (p.request_id, cb))
        })
        .collect()
}

fn deliver_empty(callbacks: impl IntoIterator<Item = (RequestId, SemanticCallback)>) {
    for (request_id, callback) in callbacks {
        callback(request_id, Vec::new());
    }
}
