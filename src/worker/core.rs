//! Compute side of the embedding channel.
//!
//! [`EmbedWorker`] is an actor: it owns the model handle and the
//! [`VectorCache`], reads encoded request frames from its inbox and writes
//! encoded response frames to its outbox. Model loading and query embedding
//! run on blocking threads; a panic in either is caught at the join point and
//! reported as an error frame, so the loop itself never unwinds.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::protocol::{
    ErrorCode, FramedMessage, Request, RequestId, Response, WorkerStatus, decode_message,
    encode_message,
};
use super::state::WorkerState;
use crate::search::embedder::{Embedder, EmbedderError, ModelProvider};
use crate::search::vector_cache::VectorCache;

type LoadOutcome = Result<Result<Arc<dyn Embedder>, EmbedderError>, JoinError>;

/// A model load running on the blocking pool.
struct PendingLoad {
    request_id: RequestId,
    started: Instant,
    handle: JoinHandle<Result<Arc<dyn Embedder>, EmbedderError>>,
}

enum Event {
    Frame(Option<Vec<u8>>),
    Loaded(RequestId, Instant, LoadOutcome),
}

enum Flow {
    Continue,
    Stop,
}

pub struct EmbedWorker {
    provider: Arc<dyn ModelProvider>,
    state: WorkerState,
    model: Option<Arc<dyn Embedder>>,
    cache: VectorCache,
    loading: Option<PendingLoad>,
    total_requests: u64,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
}

impl EmbedWorker {
    pub fn new(provider: Arc<dyn ModelProvider>, outbox: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            provider,
            state: WorkerState::Uninitialized,
            model: None,
            cache: VectorCache::new(),
            loading: None,
            total_requests: 0,
            outbox,
        }
    }

    /// Serve frames until `Shutdown`, or until every sender is dropped.
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Vec<u8>>) {
        info!(provider = self.provider.id(), "embedding worker started");

        loop {
            let event = tokio::select! {
                frame = inbox.recv() => Event::Frame(frame),
                (request_id, started, outcome) = wait_for_load(&mut self.loading) => {
                    Event::Loaded(request_id, started, outcome)
                }
            };

            let flow = match event {
                Event::Frame(Some(bytes)) => self.handle_frame(&bytes).await,
                Event::Frame(None) => {
                    debug!("worker inbox closed");
                    Flow::Stop
                }
                Event::Loaded(request_id, started, outcome) => {
                    self.loading = None;
                    self.complete_load(request_id, started, outcome)
                }
            };

            if matches!(flow, Flow::Stop) {
                break;
            }
        }

        info!(total_requests = self.total_requests, "embedding worker stopped");
    }

    async fn handle_frame(&mut self, bytes: &[u8]) -> Flow {
        let msg = match decode_message::<Request>(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "failed to decode worker request");
                return self.reply(0, Response::error(ErrorCode::InvalidInput, e.to_string()));
            }
        };

        self.total_requests += 1;
        let request_id = msg.request_id;
        debug!(request_id, kind = msg.payload.kind(), "worker request");

        match msg.payload {
            Request::Init => self.handle_init(request_id),

            Request::CacheVectors { vectors } => {
                let response = match self.cache.load(vectors) {
                    Ok(count) => {
                        info!(
                            count,
                            dimension = ?self.cache.dimension(),
                            generation = self.cache.generation(),
                            "vector cache replaced"
                        );
                        Response::VectorsCached { count }
                    }
                    Err(e) => {
                        warn!(error = %e, "rejected vector batch");
                        Response::error(ErrorCode::MalformedVectors, e.to_string())
                    }
                };
                self.reply(request_id, response)
            }

            Request::Search { query, limit } => {
                let response = self.handle_search(request_id, query, limit).await;
                self.reply(request_id, response)
            }

            Request::Status => {
                let status = WorkerStatus {
                    state: self.state.clone(),
                    model_id: self.model.as_ref().map(|m| m.id().to_string()),
                    cached_vectors: self.cache.len(),
                    dimension: self.cache.dimension(),
                    total_requests: self.total_requests,
                };
                self.reply(request_id, Response::Status(status))
            }

            Request::Shutdown => {
                info!(request_id, "worker shutdown requested");
                self.reply(request_id, Response::Shutdown);
                Flow::Stop
            }
        }
    }

    fn handle_init(&mut self, request_id: RequestId) -> Flow {
        if self.state.begin_init() {
            info!(request_id, provider = self.provider.id(), "loading embedding model");
            let provider = Arc::clone(&self.provider);
            self.loading = Some(PendingLoad {
                request_id,
                started: Instant::now(),
                handle: tokio::task::spawn_blocking(move || provider.load()),
            });
            return Flow::Continue;
        }

        match (&self.state, &self.model) {
            (WorkerState::Ready, Some(model)) => {
                let response = Response::Ready {
                    model_id: model.id().to_string(),
                    dimension: model.dimension(),
                };
                self.reply(request_id, response)
            }
            _ => {
                debug!(request_id, "model load already in flight");
                Flow::Continue
            }
        }
    }

    fn complete_load(&mut self, request_id: RequestId, started: Instant, outcome: LoadOutcome) -> Flow {
        let failure = match outcome {
            Ok(Ok(model)) => {
                self.state.finish_load();
                info!(
                    request_id,
                    model = model.id(),
                    dimension = model.dimension(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "embedding model ready"
                );
                let response = Response::Ready {
                    model_id: model.id().to_string(),
                    dimension: model.dimension(),
                };
                self.model = Some(model);
                return self.reply(request_id, response);
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("model load panicked: {e}"),
        };

        error!(request_id, error = %failure, "embedding model failed to load");
        self.state.fail_load(failure.clone());
        self.reply(request_id, Response::error(ErrorCode::ModelLoadFailed, failure))
    }

    async fn handle_search(&self, request_id: RequestId, query: String, limit: usize) -> Response {
        let model = match (&self.state, &self.model) {
            (WorkerState::Ready, Some(model)) => Arc::clone(model),
            _ => {
                debug!(request_id, state = self.state.label(), "search before model ready");
                return Response::error(
                    ErrorCode::NotReady,
                    format!("model is {}", self.state.label()),
                );
            }
        };

        let start = Instant::now();
        let embedded = tokio::task::spawn_blocking(move || model.embed(&query)).await;
        let vector = match embedded {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => {
                warn!(request_id, error = %e, "query embedding failed");
                return Response::error(ErrorCode::EmbeddingFailed, e.to_string());
            }
            Err(e) => {
                warn!(request_id, error = %e, "query embedding panicked");
                return Response::error(ErrorCode::EmbeddingFailed, format!("embedder panicked: {e}"));
            }
        };

        let snapshot = self.cache.snapshot();
        let results = snapshot.rank(&vector, limit);
        debug!(
            request_id,
            limit,
            cached = snapshot.len(),
            hits = results.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "semantic search complete"
        );
        Response::SemanticResults { results }
    }

    fn reply(&self, request_id: RequestId, response: Response) -> Flow {
        let frame = FramedMessage::new(request_id, response);
        let bytes = match encode_message(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(request_id, error = %e, "failed to encode worker response");
                return Flow::Continue;
            }
        };
        if self.outbox.send(bytes).is_err() {
            debug!(request_id, "response receiver dropped");
            return Flow::Stop;
        }
        Flow::Continue
    }
}

/// Resolve when the in-flight load finishes; never resolves without one.
async fn wait_for_load(slot: &mut Option<PendingLoad>) -> (RequestId, Instant, LoadOutcome) {
    match slot {
        Some(load) => {
            let outcome = (&mut load.handle).await;
            (load.request_id, load.started, outcome)
        }
        None => std::future::pending().await,
    }
}
