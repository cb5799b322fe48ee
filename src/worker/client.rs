//! Caller side of the embedding channel.
//!
//! [`EmbeddingChannel::spawn`] starts an [`EmbedWorker`] on the current tokio
//! runtime and returns a cloneable handle for posting requests plus the
//! [`ChannelEvents`] stream of responses. Posting never waits on the worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use super::core::EmbedWorker;
use super::protocol::{
    DecodeError, EncodeError, ErrorCode, ErrorResponse, FramedMessage, Request, RequestId,
    Response, decode_message, encode_message,
};
use crate::search::embedder::ModelProvider;
use crate::search::vector_cache::EmbeddingVector;

/// Failures seen by callers of the channel.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("embedding failed: {0}")]
    EmbeddingCompute(String),
    #[error("malformed vectors: {0}")]
    MalformedVectors(String),
    #[error("model not ready: {0}")]
    NotReady(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("worker error: {0}")]
    Internal(String),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("embedding worker is not running")]
    Closed,
}

impl WorkerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::EmbeddingCompute(_) | WorkerError::NotReady(_))
    }
}

impl From<ErrorResponse> for WorkerError {
    fn from(err: ErrorResponse) -> Self {
        match err.code {
            ErrorCode::ModelLoadFailed => WorkerError::ModelLoad(err.message),
            ErrorCode::EmbeddingFailed => WorkerError::EmbeddingCompute(err.message),
            ErrorCode::MalformedVectors => WorkerError::MalformedVectors(err.message),
            ErrorCode::NotReady => WorkerError::NotReady(err.message),
            ErrorCode::InvalidInput => WorkerError::InvalidInput(err.message),
            ErrorCode::Internal => WorkerError::Internal(err.message),
        }
    }
}

/// Handle for posting requests to a running worker.
#[derive(Clone)]
pub struct EmbeddingChannel {
    inbox: mpsc::UnboundedSender<Vec<u8>>,
    request_counter: Arc<AtomicU64>,
}

/// Responses from the worker, in the order it produced them.
pub struct ChannelEvents {
    outbox: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl EmbeddingChannel {
    /// Start a worker for `provider` on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(provider: Arc<dyn ModelProvider>) -> (Self, ChannelEvents) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(EmbedWorker::new(provider, out_tx).run(in_rx));

        let channel = Self {
            inbox: in_tx,
            request_counter: Arc::new(AtomicU64::new(0)),
        };
        (channel, ChannelEvents { outbox: out_rx })
    }

    /// Allocate a fresh request id. Ids start at 1 and are shared by clones.
    pub fn next_request_id(&self) -> RequestId {
        self.request_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Most recently allocated request id (0 before the first).
    pub fn latest_request_id(&self) -> RequestId {
        self.request_counter.load(Ordering::Relaxed)
    }

    /// Encode and post one frame.
    pub fn post(&self, request_id: RequestId, request: Request) -> Result<(), WorkerError> {
        let kind = request.kind();
        let bytes = encode_message(&FramedMessage::new(request_id, request))?;
        self.inbox.send(bytes).map_err(|_| WorkerError::Closed)?;
        debug!(request_id, kind, "posted worker request");
        Ok(())
    }

    pub fn init(&self) -> Result<RequestId, WorkerError> {
        self.post_new(Request::Init)
    }

    pub fn cache_vectors(&self, vectors: Vec<EmbeddingVector>) -> Result<RequestId, WorkerError> {
        self.post_new(Request::CacheVectors { vectors })
    }

    /// Post a search under a caller-chosen id.
    pub fn search(
        &self,
        request_id: RequestId,
        query: impl Into<String>,
        limit: usize,
    ) -> Result<(), WorkerError> {
        self.post(
            request_id,
            Request::Search {
                query: query.into(),
                limit,
            },
        )
    }

    pub fn status(&self) -> Result<RequestId, WorkerError> {
        self.post_new(Request::Status)
    }

    pub fn shutdown(&self) -> Result<RequestId, WorkerError> {
        self.post_new(Request::Shutdown)
    }

    /// True once the worker loop has exited.
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    fn post_new(&self, request: Request) -> Result<RequestId, WorkerError> {
        let request_id = self.next_request_id();
        self.post(request_id, request)?;
        Ok(request_id)
    }
}

impl ChannelEvents {
    /// Next response frame; `None` once the worker has stopped.
    pub async fn recv(&mut self) -> Option<Result<FramedMessage<Response>, DecodeError>> {
        let bytes = self.outbox.recv().await?;
        Some(decode_message(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::embedder::HashModelProvider;

    #[test]
    fn test_error_response_maps_to_worker_error() {
        let err = WorkerError::from(ErrorResponse {
            code: ErrorCode::ModelLoadFailed,
            message: "offline".into(),
            retryable: false,
        });
        assert!(matches!(err, WorkerError::ModelLoad(ref m) if m == "offline"));
        assert!(!err.is_retryable());

        let err = WorkerError::from(ErrorResponse {
            code: ErrorCode::NotReady,
            message: "loading".into(),
            retryable: true,
        });
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_request_ids_are_shared_between_clones() {
        let (channel, _events) = EmbeddingChannel::spawn(Arc::new(HashModelProvider::new(4)));
        let other = channel.clone();
        assert_eq!(channel.latest_request_id(), 0);
        assert_eq!(channel.next_request_id(), 1);
        assert_eq!(other.next_request_id(), 2);
        assert_eq!(channel.latest_request_id(), 2);
    }

    #[tokio::test]
    async fn test_status_roundtrip_through_worker() {
        let (channel, mut events) = EmbeddingChannel::spawn(Arc::new(HashModelProvider::new(4)));
        let id = channel.status().unwrap();
        let frame = events.recv().await.unwrap().unwrap();
        assert_eq!(frame.request_id, id);
        assert!(matches!(frame.payload, Response::Status(_)));
    }

    #[tokio::test]
    async fn test_post_after_shutdown_reports_closed() {
        let (channel, mut events) = EmbeddingChannel::spawn(Arc::new(HashModelProvider::new(4)));
        channel.shutdown().unwrap();
        let ack = events.recv().await.unwrap().unwrap();
        assert_eq!(ack.payload, Response::Shutdown);
        assert!(events.recv().await.is_none());

        assert!(channel.is_closed());
        assert!(matches!(channel.init(), Err(WorkerError::Closed)));
    }
}
