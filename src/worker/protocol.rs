//! Message protocol between the caller and the embedding worker.
//!
//! Every message crosses the boundary as a MessagePack-encoded
//! [`FramedMessage`]. Encoding on one side and decoding on the other gives
//! copy semantics: the worker never shares memory with the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::WorkerState;
use crate::search::vector_cache::{EmbeddingVector, ScoredResult};

/// Protocol version. Frames carrying another version are rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Correlates a response with the request that caused it.
pub type RequestId = u64;

/// Requests accepted by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Start model acquisition (single-flight).
    Init,

    /// Replace the vector cache wholesale.
    CacheVectors { vectors: Vec<EmbeddingVector> },

    /// Embed `query` and rank it against the cache.
    Search { query: String, limit: usize },

    /// Report lifecycle state and cache size.
    Status,

    /// Acknowledge, then stop the worker loop.
    Shutdown,
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Init => "init",
            Request::CacheVectors { .. } => "cache_vectors",
            Request::Search { .. } => "search",
            Request::Status => "status",
            Request::Shutdown => "shutdown",
        }
    }
}

/// Responses emitted by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// The model is loaded and searches are accepted.
    Ready { model_id: String, dimension: usize },

    /// The cache now holds `count` vectors.
    VectorsCached { count: usize },

    /// Ranked hits for a `Search` request.
    SemanticResults { results: Vec<ScoredResult> },

    Status(WorkerStatus),

    Shutdown,

    Error(ErrorResponse),
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Ready { .. } => "ready",
            Response::VectorsCached { .. } => "vectors_cached",
            Response::SemanticResults { .. } => "semantic_results",
            Response::Status(_) => "status",
            Response::Shutdown => "shutdown",
            Response::Error(_) => "error",
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error(ErrorResponse {
            retryable: code.is_retryable(),
            code,
            message: message.into(),
        })
    }
}

/// Snapshot of the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub model_id: Option<String>,
    pub cached_vectors: usize,
    pub dimension: Option<usize>,
    pub total_requests: u64,
}

/// Structured failure. Errors never propagate as panics across the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    /// Whether the same request may succeed if sent again.
    pub retryable: bool,
}

/// Error codes for worker failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Model acquisition failed; the worker is Failed until re-init.
    ModelLoadFailed,
    /// Per-query embedding failed; state and cache untouched.
    EmbeddingFailed,
    /// A cache batch had inconsistent dimensions; cache untouched.
    MalformedVectors,
    /// A search arrived before the model was Ready.
    NotReady,
    /// The frame could not be decoded or had the wrong version.
    InvalidInput,
    Internal,
}

impl ErrorCode {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::EmbeddingFailed | ErrorCode::NotReady)
    }
}

/// Envelope for every message on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramedMessage<T> {
    pub version: u32,
    pub request_id: RequestId,
    pub payload: T,
}

impl<T> FramedMessage<T> {
    pub fn new(request_id: RequestId, payload: T) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request_id,
            payload,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("encode error: {0}")]
pub struct EncodeError(pub String);

#[derive(Debug, Clone, Error)]
#[error("decode error: {0}")]
pub struct DecodeError(pub String);

/// Encode a frame to MessagePack bytes.
pub fn encode_message<T: Serialize>(msg: &FramedMessage<T>) -> Result<Vec<u8>, EncodeError> {
    rmp_serde::to_vec(msg).map_err(|e| EncodeError(e.to_string()))
}

/// Decode a frame and check its protocol version.
pub fn decode_message<T: for<'de> Deserialize<'de>>(
    data: &[u8],
) -> Result<FramedMessage<T>, DecodeError> {
    let msg: FramedMessage<T> =
        rmp_serde::from_slice(data).map_err(|e| DecodeError(e.to_string()))?;
    if msg.version != PROTOCOL_VERSION {
        return Err(DecodeError(format!(
            "protocol version mismatch: expected {}, got {}",
            PROTOCOL_VERSION, msg.version
        )));
    }
    Ok(msg)
}
