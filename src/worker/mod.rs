//! Isolated embedding worker.
//!
//! The model handle and the vector cache live inside a dedicated tokio task
//! that talks to the rest of the process only through MessagePack frames:
//!
//! - [`protocol`]: request/response enums, error codes and framing
//! - [`state`]: the model lifecycle state machine
//! - [`core`]: the worker actor itself
//! - [`client`]: the caller-side handle and response stream

pub mod client;
pub mod core;
pub mod protocol;
pub mod state;

pub use client::{ChannelEvents, EmbeddingChannel, WorkerError};
pub use protocol::{ErrorCode, ErrorResponse, FramedMessage, Request, RequestId, Response, WorkerStatus};
pub use state::WorkerState;
