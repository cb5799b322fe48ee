//! Persistent index storage.

pub mod sqlite;

pub use sqlite::{IndexError, IndexMetadata, SiftIndex};
