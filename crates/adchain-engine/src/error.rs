//! Error types for the publish engine.

use crate::config::ConfigError;
use crate::index::IndexError;
use crate::state::StateError;
use crate::transport::TransportError;
use adchain_merkle::{CidParseError, DagError, SyncError};
use thiserror::Error;

/// Error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed content id or otherwise unusable input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Persistent state could not be read or written.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Local DAG storage rejected a node.
    #[error("storage error: {0}")]
    Storage(#[from] DagError),

    /// Announce or close failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Remote fetch failure.
    #[error("sync failed: {0}")]
    SyncFailed(#[from] SyncError),

    /// The upstream returned something other than what was asked for.
    #[error("sync mismatch: {0}")]
    SyncMismatch(String),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Remote index query failure.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("no advertisement has been published yet")]
    NoLatest,

    #[error("failed to decode payload: {0}")]
    Decode(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("engine already started")]
    AlreadyStarted,
}

impl From<CidParseError> for EngineError {
    fn from(e: CidParseError) -> Self {
        EngineError::InvalidArgument(format!("malformed cid: {}", e))
    }
}

/// Errors collected while shutting down. Shutdown does not stop at the first
/// failure, so every error is kept.
#[derive(Debug, Error)]
#[error("shutdown finished with {} error(s): {}", .0.len(), join_errors(.0))]
pub struct ShutdownError(pub Vec<EngineError>);

fn join_errors(errors: &[EngineError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
