//! Unified error handling for the sync node.
//!
//! Errors are scoped to the unit they poison: a connection error drops that
//! one connection, a peer error skips that peer for the tick, and nothing
//! here is fatal to the process.

use crate::config::ConfigError;

/// All errors surfaced by the sync substrate.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Framing violation, unknown message type, truncated payload
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Handshake rejected, token mismatch, record authentication failure
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Key exchange or cipher failure
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Socket-level failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A 30 s deadline elapsed
    #[error("operation timed out")]
    Timeout,

    /// Surfaced verbatim from the store contract
    #[error("store error: {0}")]
    Store(#[from] meshdb_engine::Error),

    /// Invalid or missing node configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        SyncError::Protocol(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        SyncError::Auth(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        SyncError::Crypto(msg.into())
    }
}

impl From<prost::DecodeError> for SyncError {
    fn from(e: prost::DecodeError) -> Self {
        SyncError::Protocol(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SyncError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SyncError::Timeout
    }
}

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, SyncError>;
