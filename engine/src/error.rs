//! Error types for the meshdb engine.

use crate::CollectionName;
use thiserror::Error;

/// All possible errors from the meshdb engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("store is closed")]
    StoreClosed,

    #[error("store error: {0}")]
    Store(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
