//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid chunk id: {0}")]
    InvalidChunkId(String),

    #[error("invalid index: {0}")]
    InvalidIndex(String),

    #[error("invalid store path: {0}")]
    InvalidStorePath(String),

    #[error("narinfo parse error: {0}")]
    NarInfoParse(String),

    #[error("nar parse error: {0}")]
    NarParse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
