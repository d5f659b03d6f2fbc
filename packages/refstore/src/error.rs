//! Error types for the reference data store

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Stored bytes cannot be interpreted: unknown type tag, dangling UID,
    /// truncated record. Never retried.
    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key too long: {len} bytes exceeds maximum of {max}")]
    KeyTooLong { len: usize, max: usize },

    #[error("Hash collision chain exhausted after {probes} probes")]
    HashCollisionChainExhausted { probes: usize },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Configuration mismatch: {0}")]
    ConfigMismatch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "lmdb")]
    #[error("LMDB error: {0}")]
    Lmdb(#[from] heed::Error),
}

impl StoreError {
    /// Get a stable error code for callers that log or report errors.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Corruption(_) => "CORRUPTION",
            StoreError::KeyNotFound(_) => "KEY_NOT_FOUND",
            StoreError::KeyTooLong { .. } => "KEY_TOO_LONG",
            StoreError::HashCollisionChainExhausted { .. } => "HASH_COLLISION_CHAIN_EXHAUSTED",
            StoreError::InvalidKey(_) => "INVALID_KEY",
            StoreError::ConfigMismatch(_) => "CONFIG_MISMATCH",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Only a plain miss is expected control flow; everything else aborts
    /// the enclosing transaction.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::KeyNotFound(_))
    }

    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        StoreError::Corruption(msg.into())
    }
}
