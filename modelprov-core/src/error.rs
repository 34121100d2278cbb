//! Error types for the modelprov crates.

use thiserror::Error;

/// Top-level error type for provenance operations.
#[derive(Debug, Error)]
pub enum ProvenanceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Ledger conflict: an entry with immutable hash {immutable_hash} already exists")]
    LedgerConflict { immutable_hash: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Trainer error: {0}")]
    Trainer(String),

    #[error("Training run was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProvenanceError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    pub fn trainer(msg: impl Into<String>) -> Self {
        Self::Trainer(msg.into())
    }

    /// Whether this error is a write-once violation.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::LedgerConflict { .. })
    }
}

pub type Result<T, E = ProvenanceError> = std::result::Result<T, E>;
