//! Error types shared across the cortex crates.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CortexError {
    /// Storage backend unreachable. Callers may retry with backoff;
    /// the retrieval path itself never retries silently.
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// Lock acquire or renew failed. In-flight work under the lost lock
    /// must be treated as invalid.
    #[error("Lock timeout on '{resource}' for holder '{holder}'")]
    LockTimeout { resource: String, holder: String },

    /// Session state machine violation. Always a coordination bug,
    /// never retried.
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CortexError>;
