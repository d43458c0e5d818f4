//! Error types for the message log client.

use thiserror::Error;

/// Boxed error returned by listeners.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for client operations.
#[derive(Debug, Error)]
pub enum RemqError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("NOSCRIPT No matching script for hash {hash}")]
    NoScript { hash: String },

    #[error("Script error: {0}")]
    Script(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Malformed wire record: {0}")]
    Parse(#[from] ParseError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid listener: {0}")]
    InvalidListener(String),

    #[error("Listener failed: {0}")]
    Listener(#[source] BoxError),

    #[error("Subscription worker panicked")]
    WorkerPanicked,
}

impl RemqError {
    /// Whether this is the store's "unknown script" condition.
    pub fn is_no_script(&self) -> bool {
        matches!(self, RemqError::NoScript { .. })
    }
}

/// Why a wire record could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("header is not valid UTF-8")]
    NonUtf8Header,

    #[error("header {0:?} has no '@' separator")]
    MissingSeparator(String),

    #[error("header {header:?} has a non-numeric id {id:?}")]
    InvalidId { header: String, id: String },
}

impl From<rmp_serde::encode::Error> for RemqError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        RemqError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RemqError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RemqError::Deserialization(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, RemqError>;
