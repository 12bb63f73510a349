//! Error types for the registration store.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Registration file is locked by another handle")]
    Locked,

    #[error("Invalid store path: {0}")]
    InvalidPath(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            StoreError::Io(e.into())
        } else if e.is_data() || e.is_syntax() || e.is_eof() {
            StoreError::Deserialization(e.to_string())
        } else {
            StoreError::Serialization(e.to_string())
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure reported by an update listener.
///
/// Listener failures are logged by the notifier and never reach the caller of
/// the mutation that produced the snapshot.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl From<String> for ListenerError {
    fn from(s: String) -> Self {
        ListenerError(s)
    }
}

impl From<&str> for ListenerError {
    fn from(s: &str) -> Self {
        ListenerError(s.to_string())
    }
}
