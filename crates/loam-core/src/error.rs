//! Error types for loam-core

use thiserror::Error;

/// Result type alias using loam-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in loam-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local durable storage is inaccessible or rejected the operation
    #[error("Local storage unavailable: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Network or server failure on a remote call; recovered by queue/retry
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// No valid owner session for a remote call
    #[error("Not authenticated for remote access")]
    Unauthenticated,

    /// Note not found
    #[error("Note not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the reconciler should absorb this error and retry later
    /// instead of surfacing it to the caller. Covers remote failures and
    /// missing auth; local storage failures are never retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_) | Self::Unauthenticated)
    }
}
