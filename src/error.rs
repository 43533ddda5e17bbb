//! Centralized error types for mailrelay.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailrelay library.
#[derive(Error, Debug)]
pub enum RelayError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file is missing, unreadable, or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The mail-store session could not be established.
    #[error("Cannot connect to mail store: {0}")]
    Connect(String),

    /// A single message could not be fetched or decoded.
    #[error("Failed to fetch message {key}: {reason}")]
    Fetch { key: String, reason: String },

    /// Sending to one recipient failed.
    #[error("Failed to send to {recipient}: {reason}")]
    Send { recipient: String, reason: String },

    /// Deleting a message by key failed.
    #[error("Failed to delete message {key}: {reason}")]
    Delete { key: String, reason: String },

    /// Any other mail-store command failed (select, search, flag, expunge).
    #[error("Mail store error: {0}")]
    Store(String),

    /// Another run already holds the ledger lock.
    #[error("Another run is already using the ledger: {0}")]
    RunLocked(PathBuf),
}

/// Convenience alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `Fetch` variant for a message key.
    pub fn fetch(key: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::Fetch {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<imap::error::Error> for RelayError {
    fn from(e: imap::error::Error) -> Self {
        Self::Store(e.to_string())
    }
}
