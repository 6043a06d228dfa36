//! Error types for the textboard crate.

use std::path::PathBuf;

/// Errors surfaced by the textboard server and its database.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration detected at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The database root or topic directory could not be initialized.
    #[error("database error: {0}")]
    Database(String),

    /// A posted message failed validation before being persisted.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A message could not be written to its topic directory.
    #[error("failed to store message under {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The index could not be rebuilt after a successful write.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
