//! Error types for the conversation store.

use std::path::PathBuf;

use thiserror::Error;

/// Durable-mirror failure.
///
/// Returned after the in-memory conversation has already been updated, so the
/// caller can keep serving from memory.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Reading or writing the mirror file failed.
    #[error("mirror io error at {path}: {source}")]
    Io {
        /// Mirror file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Serializing the conversation failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience result alias for store operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;
