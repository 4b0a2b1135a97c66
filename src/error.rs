//! Domain error types for the file-locking cache.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Result alias for operations that may return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error exposed by the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Construction parameters were missing or invalid.
    #[error("invalid cache configuration: {0}")]
    BadConfig(String),

    /// An underlying filesystem operation failed unexpectedly.
    #[error("{op} failed on {path}")]
    Io {
        /// Name of the failing operation, for diagnostics.
        op: &'static str,
        /// Path the operation was attempted against.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// An advisory lock call failed for a non-retryable reason.
    #[error("lock operation failed on {path}")]
    Lock {
        /// Path the lock was attempted against.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The mangled basename exceeded the 254-byte filesystem-friendly ceiling.
    #[error("mangled cache filename exceeds 254 bytes: {0}")]
    NameTooLong(String),

    /// The producer callback failed to materialise the artifact.
    #[error("producer failed to build artifact")]
    BuildFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// An entry vanished between `create_and_lock` returning `Exists` and the
    /// follow-up `get_read_lock`. Only possible if something outside this
    /// process's view purged the entry in that narrow window.
    #[error("cache entry vanished between create-exists and read-lock: {0}")]
    Unexpected(Utf8PathBuf),
}

impl Error {
    pub(crate) fn io(op: &'static str, path: &camino::Utf8Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn lock(path: &camino::Utf8Path, source: std::io::Error) -> Self {
        Self::Lock {
            path: path.to_path_buf(),
            source,
        }
    }
}
