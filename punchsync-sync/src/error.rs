//! Error types for punchsync-sync.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from cursor persistence and payload encoding.
///
/// Delivery failures are not errors: they are reported per batch inside
/// [`BatchResult`](crate::BatchResult).
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cursor file exists but does not hold a decimal epoch.
    #[error("cursor file {path} is corrupt (contents: {contents:?}); reset it with `punchsync cursor set` or `punchsync cursor clear`")]
    CorruptCursor { path: PathBuf, contents: String },

    #[error("payload JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
