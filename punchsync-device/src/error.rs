//! Error types for punchsync-device.

use thiserror::Error;

/// Failures inside a device adapter.
///
/// These never escape the infallible `fetch_*` / `connect` surface of
/// [`crate::AttendanceDevice`]; they are logged and folded into empty results
/// or `false` there.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device '{identity}' is not connected")]
    NotConnected { identity: String },

    #[error("I/O error talking to {target}: {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("device protocol error: {0}")]
    Protocol(String),

    #[error("{operation} is not supported by device '{identity}'")]
    Unsupported {
        identity: String,
        operation: &'static str,
    },

    #[error("invalid device configuration: {0}")]
    InvalidConfig(String),
}

pub(crate) fn io_err(target: impl Into<String>, source: std::io::Error) -> DeviceError {
    DeviceError::Io {
        target: target.into(),
        source,
    }
}
