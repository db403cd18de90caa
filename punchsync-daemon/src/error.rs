use thiserror::Error;

/// Error surface for poll sessions and the continuous runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] punchsync_core::ConfigError),

    #[error("device error: {0}")]
    Device(#[from] punchsync_device::DeviceError),

    #[error("sync error: {0}")]
    Sync(#[from] punchsync_sync::SyncError),

    #[error("failed to connect to attendance device [{identity}]")]
    DeviceUnreachable { identity: String },

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },
}

pub(crate) fn io_err(context: impl Into<String>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        context: context.into(),
        source,
    }
}
