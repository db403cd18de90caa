//! punchsync core library: domain types, configuration, errors.
//!
//! - [`types`] - punch records, device identity and metadata
//! - [`config`] - YAML configuration with environment overrides
//! - [`error`] - [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, DeviceConfig, RemoteApiConfig, SyncSettings};
pub use error::ConfigError;
pub use types::{
    DeviceCapabilities, DeviceIdentity, DeviceInfo, PunchRecord, PunchStatus, VerifyMethod,
    TIMESTAMP_FORMAT,
};
