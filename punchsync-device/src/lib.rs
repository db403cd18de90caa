//! Device adapters for `punchsync`.
//!
//! Every attendance source implements [`AttendanceDevice`]. Adapters own
//! their transport and normalize whatever the source reports into
//! [`PunchRecord`]s. Transport faults stay inside the adapter: the provided
//! `fetch_all` / `fetch_since` methods log them and return an empty batch, so
//! a poll cycle can never be taken down by a flaky device.

use punchsync_core::{DeviceCapabilities, DeviceConfig, DeviceIdentity, DeviceInfo, PunchRecord};

pub mod database;
mod error;
pub mod null;
pub mod terminal;

pub use database::DatabaseDevice;
pub use error::DeviceError;
pub use null::NullDevice;
pub use terminal::TerminalDevice;

/// Uniform capability surface over heterogeneous attendance sources.
pub trait AttendanceDevice: Send {
    /// The configured identity this adapter was built for.
    fn identity(&self) -> &DeviceIdentity;

    /// Capabilities, fixed at construction.
    fn capabilities(&self) -> DeviceCapabilities;

    /// Establish reachability. Idempotent; `false` on ordinary connectivity failure.
    fn connect(&mut self) -> bool;

    /// Release resources. Safe to call when never connected.
    fn disconnect(&mut self) -> bool;

    /// Lightweight reachability probe.
    fn test_connection(&mut self) -> bool;

    /// Full or bounded-window fetch (device-defined lookback).
    fn try_fetch_all(&mut self) -> Result<Vec<PunchRecord>, DeviceError>;

    /// Records with `raw_timestamp > epoch`, ascending.
    ///
    /// Only meaningful when `capabilities().incremental_fetch` is set.
    fn try_fetch_since(&mut self, _epoch: i64) -> Result<Vec<PunchRecord>, DeviceError> {
        Err(DeviceError::Unsupported {
            identity: self.identity().0.clone(),
            operation: "fetch_since",
        })
    }

    /// Best-effort destructive clear. `false` where structurally unsupported.
    fn clear_source(&mut self) -> bool;

    /// Descriptive metadata attached to outbound batches.
    fn device_info(&self) -> DeviceInfo;

    /// [`try_fetch_all`](Self::try_fetch_all) with faults folded into an empty result.
    fn fetch_all(&mut self) -> Vec<PunchRecord> {
        match self.try_fetch_all() {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(device = %self.identity(), error = %err, "fetch_all failed; treating as no new records");
                Vec::new()
            }
        }
    }

    /// [`try_fetch_since`](Self::try_fetch_since) with faults folded into an empty result.
    fn fetch_since(&mut self, epoch: i64) -> Vec<PunchRecord> {
        match self.try_fetch_since(epoch) {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(device = %self.identity(), since = epoch, error = %err, "fetch_since failed; treating as no new records");
                Vec::new()
            }
        }
    }
}

/// Build the adapter for `identity` from its config section.
///
/// Configuration problems (e.g. an unusable table name) are returned here so
/// they surface at startup rather than inside the poll loop.
pub fn open(
    identity: DeviceIdentity,
    config: &DeviceConfig,
) -> Result<Box<dyn AttendanceDevice>, DeviceError> {
    let device: Box<dyn AttendanceDevice> = match config {
        DeviceConfig::Terminal {
            ip,
            port,
            timeout_secs,
            ..
        } => Box::new(TerminalDevice::new(
            identity,
            ip.clone(),
            *port,
            std::time::Duration::from_secs(*timeout_secs),
        )),
        DeviceConfig::Database {
            path,
            table,
            fetch_minutes,
            ..
        } => Box::new(DatabaseDevice::new(
            identity,
            path.clone(),
            table.clone(),
            *fetch_minutes,
        )?),
        DeviceConfig::Null => Box::new(NullDevice::new(identity)),
    };
    Ok(device)
}
