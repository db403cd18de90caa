//! One-shot sync: connect, fetch everything, send, optionally clear.

use std::time::Duration;

use punchsync_core::{DeviceInfo, PunchRecord};
use punchsync_device::AttendanceDevice;
use punchsync_sync::{dedupe, BatchResult, SyncClient};

use crate::error::DaemonError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneShotOptions {
    pub batch_size: usize,
    pub duplicate_threshold: Duration,
    /// Clear the device after a fully successful send.
    pub clear_source: bool,
}

/// Interactive decisions taken during a one-shot run.
pub trait OneShotPrompt {
    /// Called with the deduplicated records before sending. `false` skips sending.
    fn review(&mut self, records: &[PunchRecord]) -> bool;

    /// Called before clearing the device. `false` leaves it untouched.
    fn confirm_clear(&mut self) -> bool;
}

/// Accepts everything; for non-interactive runs.
pub struct AssumeYes;

impl OneShotPrompt for AssumeYes {
    fn review(&mut self, _records: &[PunchRecord]) -> bool {
        true
    }

    fn confirm_clear(&mut self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OneShotReport {
    pub device_info: DeviceInfo,
    pub fetched: usize,
    pub records: Vec<PunchRecord>,
    pub sent_confirmed: bool,
    /// `None` when nothing was sent.
    pub result: Option<BatchResult>,
    /// `None` when no clear was attempted.
    pub cleared: Option<bool>,
}

impl OneShotReport {
    /// No record failed to send.
    pub fn is_success(&self) -> bool {
        self.result.as_ref().map_or(true, |r| r.success)
    }
}

/// Run one full sync cycle against `device`.
///
/// The device is always disconnected before returning, including on a
/// connect failure.
pub fn run_once(
    device: &mut dyn AttendanceDevice,
    client: &SyncClient,
    options: &OneShotOptions,
    prompt: &mut dyn OneShotPrompt,
) -> Result<OneShotReport, DaemonError> {
    if !device.connect() {
        device.disconnect();
        return Err(DaemonError::DeviceUnreachable {
            identity: device.identity().0.clone(),
        });
    }

    let device_info = device.device_info();
    let fetched = device.fetch_all();
    let fetched_count = fetched.len();
    let records = dedupe(fetched, options.duplicate_threshold);
    tracing::info!(device = %device.identity(), fetched = fetched_count, unique = records.len(), "retrieved attendance records");

    let mut report = OneShotReport {
        device_info,
        fetched: fetched_count,
        records,
        sent_confirmed: false,
        result: None,
        cleared: None,
    };

    if report.records.is_empty() {
        device.disconnect();
        return Ok(report);
    }

    report.sent_confirmed = prompt.review(&report.records);
    if !report.sent_confirmed {
        tracing::info!(device = %device.identity(), "sync declined; nothing sent");
        device.disconnect();
        return Ok(report);
    }

    let result = client.send_batches(&report.records, &report.device_info, options.batch_size);
    if result.success && options.clear_source && prompt.confirm_clear() {
        let cleared = device.clear_source();
        if cleared {
            tracing::info!(device = %device.identity(), "attendance records cleared from device");
        } else {
            tracing::warn!(device = %device.identity(), "failed to clear attendance records");
        }
        report.cleared = Some(cleared);
    }
    report.result = Some(result);

    device.disconnect();
    Ok(report)
}
