//! One device's continuous sync session.
//!
//! A [`PollSession`] owns the device adapter, the collector client and the
//! cursor store for a single identity. Each call to [`PollSession::tick`] is
//! one poll iteration; the runtime decides when to call it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Timelike};

use punchsync_core::{Config, DeviceIdentity, DeviceInfo, PunchRecord};
use punchsync_device::AttendanceDevice;
use punchsync_sync::{dedupe_from, BatchResult, CursorStore, FileCursorStore, SyncClient};

use crate::clock::Clock;
use crate::error::DaemonError;

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_RESCAN_EVERY: u64 = 120;
pub const DEFAULT_RESCAN_WINDOW: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_OVERLAP: Duration = Duration::from_secs(60);

/// Tuning for the continuous loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub batch_size: usize,
    pub duplicate_threshold: Duration,
    pub interval: Duration,
    /// Without a successful send for this long, the cursor is pulled back.
    pub stale_after: Duration,
    /// Every n-th iteration widens the fetch window.
    pub rescan_every: u64,
    /// How far back stale recovery and wide rescans reach.
    pub rescan_window: Duration,
    /// Subtracted from the cursor when fetching incrementally.
    pub overlap: Duration,
}

impl PollSettings {
    pub fn from_config(config: &Config, identity: &DeviceIdentity) -> Self {
        Self {
            batch_size: config.sync.batch_size,
            duplicate_threshold: config.duplicate_threshold(identity),
            interval: config.interval(),
            stale_after: DEFAULT_STALE_AFTER,
            rescan_every: DEFAULT_RESCAN_EVERY,
            rescan_window: DEFAULT_RESCAN_WINDOW,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub iteration: u64,
    pub cursor_before: i64,
    pub cursor_after: i64,
    /// `None` when the device only supports a full fetch.
    pub fetched_since: Option<i64>,
    pub fetched: usize,
    pub pending: usize,
    pub seeded: bool,
    pub stale_recovery: bool,
    pub wide_rescan: bool,
    pub result: Option<BatchResult>,
}

pub struct PollSession {
    identity: DeviceIdentity,
    device: Box<dyn AttendanceDevice>,
    client: SyncClient,
    store: Box<dyn CursorStore>,
    clock: Arc<dyn Clock>,
    settings: PollSettings,
    device_info: DeviceInfo,
    iteration: u64,
    last_success: DateTime<Local>,
    /// Per subject, the newest `raw_timestamp` this session delivered at or
    /// below the persisted cursor. Seeds the deduplicator across iterations.
    anchors: HashMap<String, i64>,
}

impl PollSession {
    pub fn new(
        device: Box<dyn AttendanceDevice>,
        client: SyncClient,
        store: Box<dyn CursorStore>,
        clock: Arc<dyn Clock>,
        settings: PollSettings,
    ) -> Self {
        let identity = device.identity().clone();
        let device_info = device.device_info();
        let last_success = clock.now();
        Self {
            identity,
            device,
            client,
            store,
            clock,
            settings,
            device_info,
            iteration: 0,
            last_success,
            anchors: HashMap::new(),
        }
    }

    /// Session for `identity` over the configured adapter, the HTTP client
    /// and the file cursor store under `home`.
    pub fn open(
        home: &Path,
        config: &Config,
        identity: &DeviceIdentity,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DaemonError> {
        let device = punchsync_device::open(identity.clone(), config.device(identity)?)?;
        Ok(Self::new(
            device,
            SyncClient::from_config(config),
            Box::new(FileCursorStore::at(home)),
            clock,
            PollSettings::from_config(config, identity),
        ))
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Current persisted cursor, if any.
    pub fn cursor(&self) -> Result<Option<i64>, DaemonError> {
        Ok(self.store.load(&self.identity)?)
    }

    /// Connect the device. Failure here is fatal for a continuous session.
    pub fn connect(&mut self) -> Result<(), DaemonError> {
        if !self.device.connect() {
            return Err(DaemonError::DeviceUnreachable {
                identity: self.identity.0.clone(),
            });
        }
        self.device_info = self.device.device_info();
        Ok(())
    }

    /// Probe the collector's health endpoint.
    pub fn probe_collector(&self) -> bool {
        self.client.test_connection()
    }

    pub fn disconnect(&mut self) {
        self.device.disconnect();
    }

    /// Run one poll iteration.
    pub fn tick(&mut self) -> Result<TickReport, DaemonError> {
        self.iteration += 1;
        let now = self.clock.now();
        let now_epoch = now.timestamp();
        let rescan_secs = secs(self.settings.rescan_window);

        let (mut cursor, seeded) = match self.store.load(&self.identity)? {
            Some(cursor) => (cursor, false),
            None => {
                let midnight = local_midnight(now);
                self.store.save(&self.identity, midnight)?;
                tracing::info!(device = %self.identity, cursor = midnight, "no cursor yet; starting from local midnight");
                (midnight, true)
            }
        };
        let cursor_before = cursor;

        let idle = now.signed_duration_since(self.last_success);
        let stale_recovery = idle.to_std().map_or(false, |idle| idle > self.settings.stale_after);
        if stale_recovery {
            cursor = now_epoch.saturating_sub(rescan_secs);
            self.store.save(&self.identity, cursor)?;
            tracing::warn!(
                device = %self.identity,
                idle_minutes = idle.num_minutes(),
                cursor,
                "no successful sync recently; resetting cursor to the last hour"
            );
        }

        let mut fetch_from = cursor.saturating_sub(secs(self.settings.overlap));
        let wide_rescan =
            self.settings.rescan_every > 0 && self.iteration % self.settings.rescan_every == 0;
        if wide_rescan {
            fetch_from = fetch_from.min(now_epoch.saturating_sub(rescan_secs));
            tracing::info!(device = %self.identity, iteration = self.iteration, since = fetch_from, "periodic wide rescan");
        }

        let (fetched, fetched_since) = if self.device.capabilities().incremental_fetch {
            (self.device.fetch_since(fetch_from), Some(fetch_from))
        } else {
            (self.device.fetch_all(), None)
        };
        let fetched_count = fetched.len();

        let unsent: Vec<PunchRecord> = fetched
            .into_iter()
            .filter(|r| r.raw_timestamp > cursor)
            .collect();
        let mut pending = dedupe_from(unsent, self.settings.duplicate_threshold, &self.anchors);
        pending.sort_by_key(|r| r.raw_timestamp);

        let mut report = TickReport {
            iteration: self.iteration,
            cursor_before,
            cursor_after: cursor,
            fetched_since,
            fetched: fetched_count,
            pending: pending.len(),
            seeded,
            stale_recovery,
            wide_rescan,
            result: None,
        };

        if pending.is_empty() {
            tracing::debug!(device = %self.identity, iteration = self.iteration, fetched = fetched_count, "no new records");
            return Ok(report);
        }

        tracing::info!(device = %self.identity, iteration = self.iteration, count = pending.len(), "found new records; syncing");
        let result = self
            .client
            .send_batches(&pending, &self.device_info, self.settings.batch_size);

        if result.success {
            if let Some(max) = pending.iter().map(|r| r.raw_timestamp).max() {
                self.store.save(&self.identity, max)?;
                report.cursor_after = max;
            }
            self.remember_delivered(&pending, report.cursor_after);
            self.last_success = now;
            tracing::info!(device = %self.identity, sent = result.sent, cursor = report.cursor_after, "synced records");
        } else {
            if let Some(through) = result.committed_through.filter(|t| *t > cursor) {
                self.store.save(&self.identity, through)?;
                report.cursor_after = through;
                self.remember_delivered(&pending, through);
            }
            tracing::error!(
                device = %self.identity,
                iteration = self.iteration,
                sent = result.sent,
                failed = result.failed,
                cursor = report.cursor_after,
                error = result.message.as_deref().unwrap_or("unknown"),
                "sync failed; unsent records will be retried"
            );
        }
        report.result = Some(result);
        Ok(report)
    }

    fn remember_delivered(&mut self, sent: &[PunchRecord], through: i64) {
        for record in sent.iter().filter(|r| r.raw_timestamp <= through) {
            let anchor = self
                .anchors
                .entry(record.subject_id.clone())
                .or_insert(record.raw_timestamp);
            *anchor = (*anchor).max(record.raw_timestamp);
        }
    }
}

/// Epoch of 00:00 local time on `now`'s date.
pub fn local_midnight(now: DateTime<Local>) -> i64 {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .map(|midnight| midnight.timestamp())
        .unwrap_or_else(|| now.timestamp() - i64::from(now.time().num_seconds_from_midnight()))
}

fn secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}
