//! `punchsync watch` - continuous polling until Ctrl-C / SIGTERM.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::Args;

use punchsync_daemon::{init_tracing, start_blocking, PollSession, SystemClock};

use super::{banner, fail, home, load_config, ok, print_device_info, warn};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Device identity from config.yaml (defaults to `default`).
    #[arg(long)]
    pub driver: Option<String>,

    /// Seconds to sleep between poll iterations.
    #[arg(long)]
    pub interval: Option<u64>,

    /// Records per HTTP request.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Connect, print device info and exit.
    #[arg(long)]
    pub test: bool,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let mut config = load_config(&home)?;
        if let Some(interval) = self.interval {
            config.sync.interval_secs = interval;
        }
        if let Some(batch_size) = self.batch_size {
            config.sync.batch_size = batch_size;
        }
        config.validate()?;
        init_tracing(config.debug);

        let identity = config.resolve_identity(self.driver.as_deref());
        let mut session = PollSession::open(&home, &config, &identity, Arc::new(SystemClock))
            .with_context(|| format!("failed to set up attendance device [{identity}]"))?;

        banner("Real-time Attendance Sync", session.device_info());

        println!("Connecting to attendance device...");
        if let Err(err) = session.connect() {
            fail("Failed to connect to attendance device");
            return Err(err.into());
        }
        ok("Connected to attendance device");

        println!("Testing remote API connection...");
        if session.probe_collector() {
            ok("Remote API connection successful");
        } else if self.test {
            session.disconnect();
            fail("Remote API connection failed");
            bail!("remote API unreachable at {}", config.remote_api.url);
        } else {
            warn("Remote API connection failed; records will be retried");
        }
        println!();

        if self.test {
            print_device_info(session.device_info());
            session.disconnect();
            return Ok(());
        }

        match session.cursor()? {
            Some(cursor) => println!("Last sync cursor: {}", render_epoch(cursor)),
            None => println!("Last sync cursor: none (starting from local midnight)"),
        }
        println!(
            "Polling every {}s. Press Ctrl+C to stop.",
            session.settings().interval.as_secs()
        );
        println!();

        let summary = start_blocking(session)?;

        println!();
        ok(format!(
            "Stopped after {} iteration(s): {} sent, {} failed, {} error(s)",
            summary.iterations, summary.sent, summary.failed, summary.errors
        ));
        Ok(())
    }
}

pub(crate) fn render_epoch(epoch: i64) -> String {
    match DateTime::from_timestamp(epoch, 0) {
        Some(ts) => format!(
            "{} ({epoch})",
            ts.with_timezone(&Local).format(punchsync_core::TIMESTAMP_FORMAT)
        ),
        None => epoch.to_string(),
    }
}
