//! `punchsync sync` - one-shot fetch and send.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use punchsync_core::PunchRecord;
use punchsync_daemon::{init_tracing, run_once, OneShotOptions, OneShotPrompt, OneShotReport};
use punchsync_device::AttendanceDevice;
use punchsync_sync::{BatchResult, SyncClient};

use super::{banner, fail, home, load_config, ok, print_device_info, warn};

const SAMPLE_SIZE: usize = 5;

/// Arguments for `punchsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Device identity from config.yaml (defaults to `default`).
    #[arg(long)]
    pub driver: Option<String>,

    /// Clear records from the device after a fully successful sync.
    #[arg(long)]
    pub clear: bool,

    /// Records per HTTP request.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Test device and collector connectivity without syncing.
    #[arg(long)]
    pub test: bool,

    /// Do not ask before clearing the device.
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let config = load_config(&home)?;
        init_tracing(config.debug);

        let identity = config.resolve_identity(self.driver.as_deref());
        let device_config = config.device(&identity)?;
        let mut device = punchsync_device::open(identity.clone(), device_config)
            .with_context(|| format!("failed to set up attendance device [{identity}]"))?;
        let client = SyncClient::from_config(&config);

        banner("Attendance Data Sync", &device.device_info());

        if self.test {
            test_connections(device.as_mut(), &client);
            return Ok(());
        }

        let options = OneShotOptions {
            batch_size: self.batch_size.unwrap_or(config.sync.batch_size),
            duplicate_threshold: config.duplicate_threshold(&identity),
            clear_source: self.clear || config.sync.auto_clear_device,
        };
        let mut prompt = ConsolePrompt {
            assume_yes: self.yes,
        };

        println!("Connecting to attendance device...");
        let report = run_once(device.as_mut(), &client, &options, &mut prompt)
            .with_context(|| format!("sync failed for [{identity}]"))?;

        print_report(&report);
        if !report.is_success() {
            let failed = report.result.as_ref().map_or(0, |r| r.failed);
            bail!("{failed} record(s) failed to send");
        }
        println!();
        ok("Sync process completed");
        Ok(())
    }
}

fn test_connections(device: &mut dyn AttendanceDevice, client: &SyncClient) {
    println!("Testing attendance device connection...");
    if device.test_connection() {
        ok("Attendance device connection successful");
    } else {
        fail("Attendance device connection failed");
    }
    println!();

    println!("Testing remote API connection...");
    if client.test_connection() {
        ok("Remote API connection successful");
    } else {
        fail("Remote API connection failed");
    }
    println!();
    print_device_info(&device.device_info());
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

struct ConsolePrompt {
    assume_yes: bool,
}

impl OneShotPrompt for ConsolePrompt {
    fn review(&mut self, records: &[PunchRecord]) -> bool {
        println!("Retrieved {} attendance record(s)", records.len());
        println!();
        print_sample(records);
        println!("Sending attendance records to remote server...");
        true
    }

    fn confirm_clear(&mut self) -> bool {
        if self.assume_yes {
            return true;
        }
        print!("Clear attendance records from device? [y/N]: ");
        let _ = io::stdout().flush();

        let mut answer = String::new();
        match io::stdin().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct SampleRow {
    #[tabled(rename = "User ID")]
    user_id: String,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Verify Type")]
    verify_type: String,
    #[tabled(rename = "Status")]
    status: String,
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Metric")]
    metric: &'static str,
    #[tabled(rename = "Value")]
    value: usize,
}

fn print_sample(records: &[PunchRecord]) {
    println!("Sample records (showing first {SAMPLE_SIZE}):");
    let rows: Vec<SampleRow> = records
        .iter()
        .take(SAMPLE_SIZE)
        .map(|r| SampleRow {
            user_id: r.subject_id.clone(),
            timestamp: r.timestamp.format(punchsync_core::TIMESTAMP_FORMAT).to_string(),
            verify_type: r.verify_method.to_string(),
            status: r.status.to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!();
}

fn print_report(report: &OneShotReport) {
    if report.records.is_empty() {
        warn("No attendance records found on device");
        print_summary(&BatchResult {
            success: true,
            ..BatchResult::default()
        });
        return;
    }
    if !report.sent_confirmed {
        warn("Sync skipped; nothing was sent");
        return;
    }
    let Some(result) = &report.result else {
        return;
    };

    println!();
    if result.success {
        ok("Sync completed successfully!");
    } else {
        fail("Sync completed with errors");
        if let Some(message) = &result.message {
            fail(message);
        }
    }
    print_summary(result);

    match report.cleared {
        Some(true) => ok("Attendance records cleared from device"),
        Some(false) => fail("Failed to clear attendance records"),
        None => {}
    }
}

fn print_summary(result: &BatchResult) {
    println!();
    println!("{}", "Sync Summary:".bold());
    let rows = vec![
        SummaryRow {
            metric: "Total Records",
            value: result.total,
        },
        SummaryRow {
            metric: "Successfully Sent",
            value: result.sent,
        },
        SummaryRow {
            metric: "Failed",
            value: result.failed,
        },
        SummaryRow {
            metric: "Batches",
            value: result.batches,
        },
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
