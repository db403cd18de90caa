//! `punchsync cursor` - inspect or reset the per-device sync watermark.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone};
use clap::Subcommand;
use tabled::{settings::Style, Table, Tabled};

use punchsync_core::{DeviceIdentity, TIMESTAMP_FORMAT};
use punchsync_sync::{CursorStore, FileCursorStore};

use super::watch::render_epoch;
use super::{home, load_config, ok, warn};

#[derive(Subcommand, Debug)]
pub enum CursorCommand {
    /// Show the cursor for one device, or for every configured device.
    Show {
        identity: Option<String>,
    },
    /// Overwrite the cursor. Accepts epoch seconds or "YYYY-MM-DD HH:MM:SS" local time.
    Set {
        identity: String,
        value: String,
    },
    /// Delete the cursor; the next watch run starts from local midnight.
    Clear {
        identity: String,
    },
}

#[derive(Tabled)]
struct CursorRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Driver")]
    driver: String,
    #[tabled(rename = "Cursor")]
    cursor: String,
}

pub fn run(command: CursorCommand) -> Result<()> {
    let home = home()?;
    let store = FileCursorStore::at(&home);

    match command {
        CursorCommand::Show { identity } => {
            let config = load_config(&home)?;
            let identities: Vec<DeviceIdentity> = match identity {
                Some(id) => vec![DeviceIdentity::from(id)],
                None => config.devices.keys().cloned().collect(),
            };

            let mut rows = Vec::with_capacity(identities.len());
            for identity in identities {
                let driver = config
                    .devices
                    .get(&identity)
                    .map_or("-", |d| d.driver())
                    .to_string();
                let cursor = match store.load(&identity)? {
                    Some(epoch) => render_epoch(epoch),
                    None => "none".to_string(),
                };
                rows.push(CursorRow {
                    device: identity.0,
                    driver,
                    cursor,
                });
            }
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        CursorCommand::Set { identity, value } => {
            let identity = DeviceIdentity::from(identity);
            let epoch = parse_cursor(&value)?;
            store.save(&identity, epoch)?;
            ok(format!("Cursor for [{identity}] set to {}", render_epoch(epoch)));
        }
        CursorCommand::Clear { identity } => {
            let identity = DeviceIdentity::from(identity);
            if store.clear(&identity)? {
                ok(format!("Cursor for [{identity}] cleared"));
            } else {
                warn(format!("No cursor stored for [{identity}]"));
            }
        }
    }
    Ok(())
}

/// Epoch seconds, or a local wall-clock time in `TIMESTAMP_FORMAT`.
fn parse_cursor(value: &str) -> Result<i64> {
    let value = value.trim();
    if let Ok(epoch) = value.parse::<i64>() {
        return Ok(epoch);
    }
    let naive = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).with_context(|| {
        format!("invalid cursor '{value}': expected epoch seconds or \"YYYY-MM-DD HH:MM:SS\"")
    })?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.timestamp())
        .with_context(|| format!("'{value}' does not exist in the local time zone"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_epoch_and_local_time() {
        assert_eq!(parse_cursor("1700000000").unwrap(), 1_700_000_000);

        let naive = NaiveDateTime::parse_from_str("2025-06-18 08:00:00", TIMESTAMP_FORMAT).unwrap();
        let expected = Local.from_local_datetime(&naive).earliest().unwrap().timestamp();
        assert_eq!(parse_cursor(" 2025-06-18 08:00:00 ").unwrap(), expected);
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_cursor("yesterday").unwrap_err();
        assert!(err.to_string().contains("invalid cursor"));
    }
}
