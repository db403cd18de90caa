//! Shared-database device: a SQLite table written by the vendor's attendance
//! software.
//!
//! The vendor schema is only partly known, so rows are read by column name and
//! any column this adapter does not understand is ignored. The table is managed
//! externally; this adapter never writes to it.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Local, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use punchsync_core::{
    DeviceCapabilities, DeviceIdentity, DeviceInfo, PunchRecord, PunchStatus, VerifyMethod,
    TIMESTAMP_FORMAT,
};

use crate::error::DeviceError;
use crate::AttendanceDevice;

/// Primary time column; `AttendanceTime` is the fallback when it is blank.
const TIME_COLUMN: &str = "authDateTime";
const FALLBACK_TIME_COLUMN: &str = "AttendanceTime";

/// Vendor columns forwarded as opaque extension fields, keyed by wire name.
const EXTRA_COLUMNS: &[(&str, &str)] = &[
    ("employee_id", "employee_id"),
    ("PersonID", "person_id"),
    ("PersonName", "person_name"),
    ("PerSonCardNo", "person_card_no"),
    ("DeviceIPAddress", "device_ip_address"),
    ("DeviceName", "device_name"),
    ("SnapshotsPath", "snapshots_path"),
    ("Handler", "handler"),
    ("AttendanceUtcTime", "attendance_utc_time"),
    ("Remarks", "remarks"),
];

type Row = HashMap<String, Value>;

pub struct DatabaseDevice {
    identity: DeviceIdentity,
    path: PathBuf,
    table: String,
    fetch_minutes: u64,
    conn: Option<Connection>,
}

impl DatabaseDevice {
    /// `table` is interpolated into SQL, so it must be a plain identifier.
    pub fn new(
        identity: DeviceIdentity,
        path: PathBuf,
        table: String,
        fetch_minutes: u64,
    ) -> Result<Self, DeviceError> {
        validate_table_name(&table)?;
        Ok(Self {
            identity,
            path,
            table,
            fetch_minutes,
            conn: None,
        })
    }

    fn open_connection(&self) -> Result<Connection, DeviceError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [&self.table],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(DeviceError::Protocol(format!(
                "table '{}' not found in {}",
                self.table,
                self.path.display()
            )));
        }
        Ok(conn)
    }

    fn connection(&mut self) -> Result<&Connection, DeviceError> {
        if self.conn.is_none() {
            self.conn = Some(self.open_connection()?);
        }
        self.conn.as_ref().ok_or_else(|| DeviceError::NotConnected {
            identity: self.identity.0.clone(),
        })
    }

    /// Rows whose effective time compares `op` against `threshold`, ascending.
    fn query(&mut self, op: &str, threshold: &str) -> Result<Vec<PunchRecord>, DeviceError> {
        let table = self.table.clone();
        let rows: Vec<Row> = {
            let conn = self.connection()?;
            let time = time_expression(conn, &table)?;
            let sql = format!("SELECT * FROM {table} WHERE {time} {op} ?1 ORDER BY {time} ASC");
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            let mapped = stmt.query_map([threshold], |row| {
                let mut values = Row::with_capacity(columns.len());
                for (idx, name) in columns.iter().enumerate() {
                    values.insert(name.clone(), row.get::<_, Value>(idx)?);
                }
                Ok(values)
            })?;
            mapped.collect::<Result<_, _>>()?
        };

        let total = rows.len();
        let records: Vec<PunchRecord> = rows.iter().filter_map(|row| self.normalize(row)).collect();
        if total > 0 {
            tracing::info!(
                device = %self.identity,
                count = records.len(),
                skipped = total - records.len(),
                threshold,
                "retrieved records from attendance database",
            );
        }
        Ok(records)
    }

    fn normalize(&self, row: &Row) -> Option<PunchRecord> {
        let raw_time = text(row, TIME_COLUMN)
            .filter(|s| !s.is_empty())
            .or_else(|| text(row, FALLBACK_TIME_COLUMN))?;
        let timestamp = match NaiveDateTime::parse_from_str(&raw_time, TIMESTAMP_FORMAT) {
            Ok(ts) => ts,
            Err(err) => {
                tracing::warn!(device = %self.identity, value = %raw_time, error = %err, "skipping row with unparseable time");
                return None;
            }
        };

        let subject_id = text(row, "PersonID")
            .or_else(|| text(row, "employee_id"))
            .unwrap_or_else(|| "unknown".to_string());
        let verify = code(row, "AttendanceMethod")
            .or_else(|| code(row, "verify_type"))
            .unwrap_or(0);
        let state = code(row, "AttendanceState")
            .or_else(|| code(row, "status"))
            .unwrap_or(0);

        let mut record = PunchRecord::from_local(
            subject_id,
            timestamp,
            VerifyMethod::from_code(verify),
            PunchStatus::from_code(state),
        )?;
        for (column, key) in EXTRA_COLUMNS {
            if let Some(value) = text(row, column) {
                record.extras.insert((*key).to_string(), value);
            }
        }
        Some(record)
    }

    fn latest_time(&self) -> Option<String> {
        let conn = self.conn.as_ref()?;
        let time = time_expression(conn, &self.table).ok()?;
        let sql = format!("SELECT MAX({time}) FROM {}", self.table);
        conn.query_row(&sql, [], |row| row.get::<_, Option<String>>(0))
            .optional()
            .ok()
            .flatten()
            .flatten()
    }
}

impl AttendanceDevice for DatabaseDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            incremental_fetch: true,
            clear_source: false,
        }
    }

    fn connect(&mut self) -> bool {
        if self.conn.is_some() {
            return true;
        }
        match self.open_connection() {
            Ok(conn) => {
                tracing::info!(device = %self.identity, path = %self.path.display(), "connected to attendance database");
                self.conn = Some(conn);
                true
            }
            Err(err) => {
                tracing::error!(device = %self.identity, path = %self.path.display(), error = %err, "failed to connect to attendance database");
                false
            }
        }
    }

    fn disconnect(&mut self) -> bool {
        if self.conn.take().is_some() {
            tracing::info!(device = %self.identity, "disconnected from attendance database");
        }
        true
    }

    fn test_connection(&mut self) -> bool {
        self.connect()
    }

    fn try_fetch_all(&mut self) -> Result<Vec<PunchRecord>, DeviceError> {
        let minutes = i64::try_from(self.fetch_minutes).unwrap_or(i64::MAX / 60);
        let since = Local::now().naive_local() - chrono::Duration::minutes(minutes);
        let threshold = since.format(TIMESTAMP_FORMAT).to_string();
        self.query(">=", &threshold)
    }

    fn try_fetch_since(&mut self, epoch: i64) -> Result<Vec<PunchRecord>, DeviceError> {
        let since = DateTime::from_timestamp(epoch, 0)
            .ok_or_else(|| DeviceError::Protocol(format!("epoch {epoch} out of range")))?
            .with_timezone(&Local)
            .naive_local();
        let threshold = since.format(TIMESTAMP_FORMAT).to_string();
        self.query(">", &threshold)
    }

    fn clear_source(&mut self) -> bool {
        tracing::warn!(device = %self.identity, "clear not supported for database device (table managed externally)");
        false
    }

    fn device_info(&self) -> DeviceInfo {
        let mut info = DeviceInfo::new("database", self.identity.clone())
            .with_detail("path", self.path.display().to_string())
            .with_detail("table", self.table.clone())
            .with_detail("fetch_minutes", self.fetch_minutes)
            .with_detail("connected", self.conn.is_some());
        if let Some(latest) = self.latest_time() {
            info = info.with_detail("latest_time", latest);
        }
        info.capabilities = self.capabilities();
        info
    }
}

/// SQL for a row's effective time: the primary column, or the fallback column
/// when the primary is blank and the table has one.
fn time_expression(conn: &Connection, table: &str) -> Result<String, DeviceError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut has_fallback = false;
    for name in names {
        if name?.eq_ignore_ascii_case(FALLBACK_TIME_COLUMN) {
            has_fallback = true;
        }
    }
    Ok(if has_fallback {
        format!("COALESCE(NULLIF({TIME_COLUMN}, ''), {FALLBACK_TIME_COLUMN})")
    } else {
        TIME_COLUMN.to_string()
    })
}

fn validate_table_name(table: &str) -> Result<(), DeviceError> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(DeviceError::InvalidConfig(format!(
            "table name '{table}' must be a plain identifier"
        )))
    }
}

fn text(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Text(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Null | Value::Blob(_) => None,
    }
}

fn code(row: &Row, column: &str) -> Option<i64> {
    match row.get(column)? {
        Value::Integer(i) => Some(*i),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("attendance_records", true)]
    #[case("_t1", true)]
    #[case("1table", false)]
    #[case("", false)]
    #[case("records; DROP TABLE x", false)]
    #[case("a.b", false)]
    fn table_name_validation(#[case] name: &str, #[case] ok: bool) {
        assert_eq!(validate_table_name(name).is_ok(), ok, "table '{name}'");
    }

    #[test]
    fn missing_database_file_fails_to_connect() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut device = DatabaseDevice::new(
            DeviceIdentity::from("db"),
            dir.path().join("absent.db"),
            "attendance_records".to_string(),
            10,
        )
        .expect("valid config");
        assert!(!device.connect());
        assert!(device.fetch_since(0).is_empty());
        assert!(!dir.path().join("absent.db").exists(), "read-only open must not create the file");
    }
}
