//! Socket-reachable attendance terminal.
//!
//! The terminal speaks newline-delimited JSON over TCP: one request object per
//! line, one response object per line.
//!
//! ```text
//! → {"cmd":"attendance"}
//! ← {"ok":true,"records":[{"user_id":"42","timestamp":"2025-03-01 08:59:12","verify":1,"state":0}]}
//! → {"cmd":"clear_attendance"}
//! ← {"ok":true}
//! ```
//!
//! The terminal only exposes its full log, so this adapter has no incremental
//! fetch; the poll loop relies on the deduplicator and cursor filter instead.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use punchsync_core::{
    DeviceCapabilities, DeviceIdentity, DeviceInfo, PunchRecord, PunchStatus, VerifyMethod,
    TIMESTAMP_FORMAT,
};

use crate::error::{io_err, DeviceError};
use crate::AttendanceDevice;

/// Longest response line accepted from a terminal.
pub const MAX_RESPONSE_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct TerminalRequest<'a> {
    cmd: &'a str,
}

#[derive(Debug, Deserialize)]
struct TerminalResponse {
    ok: bool,
    #[serde(default)]
    records: Vec<TerminalPunch>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TerminalPunch {
    user_id: String,
    timestamp: String,
    #[serde(default)]
    verify: i64,
    #[serde(default)]
    state: i64,
}

pub struct TerminalDevice {
    identity: DeviceIdentity,
    ip: String,
    port: u16,
    timeout: Duration,
    max_response_bytes: u64,
    /// Kept for the whole session so bytes read past a newline are not lost.
    stream: Option<BufReader<TcpStream>>,
}

impl TerminalDevice {
    pub fn new(identity: DeviceIdentity, ip: String, port: u16, timeout: Duration) -> Self {
        Self {
            identity,
            ip,
            port,
            timeout,
            max_response_bytes: MAX_RESPONSE_BYTES,
            stream: None,
        }
    }

    /// Override the response line cap.
    pub fn with_max_response_bytes(mut self, max: u64) -> Self {
        self.max_response_bytes = max;
        self
    }

    fn target(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    fn resolve(&self) -> Result<SocketAddr, DeviceError> {
        let target = self.target();
        (self.ip.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| io_err(&target, e))?
            .next()
            .ok_or_else(|| DeviceError::Protocol(format!("no address resolved for {target}")))
    }

    fn open_stream(&self) -> Result<TcpStream, DeviceError> {
        let addr = self.resolve()?;
        let target = self.target();
        let stream =
            TcpStream::connect_timeout(&addr, self.timeout).map_err(|e| io_err(&target, e))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| io_err(&target, e))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| io_err(&target, e))?;
        Ok(stream)
    }

    /// One request/response round trip. A transport fault drops the stream so
    /// the next call reconnects.
    fn exchange(&mut self, cmd: &str) -> Result<TerminalResponse, DeviceError> {
        if self.stream.is_none() && !self.connect() {
            return Err(DeviceError::NotConnected {
                identity: self.identity.0.clone(),
            });
        }
        let result = self.exchange_on_stream(cmd);
        if let Err(DeviceError::Io { .. }) = &result {
            self.disconnect();
        }
        let response = result?;
        if !response.ok {
            return Err(DeviceError::Protocol(
                response
                    .error
                    .unwrap_or_else(|| format!("terminal rejected '{cmd}'")),
            ));
        }
        Ok(response)
    }

    fn exchange_on_stream(&mut self, cmd: &str) -> Result<TerminalResponse, DeviceError> {
        let target = self.target();
        let max = self.max_response_bytes;
        let Some(reader) = self.stream.as_mut() else {
            return Err(DeviceError::NotConnected {
                identity: self.identity.0.clone(),
            });
        };

        let mut payload = serde_json::to_string(&TerminalRequest { cmd })?;
        payload.push('\n');
        let stream = reader.get_mut();
        stream
            .write_all(payload.as_bytes())
            .map_err(|e| io_err(&target, e))?;
        stream.flush().map_err(|e| io_err(&target, e))?;

        let mut line = String::new();
        let read = Read::by_ref(reader)
            .take(max.saturating_add(1))
            .read_line(&mut line)
            .map_err(|e| io_err(&target, e))?;
        if read as u64 > max {
            return Err(io_err(
                &target,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("terminal response exceeds {max} bytes"),
                ),
            ));
        }
        if read == 0 {
            return Err(io_err(
                &target,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "terminal closed connection before responding",
                ),
            ));
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }

    fn normalize(&self, punch: TerminalPunch) -> Option<PunchRecord> {
        let timestamp = match NaiveDateTime::parse_from_str(&punch.timestamp, TIMESTAMP_FORMAT) {
            Ok(ts) => ts,
            Err(err) => {
                tracing::warn!(device = %self.identity, user_id = %punch.user_id, timestamp = %punch.timestamp, error = %err, "skipping punch with unparseable timestamp");
                return None;
            }
        };
        let record = PunchRecord::from_local(
            punch.user_id,
            timestamp,
            VerifyMethod::from_code(punch.verify),
            PunchStatus::from_code(punch.state),
        )?;
        Some(record.with_extra("device_ip_address", self.ip.clone()))
    }
}

impl AttendanceDevice for TerminalDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            incremental_fetch: false,
            clear_source: true,
        }
    }

    fn connect(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        match self.open_stream() {
            Ok(stream) => {
                tracing::info!(device = %self.identity, target = %self.target(), "connected to attendance terminal");
                self.stream = Some(BufReader::new(stream));
                true
            }
            Err(err) => {
                tracing::error!(device = %self.identity, target = %self.target(), error = %err, "failed to connect to attendance terminal");
                false
            }
        }
    }

    fn disconnect(&mut self) -> bool {
        if let Some(reader) = self.stream.take() {
            let _ = reader.get_ref().shutdown(std::net::Shutdown::Both);
            tracing::info!(device = %self.identity, "disconnected from attendance terminal");
        }
        true
    }

    fn test_connection(&mut self) -> bool {
        match self.open_stream() {
            Ok(stream) => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
                true
            }
            Err(err) => {
                tracing::warn!(device = %self.identity, error = %err, "terminal connection probe failed");
                false
            }
        }
    }

    fn try_fetch_all(&mut self) -> Result<Vec<PunchRecord>, DeviceError> {
        let response = self.exchange("attendance")?;
        let total = response.records.len();
        let records: Vec<PunchRecord> = response
            .records
            .into_iter()
            .filter_map(|punch| self.normalize(punch))
            .collect();
        if total > 0 {
            tracing::info!(device = %self.identity, count = records.len(), "retrieved records from terminal");
        }
        Ok(records)
    }

    fn clear_source(&mut self) -> bool {
        match self.exchange("clear_attendance") {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(device = %self.identity, error = %err, "failed to clear terminal attendance log");
                false
            }
        }
    }

    fn device_info(&self) -> DeviceInfo {
        let mut info = DeviceInfo::new("terminal", self.identity.clone())
            .with_detail("connected", self.stream.is_some());
        info.ip = Some(self.ip.clone());
        info.port = Some(self.port);
        info.capabilities = self.capabilities();
        info
    }
}
