//! Domain types for attendance punches and the devices that produce them.
//!
//! `PunchRecord` serializes directly into the collector wire shape
//! (`user_id`, `verify_type`, display-name enums, flattened vendor extras).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

/// Wall-clock rendering used by devices, the source database and the collector.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// The configured name of one device integration (`devices.<identity>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(pub String);

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DeviceIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How the subject proved their identity at the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VerifyMethod {
    Password,
    Fingerprint,
    Card,
    Face,
    #[serde(rename = "Fingerprint and Password")]
    FingerprintAndPassword,
    #[serde(rename = "Card and Password")]
    CardAndPassword,
    #[serde(rename = "Face and Password")]
    FaceAndPassword,
    #[default]
    Unknown,
}

impl VerifyMethod {
    /// Map a vendor verify code. Codes outside `0..=6` are `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Password,
            1 => Self::Fingerprint,
            2 => Self::Card,
            3 => Self::Face,
            4 => Self::FingerprintAndPassword,
            5 => Self::CardAndPassword,
            6 => Self::FaceAndPassword,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "Password",
            Self::Fingerprint => "Fingerprint",
            Self::Card => "Card",
            Self::Face => "Face",
            Self::FingerprintAndPassword => "Fingerprint and Password",
            Self::CardAndPassword => "Card and Password",
            Self::FaceAndPassword => "Face and Password",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for VerifyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The attendance state the subject selected (or the device inferred).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PunchStatus {
    #[serde(rename = "Check In")]
    CheckIn,
    #[serde(rename = "Check Out")]
    CheckOut,
    #[serde(rename = "Break Out")]
    BreakOut,
    #[serde(rename = "Break In")]
    BreakIn,
    #[serde(rename = "Overtime In")]
    OvertimeIn,
    #[serde(rename = "Overtime Out")]
    OvertimeOut,
    #[default]
    Unknown,
}

impl PunchStatus {
    /// Map a vendor state code. Codes outside `0..=5` are `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::CheckIn,
            1 => Self::CheckOut,
            2 => Self::BreakOut,
            3 => Self::BreakIn,
            4 => Self::OvertimeIn,
            5 => Self::OvertimeOut,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckIn => "Check In",
            Self::CheckOut => "Check Out",
            Self::BreakOut => "Break Out",
            Self::BreakIn => "Break In",
            Self::OvertimeIn => "Overtime In",
            Self::OvertimeOut => "Overtime Out",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PunchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One biometric or card scan event, normalized by a device adapter.
///
/// `timestamp` and `raw_timestamp` always denote the same instant; use the
/// constructors rather than filling the fields by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunchRecord {
    #[serde(rename = "user_id")]
    pub subject_id: String,
    #[serde(with = "local_timestamp")]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "verify_type")]
    pub verify_method: VerifyMethod,
    pub status: PunchStatus,
    pub raw_timestamp: i64,
    /// Vendor-specific fields (device name, card number, snapshot path, ...).
    /// Carried to the collector untouched.
    #[serde(flatten)]
    pub extras: BTreeMap<String, String>,
}

impl PunchRecord {
    /// Build a record from a local wall-clock time.
    ///
    /// Returns `None` when the local time does not exist (DST gap).
    pub fn from_local(
        subject_id: impl Into<String>,
        timestamp: NaiveDateTime,
        verify_method: VerifyMethod,
        status: PunchStatus,
    ) -> Option<Self> {
        let raw_timestamp = Local.from_local_datetime(&timestamp).earliest()?.timestamp();
        Some(Self {
            subject_id: subject_id.into(),
            timestamp,
            verify_method,
            status,
            raw_timestamp,
            extras: BTreeMap::new(),
        })
    }

    /// Build a record from epoch seconds, rendering `timestamp` in local time.
    pub fn from_epoch(
        subject_id: impl Into<String>,
        raw_timestamp: i64,
        verify_method: VerifyMethod,
        status: PunchStatus,
    ) -> Option<Self> {
        let timestamp = DateTime::from_timestamp(raw_timestamp, 0)?
            .with_timezone(&Local)
            .naive_local();
        Some(Self {
            subject_id: subject_id.into(),
            timestamp,
            verify_method,
            status,
            raw_timestamp,
            extras: BTreeMap::new(),
        })
    }

    /// Attach a vendor extension field.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

/// Capabilities a device declares at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeviceCapabilities {
    /// `fetch_since` is meaningful; without it the poll loop falls back to `fetch_all`.
    pub incremental_fetch: bool,
    /// `clear_source` can actually delete records at the source.
    pub clear_source: bool,
}

/// Descriptive metadata about a device session, attached to every batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(rename = "type")]
    pub device_type: String,
    pub identity: DeviceIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub capabilities: DeviceCapabilities,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl DeviceInfo {
    pub fn new(device_type: impl Into<String>, identity: DeviceIdentity) -> Self {
        Self {
            device_type: device_type.into(),
            identity,
            ip: None,
            port: None,
            capabilities: DeviceCapabilities::default(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// `YYYY-MM-DD HH:MM:SS` (de)serialization for `NaiveDateTime`.
mod local_timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
