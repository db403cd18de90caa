//! Collector wire format.
//!
//! `POST` bodies are `{"records": [...], "device_info": {...}}`; the collector
//! answers with [`CollectorResponse`]. `GET` on the same URL is the
//! unauthenticated health check.

use serde::{Deserialize, Serialize};

use punchsync_core::{DeviceInfo, PunchRecord};

/// One batch as posted to the collector.
#[derive(Debug, Serialize)]
pub struct BatchPayload<'a> {
    pub records: &'a [PunchRecord],
    pub device_info: StampedDeviceInfo<'a>,
}

/// Device provenance plus the time this batch left the process.
#[derive(Debug, Serialize)]
pub struct StampedDeviceInfo<'a> {
    #[serde(flatten)]
    pub info: &'a DeviceInfo,
    pub synced_at: String,
}

impl<'a> BatchPayload<'a> {
    pub fn new(records: &'a [PunchRecord], info: &'a DeviceInfo, synced_at: String) -> Self {
        Self {
            records,
            device_info: StampedDeviceInfo { info, synced_at },
        }
    }
}

/// Collector reply to a batch post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub records_received: Option<u64>,
    #[serde(default)]
    pub records_saved: Option<u64>,
    #[serde(default)]
    pub records_failed: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Collector reply to the health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message: String,
}
