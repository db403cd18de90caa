//! YAML configuration with environment overrides.
//!
//! # Storage layout
//!
//! ```text
//! ~/.punchsync/
//!   config.yaml     (optional - built-in defaults apply when absent)
//! ```
//!
//! # API pattern
//!
//! As with every path-bearing API in this workspace:
//! - `fn_at(home: &Path, …)` - explicit home; used in tests with `TempDir`
//! - `fn(…)` - derives home from `dirs::home_dir()`, delegates to `_at`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::DeviceIdentity;

pub const DEFAULT_TERMINAL_PORT: u16 = 4370;
pub const DEFAULT_TABLE: &str = "attendance_records";
pub const DEFAULT_FETCH_MINUTES: u64 = 10;
pub const DEFAULT_DUPLICATE_THRESHOLD_SECS: u64 = 60;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Connection parameters for one device identity, tagged by `driver`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum DeviceConfig {
    /// Socket-reachable attendance terminal.
    Terminal {
        ip: String,
        #[serde(default = "default_terminal_port")]
        port: u16,
        #[serde(default = "default_terminal_timeout")]
        timeout_secs: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duplicate_threshold_secs: Option<u64>,
    },
    /// Shared SQLite table populated by vendor software.
    Database {
        path: PathBuf,
        #[serde(default = "default_table")]
        table: String,
        #[serde(default = "default_fetch_minutes")]
        fetch_minutes: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duplicate_threshold_secs: Option<u64>,
    },
    /// Always-empty device, for testing the pipeline end to end.
    Null,
}

impl DeviceConfig {
    pub fn driver(&self) -> &'static str {
        match self {
            DeviceConfig::Terminal { .. } => "terminal",
            DeviceConfig::Database { .. } => "database",
            DeviceConfig::Null => "null",
        }
    }

    /// Per-device dedup window override, if any.
    pub fn duplicate_threshold_secs(&self) -> Option<u64> {
        match self {
            DeviceConfig::Terminal {
                duplicate_threshold_secs,
                ..
            }
            | DeviceConfig::Database {
                duplicate_threshold_secs,
                ..
            } => *duplicate_threshold_secs,
            DeviceConfig::Null => None,
        }
    }
}

/// Remote collector endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteApiConfig {
    #[serde(default = "default_api_url")]
    pub url: String,
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

impl RemoteApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RemoteApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            key: String::new(),
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
        }
    }
}

/// Batching, retry and polling knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub auto_clear_device: bool,
    #[serde(default = "default_true")]
    pub retry_failed: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            auto_clear_device: false,
            retry_failed: true,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            duplicate_threshold_secs: DEFAULT_DUPLICATE_THRESHOLD_SECS,
        }
    }
}

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_identity")]
    pub default: DeviceIdentity,
    #[serde(default = "default_devices")]
    pub devices: BTreeMap<DeviceIdentity, DeviceConfig>,
    #[serde(default)]
    pub remote_api: RemoteApiConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default: default_identity(),
            devices: default_devices(),
            remote_api: RemoteApiConfig::default(),
            sync: SyncSettings::default(),
            debug: false,
        }
    }
}

impl Config {
    /// Pick the identity to run: an explicit `--driver` wins over `default`.
    pub fn resolve_identity(&self, requested: Option<&str>) -> DeviceIdentity {
        requested
            .map(DeviceIdentity::from)
            .unwrap_or_else(|| self.default.clone())
    }

    /// Look up the device section for `identity`.
    pub fn device(&self, identity: &DeviceIdentity) -> Result<&DeviceConfig, ConfigError> {
        self.devices
            .get(identity)
            .ok_or_else(|| ConfigError::UnknownDevice {
                identity: identity.0.clone(),
                known: self
                    .devices
                    .keys()
                    .map(|k| k.0.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// Dedup window for `identity`: device override, else the sync default.
    pub fn duplicate_threshold(&self, identity: &DeviceIdentity) -> Duration {
        let secs = self
            .devices
            .get(identity)
            .and_then(DeviceConfig::duplicate_threshold_secs)
            .unwrap_or(self.sync.duplicate_threshold_secs);
        Duration::from_secs(secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    /// Reject values the sync engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.batch_size == 0 {
            return Err(invalid("sync.batch_size", "0", "must be at least 1"));
        }
        if self.sync.interval_secs == 0 {
            return Err(invalid("sync.interval_secs", "0", "must be at least 1"));
        }
        if self.remote_api.url.trim().is_empty() {
            return Err(invalid("remote_api.url", "", "must not be empty"));
        }
        Ok(())
    }

    /// Apply `ATTENDANCE_*` overrides read through `lookup`.
    ///
    /// Device-level overrides apply to every configured device of the
    /// matching driver.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(driver) = lookup("ATTENDANCE_DRIVER") {
            self.default = DeviceIdentity::from(driver);
        }

        let ip = lookup("ATTENDANCE_DEVICE_IP");
        let port = parse_env::<u16, _>(&lookup, "ATTENDANCE_DEVICE_PORT")?;
        let db_path = lookup("ATTENDANCE_DB_PATH");
        let table = lookup("ATTENDANCE_DB_TABLE");
        let fetch_minutes = parse_env::<u64, _>(&lookup, "ATTENDANCE_FETCH_MINUTES")?;
        let threshold = parse_env::<u64, _>(&lookup, "ATTENDANCE_DUPLICATE_THRESHOLD")?;

        for device in self.devices.values_mut() {
            match device {
                DeviceConfig::Terminal {
                    ip: dev_ip,
                    port: dev_port,
                    duplicate_threshold_secs,
                    ..
                } => {
                    if let Some(ip) = &ip {
                        *dev_ip = ip.clone();
                    }
                    if let Some(port) = port {
                        *dev_port = port;
                    }
                    if threshold.is_some() {
                        *duplicate_threshold_secs = threshold;
                    }
                }
                DeviceConfig::Database {
                    path,
                    table: dev_table,
                    fetch_minutes: dev_minutes,
                    duplicate_threshold_secs,
                } => {
                    if let Some(p) = &db_path {
                        *path = PathBuf::from(p);
                    }
                    if let Some(t) = &table {
                        *dev_table = t.clone();
                    }
                    if let Some(m) = fetch_minutes {
                        *dev_minutes = m;
                    }
                    if threshold.is_some() {
                        *duplicate_threshold_secs = threshold;
                    }
                }
                DeviceConfig::Null => {}
            }
        }

        if let Some(url) = lookup("ATTENDANCE_API_URL") {
            self.remote_api.url = url;
        }
        if let Some(key) = lookup("ATTENDANCE_API_KEY") {
            self.remote_api.key = key;
        }
        if let Some(timeout) = parse_env::<u64, _>(&lookup, "ATTENDANCE_API_TIMEOUT")? {
            self.remote_api.timeout_secs = timeout;
        }
        if let Some(size) = parse_env::<usize, _>(&lookup, "ATTENDANCE_SYNC_BATCH_SIZE")? {
            self.sync.batch_size = size;
        }
        if let Some(flag) = parse_bool_env(&lookup, "ATTENDANCE_AUTO_CLEAR")? {
            self.sync.auto_clear_device = flag;
        }
        if let Some(flag) = parse_bool_env(&lookup, "ATTENDANCE_RETRY_FAILED")? {
            self.sync.retry_failed = flag;
        }
        if let Some(n) = parse_env::<u32, _>(&lookup, "ATTENDANCE_MAX_RETRIES")? {
            self.sync.max_retries = n;
        }
        if let Some(secs) = parse_env::<u64, _>(&lookup, "ATTENDANCE_POLL_INTERVAL")? {
            self.sync.interval_secs = secs;
        }
        if let Some(flag) = parse_bool_env(&lookup, "ATTENDANCE_DEBUG")? {
            self.debug = flag;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.punchsync/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".punchsync")
}

/// `<home>/.punchsync/config.yaml` - pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load `config.yaml` under `home`, or the built-in defaults when absent.
///
/// Returns `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Load `config.yaml` under `home`, then apply process environment overrides
/// and validate the result.
pub fn load_with_env_at(home: &Path) -> Result<Config, ConfigError> {
    let mut config = load_at(home)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Atomically save `config` to `<home>/.punchsync/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path_at(home);
    let dir = root_at(home);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// Home directory lookup shared by the `_at`-less wrappers.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn parse_env<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(key, &raw, "not a valid number")),
    }
}

fn parse_bool_env<F>(lookup: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
            _ => Err(invalid(key, &raw, "expected true or false")),
        },
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn default_identity() -> DeviceIdentity {
    DeviceIdentity::from("database")
}

fn default_devices() -> BTreeMap<DeviceIdentity, DeviceConfig> {
    let mut devices = BTreeMap::new();
    devices.insert(
        DeviceIdentity::from("terminal"),
        DeviceConfig::Terminal {
            ip: "192.168.1.201".to_string(),
            port: DEFAULT_TERMINAL_PORT,
            timeout_secs: default_terminal_timeout(),
            duplicate_threshold_secs: None,
        },
    );
    devices.insert(
        DeviceIdentity::from("database"),
        DeviceConfig::Database {
            path: PathBuf::from("attendance.db"),
            table: default_table(),
            fetch_minutes: DEFAULT_FETCH_MINUTES,
            duplicate_threshold_secs: None,
        },
    );
    devices.insert(DeviceIdentity::from("null"), DeviceConfig::Null);
    devices
}

fn default_terminal_port() -> u16 {
    DEFAULT_TERMINAL_PORT
}
fn default_terminal_timeout() -> u64 {
    10
}
fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}
fn default_fetch_minutes() -> u64 {
    DEFAULT_FETCH_MINUTES
}
fn default_api_url() -> String {
    "http://localhost:8080/attendance".to_string()
}
fn default_api_timeout() -> u64 {
    DEFAULT_API_TIMEOUT_SECS
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    1000
}
fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}
fn default_duplicate_threshold() -> u64 {
    DEFAULT_DUPLICATE_THRESHOLD_SECS
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
