//! Batch sync client - posts punch records to the remote collector.
//!
//! Records are split into consecutive batches of at most `batch_size`. Each
//! batch is an independent request; a failed batch is recorded and the next
//! one is still attempted. HTTP goes through the [`Transport`] seam so the
//! batching and retry rules can be exercised without a network.

use std::time::Duration;

use chrono::Local;
use serde_json::Value;

use punchsync_core::{Config, DeviceInfo, PunchRecord, TIMESTAMP_FORMAT};

use crate::wire::{BatchPayload, CollectorResponse, HealthResponse};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Status and raw body of an HTTP exchange that produced a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub message: String,
    pub timed_out: bool,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.timed_out {
            write!(f, "request timed out: {}", self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// Minimal HTTP surface the client needs.
pub trait Transport: Send {
    /// `POST url` with a bearer token and a JSON body.
    fn post_json(&self, url: &str, api_key: &str, body: &Value) -> Result<HttpResponse, TransportError>;

    /// Unauthenticated `GET url`.
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] over a blocking `ureq` agent with a per-request timeout.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Transport for HttpTransport {
    fn post_json(&self, url: &str, api_key: &str, body: &Value) -> Result<HttpResponse, TransportError> {
        let result = self
            .agent
            .post(url)
            .set("Authorization", &format!("Bearer {api_key}"))
            .set("Accept", "application/json")
            .send_json(body);
        into_response(result)
    }

    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        into_response(self.agent.get(url).set("Accept", "application/json").call())
    }
}

fn into_response(result: Result<ureq::Response, ureq::Error>) -> Result<HttpResponse, TransportError> {
    match result {
        Ok(response) => {
            let status = response.status();
            let body = response.into_string().map_err(|e| TransportError {
                timed_out: is_timeout(&e),
                message: format!("failed to read response body: {e}"),
            })?;
            Ok(HttpResponse { status, body })
        }
        // ureq reports non-2xx as errors; the caller classifies statuses.
        Err(ureq::Error::Status(status, response)) => Ok(HttpResponse {
            status,
            body: response.into_string().unwrap_or_default(),
        }),
        Err(ureq::Error::Transport(transport)) => {
            let timed_out = std::error::Error::source(&transport)
                .and_then(|source| source.downcast_ref::<std::io::Error>())
                .map(is_timeout)
                .unwrap_or(false);
            Err(TransportError {
                message: transport.to_string(),
                timed_out,
            })
        }
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Why a batch was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchFailure {
    /// No HTTP response (connection refused, DNS, timeout).
    Transport(TransportError),
    /// Non-2xx status.
    Http { status: u16, message: String },
    /// 2xx with `success: false`.
    Rejected { message: String },
    /// 2xx with a body that is not a collector response.
    Decode { message: String },
}

impl BatchFailure {
    /// Transport faults, 5xx and explicit rejections may succeed on a resend.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Rejected { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Decode { .. } => false,
        }
    }
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::Http { status, message } if message.is_empty() => write!(f, "HTTP {status}"),
            Self::Http { status, message } => write!(f, "HTTP {status}: {message}"),
            Self::Rejected { message } => write!(f, "collector rejected batch: {message}"),
            Self::Decode { message } => write!(f, "invalid collector response: {message}"),
        }
    }
}

/// Outcome of one batch (after any retries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// 1-based position of the batch within the cycle.
    pub index: usize,
    pub records: usize,
    pub attempts: u32,
    pub response: Option<CollectorResponse>,
    pub failure: Option<BatchFailure>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Aggregate outcome of [`SyncClient::send_batches`].
///
/// Every record is counted in exactly one of `sent` / `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchResult {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub batches: usize,
    pub success: bool,
    pub message: Option<String>,
    pub outcomes: Vec<BatchOutcome>,
    /// Highest `raw_timestamp` that is safe to persist as a cursor: every
    /// record at or below it was accepted, none of them failed.
    pub committed_through: Option<i64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Endpoint, credentials and retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub url: String,
    pub api_key: String,
    pub retry_failed: bool,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.remote_api.url.clone(),
            api_key: config.remote_api.key.clone(),
            retry_failed: config.sync.retry_failed,
            max_retries: config.sync.max_retries,
            retry_backoff: Duration::from_millis(config.sync.retry_backoff_ms),
        }
    }
}

pub struct SyncClient {
    settings: ClientSettings,
    transport: Box<dyn Transport>,
}

impl SyncClient {
    pub fn new(settings: ClientSettings, transport: Box<dyn Transport>) -> Self {
        Self {
            settings,
            transport,
        }
    }

    /// Client over [`HttpTransport`] configured from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ClientSettings::from_config(config),
            Box::new(HttpTransport::new(config.remote_api.timeout())),
        )
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Probe the collector's health endpoint.
    pub fn test_connection(&self) -> bool {
        match self.transport.get(&self.settings.url) {
            Ok(response) if response.is_success() => {
                let status = serde_json::from_str::<HealthResponse>(&response.body)
                    .map(|health| health.status)
                    .unwrap_or_default();
                tracing::info!(url = %self.settings.url, status = %status, "collector reachable");
                true
            }
            Ok(response) => {
                tracing::warn!(url = %self.settings.url, status = response.status, "collector health check failed");
                false
            }
            Err(err) => {
                tracing::warn!(url = %self.settings.url, error = %err, "collector unreachable");
                false
            }
        }
    }

    /// Post `records` in order, `batch_size` at a time (0 is treated as 1).
    pub fn send_batches(
        &self,
        records: &[PunchRecord],
        device_info: &DeviceInfo,
        batch_size: usize,
    ) -> BatchResult {
        let batch_size = batch_size.max(1);
        let mut result = BatchResult {
            total: records.len(),
            success: true,
            ..BatchResult::default()
        };
        if records.is_empty() {
            return result;
        }

        let mut first_failure: Option<String> = None;
        let mut lowest_failed: Option<i64> = None;
        let mut accepted: Vec<i64> = Vec::new();

        for (i, chunk) in records.chunks(batch_size).enumerate() {
            let index = i + 1;
            let outcome = self.send_with_retry(index, chunk, device_info);
            result.batches += 1;
            match &outcome.failure {
                None => {
                    result.sent += chunk.len();
                    accepted.extend(chunk.iter().map(|r| r.raw_timestamp));
                    tracing::info!(batch = index, records = chunk.len(), attempts = outcome.attempts, "batch delivered");
                }
                Some(failure) => {
                    result.failed += chunk.len();
                    if let Some(min) = chunk.iter().map(|r| r.raw_timestamp).min() {
                        lowest_failed = Some(lowest_failed.map_or(min, |cur| cur.min(min)));
                    }
                    if first_failure.is_none() {
                        first_failure = Some(format!("batch {index}: {failure}"));
                    }
                    tracing::warn!(batch = index, records = chunk.len(), attempts = outcome.attempts, error = %failure, "batch failed");
                }
            }
            result.outcomes.push(outcome);
        }

        result.success = result.failed == 0;
        result.message = first_failure;
        result.committed_through = accepted
            .into_iter()
            .filter(|ts| lowest_failed.map_or(true, |low| *ts < low))
            .max();
        result
    }

    fn send_with_retry(&self, index: usize, chunk: &[PunchRecord], device_info: &DeviceInfo) -> BatchOutcome {
        let max_attempts = if self.settings.retry_failed {
            self.settings.max_retries.saturating_add(1)
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            let outcome = self.send_once(chunk, device_info);
            let failure = match outcome {
                Ok(response) => {
                    return BatchOutcome {
                        index,
                        records: chunk.len(),
                        attempts: attempt,
                        response: Some(response),
                        failure: None,
                    }
                }
                Err(failure) => failure,
            };

            if attempt >= max_attempts || !failure.is_retryable() {
                return BatchOutcome {
                    index,
                    records: chunk.len(),
                    attempts: attempt,
                    response: None,
                    failure: Some(failure),
                };
            }

            let delay = retry_delay(self.settings.retry_backoff, attempt);
            tracing::debug!(batch = index, attempt, delay_ms = delay.as_millis() as u64, error = %failure, "retrying batch");
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            attempt += 1;
        }
    }

    fn send_once(&self, chunk: &[PunchRecord], device_info: &DeviceInfo) -> Result<CollectorResponse, BatchFailure> {
        let synced_at = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let payload = BatchPayload::new(chunk, device_info, synced_at);
        let body = serde_json::to_value(&payload).map_err(|e| BatchFailure::Decode {
            message: format!("failed to encode batch: {e}"),
        })?;

        let response = self
            .transport
            .post_json(&self.settings.url, &self.settings.api_key, &body)
            .map_err(BatchFailure::Transport)?;

        if !response.is_success() {
            let message = serde_json::from_str::<CollectorResponse>(&response.body)
                .map(|r| r.message)
                .unwrap_or_else(|_| response.body.chars().take(200).collect());
            return Err(BatchFailure::Http {
                status: response.status,
                message,
            });
        }

        let parsed: CollectorResponse =
            serde_json::from_str(&response.body).map_err(|e| BatchFailure::Decode {
                message: e.to_string(),
            })?;
        if !parsed.success {
            return Err(BatchFailure::Rejected {
                message: parsed.message,
            });
        }
        Ok(parsed)
    }
}

/// Upper bound for a single retry pause.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

/// Linear backoff: `backoff * attempt`, capped at [`MAX_RETRY_DELAY`].
fn retry_delay(backoff: Duration, attempt: u32) -> Duration {
    backoff
        .checked_mul(attempt)
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use punchsync_core::{DeviceIdentity, PunchStatus, VerifyMethod};
    use serde_json::json;

    const T: i64 = 1_741_000_000;

    type Reply = Box<dyn Fn(usize, &Value) -> Result<HttpResponse, TransportError> + Send>;

    /// Records every post and answers through `reply(call_number, body)`.
    struct FakeTransport {
        calls: Arc<Mutex<Vec<Value>>>,
        reply: Reply,
    }

    impl Transport for FakeTransport {
        fn post_json(&self, _url: &str, api_key: &str, body: &Value) -> Result<HttpResponse, TransportError> {
            assert_eq!(api_key, "secret");
            let mut calls = self.calls.lock().unwrap();
            calls.push(body.clone());
            (self.reply)(calls.len(), body)
        }

        fn get(&self, _url: &str) -> Result<HttpResponse, TransportError> {
            (self.reply)(0, &Value::Null)
        }
    }

    fn ok(records: usize) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: 200,
            body: json!({
                "success": true,
                "message": "ok",
                "records_received": records,
                "records_saved": records,
                "records_failed": 0,
            })
            .to_string(),
        })
    }

    fn status(code: u16) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: code,
            body: json!({"success": false, "message": "nope"}).to_string(),
        })
    }

    fn client_with(retry: bool, reply: Reply) -> (SyncClient, Arc<Mutex<Vec<Value>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let settings = ClientSettings {
            url: "http://collector.test/attendance".to_string(),
            api_key: "secret".to_string(),
            retry_failed: retry,
            max_retries: 2,
            retry_backoff: Duration::ZERO,
        };
        let transport = FakeTransport {
            calls: calls.clone(),
            reply,
        };
        (SyncClient::new(settings, Box::new(transport)), calls)
    }

    fn records(n: usize) -> Vec<PunchRecord> {
        (0..n)
            .map(|i| {
                PunchRecord::from_epoch(format!("{i}"), T + i as i64, VerifyMethod::Card, PunchStatus::CheckIn)
                    .expect("valid epoch")
            })
            .collect()
    }

    fn info() -> DeviceInfo {
        DeviceInfo::new("null", DeviceIdentity::from("null"))
    }

    fn batch_len(body: &Value) -> usize {
        body["records"].as_array().map(Vec::len).unwrap_or(0)
    }

    #[test]
    fn empty_input_is_success_without_requests() {
        let (client, calls) = client_with(false, Box::new(|_, _| ok(0)));
        let result = client.send_batches(&[], &info(), 100);
        assert!(result.success);
        assert_eq!((result.total, result.sent, result.failed, result.batches), (0, 0, 0, 0));
        assert_eq!(result.committed_through, None);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn middle_batch_failure_is_isolated() {
        let (client, calls) = client_with(
            false,
            Box::new(|call, body| if call == 2 { status(500) } else { ok(batch_len(body)) }),
        );
        let input = records(250);
        let result = client.send_batches(&input, &info(), 100);

        let sizes: Vec<usize> = calls.lock().unwrap().iter().map(batch_len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert!(!result.success);
        assert_eq!(result.batches, 3);
        assert_eq!(result.sent, 150);
        assert_eq!(result.failed, 100);
        assert_eq!(result.outcomes.len(), 3);
        assert!(!result.outcomes[1].is_success());
        assert!(result.message.as_deref().unwrap_or_default().contains("batch 2"));
        // Only the first batch lies entirely below the failed one.
        assert_eq!(result.committed_through, Some(T + 99));
    }

    #[test]
    fn batch_count_is_ceiling_and_counts_balance() {
        for (n, b) in [(1, 1), (7, 3), (100, 100), (101, 100), (5, 0)] {
            let (client, calls) = client_with(false, Box::new(|_, body| ok(batch_len(body))));
            let result = client.send_batches(&records(n), &info(), b);
            let b = b.max(1);
            assert_eq!(result.batches, n.div_ceil(b), "n={n} b={b}");
            assert_eq!(calls.lock().unwrap().len(), n.div_ceil(b));
            assert_eq!(result.sent + result.failed, n);
            assert_eq!(result.committed_through, Some(T + n as i64 - 1));
        }
    }

    #[test]
    fn success_false_body_counts_as_failure() {
        let (client, _) = client_with(
            false,
            Box::new(|_, _| {
                Ok(HttpResponse {
                    status: 200,
                    body: json!({"success": false, "message": "storage full"}).to_string(),
                })
            }),
        );
        let result = client.send_batches(&records(3), &info(), 10);
        assert_eq!(result.failed, 3);
        assert!(matches!(
            result.outcomes[0].failure,
            Some(BatchFailure::Rejected { ref message }) if message == "storage full"
        ));
    }

    #[test]
    fn undecodable_body_counts_as_failure() {
        let (client, _) = client_with(
            true,
            Box::new(|_, _| {
                Ok(HttpResponse {
                    status: 200,
                    body: "<html>proxy</html>".to_string(),
                })
            }),
        );
        let result = client.send_batches(&records(2), &info(), 10);
        assert_eq!(result.failed, 2);
        assert_eq!(result.outcomes[0].attempts, 1, "decode failures are not retried");
    }

    #[test]
    fn transient_failure_is_retried_within_same_batch() {
        let (client, calls) = client_with(
            true,
            Box::new(|call, body| {
                if call == 1 {
                    Err(TransportError {
                        message: "connection reset".to_string(),
                        timed_out: false,
                    })
                } else {
                    ok(batch_len(body))
                }
            }),
        );
        let result = client.send_batches(&records(5), &info(), 10);
        assert!(result.success);
        assert_eq!(result.batches, 1);
        assert_eq!(result.outcomes[0].attempts, 2);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn retries_are_bounded_by_max_retries() {
        let (client, calls) = client_with(
            true,
            Box::new(|_, _| {
                Err(TransportError {
                    message: "slow".to_string(),
                    timed_out: true,
                })
            }),
        );
        let result = client.send_batches(&records(1), &info(), 10);
        assert_eq!(result.failed, 1);
        assert_eq!(calls.lock().unwrap().len(), 3, "one attempt plus two retries");
        assert!(result.message.unwrap_or_default().contains("timed out"));
    }

    #[test]
    fn retry_delay_is_linear_and_capped() {
        let backoff = Duration::from_millis(500);
        assert_eq!(retry_delay(backoff, 1), Duration::from_millis(500));
        assert_eq!(retry_delay(backoff, 3), Duration::from_millis(1500));
        assert_eq!(retry_delay(Duration::from_secs(600), 1), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(Duration::MAX, 2), MAX_RETRY_DELAY);
    }

    #[test]
    fn unauthorized_is_never_retried() {
        let (client, calls) = client_with(true, Box::new(|_, _| status(401)));
        let result = client.send_batches(&records(4), &info(), 10);
        assert_eq!(result.failed, 4);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert!(matches!(
            result.outcomes[0].failure,
            Some(BatchFailure::Http { status: 401, .. })
        ));
    }

    #[test]
    fn payload_carries_device_info_and_wire_records() {
        let (client, calls) = client_with(false, Box::new(|_, body| ok(batch_len(body))));
        client.send_batches(&records(1), &info(), 10);

        let calls = calls.lock().unwrap();
        let body = &calls[0];
        assert_eq!(body["records"][0]["user_id"], "0");
        assert_eq!(body["records"][0]["verify_type"], "Card");
        assert_eq!(body["device_info"]["type"], "null");
        assert!(body["device_info"]["synced_at"].is_string());
    }

    #[test]
    fn health_check_maps_status() {
        let (up, _) = client_with(
            false,
            Box::new(|_, _| {
                Ok(HttpResponse {
                    status: 200,
                    body: json!({"status": "ok", "message": "up"}).to_string(),
                })
            }),
        );
        assert!(up.test_connection());

        let (down, _) = client_with(false, Box::new(|_, _| status(503)));
        assert!(!down.test_connection());
    }
}
