//! The real ureq transport against a loopback HTTP stub.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use punchsync_core::{DeviceIdentity, DeviceInfo, PunchRecord, PunchStatus, VerifyMethod};
use punchsync_sync::{ClientSettings, HttpTransport, SyncClient};
use serde_json::{json, Value};

struct Captured {
    request_line: String,
    authorization: Option<String>,
    body: String,
}

/// Answer `responses.len()` requests in order, forwarding what was received.
fn spawn_collector(responses: Vec<(u16, Value)>) -> (String, mpsc::Receiver<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
    let url = format!("http://{}/attendance", listener.local_addr().expect("addr"));
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for (status, reply) in responses {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));

            let mut request_line = String::new();
            reader.read_line(&mut request_line).expect("request line");
            let mut content_length = 0usize;
            let mut authorization = None;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).expect("header");
                let header = header.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    match name.to_ascii_lowercase().as_str() {
                        "content-length" => content_length = value.trim().parse().expect("length"),
                        "authorization" => authorization = Some(value.trim().to_string()),
                        _ => {}
                    }
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).expect("body");

            let payload = reply.to_string();
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                payload.len()
            )
            .expect("write response");

            let _ = tx.send(Captured {
                request_line: request_line.trim_end().to_string(),
                authorization,
                body: String::from_utf8(body).expect("utf8 body"),
            });
        }
    });

    (url, rx)
}

fn client(url: String) -> SyncClient {
    SyncClient::new(
        ClientSettings {
            url,
            api_key: "k3y".to_string(),
            retry_failed: false,
            max_retries: 0,
            retry_backoff: Duration::ZERO,
        },
        Box::new(HttpTransport::new(Duration::from_secs(5))),
    )
}

#[test]
fn posts_bearer_authenticated_batches() {
    let (url, rx) = spawn_collector(vec![(
        200,
        json!({"success": true, "message": "Saved", "records_received": 1, "records_saved": 1, "records_failed": 0, "timestamp": "2025-03-01T09:00:00Z"}),
    )]);
    let record = PunchRecord::from_epoch("42", 1_741_000_000, VerifyMethod::Face, PunchStatus::CheckIn)
        .expect("valid epoch")
        .with_extra("person_card_no", "C-1");
    let info = DeviceInfo::new("terminal", DeviceIdentity::from("gate"));

    let result = client(url).send_batches(&[record], &info, 100);

    assert!(result.success, "{:?}", result.message);
    assert_eq!(result.sent, 1);
    let saved = result.outcomes[0].response.as_ref().and_then(|r| r.records_saved);
    assert_eq!(saved, Some(1));

    let captured = rx.recv_timeout(Duration::from_secs(5)).expect("request captured");
    assert!(captured.request_line.starts_with("POST /attendance"));
    assert_eq!(captured.authorization.as_deref(), Some("Bearer k3y"));
    let body: Value = serde_json::from_str(&captured.body).expect("json body");
    assert_eq!(body["records"][0]["user_id"], "42");
    assert_eq!(body["records"][0]["person_card_no"], "C-1");
    assert_eq!(body["device_info"]["identity"], "gate");
}

#[test]
fn unauthorized_status_is_a_batch_failure() {
    let (url, _rx) = spawn_collector(vec![(401, json!({"success": false, "message": "Unauthorized"}))]);
    let record = PunchRecord::from_epoch("1", 1_741_000_000, VerifyMethod::Card, PunchStatus::CheckIn)
        .expect("valid epoch");
    let info = DeviceInfo::new("null", DeviceIdentity::from("null"));

    let result = client(url).send_batches(&[record], &info, 100);

    assert!(!result.success);
    assert_eq!(result.failed, 1);
    assert!(result.message.unwrap_or_default().contains("401"));
}

#[test]
fn health_check_uses_get() {
    let (url, rx) = spawn_collector(vec![(200, json!({"status": "ok", "message": "Attendance API"}))]);
    assert!(client(url).test_connection());
    let captured = rx.recv_timeout(Duration::from_secs(5)).expect("request captured");
    assert!(captured.request_line.starts_with("GET /attendance"));
    assert_eq!(captured.authorization, None);
}

#[test]
fn refused_connection_is_a_batch_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let url = format!("http://{}/attendance", listener.local_addr().expect("addr"));
    drop(listener);

    let c = client(url);
    assert!(!c.test_connection());
    let record = PunchRecord::from_epoch("1", 1_741_000_000, VerifyMethod::Card, PunchStatus::CheckIn)
        .expect("valid epoch");
    let result = c.send_batches(&[record], &DeviceInfo::new("null", DeviceIdentity::from("null")), 10);
    assert_eq!(result.failed, 1);
}
