//! Terminal adapter against a loopback stub speaking the line protocol.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use punchsync_core::{DeviceIdentity, PunchStatus, VerifyMethod};
use punchsync_device::{AttendanceDevice, TerminalDevice};
use serde_json::{json, Value};

/// Serve one connection, answering each request line with `respond(cmd)`.
/// Returns the port and the list of commands seen.
fn spawn_stub<F>(respond: F) -> (u16, Arc<Mutex<Vec<String>>>)
where
    F: Fn(&str) -> Value + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
    let port = listener.local_addr().expect("addr").port();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_thread = seen.clone();

    thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut writer = stream.try_clone().expect("clone stream");
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let request: Value = serde_json::from_str(&line).expect("request json");
            let cmd = request["cmd"].as_str().unwrap_or_default().to_string();
            seen_in_thread.lock().expect("lock").push(cmd.clone());
            let mut payload = serde_json::to_string(&respond(&cmd)).expect("encode");
            payload.push('\n');
            if writer.write_all(payload.as_bytes()).is_err() {
                break;
            }
        }
    });

    (port, seen)
}

fn terminal(port: u16) -> TerminalDevice {
    TerminalDevice::new(
        DeviceIdentity::from("gate"),
        "127.0.0.1".to_string(),
        port,
        Duration::from_secs(2),
    )
}

#[test]
fn fetch_all_normalizes_terminal_punches() {
    let (port, seen) = spawn_stub(|cmd| match cmd {
        "attendance" => json!({
            "ok": true,
            "records": [
                {"user_id": "42", "timestamp": "2025-03-01 08:59:12", "verify": 1, "state": 0},
                {"user_id": "43", "timestamp": "not a time", "verify": 1, "state": 0},
                {"user_id": "44", "timestamp": "2025-03-01 17:01:00", "verify": 9, "state": 1}
            ]
        }),
        _ => json!({"ok": false, "error": "unknown"}),
    });

    let mut device = terminal(port);
    assert!(device.connect());
    assert!(device.connect(), "connect is idempotent");
    let records = device.fetch_all();

    assert_eq!(records.len(), 2, "unparseable punch is skipped");
    assert_eq!(records[0].subject_id, "42");
    assert_eq!(records[0].verify_method, VerifyMethod::Fingerprint);
    assert_eq!(records[0].status, PunchStatus::CheckIn);
    assert_eq!(records[1].verify_method, VerifyMethod::Unknown);
    assert_eq!(records[1].status, PunchStatus::CheckOut);
    assert_eq!(
        records[0].extras.get("device_ip_address").map(String::as_str),
        Some("127.0.0.1")
    );
    assert_eq!(seen.lock().expect("lock").as_slice(), ["attendance"]);
    assert!(device.disconnect());
}

#[test]
fn clear_source_sends_clear_command() {
    let (port, seen) = spawn_stub(|_| json!({"ok": true}));

    let mut device = terminal(port);
    assert!(device.connect());
    assert!(device.clear_source());
    assert_eq!(seen.lock().expect("lock").as_slice(), ["clear_attendance"]);
}

#[test]
fn rejected_request_folds_into_empty_fetch() {
    let (port, _seen) = spawn_stub(|_| json!({"ok": false, "error": "log locked"}));

    let mut device = terminal(port);
    assert!(device.connect());
    assert!(device.fetch_all().is_empty());
}

/// Serve one connection and answer only the first request, with `burst`
/// written in a single send.
fn spawn_burst_stub(burst: String) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
    let port = listener.local_addr().expect("addr").port();

    thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut writer = stream.try_clone().expect("clone stream");
        let mut answered = false;
        for line in BufReader::new(stream).lines() {
            if line.is_err() {
                break;
            }
            if !answered {
                answered = true;
                if writer.write_all(burst.as_bytes()).is_err() {
                    break;
                }
            }
        }
    });

    port
}

#[test]
fn bytes_after_first_response_line_are_kept_for_next_exchange() {
    let first = json!({
        "ok": true,
        "records": [{"user_id": "42", "timestamp": "2025-03-01 08:59:12", "verify": 1, "state": 0}]
    });
    let second = json!({"ok": true});
    let port = spawn_burst_stub(format!("{first}\n{second}\n"));

    let mut device = terminal(port);
    assert!(device.connect());
    assert_eq!(device.fetch_all().len(), 1);
    assert!(
        device.clear_source(),
        "second response arrived in the same read and must not be dropped"
    );
}

#[test]
fn oversized_response_drops_the_connection() {
    let (port, _seen) = spawn_stub(|_| {
        json!({
            "ok": true,
            "records": [{"user_id": "42", "timestamp": "2025-03-01 08:59:12", "verify": 1, "state": 0}]
        })
    });

    let mut device = terminal(port).with_max_response_bytes(32);
    assert!(device.connect());
    assert!(device.fetch_all().is_empty());
    assert_eq!(device.device_info().details["connected"], json!(false));
}
