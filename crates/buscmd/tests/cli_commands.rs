#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use buscmd::transport::SocketBus;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/buscmd-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_connect(path: &Path, timeout: Duration) {
    let start = Instant::now();
    loop {
        if SocketBus::connect(path).is_ok() {
            return;
        }
        if start.elapsed() >= timeout {
            panic!("connect timeout");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn buscmd(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_buscmd"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("buscmd should run")
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout should be json lines"))
        .collect()
}

#[test]
fn encode_query_response_outputs_frame() {
    let output = buscmd(&["encode", "query-response", "3", "0x05"]);
    assert!(output.status.success());

    let records = json_lines(&output);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["name"], "QUERY_RESPONSE");
    assert_eq!(records[0]["hex"], "04020305");
}

#[test]
fn decode_query_id_response() {
    let output = buscmd(&["decode", "--response", "04 00 00 07"]);
    assert!(output.status.success());

    let records = json_lines(&output);
    assert_eq!(records[0]["name"], "OK");
    assert_eq!(records[0]["fields"]["payload"], "07");
}

#[test]
fn decode_truncated_frame_is_data_invalid() {
    let output = buscmd(&["decode", "0a01"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn decode_bad_hex_is_usage_error() {
    let output = buscmd(&["decode", "zz"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn simulate_reports_busy_and_deferred_steps() {
    let output = buscmd(&["simulate", "--devices", "2", "--execute-delay", "10ms"]);
    assert!(output.status.success());

    let outcomes: Vec<String> = json_lines(&output)
        .iter()
        .map(|r| r["outcome"].as_str().unwrap_or_default().to_string())
        .collect();
    assert!(outcomes.iter().any(|o| o.starts_with("DEFERRED")));
    assert!(outcomes.iter().any(|o| o == "BUSY"));
}

#[test]
fn version_prints_package_version() {
    let output = buscmd(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("buscmd {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn send_against_served_bus() {
    let dir = unique_temp_dir("serve");
    let sock_path = dir.join("bus.sock");

    let mut child = Command::new(env!("CARGO_BIN_EXE_buscmd"))
        .arg("--log-level")
        .arg("error")
        .arg("serve")
        .arg(&sock_path)
        .args(["--device", "0x20=7", "--execute-delay", "20ms"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve command should start");

    wait_for_connect(&sock_path, Duration::from_secs(3));
    let sock = sock_path.to_str().expect("utf-8 socket path");

    let output = buscmd(&["send", sock, "--address", "0x20", "query-id"]);
    assert!(output.status.success());
    let records = json_lines(&output);
    assert_eq!(records[0]["code"], "OK");
    assert_eq!(records[0]["payload"], "07");

    let output = buscmd(&["send", sock, "-a", "0x20", "--wait", "execute", "measure"]);
    assert!(output.status.success());
    let records = json_lines(&output);
    assert_eq!(records[0]["text"], "MEASURE");

    let output = buscmd(&["send", sock, "-a", "0x20", "query-response", "200"]);
    assert_eq!(output.status.code(), Some(4));

    let output = buscmd(&["send", sock, "-a", "0x55", "query-id"]);
    assert_eq!(output.status.code(), Some(3));

    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_to_missing_socket_fails() {
    let dir = unique_temp_dir("missing");
    let sock = dir.join("absent.sock");
    let output = buscmd(&[
        "send",
        sock.to_str().expect("utf-8 socket path"),
        "-a",
        "0x20",
        "query-id",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let _ = std::fs::remove_dir_all(&dir);
}
