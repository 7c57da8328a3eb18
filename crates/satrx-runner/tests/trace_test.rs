//! Trace output integration tests for the satrx runner.
//!
//! These run the `satrx` binary on a scenario and check the JSON trace it
//! writes with `--output`.

use std::fs;
use std::process::Command;
use tempfile::TempDir;

use serde::Deserialize;

const SCENARIO: &str = "crates/satrx-runner/tests/uplink_scenario.yaml";

/// A trace entry from the output file.
///
/// The payload is a flattened tagged enum, so every variant-specific field
/// is optional here.
#[derive(Debug, Deserialize, Clone, PartialEq)]
struct TraceEntry {
    origin: String,
    origin_id: String,
    timestamp: String,
    /// "BURST", "SINR" or "CONTROL"
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    tx_id: Option<u64>,
    #[serde(rename = "SNR", default)]
    snr: Option<String>,
    #[serde(default)]
    reception_status: Option<String>,
    #[serde(default)]
    effective_db: Option<f64>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    start_time_s: Option<f64>,
    #[serde(default)]
    end_time_s: Option<f64>,
}

/// Run the binary from the workspace root and return its raw output.
fn run_satrx(args: &[&str]) -> std::process::Output {
    let binary = env!("CARGO_BIN_EXE_satrx");
    Command::new(binary)
        .current_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/../.."))
        .args(args)
        .output()
        .expect("Failed to execute satrx")
}

fn run_and_collect_trace(scenario: &str, seed: u64, duration: &str) -> Vec<TraceEntry> {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let output_path = temp_dir.path().join("trace.json");
    let output_str = output_path.to_string_lossy().to_string();
    let seed = seed.to_string();

    let output = run_satrx(&[
        "run",
        scenario,
        "--seed",
        &seed,
        "--duration",
        duration,
        "--output",
        &output_str,
        "--check-invariants",
    ]);
    if !output.status.success() {
        panic!(
            "Simulation failed:\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let trace_json = fs::read_to_string(&output_path).expect("Failed to read trace output file");
    serde_json::from_str(&trace_json).expect("Failed to parse trace JSON")
}

#[test]
fn test_trace_contains_tx_and_rx_bursts() {
    let trace = run_and_collect_trace(SCENARIO, 42, "10s");
    assert!(!trace.is_empty(), "Expected trace entries but got none");

    let tx: Vec<_> = trace
        .iter()
        .filter(|e| e.entry_type == "BURST" && e.direction.as_deref() == Some("TX"))
        .collect();
    let rx: Vec<_> = trace
        .iter()
        .filter(|e| e.entry_type == "BURST" && e.direction.as_deref() == Some("RX"))
        .collect();
    assert!(!tx.is_empty(), "Expected TX bursts");
    assert!(!rx.is_empty(), "Expected RX bursts");

    for event in &tx {
        assert!(event.reception_status.is_none(), "TX burst with status: {:?}", event);
        assert!(event.origin.starts_with("ut-"), "TX origin should be a terminal: {:?}", event);
    }
    for event in &rx {
        let status = event.reception_status.as_deref().expect("RX burst without status");
        assert!(
            ["ok", "snr_below_threshold", "channel_error", "collision"].contains(&status),
            "unexpected reception_status {}",
            status
        );
        assert!(event.origin.starts_with("rl-"), "RX origin should be a carrier: {:?}", event);
        assert!(event.snr.as_deref().is_some_and(|s| s.ends_with(" dB")));
        assert!(event.start_time_s.unwrap_or(0.0) <= event.end_time_s.unwrap_or(0.0));
    }
}

#[test]
fn test_every_reception_matches_a_transmission() {
    let trace = run_and_collect_trace(SCENARIO, 7, "10s");
    let sent: std::collections::HashSet<u64> = trace
        .iter()
        .filter(|e| e.direction.as_deref() == Some("TX"))
        .filter_map(|e| e.tx_id)
        .collect();
    let mut seen = std::collections::HashSet::new();
    for event in trace.iter().filter(|e| e.direction.as_deref() == Some("RX")) {
        let id = event.tx_id.expect("RX without tx_id");
        assert!(sent.contains(&id), "reception of unknown tx {}", id);
        // At most one outcome per transmission and carrier.
        assert!(seen.insert((id, event.origin.clone())), "duplicate outcome for {}", id);
    }
}

#[test]
fn test_trace_contains_sinr_and_control_entries() {
    let trace = run_and_collect_trace(SCENARIO, 42, "10s");

    let sinr: Vec<_> = trace.iter().filter(|e| e.entry_type == "SINR").collect();
    assert!(!sinr.is_empty(), "Expected SINR samples from the traced carrier");
    assert!(sinr.iter().all(|e| e.origin == "rl-frame" && e.effective_db.is_some()));

    let actions: Vec<_> = trace
        .iter()
        .filter(|e| e.entry_type == "CONTROL")
        .map(|e| (e.origin.as_str(), e.action.as_deref().unwrap_or("")))
        .collect();
    assert_eq!(actions, vec![("rl-slot", "clear"), ("rl-frame", "configure")]);
}

#[test]
fn test_trace_is_deterministic_for_a_seed() {
    let a = run_and_collect_trace(SCENARIO, 1234, "5s");
    let b = run_and_collect_trace(SCENARIO, 1234, "5s");
    assert_eq!(a, b);
}

#[test]
fn test_timestamps_are_ordered() {
    let trace = run_and_collect_trace(SCENARIO, 42, "10s");
    for pair in trace.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp, "{:?} after {:?}", pair[0], pair[1]);
    }
    assert!(trace.iter().all(|e| e.timestamp.starts_with("2025-01-01T") && !e.origin_id.is_empty()));
}

#[test]
fn test_invalid_scenario_fails_before_start() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("bad.yaml");
    fs::write(
        &path,
        "carriers:\n  - name: gw0\n    frequency_hz: 1.0e9\n    bandwidth_hz: -1.0\n    noise: { kind: constant, power_w: 1.0 }\n",
    )
    .unwrap();
    let path = path.to_string_lossy().to_string();
    let output = run_satrx(&["run", &path, "--duration", "1s"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("gw0"), "error should name the carrier: {}", stderr);
}

#[test]
fn test_metrics_export_json() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let metrics_path = temp_dir.path().join("metrics.json");
    let metrics_str = metrics_path.to_string_lossy().to_string();
    let output = run_satrx(&[
        "run",
        SCENARIO,
        "--seed",
        "3",
        "--duration",
        "5s",
        "--metrics-output",
        "json",
        "--metrics-file",
        &metrics_str,
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let snapshot: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&metrics_path).unwrap()).unwrap();
    assert!(snapshot["counters"]["satrx.carrier.rx_started"].as_u64().unwrap_or(0) > 0);
    assert!(snapshot["carriers"]["rl-frame"].is_object());

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(stats["bursts_transmitted"].as_u64().unwrap_or(0) > 0);
}
