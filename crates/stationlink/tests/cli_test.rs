//! Integration tests for the `stationlink` CLI binary.
//!
//! These run without a telemetry server: argument parsing, completions,
//! URL diagnostics, offline cache inspection and connection failures.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command with env isolation: no `STATIONLINK_*` overrides and
/// platform dirs pointed at `home`.
fn stationlink_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("stationlink");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("STATIONLINK_CONFIG")
        .env_remove("STATIONLINK_OUTPUT")
        .env_remove("STATIONLINK_SERVER__URL");
    cmd
}

/// A config file whose cache lives next to it, plus a seeded snapshot.
fn seeded(dir: &TempDir) -> PathBuf {
    let cache = dir.path().join("cache.json");
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        format!(
            "[server]\nurl = \"ws://127.0.0.1:1\"\n\n[cache]\npath = \"{}\"\n",
            cache.display()
        ),
    )
    .unwrap();

    let now = chrono::Utc::now();
    let stale = now - chrono::TimeDelta::hours(30);
    let station = |id: u64, name: &str, parent: Option<u64>, at: chrono::DateTime<chrono::Utc>| {
        json!({
            "id": id, "name": name,
            "signals": 120, "rejects": 3, "valid_signals": 117,
            "elapsed_secs": 3600, "stopped_secs": 60, "valid_secs": 3540,
            "parent": parent, "last_update": at,
        })
    };
    let snapshot = json!({
        "stations": [
            station(10, "Press 10", None, now),
            station(11, "Press 10 / A", Some(10), now),
            station(12, "Press 10 / B", Some(10), stale),
        ],
        "messages": [
            { "kind": "machine_update", "target": 10, "detail": "sinal", "received_at": now },
            { "kind": "production_alert", "target": 10, "source": 11, "detail": "meta_atingida", "received_at": now },
        ],
        "timestamp": now,
    });
    std::fs::write(&cache, snapshot.to_string()).unwrap();
    config
}

fn json_stdout(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let home = TempDir::new().unwrap();
    let output = stationlink_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));
}

#[test]
fn help_lists_commands() {
    let home = TempDir::new().unwrap();
    stationlink_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("watch")
                .and(predicate::str::contains("send"))
                .and(predicate::str::contains("cache"))
                .and(predicate::str::contains("diagnose")),
        );
}

#[test]
fn completions_zsh() {
    let home = TempDir::new().unwrap();
    stationlink_cmd(home.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn station_ids_must_be_numeric() {
    let home = TempDir::new().unwrap();
    stationlink_cmd(home.path())
        .args(["watch", "press-ten"])
        .assert()
        .code(2);
}

// ── Diagnose ────────────────────────────────────────────────────────

#[test]
fn diagnose_flags_plant_network_url() {
    let home = TempDir::new().unwrap();
    let output = stationlink_cmd(home.path())
        .args(["diagnose", "ws://10.200.0.184:8765", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = json_stdout(&output);
    assert_eq!(report["host"], "10.200.0.184");
    assert_eq!(report["port"], 8765);
    assert_eq!(report["secure"], false);
    assert_eq!(report["private_network"], true);
    assert_eq!(report["warnings"].as_array().unwrap().len(), 2);
}

#[test]
fn diagnose_rejects_http_url() {
    let home = TempDir::new().unwrap();
    stationlink_cmd(home.path())
        .args(["diagnose", "http://10.200.0.184:8765"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ws://"));
}

#[test]
fn diagnose_defaults_to_configured_server() {
    let dir = TempDir::new().unwrap();
    let config = seeded(&dir);
    stationlink_cmd(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["diagnose", "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("unencrypted").and(predicate::str::contains("127.0.0.1")));
}

// ── Cache ───────────────────────────────────────────────────────────

#[test]
fn cache_show_lists_fresh_stations_only() {
    let dir = TempDir::new().unwrap();
    let config = seeded(&dir);
    let output = stationlink_cmd(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["cache", "show", "-o", "plain"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "10\n11");
}

#[test]
fn cache_show_unknown_station_is_not_found() {
    let dir = TempDir::new().unwrap();
    let config = seeded(&dir);
    stationlink_cmd(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["cache", "show", "12"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("no fresh cached data"));
}

#[test]
fn cache_children_of_parent() {
    let dir = TempDir::new().unwrap();
    let config = seeded(&dir);
    let output = stationlink_cmd(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["cache", "children", "10", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let rows = json_stdout(&output);
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["name"], "Press 10 / A");
}

#[test]
fn cache_messages_filter_by_type() {
    let dir = TempDir::new().unwrap();
    let config = seeded(&dir);
    let output = stationlink_cmd(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["cache", "messages", "--type", "production_alert", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let messages = json_stdout(&output);
    assert_eq!(messages.as_array().unwrap().len(), 1);
    assert_eq!(messages[0]["detail"], "meta_atingida");
}

#[test]
fn cache_sweep_then_clear() {
    let dir = TempDir::new().unwrap();
    let config = seeded(&dir);

    let output = stationlink_cmd(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["cache", "sweep", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(json_stdout(&output)["stations_removed"], 1);

    stationlink_cmd(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["cache", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared 2"));
    assert!(!dir.path().join("cache.json").exists());
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn config_init_writes_server_override() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    stationlink_cmd(dir.path())
        .arg("--config")
        .arg(&path)
        .args(["--server", "wss://telemetry.plant.example:8765", "config", "init"])
        .assert()
        .success();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("wss://telemetry.plant.example:8765"));

    stationlink_cmd(dir.path())
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));
}

// ── Connection failures ─────────────────────────────────────────────

#[test]
fn send_without_server_is_a_connection_error() {
    let dir = TempDir::new().unwrap();
    let config = seeded(&dir);
    stationlink_cmd(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["send", "query-machine", "--station", "10", "--timeout", "5"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("Could not connect"));
}

#[test]
fn watch_without_reconnect_gives_up() {
    let dir = TempDir::new().unwrap();
    let config = seeded(&dir);
    stationlink_cmd(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["watch", "10", "--no-reconnect", "--duration", "10"])
        .assert()
        .code(7);
}
