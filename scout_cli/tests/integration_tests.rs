//! Integration tests for the scout binary.
//!
//! These tests drive the binary end to end:
//! - Journal replay and snapshot recording into the dataset cache
//! - Profile resolution output
//! - CSV export and the partitioned payload
//! - Recovery from malformed input

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// 2024-01-15T12:00:00Z
const NOW: i64 = 1_705_320_000_000;
const MIDNIGHT: i64 = NOW - 12 * HOUR;
const HOUR: i64 = 3_600_000;
const MINUTE: i64 = 60_000;

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("scout"))
}

/// Temp data dir plus an explicit config so the host's config never leaks in.
struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(
            dir.path().join("config.toml"),
            "[display]\ntimezone = \"UTC\"\ntheme = \"colors\"\n",
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn cmd(&self) -> Command {
        let mut cmd = cli();
        cmd.arg("--data-dir")
            .arg(self.path().join("data"))
            .arg("--config")
            .arg(self.path().join("config.toml"));
        cmd
    }

    fn write_journal(&self, snapshots: &[Value]) -> PathBuf {
        let path = self.path().join("snapshots.jsonl");
        let lines: Vec<String> = snapshots.iter().map(Value::to_string).collect();
        fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }

    fn ingest(&self, snapshots: &[Value]) {
        let journal = self.write_journal(snapshots);
        self.cmd()
            .arg("ingest")
            .arg(&journal)
            .arg("--now")
            .arg(NOW.to_string())
            .assert()
            .success();
    }
}

fn full_snapshot() -> Value {
    json!({
        "delta": false,
        "sgvs": [
            {"mills": NOW - 10 * MINUTE, "mgdl": 110, "direction": "Flat"},
            {"mills": NOW - 5 * MINUTE, "mgdl": 115, "direction": "Flat"}
        ],
        "mbgs": [{"mills": NOW - HOUR, "mgdl": 120, "device": "meter"}],
        "treatments": [
            {"_id": "t1", "mills": NOW - 2 * HOUR, "eventType": "Site Change"},
            {"_id": "t2", "mills": NOW - 30 * MINUTE, "eventType": "Temp Basal",
             "duration": 60, "absolute": 0.5}
        ],
        "food": [],
        "devicestatus": [
            {"_id": "d1", "device": "openaps://rig/pump", "mills": NOW - MINUTE, "openaps": {}}
        ],
        "profiles": [{
            "defaultProfile": "Weekday",
            "startDate": "2024-01-01T00:00:00Z",
            "store": {
                "Weekday": {
                    "timezone": "UTC",
                    "dia": 3,
                    "basal": [{"time": "00:00", "value": 1.0}, {"time": "06:00", "value": 1.2}],
                    "sens": [{"time": "00:00", "value": 100}],
                    "carbratio": [{"time": "00:00", "value": 10}],
                    "target_low": [{"time": "00:00", "value": 90}],
                    "target_high": [{"time": "00:00", "value": 140}]
                },
                "Sport": {
                    "timezone": "UTC",
                    "basal": [{"time": "00:00", "value": 0.4}]
                }
            }
        }]
    })
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Glucose telemetry"));
}

#[test]
fn test_ingest_builds_cache() {
    let env = Env::new();
    let journal = env.write_journal(&[
        full_snapshot(),
        json!({"delta": true, "sgvs": [{"mills": NOW, "mgdl": 120}]}),
    ]);

    env.cmd()
        .arg("ingest")
        .arg(&journal)
        .arg("--now")
        .arg(NOW.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 2 snapshots"))
        .stdout(predicate::str::contains("sgvs: 3"));

    assert!(env.path().join("data/cache/dataset.json").exists());
}

#[test]
fn test_ingest_accumulates_across_runs() {
    let env = Env::new();
    env.ingest(&[full_snapshot()]);

    let delta = env.write_journal(&[json!({
        "delta": true,
        "treatments": [{"_id": "t1", "action": "remove"}]
    })]);
    env.cmd()
        .arg("ingest")
        .arg(&delta)
        .arg("--now")
        .arg(NOW.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("treatments: 1"));

    env.cmd()
        .arg("ingest")
        .arg(&delta)
        .arg("--now")
        .arg(NOW.to_string())
        .arg("--reset")
        .assert()
        .success()
        .stdout(predicate::str::contains("treatments: 0"));
}

#[test]
fn test_profile_values_follow_time_of_day() {
    let env = Env::new();
    env.ingest(&[full_snapshot()]);

    env.cmd()
        .arg("profile")
        .arg("--at")
        .arg((MIDNIGHT + 7 * HOUR).to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("Profile: Weekday"))
        .stdout(predicate::str::contains("basal: 1.2"))
        .stdout(predicate::str::contains("sens: 100"))
        .stdout(predicate::str::contains("missing").not());

    env.cmd()
        .arg("profile")
        .arg("--at")
        .arg((MIDNIGHT + 3 * HOUR).to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("basal: 1\n"));
}

#[test]
fn test_profile_percentage_switch() {
    let env = Env::new();
    let switch = json!({
        "delta": true,
        "treatments": [{
            "_id": "ps1", "mills": MIDNIGHT, "eventType": "Profile Switch",
            "profile": "Weekday", "percentage": 50, "timeshift": 0,
            "CircadianPercentageProfile": true
        }]
    });
    env.ingest(&[full_snapshot(), switch]);

    env.cmd()
        .arg("profile")
        .arg("--at")
        .arg((MIDNIGHT + 3 * HOUR).to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("override: 50%"))
        .stdout(predicate::str::contains("basal: 0.5"))
        .stdout(predicate::str::contains("sens: 200"));
}

#[test]
fn test_profile_explicit_name_reports_unresolved() {
    let env = Env::new();
    env.ingest(&[full_snapshot()]);

    env.cmd()
        .arg("profile")
        .arg("--at")
        .arg(NOW.to_string())
        .arg("--profile")
        .arg("Sport")
        .assert()
        .success()
        .stdout(predicate::str::contains("Profile: Sport"))
        .stdout(predicate::str::contains("basal: 0.4"))
        .stdout(predicate::str::contains("sens: unresolved"));
}

#[test]
fn test_profile_without_data() {
    let env = Env::new();
    env.cmd()
        .arg("profile")
        .assert()
        .success()
        .stdout(predicate::str::contains("No profile data loaded"));
}

#[test]
fn test_export_writes_csv() {
    let env = Env::new();
    env.ingest(&[full_snapshot()]);
    let csv_path = env.path().join("export/entries.csv");

    env.cmd()
        .arg("export")
        .arg(&csv_path)
        .arg("--now")
        .arg(NOW.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 3 entries"));

    let contents = fs::read_to_string(&csv_path).unwrap();
    assert!(contents.starts_with("mills,time,kind"));
    assert!(contents.contains("mbg"));
    assert!(contents.contains("#4cff00"));
}

#[test]
fn test_split_prints_payload() {
    let env = Env::new();
    env.ingest(&[full_snapshot()]);

    let output = env
        .cmd()
        .arg("split")
        .arg("--now")
        .arg(NOW.to_string())
        .output()
        .unwrap();
    assert!(output.status.success());

    let payload: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(payload["recent"]["sgvs"].as_array().unwrap().len(), 2);
    assert_eq!(payload["recent"]["treatments"].as_array().unwrap().len(), 2);
    assert_eq!(payload["recent"]["devicestatus"].as_array().unwrap().len(), 1);
    assert_eq!(payload["rest"]["mbgs"].as_array().unwrap().len(), 1);
    assert!(payload["recent"]["profiles"][0]["store"]["Weekday"].is_object());
}

#[test]
fn test_status_reports_freshness() {
    let env = Env::new();
    env.ingest(&[full_snapshot()]);

    env.cmd()
        .arg("status")
        .arg("--now")
        .arg(NOW.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("Last reading: 115 mg/dl"))
        .stdout(predicate::str::contains("Status: current"))
        .stdout(predicate::str::contains("Devices: rig"));

    env.cmd()
        .arg("status")
        .arg("--now")
        .arg((NOW + HOUR).to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("Status: urgent"));
}

#[test]
fn test_status_with_newest_first_snapshot() {
    let env = Env::new();
    env.ingest(&[json!({
        "delta": false,
        "sgvs": [
            {"mills": NOW - MINUTE, "mgdl": 300},
            {"mills": NOW - 2 * MINUTE, "mgdl": 200},
            {"mills": NOW - 3 * MINUTE, "mgdl": 100}
        ]
    })]);

    env.cmd()
        .arg("status")
        .arg("--now")
        .arg(NOW.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("Last reading: 300 mg/dl"));
}

#[test]
fn test_record_appends_journal_and_applies() {
    let env = Env::new();
    let full = env.path().join("full.json");
    fs::write(&full, full_snapshot().to_string()).unwrap();
    let delta = env.path().join("delta.json");
    fs::write(
        &delta,
        json!({"delta": true, "sgvs": [{"mills": NOW, "mgdl": 120}]}).to_string(),
    )
    .unwrap();

    env.cmd()
        .arg("record")
        .arg(&full)
        .arg("--now")
        .arg(NOW.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded full snapshot"))
        .stdout(predicate::str::contains("sgvs: 2"));

    env.cmd()
        .arg("record")
        .arg(&delta)
        .arg("--now")
        .arg(NOW.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded delta snapshot"))
        .stdout(predicate::str::contains("sgvs: 3"));

    let journal = env.path().join("data/journal/snapshots.jsonl");
    let contents = fs::read_to_string(&journal).unwrap();
    assert_eq!(contents.lines().count(), 2);

    // Replaying the recorded journal rebuilds the same dataset
    env.cmd()
        .arg("ingest")
        .arg(&journal)
        .arg("--now")
        .arg(NOW.to_string())
        .arg("--reset")
        .assert()
        .success()
        .stdout(predicate::str::contains("sgvs: 3"));
}

#[test]
fn test_record_rejects_malformed_snapshot() {
    let env = Env::new();
    let bad = env.path().join("bad.json");
    fs::write(&bad, "{\"delta\": \"sometimes\"}").unwrap();

    env.cmd()
        .arg("record")
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not a snapshot"));

    assert!(!env.path().join("data/journal/snapshots.jsonl").exists());
}
