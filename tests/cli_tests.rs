use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

mod test_utils {
    use super::*;

    /// An `eventcam` command running in `dir`, away from any config file
    /// or environment override of the invoking shell
    pub fn eventcam(dir: &Path) -> Command {
        let mut cmd = Command::cargo_bin("eventcam").expect("binary builds");
        cmd.current_dir(dir);
        for (key, _) in std::env::vars() {
            if key.starts_with("EVENTCAM_") {
                cmd.env_remove(key);
            }
        }
        cmd.env_remove("RUST_LOG");
        cmd
    }

    pub fn files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(extension))
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        files
    }
}

use test_utils::*;

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    eventcam(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("record"))
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn test_dry_run_record_prints_summary() {
    let dir = TempDir::new().unwrap();
    eventcam(dir.path())
        .args([
            "record", "--source", "synthetic:cam", "--frames", "60", "--fps", "10", "--duration", "2", "--overlap",
            "1", "--bright", "20..45", "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stream cam:"))
        .stdout(predicate::str::contains("Frames: 60"))
        .stdout(predicate::str::contains("Clips: 1"));

    // Nothing written in a dry run
    assert!(!dir.path().join("recordings").exists());
}

#[test]
fn test_dry_run_json_summary() {
    let dir = TempDir::new().unwrap();
    let output = eventcam(dir.path())
        .args([
            "record", "--source", "synthetic:a", "--source", "synthetic:b", "--frames", "40", "--fps", "10",
            "--duration", "2", "--overlap", "1", "--dry-run", "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let summaries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let summaries = summaries.as_array().unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0]["stream"], "a");
    assert_eq!(summaries[1]["stream"], "b");
    for summary in summaries {
        assert_eq!(summary["frames"], 40);
        assert_eq!(summary["segments_closed"], 4);
        assert!(summary["clips"].as_array().unwrap().is_empty());
    }
}

#[test]
fn test_record_then_inspect_clip() {
    let dir = TempDir::new().unwrap();
    eventcam(dir.path())
        .args([
            "record", "--source", "synthetic:porch", "--frames", "60", "--fps", "10", "--duration", "2",
            "--overlap", "1", "--bright", "20..45", "--mode", "re-cut", "--segments-dir", "out/segments",
            "--events-dir", "out/events", "--classified-dir", "out/classified",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Clips: 1"));

    let segments = files_with_extension(&dir.path().join("out/segments"), "frames");
    assert_eq!(segments.len(), 6);
    let first_segment = segments
        .iter()
        .find(|p| p.to_string_lossy().ends_with("_porch-0.frames"))
        .expect("segment starting at frame 0");

    let clips = files_with_extension(&dir.path().join("out/classified"), "frames");
    assert_eq!(clips.len(), 1);
    assert!(clips[0].with_extension("json").exists());

    eventcam(dir.path())
        .args(["inspect", "--input"])
        .arg(&clips[0])
        .assert()
        .success()
        .stdout(predicate::str::contains("32x24 @ 10fps"))
        .stdout(predicate::str::contains("Frames: 25"))
        .stdout(predicate::str::contains("Index Range: 20..=44"));

    let output = eventcam(dir.path())
        .args(["inspect", "--format", "json", "--input"])
        .arg(first_segment)
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["frame_count"], 20);
    assert_eq!(report["first_index"], 0);
}

#[test]
fn test_scan_recorded_segments() {
    let dir = TempDir::new().unwrap();
    eventcam(dir.path())
        .args([
            "record", "--source", "synthetic:gate", "--frames", "60", "--fps", "10", "--duration", "2",
            "--overlap", "1", "--bright", "20..45", "--sink", "discard", "--segments-dir", "segs",
            "--events-dir", "live",
        ])
        .assert()
        .success();

    eventcam(dir.path())
        .args(["scan", "--dir", "segs", "--sink", "keep", "--events-dir", "rescanned"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Scanned 6 file(s)"))
        .stdout(predicate::str::contains("Events: 1"));

    assert_eq!(files_with_extension(&dir.path().join("rescanned"), "frames").len(), 1);
}

#[test]
fn test_invalid_overlap_is_rejected() {
    let dir = TempDir::new().unwrap();
    eventcam(dir.path())
        .args(["record", "--source", "synthetic", "--frames", "10", "--overlap", "30", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("overlap"));
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("eventcam.toml"), "[segment]\nduration_seconds = -1.0\n").unwrap();
    eventcam(dir.path())
        .args(["record", "--source", "synthetic", "--frames", "10", "--dry-run"])
        .assert()
        .failure();
}

#[test]
fn test_bad_source_and_arguments_fail() {
    let dir = TempDir::new().unwrap();
    eventcam(dir.path())
        .args(["record", "--source", "usb0", "--frames", "10", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid --source"));

    eventcam(dir.path())
        .args(["record", "--source", "synthetic", "--fps", "0"])
        .assert()
        .failure();

    eventcam(dir.path())
        .args(["record", "--source", "synthetic", "--bright", "30..10"])
        .assert()
        .failure();

    eventcam(dir.path())
        .args(["inspect", "--input", "missing.frames"])
        .assert()
        .failure();
}
