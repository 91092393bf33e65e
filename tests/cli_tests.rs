// Command-line integration tests for the replay and decode subcommands
#![allow(deprecated)]

use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/linked_list.json")
}

// ============================================================================
// replay
// ============================================================================

#[test]
fn test_replay_ascii_trace() {
    let tmp_dir = TempDir::new().unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("heaptrace");
    cmd.arg("replay")
        .arg(fixture())
        .arg("--ascii")
        .arg("--out")
        .arg(tmp_dir.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("replayed 23 events"))
        .stdout(predicate::str::contains("4 objects tracked"));

    let trace = fs::read_to_string(tmp_dir.path().join("mem-trace")).unwrap();
    let lines: Vec<&str> = trace.lines().collect();
    assert_eq!(lines[0], "SCRIPT_ENTER,1,1,list.js");
    assert!(lines.contains(&"CREATE_FUN,1:2,1,2,100"));
    assert!(lines.contains(&"CALL,4,1,100,1"));
    assert!(lines.contains(&"UPDATE_IID,3,4"));
    assert!(lines.contains(&"PUTFIELD,102,4,next,3"));
    assert!(lines.contains(&"WRITE,8,head,4"));
    assert!(lines.last().unwrap().starts_with("LAST_USE,"));
}

#[test]
fn test_replay_binary_then_decode() {
    let tmp_dir = TempDir::new().unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("heaptrace");
    cmd.arg("replay").arg(fixture()).arg("--out").arg(tmp_dir.path());
    cmd.assert().success();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("heaptrace");
    cmd.arg("decode").arg(tmp_dir.path().join("mem-trace"));
    cmd.assert()
        .success()
        .stdout(predicate::str::starts_with("SCRIPT_ENTER,1,1,list.js\n"))
        .stdout(predicate::str::contains("RETURN,3\n"))
        .stdout(predicate::str::contains("PUTFIELD,10,4,next,0\n"));
}

#[test]
fn test_replay_log_all_putfields_flag() {
    let tmp_dir = TempDir::new().unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("heaptrace");
    cmd.arg("replay")
        .arg(fixture())
        .arg("--ascii")
        .arg("--log-all-putfields")
        .arg("--out")
        .arg(tmp_dir.path());
    cmd.assert().success();

    let trace = fs::read_to_string(tmp_dir.path().join("mem-trace")).unwrap();
    assert!(trace.contains("PUTFIELD,13,4,value,0\n"));
}

#[test]
fn test_replay_with_config_file() {
    let tmp_dir = TempDir::new().unwrap();
    let config = tmp_dir.path().join("trace.toml");
    fs::write(&config, "asciiEncodedSink = true\nlogAllPutfields = true\n").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("heaptrace");
    cmd.arg("replay")
        .arg(fixture())
        .arg("--config")
        .arg(&config)
        .arg("--out")
        .arg(tmp_dir.path());
    cmd.assert().success();

    let trace = fs::read_to_string(tmp_dir.path().join("mem-trace")).unwrap();
    assert!(trace.contains("PUTFIELD,13,4,value,0\n"));
}

#[test]
fn test_replay_debug_output_to_stderr() {
    let tmp_dir = TempDir::new().unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("heaptrace");
    cmd.arg("--debug")
        .arg("replay")
        .arg(fixture())
        .arg("--out")
        .arg(tmp_dir.path());
    cmd.assert()
        .success()
        .stderr(predicate::str::is_empty().not());
}

// ============================================================================
// errors
// ============================================================================

#[test]
fn test_replay_missing_script() {
    let tmp_dir = TempDir::new().unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("heaptrace");
    cmd.arg("replay")
        .arg(tmp_dir.path().join("nope.json"))
        .arg("--out")
        .arg(tmp_dir.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed to load event script"));
}

#[test]
fn test_replay_malformed_script() {
    let tmp_dir = TempDir::new().unwrap();
    let script = tmp_dir.path().join("bad.json");
    fs::write(&script, r#"{"events": [{"hook": "teleport"}]}"#).unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("heaptrace");
    cmd.arg("replay").arg(&script).arg("--out").arg(tmp_dir.path());
    cmd.assert().failure();
}

#[test]
fn test_replay_bad_config_extension() {
    let tmp_dir = TempDir::new().unwrap();
    let config = tmp_dir.path().join("trace.yaml");
    fs::write(&config, "trackAllUses: true\n").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("heaptrace");
    cmd.arg("replay")
        .arg(fixture())
        .arg("--config")
        .arg(&config)
        .arg("--out")
        .arg(tmp_dir.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid trace options"));
}

#[test]
fn test_replay_aborted_trace_fails() {
    let tmp_dir = TempDir::new().unwrap();
    let script = tmp_dir.path().join("debug.json");
    fs::write(
        &script,
        r#"{
            "objects": [{"handle": 1, "callable": {"name": "inspect"}}],
            "events": [
                {"hook": "invokeFunPre", "site": 3, "callee": {"obj": 1}, "args": [{"obj": 9}]}
            ]
        }"#,
    )
    .unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("heaptrace");
    cmd.arg("replay")
        .arg(&script)
        .arg("--debug-function")
        .arg("inspect")
        .arg("--out")
        .arg(tmp_dir.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("heap trace aborted"));
}

#[test]
fn test_decode_rejects_ascii_trace() {
    let tmp_dir = TempDir::new().unwrap();
    let trace = tmp_dir.path().join("mem-trace");
    fs::write(&trace, "DECLARE,1,x,1\n").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("heaptrace");
    cmd.arg("decode").arg(&trace);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed to decode"));
}

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("heaptrace");
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("replay"))
        .stdout(predicate::str::contains("decode"));
}
