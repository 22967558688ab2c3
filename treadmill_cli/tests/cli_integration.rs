use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

// Short ramps so sim sessions finish quickly.
fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let rec = dir.join("rec");
    let toml = format!(
        r#"
[ramp]
change_ms = 300
stop_ms = 200

[display]
status_period_ms = 200

[recording]
dir = "{}"

{extra}
"#,
        rec.display().to_string().replace('\\', "/")
    );
    let path = dir.join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn treadmill(cfg: &Path) -> Command {
    let mut cmd = Command::cargo_bin("treadmill").unwrap();
    cmd.arg("--log-level").arg("warn").arg("--config").arg(cfg);
    cmd
}

fn json_line(stdout: &[u8], key: &str) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(stdout);
    let line = stdout
        .lines()
        .find(|l| l.contains(key))
        .unwrap_or_else(|| panic!("no JSON line with {key}; stdout was: {stdout}"));
    serde_json::from_str(line).expect("valid JSON")
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["self-check"], 0, "self-check ok (sim backend)", "stdout")]
#[case(&["run", "--no-console", "--speed", "0.4", "--duration-s", "1"], 0, "session time limit reached", "stdout")]
#[case(&["run", "--no-console", "--speed", "2.0"], 1, "outside", "stderr")]
#[case(&["run", "--mode", "forever"], 2, "invalid value", "stderr")]
#[case(&["run", "--no-console", "--duration-s", "0"], 1, "--duration-s", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), "");
    let mut cmd = treadmill(&cfg);
    cmd.args(args);

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[test]
fn missing_config_file_uses_defaults() {
    let dir = tempdir().unwrap();
    let mut cmd = treadmill(&dir.path().join("absent.toml"));
    cmd.arg("self-check")
        .assert()
        .success()
        .stdout(predicate::str::contains("self-check ok"));
}

#[test]
fn invalid_config_is_explained() {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), "[pins]\nbeam = 23\n");
    treadmill(&cfg)
        .arg("self-check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration is invalid"))
        .stderr(predicate::str::contains("pins.encoder_a and pins.beam"));
}

#[test]
fn json_summary_for_time_limit() {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), "");
    let out = treadmill(&cfg)
        .arg("--json")
        .args(["run", "--no-console", "--speed", "0.3", "--duration-s", "1"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v = json_line(&out, "\"final_state\"");
    assert!(v["timestamp"].as_i64().is_some());
    assert_eq!(v["sessions"], 1);
    assert_eq!(v["cause"], "TimeLimit");
    assert_eq!(v["final_state"], "Stopped");
    assert!(v["abort_reason"].is_null());
    assert!(v["iterations"].as_u64().unwrap() > 0);
    assert!(v["duration_ms"].as_u64().unwrap() >= 1000);
}

#[rstest]
#[case("TREADMILL_SIM_FAULT_AFTER_MS", 3, "DriverFault")]
#[case("TREADMILL_SIM_BEAM_AFTER_MS", 4, "BeamBroken")]
fn injected_faults_end_the_run(#[case] env: &str, #[case] code: i32, #[case] reason: &str) {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), "");
    let out = treadmill(&cfg)
        .env(env, "400")
        .arg("--json")
        .args(["run", "--no-console", "--speed", "0.5", "--duration-s", "5"])
        .assert()
        .code(code)
        .get_output()
        .stdout
        .clone();
    let v = json_line(&out, "\"abort_reason\"");
    assert_eq!(v["abort_reason"], reason);
    assert_eq!(v["final_state"], "Faulted");
}

#[test]
fn recording_always_writes_one_csv_per_session() {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), "");
    let text = fs::read_to_string(&cfg).unwrap().replace(
        "[recording]\n",
        "[recording]\nalways = true\n",
    );
    fs::write(&cfg, text).unwrap();

    treadmill(&cfg)
        .args(["run", "--no-console", "--speed", "0.3", "--duration-s", "1"])
        .assert()
        .success();

    let files: Vec<_> = fs::read_dir(dir.path().join("rec"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1, "{files:?}");
    let csv = fs::read_to_string(&files[0]).unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("time_elapsed,desired_speed,actual_speed"));
    assert!(lines.count() > 0);
}
