use rstest::rstest;
use treadmill_config::{RunMode, load_toml};

#[rstest]
#[case("[encoder]\nsettle_ms = 0", "encoder.settle_ms must be >= 1")]
#[case("[controller]\nkp = -0.5", "controller.kp must be >= 0")]
#[case("[knob]\ncoarse_step = 0.05\nfine_step = 0.1", "knob.fine_step")]
#[case("[display]\nknob_queue = 0", "display.knob_queue must be >= 1")]
#[case("[knob]\ndebounce_ms = 6000", "knob.debounce_ms must be < knob.preset_hold_ms")]
#[case("[display]\nstatus_period_ms = 0", "display.status_period_ms")]
#[case("[logging]\nrotation = \"weekly\"", "logging.rotation")]
#[case("[pins]\nbeam = 40", "pins.beam must be a bcm pin")]
#[case("[runner]\nidle_poll_ms = 0", "runner.idle_poll_ms")]
fn rejects_out_of_range_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    let msg = format!("{err}").to_lowercase();
    assert!(msg.contains(needle), "{msg:?} does not mention {needle:?}");
}

#[test]
fn rejects_pin_collisions() {
    let cfg = load_toml("[pins]\nbeam = 23").expect("parse TOML");
    let err = cfg.validate().expect_err("beam collides with encoder_a");
    let msg = format!("{err}");
    assert!(msg.contains("pins.encoder_a") && msg.contains("pins.beam"), "{msg}");
}

#[test]
fn accepts_full_rig_config() {
    let toml = r#"
[controller]
kp = 0.1
ki = 0.02
kd = 0.0

[encoder]
settle_ms = 100

[ramp]
change_ms = 5000
stop_ms = 2000

[knob]
coarse_step = 0.1
fine_step = 0.01
debounce_ms = 100
preset_hold_ms = 5000

[display]
status_period_ms = 1000
knob_queue = 2
main_queue = 64

[recording]
dir = "data_logs"

[logging]
level = "debug"
rotation = "daily"

[runner]
mode = "service"
idle_poll_ms = 50
max_session_ms = 600000
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid config");
    assert_eq!(cfg.runner.mode, RunMode::Service);
    assert_eq!(cfg.runner.max_session_ms, 600_000);
    assert!((cfg.controller.ki - 0.02).abs() < f64::EPSILON);
}

#[test]
fn unknown_run_mode_is_a_parse_error() {
    assert!(load_toml("[runner]\nmode = \"forever\"").is_err());
}

#[test]
fn loads_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("treadmill.toml");
    std::fs::write(&path, "[ramp]\nchange_ms = 2500\n").expect("write");
    let text = std::fs::read_to_string(&path).expect("read");
    let cfg = load_toml(&text).expect("parse");
    assert_eq!(cfg.ramp.change_ms, 2500);
    assert_eq!(cfg.ramp.stop_ms, 2000);
}
