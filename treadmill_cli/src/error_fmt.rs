//! Human-readable error descriptions, exit codes and JSON run summaries.

use serde_json::json;
use treadmill_core::error::{BuildError, FaultKind, TreadmillError};
use treadmill_core::{LoopState, RunSummary, StopCause};

/// Stable process exit codes.
pub mod exit {
    pub const OK: i32 = 0;
    pub const ERROR: i32 = 1;
    pub const DRIVER_FAULT: i32 = 3;
    pub const BEAM_BROKEN: i32 = 4;
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingMotor => {
                "What happened: No motor driver was provided to the controller.\nLikely causes: The driver failed to initialize or was not wired into the builder.\nHow to fix: Check the [pins] motor_* values and that the process can access GPIO/PWM.".to_string()
            }
            BuildError::MissingSensor => {
                "What happened: No velocity sensor was provided to the controller.\nLikely causes: The encoder was not wired into the builder.\nHow to fix: Check the [pins] encoder_a/encoder_b values.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<TreadmillError>() {
        return match te {
            TreadmillError::Fault(kind) => fault_hint(*kind),
            TreadmillError::Hardware(msg) | TreadmillError::HardwareFault(msg) => format!(
                "What happened: Hardware error ({msg}).\nLikely causes: Wiring, power, or a pin already in use.\nHow to fix: Run `treadmill self-check`; verify wiring and GPIO permissions."
            ),
            TreadmillError::Io(msg) => format!(
                "What happened: I/O error ({msg}).\nLikely causes: The recording directory is missing or not writable.\nHow to fix: Check recording.dir in the config and its permissions."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug for more detail."
            ),
        };
    }

    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("config")
        && (lower.contains("parse") || lower.contains("invalid") || lower.contains("must"))
    {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: A typo or out-of-range value in the TOML.\nHow to fix: Edit the config file and try again."
        );
    }

    if lower.contains("gpio") || lower.contains("pwm") {
        return format!(
            "What happened: Failed to initialize hardware pins ({msg}).\nLikely causes: Incorrect pin numbers or insufficient GPIO permissions.\nHow to fix: Fix the [pins] values; ensure the process may access /dev/gpiomem and the PWM sysfs."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn fault_hint(kind: FaultKind) -> String {
    match kind {
        FaultKind::DriverFault { driver_id } => format!(
            "What happened: Motor driver {driver_id} reported a fault.\nLikely causes: Overcurrent, overtemperature or undervoltage on the bridge.\nHow to fix: Power-cycle the driver, check the motor leads and supply, then restart."
        ),
        FaultKind::BeamBroken { pin } => format!(
            "What happened: The safety beam on pin {pin} was broken.\nLikely causes: Someone stepped off the belt or the beam is misaligned.\nHow to fix: Clear the beam path and restart the program."
        ),
        FaultKind::UserStopped => {
            "What happened: Stopped by the operator.\nHow to fix: Press start to run again.".to_string()
        }
    }
}

/// Exit code for a report-returning error; typed faults keep their own codes.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<TreadmillError>() {
        Some(TreadmillError::Fault(kind)) => exit_code_for_fault(*kind),
        _ => exit::ERROR,
    }
}

pub fn exit_code_for_fault(kind: FaultKind) -> i32 {
    match kind {
        FaultKind::DriverFault { .. } => exit::DRIVER_FAULT,
        FaultKind::BeamBroken { .. } => exit::BEAM_BROKEN,
        FaultKind::UserStopped => exit::OK,
    }
}

/// Exit code for a completed run. Soft stops are success.
pub fn exit_code_for_summary(summary: &RunSummary) -> i32 {
    match summary.last.map(|r| r.final_state) {
        Some(LoopState::Faulted(kind)) => exit_code_for_fault(kind),
        _ => exit::OK,
    }
}

pub fn cause_name(cause: &StopCause) -> &'static str {
    match cause {
        StopCause::Fault(FaultKind::DriverFault { .. }) => "DriverFault",
        StopCause::Fault(FaultKind::BeamBroken { .. }) => "BeamBroken",
        StopCause::Fault(FaultKind::UserStopped) => "UserStopped",
        StopCause::Interrupted => "Interrupted",
        StopCause::TimeLimit => "TimeLimit",
    }
}

fn state_name(state: &LoopState) -> &'static str {
    match state {
        LoopState::Idle => "Idle",
        LoopState::Running => "Running",
        LoopState::RampingDown(_) => "RampingDown",
        LoopState::Stopped(_) => "Stopped",
        LoopState::Faulted(_) => "Faulted",
    }
}

/// One JSON line describing how the run ended.
pub fn format_summary_json(summary: &RunSummary, timestamp: i64) -> String {
    let last = summary.last.as_ref();
    let fault = match last.map(|r| r.final_state) {
        Some(LoopState::Faulted(kind)) => Some(cause_name(&StopCause::Fault(kind))),
        _ => None,
    };
    json!({
        "timestamp": timestamp,
        "sessions": summary.sessions,
        "cause": last.map(|r| cause_name(&r.cause)),
        "hard_stop": last.and_then(|r| r.hard_stop.as_ref().map(cause_name)),
        "final_state": last.map_or("Idle", |r| state_name(&r.final_state)),
        "iterations": last.map_or(0, |r| r.iterations),
        "duration_ms": last.map_or(0, |r| u64::try_from(r.elapsed.as_millis()).unwrap_or(u64::MAX)),
        "last_mps": last.map(|r| r.last_measured_mps),
        "abort_reason": fault,
    })
    .to_string()
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    let reason = match err.downcast_ref::<TreadmillError>() {
        Some(TreadmillError::Fault(kind)) => cause_name(&StopCause::Fault(*kind)),
        _ => "Error",
    };
    json!({ "reason": reason, "message": humanize(err) }).to_string()
}
