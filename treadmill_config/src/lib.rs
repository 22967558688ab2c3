#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the treadmill controller.
//!
//! Every section is optional and falls back to the bench rig's wiring and
//! tuning, so an empty file (or no file at all) is a valid configuration.
//! `Config::validate` rejects values the engine cannot run with.
use serde::Deserialize;

/// BCM pin assignments.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Pins {
    pub motor_pwm1: u8,
    pub motor_pwm2: u8,
    pub motor_en: u8,
    pub motor_enb: u8,
    pub motor_diag: u8,
    pub encoder_a: u8,
    pub encoder_b: u8,
    pub beam: u8,
    pub knob_clk: u8,
    pub knob_dt: u8,
    pub knob_sw: u8,
    pub start_stop: u8,
    pub preset: u8,
    pub trial: u8,
    pub lcd_rs: u8,
    pub lcd_en: u8,
    pub lcd_d4: u8,
    pub lcd_d5: u8,
    pub lcd_d6: u8,
    pub lcd_d7: u8,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            motor_pwm1: 12,
            motor_pwm2: 13,
            motor_en: 4,
            motor_enb: 5,
            motor_diag: 6,
            encoder_a: 23,
            encoder_b: 24,
            beam: 21,
            knob_clk: 18,
            knob_dt: 25,
            knob_sw: 20,
            start_stop: 9,
            preset: 11,
            trial: 19,
            lcd_rs: 2,
            lcd_en: 3,
            lcd_d4: 17,
            lcd_d5: 27,
            lcd_d6: 22,
            lcd_d7: 10,
        }
    }
}

impl Pins {
    fn all(&self) -> [(&'static str, u8); 20] {
        [
            ("motor_pwm1", self.motor_pwm1),
            ("motor_pwm2", self.motor_pwm2),
            ("motor_en", self.motor_en),
            ("motor_enb", self.motor_enb),
            ("motor_diag", self.motor_diag),
            ("encoder_a", self.encoder_a),
            ("encoder_b", self.encoder_b),
            ("beam", self.beam),
            ("knob_clk", self.knob_clk),
            ("knob_dt", self.knob_dt),
            ("knob_sw", self.knob_sw),
            ("start_stop", self.start_stop),
            ("preset", self.preset),
            ("trial", self.trial),
            ("lcd_rs", self.lcd_rs),
            ("lcd_en", self.lcd_en),
            ("lcd_d4", self.lcd_d4),
            ("lcd_d5", self.lcd_d5),
            ("lcd_d6", self.lcd_d6),
            ("lcd_d7", self.lcd_d7),
        ]
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MotorCfg {
    /// Identifier shown in driver fault messages.
    pub driver_id: u8,
    /// Magnitude of the largest accepted speed command.
    pub max_command: f64,
    /// Software PWM carrier frequency.
    pub pwm_hz: f64,
}

impl Default for MotorCfg {
    fn default() -> Self {
        Self {
            driver_id: 1,
            max_command: 480.0,
            pwm_hz: 20_000.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ControllerCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            kp: 0.1,
            ki: 0.0,
            kd: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EncoderCfg {
    /// Window between the two position samples of a velocity read (ms).
    pub settle_ms: u64,
}

impl Default for EncoderCfg {
    fn default() -> Self {
        Self { settle_ms: 100 }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RampCfg {
    /// Ramp length on a setpoint change (ms).
    pub change_ms: u64,
    /// Ramp length on a controlled stop (ms).
    pub stop_ms: u64,
}

impl Default for RampCfg {
    fn default() -> Self {
        Self {
            change_ms: 5000,
            stop_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct KnobCfg {
    pub coarse_step: f64,
    pub fine_step: f64,
    /// Debounce for knob detents and the push buttons (ms).
    pub debounce_ms: u64,
    /// Debounce for the knob's push switch (ms).
    pub switch_debounce_ms: u64,
    /// Hold time that turns a preset press into "store" (ms).
    pub preset_hold_ms: u64,
}

impl Default for KnobCfg {
    fn default() -> Self {
        Self {
            coarse_step: 0.1,
            fine_step: 0.01,
            debounce_ms: 100,
            switch_debounce_ms: 300,
            preset_hold_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DisplayCfg {
    /// Period of the "Des/Act" status line (ms).
    pub status_period_ms: u64,
    /// Capacity of the knob (high-priority) queue.
    pub knob_queue: usize,
    /// Capacity of the status queue.
    pub main_queue: usize,
}

impl Default for DisplayCfg {
    fn default() -> Self {
        Self {
            status_period_ms: 1000,
            knob_queue: 2,
            main_queue: 64,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RecordingCfg {
    /// Directory for per-session CSV files.
    pub dir: String,
    /// Record every session from start instead of waiting for the trial switch.
    pub always: bool,
}

impl Default for RecordingCfg {
    fn default() -> Self {
        Self {
            dir: "data_logs".into(),
            always: false,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One session, then exit.
    #[default]
    Once,
    /// Wait for start, run, and go back to waiting after an operator stop.
    Service,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerCfg {
    pub mode: RunMode,
    /// Poll period while waiting for the start latch (ms).
    pub idle_poll_ms: u64,
    /// Optional cap on one session (ms); 0 disables.
    pub max_session_ms: u64,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self {
            mode: RunMode::Once,
            idle_poll_ms: 50,
            max_session_ms: 0,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub pins: Pins,
    pub motor: MotorCfg,
    pub controller: ControllerCfg,
    pub encoder: EncoderCfg,
    pub ramp: RampCfg,
    pub knob: KnobCfg,
    pub display: DisplayCfg,
    pub recording: RecordingCfg,
    pub logging: Logging,
    pub runner: RunnerCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Pins
        let pins = self.pins.all();
        for (name, pin) in &pins {
            if *pin > 27 {
                eyre::bail!("pins.{name} must be a BCM pin in 0..=27, got {pin}");
            }
        }
        for (i, (a, pa)) in pins.iter().enumerate() {
            if let Some((b, _)) = pins[i + 1..].iter().find(|(_, pb)| pb == pa) {
                eyre::bail!("pins.{a} and pins.{b} both use pin {pa}");
            }
        }

        // Motor
        if !(self.motor.max_command.is_finite() && self.motor.max_command > 0.0) {
            eyre::bail!("motor.max_command must be > 0");
        }
        if !(self.motor.pwm_hz.is_finite() && self.motor.pwm_hz > 0.0) {
            eyre::bail!("motor.pwm_hz must be > 0");
        }

        // Controller
        for (name, g) in [
            ("kp", self.controller.kp),
            ("ki", self.controller.ki),
            ("kd", self.controller.kd),
        ] {
            if !g.is_finite() {
                eyre::bail!("controller.{name} must be finite");
            }
            if g < 0.0 {
                eyre::bail!("controller.{name} must be >= 0");
            }
        }

        // Encoder
        if self.encoder.settle_ms == 0 {
            eyre::bail!("encoder.settle_ms must be >= 1");
        }
        if self.encoder.settle_ms > 1000 {
            eyre::bail!("encoder.settle_ms is unreasonably large (>1s)");
        }

        // Ramp
        if self.ramp.change_ms > 60_000 {
            eyre::bail!("ramp.change_ms must be <= 60000");
        }
        if self.ramp.stop_ms > 60_000 {
            eyre::bail!("ramp.stop_ms must be <= 60000");
        }

        // Knob
        if !(self.knob.coarse_step > 0.0 && self.knob.coarse_step <= 1.5) {
            eyre::bail!("knob.coarse_step must be in (0.0, 1.5]");
        }
        if !(self.knob.fine_step > 0.0 && self.knob.fine_step <= self.knob.coarse_step) {
            eyre::bail!("knob.fine_step must be in (0.0, knob.coarse_step]");
        }
        if self.knob.preset_hold_ms == 0 {
            eyre::bail!("knob.preset_hold_ms must be >= 1");
        }
        if self.knob.debounce_ms >= self.knob.preset_hold_ms {
            eyre::bail!("knob.debounce_ms must be < knob.preset_hold_ms");
        }

        // Display
        if self.display.status_period_ms == 0 {
            eyre::bail!("display.status_period_ms must be >= 1");
        }
        if self.display.knob_queue == 0 {
            eyre::bail!("display.knob_queue must be >= 1");
        }
        if self.display.main_queue == 0 {
            eyre::bail!("display.main_queue must be >= 1");
        }

        // Recording
        if self.recording.dir.trim().is_empty() {
            eyre::bail!("recording.dir must not be empty");
        }

        // Logging
        if let Some(r) = &self.logging.rotation
            && !matches!(r.as_str(), "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        // Runner
        if self.runner.idle_poll_ms == 0 {
            eyre::bail!("runner.idle_poll_ms must be >= 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let cfg = load_toml("").expect("parse");
        assert_eq!(cfg, Config::default());
        cfg.validate().expect("defaults validate");
    }

    #[test]
    fn default_wiring_matches_rig() {
        let p = Pins::default();
        assert_eq!((p.encoder_a, p.encoder_b), (23, 24));
        assert_eq!(p.beam, 21);
        assert_eq!((p.motor_pwm1, p.motor_diag), (12, 6));
    }
}
