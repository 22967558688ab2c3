//! `From` implementations bridging `treadmill_config` types to core types.
//!
//! The TOML schema speaks in milliseconds and flat sections; the engine wants
//! `Duration`s grouped by the component that consumes them.

use std::time::Duration;

use crate::config::{DisplayCfg, EncoderCfg, KnobCfg, LoopCfg};
use crate::controller::Gains;
use crate::runner::{RunMode, RunnerCfg};

// ── Gains ────────────────────────────────────────────────────────────────────

impl From<&treadmill_config::ControllerCfg> for Gains {
    fn from(c: &treadmill_config::ControllerCfg) -> Self {
        Self {
            kp: c.kp,
            ki: c.ki,
            kd: c.kd,
        }
    }
}

// ── LoopCfg ──────────────────────────────────────────────────────────────────

impl From<&treadmill_config::Config> for LoopCfg {
    fn from(c: &treadmill_config::Config) -> Self {
        Self {
            change_ramp: Duration::from_millis(c.ramp.change_ms),
            stop_ramp: Duration::from_millis(c.ramp.stop_ms),
            status_period: Duration::from_millis(c.display.status_period_ms),
            max_session: (c.runner.max_session_ms > 0)
                .then(|| Duration::from_millis(c.runner.max_session_ms)),
        }
    }
}

// ── EncoderCfg ───────────────────────────────────────────────────────────────

impl From<&treadmill_config::EncoderCfg> for EncoderCfg {
    fn from(c: &treadmill_config::EncoderCfg) -> Self {
        Self {
            settle: Duration::from_millis(c.settle_ms),
        }
    }
}

// ── KnobCfg ──────────────────────────────────────────────────────────────────

impl From<&treadmill_config::KnobCfg> for KnobCfg {
    fn from(c: &treadmill_config::KnobCfg) -> Self {
        Self {
            coarse_step: c.coarse_step,
            fine_step: c.fine_step,
            debounce: Duration::from_millis(c.debounce_ms),
            switch_debounce: Duration::from_millis(c.switch_debounce_ms),
            preset_hold: Duration::from_millis(c.preset_hold_ms),
            ..Self::default()
        }
    }
}

// ── DisplayCfg ───────────────────────────────────────────────────────────────

impl From<&treadmill_config::DisplayCfg> for DisplayCfg {
    fn from(c: &treadmill_config::DisplayCfg) -> Self {
        Self {
            knob_capacity: c.knob_queue,
            main_capacity: c.main_queue,
            ..Self::default()
        }
    }
}

// ── RunnerCfg ────────────────────────────────────────────────────────────────

impl From<treadmill_config::RunMode> for RunMode {
    fn from(m: treadmill_config::RunMode) -> Self {
        match m {
            treadmill_config::RunMode::Once => Self::Once,
            treadmill_config::RunMode::Service => Self::Service,
        }
    }
}

impl From<&treadmill_config::RunnerCfg> for RunnerCfg {
    fn from(c: &treadmill_config::RunnerCfg) -> Self {
        Self {
            mode: c.mode.into(),
            idle_poll: Duration::from_millis(c.idle_poll_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_max_session_means_unbounded() {
        let cfg = treadmill_config::Config::default();
        assert_eq!(LoopCfg::from(&cfg), LoopCfg::default());
    }

    #[test]
    fn millis_map_to_durations() {
        let mut cfg = treadmill_config::Config::default();
        cfg.ramp.change_ms = 1500;
        cfg.runner.max_session_ms = 90_000;
        let l = LoopCfg::from(&cfg);
        assert_eq!(l.change_ramp, Duration::from_millis(1500));
        assert_eq!(l.max_session, Some(Duration::from_secs(90)));
        assert_eq!(KnobCfg::from(&cfg.knob), KnobCfg::default());
        assert_eq!(DisplayCfg::from(&cfg.display), DisplayCfg::default());
    }
}
