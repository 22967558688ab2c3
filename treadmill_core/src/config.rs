//! Runtime configuration types for the treadmill engine.
//!
//! These are separate from the TOML-deserialized config in `treadmill_config`;
//! see `conversions` for the mapping.

use std::time::Duration;

/// Control-loop timing.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopCfg {
    /// Ramp length when the operator changes the setpoint.
    pub change_ramp: Duration,
    /// Ramp length for a controlled stop.
    pub stop_ramp: Duration,
    /// How often the measured speed is pushed to the display.
    pub status_period: Duration,
    /// Optional soft cap on a single session.
    pub max_session: Option<Duration>,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            change_ramp: Duration::from_secs(5),
            stop_ramp: Duration::from_secs(2),
            status_period: Duration::from_secs(1),
            max_session: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderCfg {
    /// Window between the two position samples of a velocity read.
    pub settle: Duration,
}

impl Default for EncoderCfg {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnobCfg {
    pub coarse_step: f64,
    pub fine_step: f64,
    /// Per-pin debounce window for detent edges and the push buttons.
    pub debounce: Duration,
    /// Debounce window for the knob's push switch.
    pub switch_debounce: Duration,
    /// Hold time that turns a preset press into "store".
    pub preset_hold: Duration,
    /// Poll period of the preset hold watcher.
    pub hold_poll: Duration,
}

impl Default for KnobCfg {
    fn default() -> Self {
        Self {
            coarse_step: 0.1,
            fine_step: 0.01,
            debounce: Duration::from_millis(100),
            switch_debounce: Duration::from_millis(300),
            preset_hold: Duration::from_secs(5),
            hold_poll: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayCfg {
    /// High-priority knob queue; new messages are dropped when full.
    pub knob_capacity: usize,
    /// Status queue; the oldest message is dropped when full.
    pub main_capacity: usize,
    /// Consumer wait when both queues are empty.
    pub idle_poll: Duration,
}

impl Default for DisplayCfg {
    fn default() -> Self {
        Self {
            knob_capacity: 2,
            main_capacity: 64,
            idle_poll: Duration::from_millis(1),
        }
    }
}
