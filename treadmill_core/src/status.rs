//! Loop status, stop causes and session reports.

use std::time::Duration;

use crate::error::FaultKind;

/// Why a running session is coming to a halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    Fault(FaultKind),
    /// External interrupt (Ctrl-C). Soft stop.
    Interrupted,
    /// Configured session time limit reached. Soft stop.
    TimeLimit,
}

impl StopCause {
    pub fn fault(&self) -> Option<FaultKind> {
        match self {
            Self::Fault(k) => Some(*k),
            _ => None,
        }
    }

    pub fn display_text(&self) -> String {
        match self {
            Self::Fault(k) => k.display_text(),
            Self::Interrupted => "Interrupted!".to_string(),
            Self::TimeLimit => "Session time up".to_string(),
        }
    }
}

impl core::fmt::Display for StopCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Fault(k) => write!(f, "{k}"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::TimeLimit => f.write_str("session time limit reached"),
        }
    }
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    RampingDown(StopCause),
    Stopped(StopCause),
    /// Terminal: driver or beam fault.
    Faulted(FaultKind),
}

/// Result of a single `ControlLoop::step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// Keep stepping.
    Running,
    /// A stop was requested; the loop is now `RampingDown`.
    Halting(StopCause),
}

/// Summary of one finished session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionReport {
    pub cause: StopCause,
    /// Set when a second stop cause cut the ramp-down short.
    pub hard_stop: Option<StopCause>,
    pub final_state: LoopState,
    pub iterations: u64,
    pub elapsed: Duration,
    pub last_measured_mps: f64,
}
