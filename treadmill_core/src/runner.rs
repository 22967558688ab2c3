//! Session orchestration above a single `ControlLoop` session.
//!
//! `Once` runs one session. `Service` waits on the start latch, runs, and
//! returns to waiting after an operator stop; faults and interrupts end the
//! run in both modes.

use std::time::Duration;

use treadmill_traits::MotorActuator;

use crate::control_loop::ControlLoop;
use crate::encoder::VelocitySource;
use crate::error::{FaultKind, Result};
use crate::status::{LoopState, SessionReport, StopCause};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Once,
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCfg {
    pub mode: RunMode,
    /// Poll period while waiting for the start latch.
    pub idle_poll: Duration,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self {
            mode: RunMode::Once,
            idle_poll: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Interrupt arrived while idle; nothing was running.
    Interrupted,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub sessions: u32,
    /// Report of the session that ended the run, if any ran.
    pub last: Option<SessionReport>,
}

/// Block until the start latch reads "run" or an interrupt arrives.
///
/// Without a start latch the session starts immediately.
pub fn wait_for_start<M, V>(cl: &ControlLoop<M, V>, poll: Duration) -> StartOutcome
where
    M: MotorActuator,
    V: VelocitySource,
{
    let Some(latch) = cl.safety().start_stop() else {
        return StartOutcome::Started;
    };
    if !latch.should_run() {
        tracing::info!("waiting for start");
    }
    loop {
        if cl.interrupts().count() > 0 {
            return StartOutcome::Interrupted;
        }
        if latch.should_run() {
            return StartOutcome::Started;
        }
        cl.clock().sleep(poll);
    }
}

/// Run sessions until one ends in a way that should end the process.
pub fn run<M, V>(cl: &mut ControlLoop<M, V>, cfg: &RunnerCfg) -> Result<RunSummary>
where
    M: MotorActuator,
    V: VelocitySource,
{
    let mut summary = RunSummary::default();
    loop {
        if wait_for_start(cl, cfg.idle_poll) == StartOutcome::Interrupted {
            tracing::info!("interrupted while idle");
            return Ok(summary);
        }

        let report = cl.run_session()?;
        summary.sessions += 1;
        summary.last = Some(report);

        let restart = cfg.mode == RunMode::Service
            && report.hard_stop.is_none()
            && report.final_state == LoopState::Stopped(StopCause::Fault(FaultKind::UserStopped));
        if !restart {
            return Ok(summary);
        }
        tracing::info!(sessions = summary.sessions, "operator stop; ready for next session");
        cl.reset_for_restart()?;
    }
}
