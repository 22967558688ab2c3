//! Session orchestrator: `Idle -> Running -> RampingDown -> Stopped`, with a
//! terminal `Faulted` state for driver and beam faults.
//!
//! Every stop path ramps to zero over `LoopCfg::stop_ramp` before the
//! actuator is released. A second stop cause during that ramp (another fault
//! or another interrupt) cuts it short and releases immediately. Release calls
//! `force_stop` once per session and also runs from `Drop`.

use std::time::{Duration, Instant};

use treadmill_traits::{MotorActuator, SessionRecorder};

use crate::SharedClock;
use crate::config::LoopCfg;
use crate::controller::{RampResult, RampSupervisor, RampTick, VelocityController};
use crate::display::{DisplayHandle, DisplayMessage};
use crate::encoder::VelocitySource;
use crate::error::{FaultKind, Result, TreadmillError};
use crate::hw_error::map_hw_error;
use crate::recorder::TrialSwitch;
use crate::safety::{Interrupts, SafetyMonitor};
use crate::setpoint::SetpointSource;
use crate::status::{LoopState, LoopStatus, SessionReport, StopCause};
use crate::units::rpm_to_mps;

const FAULT_MESSAGE_HOLD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
enum Recording {
    Off,
    On { since: Instant },
    /// Trial switched off: keep recording through the ramp to rest.
    Finishing { since: Instant },
}

pub struct ControlLoop<M: MotorActuator, V: VelocitySource> {
    controller: VelocityController<M, V>,
    safety: SafetyMonitor,
    setpoint: SetpointSource,
    display: Option<DisplayHandle>,
    recorder: Option<Box<dyn SessionRecorder + Send>>,
    trial: Option<TrialSwitch>,
    interrupts: Interrupts,
    clock: SharedClock,
    cfg: LoopCfg,
    state: LoopState,
    released: bool,
    session_start: Instant,
    last_status: Option<Instant>,
    recording: Recording,
    iterations: u64,
    last_measured_rpm: f64,
}

impl<M: MotorActuator, V: VelocitySource> core::fmt::Debug for ControlLoop<M, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("state", &self.state)
            .field("iterations", &self.iterations)
            .field("released", &self.released)
            .field("last_measured_rpm", &self.last_measured_rpm)
            .finish_non_exhaustive()
    }
}

/// Ramp supervisor wired to the loop's safety inputs and recorder.
struct LoopSupervisor<'a> {
    safety: &'a SafetyMonitor,
    interrupts: &'a Interrupts,
    /// Interrupt count tolerated before aborting.
    interrupt_allowance: u8,
    /// The fault that started a ramp-down is expected to persist.
    ignore: Option<FaultKind>,
    recorder: Option<&'a mut (dyn SessionRecorder + Send + 'static)>,
    record_since: Instant,
    desired_mps: f64,
    clock: &'a SharedClock,
}

impl RampSupervisor for LoopSupervisor<'_> {
    fn check(&mut self, motor: &dyn MotorActuator) -> std::result::Result<(), StopCause> {
        self.safety
            .check_except(motor, self.ignore)
            .map_err(StopCause::Fault)?;
        if self.interrupts.count() > self.interrupt_allowance {
            return Err(StopCause::Interrupted);
        }
        Ok(())
    }

    fn on_tick(&mut self, tick: &RampTick) {
        if let Some(rec) = self.recorder.as_deref_mut() {
            let elapsed = self.clock.secs_since(self.record_since);
            if let Err(e) = rec.record(elapsed, self.desired_mps, rpm_to_mps(tick.measured_rpm)) {
                tracing::warn!(error = %map_hw_error(e.as_ref()), "recording row dropped");
            }
        }
    }
}

impl<M: MotorActuator, V: VelocitySource> ControlLoop<M, V> {
    pub fn new(
        controller: VelocityController<M, V>,
        safety: SafetyMonitor,
        setpoint: SetpointSource,
        clock: SharedClock,
        cfg: LoopCfg,
    ) -> Self {
        let now = clock.now();
        Self {
            controller,
            safety,
            setpoint,
            display: None,
            recorder: None,
            trial: None,
            interrupts: Interrupts::new(),
            clock,
            cfg,
            state: LoopState::Idle,
            released: false,
            session_start: now,
            last_status: None,
            recording: Recording::Off,
            iterations: 0,
            last_measured_rpm: 0.0,
        }
    }

    pub fn with_display(mut self, display: DisplayHandle) -> Self {
        self.display = Some(display);
        self
    }

    pub fn with_recorder(mut self, recorder: Box<dyn SessionRecorder + Send>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_trial(mut self, trial: TrialSwitch) -> Self {
        self.trial = Some(trial);
        self
    }

    pub fn with_interrupts(mut self, interrupts: Interrupts) -> Self {
        self.interrupts = interrupts;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn safety(&self) -> &SafetyMonitor {
        &self.safety
    }

    pub fn setpoint(&self) -> &SetpointSource {
        &self.setpoint
    }

    pub fn interrupts(&self) -> &Interrupts {
        &self.interrupts
    }

    pub fn controller(&self) -> &VelocityController<M, V> {
        &self.controller
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Leave `Idle`/`Stopped` and begin a session.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            LoopState::Idle | LoopState::Stopped(_) => {}
            other => {
                return Err(eyre::Report::new(TreadmillError::State(format!(
                    "cannot start from {other:?}"
                ))));
            }
        }
        if self
            .safety
            .start_stop()
            .is_some_and(|latch| !latch.should_run())
        {
            return Err(eyre::Report::new(TreadmillError::State(
                "start requested while the start/stop latch reads stopped".into(),
            )));
        }
        self.controller.reset();
        self.released = false;
        self.session_start = self.clock.now();
        self.last_status = None;
        self.iterations = 0;
        self.last_measured_rpm = 0.0;
        self.state = LoopState::Running;
        if self.recorder.is_some() && self.trial.is_none() {
            self.open_recording()?;
        }
        tracing::info!("session started");
        self.post_main(DisplayMessage::new("Running"));
        Ok(())
    }

    /// One `Running` iteration: safety, interrupts, time limit, trial edge,
    /// then ramp-or-maintain and status.
    pub fn step(&mut self) -> Result<LoopStatus> {
        if self.state != LoopState::Running {
            return Err(eyre::Report::new(TreadmillError::State(format!(
                "step called in {:?}",
                self.state
            ))));
        }

        if let Err(kind) = self.safety.check(self.controller.motor()) {
            return Ok(self.halt(StopCause::Fault(kind)));
        }
        if self.interrupts.count() > 0 {
            return Ok(self.halt(StopCause::Interrupted));
        }
        if let Some(max) = self.cfg.max_session
            && self.clock.now().saturating_duration_since(self.session_start) >= max
        {
            return Ok(self.halt(StopCause::TimeLimit));
        }

        self.poll_trial()?;

        if let Some(sp) = self.setpoint.take_changed() {
            tracing::info!(desired_mps = sp.desired_mps, "setpoint changed; ramping");
            let ramp = self.cfg.change_ramp;
            let (recorder, record_since) = active_recorder(
                self.recording,
                self.recorder.as_deref_mut(),
                self.session_start,
            );
            let mut sup = LoopSupervisor {
                safety: &self.safety,
                interrupts: &self.interrupts,
                interrupt_allowance: 0,
                ignore: None,
                recorder,
                record_since,
                desired_mps: sp.desired_mps,
                clock: &self.clock,
            };
            let result = self
                .controller
                .change_velocity(ramp, sp.desired_rpm, &mut sup)?;
            match result {
                RampResult::Completed(outcome) => {
                    self.last_measured_rpm = outcome.measured_rpm;
                }
                RampResult::Aborted(cause) => return Ok(self.halt(cause)),
            }
            if let Recording::Finishing { .. } = self.recording {
                self.close_recording();
                self.post_main(DisplayMessage::new("Trial stopped"));
            }
        } else {
            let sp = self.setpoint.snapshot();
            let (_u, measured) = self.controller.maintain(sp.desired_rpm)?;
            self.last_measured_rpm = measured;
            self.record_row(sp.desired_mps, measured);
        }

        self.iterations += 1;
        self.maybe_post_status();
        Ok(LoopStatus::Running)
    }

    /// Ramp to rest after a halt, release the actuator and settle the final
    /// state. Only valid in `RampingDown`.
    pub fn wind_down(&mut self) -> Result<SessionReport> {
        let LoopState::RampingDown(cause) = self.state else {
            return Err(eyre::Report::new(TreadmillError::State(format!(
                "wind_down called in {:?}",
                self.state
            ))));
        };

        match cause {
            StopCause::Fault(FaultKind::UserStopped)
            | StopCause::Interrupted
            | StopCause::TimeLimit => tracing::warn!(%cause, "stopping; ramping to rest"),
            StopCause::Fault(_) => tracing::error!(%cause, "fault; ramping to rest"),
        }
        self.post_main(
            DisplayMessage::new(cause.display_text()).with_duration(FAULT_MESSAGE_HOLD),
        );

        let allowance = self.interrupts.count();
        let ramp = self.cfg.stop_ramp;
        let ramp_result = {
            let (recorder, record_since) = active_recorder(
                self.recording,
                self.recorder.as_deref_mut(),
                self.session_start,
            );
            let mut sup = LoopSupervisor {
                safety: &self.safety,
                interrupts: &self.interrupts,
                interrupt_allowance: allowance,
                ignore: cause.fault(),
                recorder,
                record_since,
                desired_mps: 0.0,
                clock: &self.clock,
            };
            self.controller.change_velocity(ramp, 0.0, &mut sup)
        };

        let hard_stop = match &ramp_result {
            Ok(RampResult::Completed(outcome)) => {
                self.last_measured_rpm = outcome.measured_rpm;
                None
            }
            Ok(RampResult::Aborted(second)) => {
                tracing::error!(first = %cause, second = %second, "second stop cause during ramp-down; hard stop");
                self.post_main(DisplayMessage::new(second.display_text()));
                Some(*second)
            }
            Err(e) => {
                tracing::error!(error = %e, "actuator error during ramp-down; hard stop");
                None
            }
        };

        self.release();
        self.close_recording();

        let terminal_fault = cause
            .fault()
            .filter(FaultKind::is_terminal)
            .or_else(|| hard_stop.and_then(|c| c.fault()).filter(FaultKind::is_terminal));
        self.state = match terminal_fault {
            Some(kind) => LoopState::Faulted(kind),
            None => LoopState::Stopped(cause),
        };

        // Propagate actuator failures only after the release above.
        ramp_result?;

        let report = SessionReport {
            cause,
            hard_stop,
            final_state: self.state,
            iterations: self.iterations,
            elapsed: self.clock.now().saturating_duration_since(self.session_start),
            last_measured_mps: rpm_to_mps(self.last_measured_rpm),
        };
        tracing::info!(
            cause = %report.cause,
            hard_stop = report.hard_stop.is_some(),
            iterations = report.iterations,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "session ended"
        );
        Ok(report)
    }

    /// Start, step until a halt, then wind down.
    pub fn run_session(&mut self) -> Result<SessionReport> {
        self.start()?;
        loop {
            match self.step() {
                Ok(LoopStatus::Running) => {}
                Ok(LoopStatus::Halting(_)) => break,
                Err(e) => {
                    self.release();
                    self.close_recording();
                    return Err(e);
                }
            }
        }
        self.wind_down()
    }

    /// Return to `Idle` after a soft stop so a new session can start.
    pub fn reset_for_restart(&mut self) -> Result<()> {
        match self.state {
            LoopState::Stopped(_) | LoopState::Idle => {}
            other => {
                return Err(eyre::Report::new(TreadmillError::State(format!(
                    "cannot restart from {other:?}"
                ))));
            }
        }
        self.setpoint.reset();
        self.safety.clear_latches();
        self.interrupts.reset();
        self.controller.reset();
        self.state = LoopState::Idle;
        Ok(())
    }

    /// Disable the output stage. Idempotent within a session.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.controller.motor_mut().force_stop() {
            tracing::error!(error = %map_hw_error(e.as_ref()), "force_stop failed");
        } else {
            tracing::info!("actuator released");
        }
    }

    fn halt(&mut self, cause: StopCause) -> LoopStatus {
        self.state = LoopState::RampingDown(cause);
        LoopStatus::Halting(cause)
    }

    fn poll_trial(&mut self) -> Result<()> {
        let Some(on) = self.trial.as_ref().map(TrialSwitch::is_on) else {
            return Ok(());
        };
        match (self.recording, on) {
            (Recording::Off, true) => {
                self.open_recording()?;
                self.post_main(DisplayMessage::new("Trial started"));
            }
            (Recording::On { since }, false) => {
                tracing::info!("trial switched off; ramping to rest");
                self.recording = Recording::Finishing { since };
                if let Err(e) = self.setpoint.command(0.0) {
                    tracing::warn!(error = %e, "could not command rest");
                }
                self.post_main(DisplayMessage::new("Trial stopping"));
            }
            _ => {}
        }
        Ok(())
    }

    fn open_recording(&mut self) -> Result<()> {
        let Some(rec) = self.recorder.as_deref_mut() else {
            return Ok(());
        };
        rec.create_session().map_err(crate::hw_error::to_report)?;
        self.recording = Recording::On {
            since: self.clock.now(),
        };
        Ok(())
    }

    fn close_recording(&mut self) {
        if self.recording == Recording::Off {
            return;
        }
        self.recording = Recording::Off;
        if let Some(rec) = self.recorder.as_deref_mut()
            && let Err(e) = rec.close()
        {
            tracing::warn!(error = %map_hw_error(e.as_ref()), "closing recording failed");
        }
    }

    fn record_row(&mut self, desired_mps: f64, measured_rpm: f64) {
        let since = match self.recording {
            Recording::On { since } | Recording::Finishing { since } => since,
            Recording::Off => return,
        };
        let elapsed = self.clock.secs_since(since);
        if let Some(rec) = self.recorder.as_deref_mut()
            && let Err(e) = rec.record(elapsed, desired_mps, rpm_to_mps(measured_rpm))
        {
            tracing::warn!(error = %map_hw_error(e.as_ref()), "recording row dropped");
        }
    }

    fn maybe_post_status(&mut self) {
        let now = self.clock.now();
        let due = self
            .last_status
            .is_none_or(|t| now.saturating_duration_since(t) >= self.cfg.status_period);
        if !due {
            return;
        }
        self.last_status = Some(now);
        let desired = self.setpoint.snapshot().desired_mps;
        let actual = rpm_to_mps(self.last_measured_rpm);
        tracing::debug!(desired_mps = desired, actual_mps = actual, "status");
        self.post_main(DisplayMessage::new(format!(
            "Des: {desired:.2} m/s\nAct: {actual:.2} m/s"
        )));
    }

    fn post_main(&self, msg: DisplayMessage) {
        if let Some(d) = &self.display {
            d.post_main(msg);
        }
    }
}

fn active_recorder<'a>(
    recording: Recording,
    recorder: Option<&'a mut (dyn SessionRecorder + Send + 'static)>,
    fallback: Instant,
) -> (Option<&'a mut (dyn SessionRecorder + Send + 'static)>, Instant) {
    match (recording, recorder) {
        (Recording::On { since } | Recording::Finishing { since }, Some(rec)) => (Some(rec), since),
        _ => (None, fallback),
    }
}

impl<M: MotorActuator, V: VelocitySource> Drop for ControlLoop<M, V> {
    fn drop(&mut self) {
        if !self.released {
            tracing::debug!("releasing actuator on drop");
            self.release();
        }
    }
}
