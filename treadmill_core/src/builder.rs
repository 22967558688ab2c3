//! Type-state builder for `Treadmill` and the generic `build_control_loop`
//! constructor.
//!
//! The builder enforces at compile time that a motor and a velocity sensor are
//! provided before `build()` is available. `try_build()` is always available
//! for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use treadmill_traits::clock::{Clock, MonotonicClock};
use treadmill_traits::{MotorActuator, SessionRecorder};

use crate::SharedClock;
use crate::config::LoopCfg;
use crate::control_loop::ControlLoop;
use crate::controller::{Gains, VelocityController};
use crate::display::DisplayHandle;
use crate::encoder::VelocitySource;
use crate::error::{BuildError, Result};
use crate::recorder::TrialSwitch;
use crate::safety::{Interrupts, SafetyMonitor};
use crate::setpoint::SetpointSource;

pub type DynMotor = Box<dyn MotorActuator + Send>;
pub type DynSensor = Box<dyn VelocitySource + Send>;

/// Boxed, dynamically dispatched control loop.
pub type Treadmill = ControlLoop<DynMotor, DynSensor>;

pub struct Missing;
pub struct Set;

/// Builder for `Treadmill`. All fields are validated on `build()`.
pub struct TreadmillBuilder<M, V> {
    motor: Option<DynMotor>,
    sensor: Option<DynSensor>,
    gains: Option<Gains>,
    loop_cfg: Option<LoopCfg>,
    safety: Option<SafetyMonitor>,
    setpoint: Option<SetpointSource>,
    clock: Option<SharedClock>,
    display: Option<DisplayHandle>,
    recorder: Option<Box<dyn SessionRecorder + Send>>,
    trial: Option<TrialSwitch>,
    interrupts: Option<Interrupts>,
    _m: PhantomData<M>,
    _v: PhantomData<V>,
}

impl Default for TreadmillBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            motor: None,
            sensor: None,
            gains: None,
            loop_cfg: None,
            safety: None,
            setpoint: None,
            clock: None,
            display: None,
            recorder: None,
            trial: None,
            interrupts: None,
            _m: PhantomData,
            _v: PhantomData,
        }
    }
}

impl Treadmill {
    /// Start building a boxed control loop.
    pub fn builder() -> TreadmillBuilder<Missing, Missing> {
        TreadmillBuilder::default()
    }
}

/// Optional collaborators wired onto a freshly built loop.
#[derive(Default)]
pub struct Extras {
    pub display: Option<DisplayHandle>,
    pub recorder: Option<Box<dyn SessionRecorder + Send>>,
    pub trial: Option<TrialSwitch>,
    pub interrupts: Option<Interrupts>,
}

fn validate(gains: &Gains, cfg: &LoopCfg) -> Result<()> {
    if ![gains.kp, gains.ki, gains.kd].iter().all(|g| g.is_finite()) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "controller gains must be finite",
        )));
    }
    if cfg.status_period.is_zero() {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "status period must be > 0",
        )));
    }
    if cfg.max_session.is_some_and(|d| d.is_zero()) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "max session must be > 0 when set",
        )));
    }
    Ok(())
}

/// Validate configuration and construct a statically dispatched loop.
///
/// Shared by `TreadmillBuilder::try_build()` and external callers that want
/// concrete motor and sensor types.
#[allow(clippy::too_many_arguments)]
pub fn build_control_loop<M, V>(
    motor: M,
    sensor: V,
    gains: Gains,
    loop_cfg: LoopCfg,
    safety: SafetyMonitor,
    setpoint: SetpointSource,
    clock: Option<SharedClock>,
    extras: Extras,
) -> Result<ControlLoop<M, V>>
where
    M: MotorActuator,
    V: VelocitySource,
{
    validate(&gains, &loop_cfg)?;
    let clock: SharedClock = clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
    let controller = VelocityController::new(motor, sensor, clock.clone(), gains);
    let mut cl = ControlLoop::new(controller, safety, setpoint, clock, loop_cfg);
    if let Some(d) = extras.display {
        cl = cl.with_display(d);
    }
    if let Some(r) = extras.recorder {
        cl = cl.with_recorder(r);
    }
    if let Some(t) = extras.trial {
        cl = cl.with_trial(t);
    }
    if let Some(i) = extras.interrupts {
        cl = cl.with_interrupts(i);
    }
    Ok(cl)
}

impl<M, V> TreadmillBuilder<M, V> {
    /// Validate and build. Errors on missing motor or sensor.
    pub fn try_build(self) -> Result<Treadmill> {
        let motor = self
            .motor
            .ok_or_else(|| eyre::Report::new(BuildError::MissingMotor))?;
        let sensor = self
            .sensor
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSensor))?;
        build_control_loop(
            motor,
            sensor,
            self.gains.unwrap_or_default(),
            self.loop_cfg.unwrap_or_default(),
            self.safety.unwrap_or_default(),
            self.setpoint.unwrap_or_default(),
            self.clock,
            Extras {
                display: self.display,
                recorder: self.recorder,
                trial: self.trial,
                interrupts: self.interrupts,
            },
        )
    }

    pub fn with_gains(mut self, gains: Gains) -> Self {
        self.gains = Some(gains);
        self
    }
    pub fn with_loop_cfg(mut self, cfg: LoopCfg) -> Self {
        self.loop_cfg = Some(cfg);
        self
    }
    pub fn with_safety(mut self, safety: SafetyMonitor) -> Self {
        self.safety = Some(safety);
        self
    }
    /// Share a setpoint with the console, knob and preset producers.
    pub fn with_setpoint(mut self, setpoint: SetpointSource) -> Self {
        self.setpoint = Some(setpoint);
        self
    }
    /// Provide a custom clock; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
    pub fn with_display(mut self, display: DisplayHandle) -> Self {
        self.display = Some(display);
        self
    }
    pub fn with_recorder(mut self, recorder: impl SessionRecorder + Send + 'static) -> Self {
        self.recorder = Some(Box::new(recorder));
        self
    }
    pub fn with_trial(mut self, trial: TrialSwitch) -> Self {
        self.trial = Some(trial);
        self
    }
    pub fn with_interrupts(mut self, interrupts: Interrupts) -> Self {
        self.interrupts = Some(interrupts);
        self
    }
}

impl<V> TreadmillBuilder<Missing, V> {
    pub fn with_motor(
        self,
        motor: impl MotorActuator + Send + 'static,
    ) -> TreadmillBuilder<Set, V> {
        TreadmillBuilder {
            motor: Some(Box::new(motor)),
            sensor: self.sensor,
            gains: self.gains,
            loop_cfg: self.loop_cfg,
            safety: self.safety,
            setpoint: self.setpoint,
            clock: self.clock,
            display: self.display,
            recorder: self.recorder,
            trial: self.trial,
            interrupts: self.interrupts,
            _m: PhantomData,
            _v: PhantomData,
        }
    }
}

impl<M> TreadmillBuilder<M, Missing> {
    pub fn with_sensor(
        self,
        sensor: impl VelocitySource + Send + 'static,
    ) -> TreadmillBuilder<M, Set> {
        TreadmillBuilder {
            motor: self.motor,
            sensor: Some(Box::new(sensor)),
            gains: self.gains,
            loop_cfg: self.loop_cfg,
            safety: self.safety,
            setpoint: self.setpoint,
            clock: self.clock,
            display: self.display,
            recorder: self.recorder,
            trial: self.trial,
            interrupts: self.interrupts,
            _m: PhantomData,
            _v: PhantomData,
        }
    }
}

impl TreadmillBuilder<Set, Set> {
    /// Validate and build. Only available once motor and sensor are set.
    pub fn build(self) -> Result<Treadmill> {
        self.try_build()
    }
}
