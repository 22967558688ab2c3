//! Incremental PID velocity controller with linear setpoint ramps.

use std::time::{Duration, Instant};

use treadmill_traits::MotorActuator;

use crate::SharedClock;
use crate::encoder::VelocitySource;
use crate::error::Result;
use crate::hw_error::to_report;
use crate::status::StopCause;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            kp: 0.1,
            ki: 0.0,
            kd: 0.0,
        }
    }
}

/// PID memory carried between calls within one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerState {
    pub err_prev: f64,
    pub err_sum: f64,
    pub u_prev: f64,
    pub last_time: Instant,
}

impl ControllerState {
    pub fn new(now: Instant) -> Self {
        Self {
            err_prev: 0.0,
            err_sum: 0.0,
            u_prev: 0.0,
            last_time: now,
        }
    }
}

/// One iteration of a ramp, reported to the supervisor after actuation.
#[derive(Debug, Clone, Copy)]
pub struct RampTick {
    pub elapsed_s: f64,
    pub ramp_rpm: f64,
    pub control: f64,
    pub measured_rpm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampOutcome {
    pub control: f64,
    pub measured_rpm: f64,
    /// Always false: a finished ramp has consumed the setpoint change.
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RampResult {
    Completed(RampOutcome),
    Aborted(StopCause),
}

/// Safety hook consulted at the top of every ramp iteration.
pub trait RampSupervisor {
    fn check(&mut self, motor: &dyn MotorActuator) -> std::result::Result<(), StopCause>;

    fn on_tick(&mut self, _tick: &RampTick) {}
}

/// Supervisor that never aborts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupervised;

impl RampSupervisor for Unsupervised {
    fn check(&mut self, _motor: &dyn MotorActuator) -> std::result::Result<(), StopCause> {
        Ok(())
    }
}

pub struct VelocityController<M, V> {
    motor: M,
    sensor: V,
    clock: SharedClock,
    gains: Gains,
    state: ControllerState,
}

impl<M, V> core::fmt::Debug for VelocityController<M, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VelocityController")
            .field("gains", &self.gains)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<M: MotorActuator, V: VelocitySource> VelocityController<M, V> {
    pub fn new(motor: M, sensor: V, clock: SharedClock, gains: Gains) -> Self {
        let state = ControllerState::new(clock.now());
        Self {
            motor,
            sensor,
            clock,
            gains,
            state,
        }
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn motor(&self) -> &M {
        &self.motor
    }

    pub fn motor_mut(&mut self) -> &mut M {
        &mut self.motor
    }

    pub fn sensor_mut(&mut self) -> &mut V {
        &mut self.sensor
    }

    /// Clear PID memory for a fresh session.
    pub fn reset(&mut self) {
        self.state = ControllerState::new(self.clock.now());
    }

    /// One incremental PID step.
    ///
    /// `u = kp*err + ki*err_sum + kd*(d_err/dt) + u_prev` with a trapezoidal
    /// integral. A desired velocity of exactly zero forces `u = 0` and clears
    /// the accumulated state so the motor is never held at a PWM level too low
    /// to turn it.
    #[allow(clippy::float_cmp)]
    pub fn compute_control(&mut self, desired_rpm: f64, measured_rpm: f64) -> f64 {
        let now = self.clock.now();
        if desired_rpm == 0.0 {
            self.state = ControllerState::new(now);
            return 0.0;
        }

        let dt = now
            .saturating_duration_since(self.state.last_time)
            .as_secs_f64();
        let err = desired_rpm - measured_rpm;
        let d_err = err - self.state.err_prev;
        self.state.err_sum += 0.5 * (err + self.state.err_prev) * dt;
        let derivative = if dt > 0.0 {
            self.gains.kd * (d_err / dt)
        } else {
            0.0
        };

        let u = self.gains.kp * err + self.gains.ki * self.state.err_sum + derivative + self.state.u_prev;

        self.state.err_prev = err;
        self.state.u_prev = u;
        self.state.last_time = now;
        u
    }

    /// Measure, compute and actuate once. Returns `(control, measured_rpm)`.
    pub fn maintain(&mut self, desired_rpm: f64) -> Result<(f64, f64)> {
        let measured = self.sensor.measure_rpm();
        let u = self.compute_control(desired_rpm, measured);
        self.actuate(u)?;
        Ok((u, measured))
    }

    /// Ramp linearly from the measured velocity to `target_rpm` over `ramp`.
    ///
    /// Each iteration tracks the moving ramp value rather than the final
    /// target. The supervisor is consulted before every actuation; an abort
    /// leaves the last commanded output in place for the caller to handle.
    pub fn change_velocity(
        &mut self,
        ramp: Duration,
        target_rpm: f64,
        supervisor: &mut dyn RampSupervisor,
    ) -> Result<RampResult> {
        let mut measured = self.sensor.measure_rpm();
        let start_rpm = measured;
        let ramp_s = ramp.as_secs_f64();
        let t0 = self.clock.now();
        let mut control = self.state.u_prev;

        if ramp_s <= 0.0 {
            if let Err(cause) = supervisor.check(&self.motor) {
                return Ok(RampResult::Aborted(cause));
            }
            control = self.compute_control(target_rpm, measured);
            self.actuate(control)?;
            supervisor.on_tick(&RampTick {
                elapsed_s: 0.0,
                ramp_rpm: target_rpm,
                control,
                measured_rpm: measured,
            });
            measured = self.sensor.measure_rpm();
            return Ok(RampResult::Completed(RampOutcome {
                control,
                measured_rpm: measured,
                changed: false,
            }));
        }

        let slope = (target_rpm - start_rpm) / ramp_s;
        tracing::debug!(start_rpm, target_rpm, ramp_s, "ramp start");
        loop {
            let elapsed = self.clock.secs_since(t0);
            if elapsed > ramp_s {
                break;
            }
            if let Err(cause) = supervisor.check(&self.motor) {
                tracing::debug!(?cause, elapsed, "ramp aborted");
                return Ok(RampResult::Aborted(cause));
            }
            let ramp_rpm = slope.mul_add(elapsed, start_rpm);
            control = self.compute_control(ramp_rpm, measured);
            self.actuate(control)?;
            supervisor.on_tick(&RampTick {
                elapsed_s: elapsed,
                ramp_rpm,
                control,
                measured_rpm: measured,
            });
            measured = self.sensor.measure_rpm();
        }
        tracing::debug!(control, measured_rpm = measured, "ramp complete");
        Ok(RampResult::Completed(RampOutcome {
            control,
            measured_rpm: measured,
            changed: false,
        }))
    }

    fn actuate(&mut self, signal: f64) -> Result<()> {
        self.motor.set_speed(signal).map_err(to_report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use treadmill_traits::clock::test_clock::TestClock;
    use treadmill_traits::{BoxError, Clock};

    #[derive(Default)]
    struct NullMotor;
    impl MotorActuator for NullMotor {
        fn set_speed(&mut self, _signal: f64) -> std::result::Result<(), BoxError> {
            Ok(())
        }
        fn get_fault(&self) -> std::result::Result<bool, BoxError> {
            Ok(false)
        }
        fn force_stop(&mut self) -> std::result::Result<(), BoxError> {
            Ok(())
        }
    }

    struct Fixed {
        rpm: f64,
        clock: TestClock,
    }
    impl VelocitySource for Fixed {
        fn measure_rpm(&mut self) -> f64 {
            self.clock.sleep(Duration::from_millis(100));
            self.rpm
        }
    }

    fn controller(rpm: f64, gains: Gains) -> (VelocityController<NullMotor, Fixed>, TestClock) {
        let clock = TestClock::new();
        let c = VelocityController::new(
            NullMotor,
            Fixed {
                rpm,
                clock: clock.clone(),
            },
            Arc::new(clock.clone()),
            gains,
        );
        (c, clock)
    }

    #[test]
    fn proportional_step_accumulates_previous_output() {
        let (mut c, clock) = controller(0.0, Gains::default());
        clock.advance(Duration::from_millis(100));
        let u1 = c.compute_control(100.0, 0.0);
        assert!((u1 - 10.0).abs() < 1e-12);
        clock.advance(Duration::from_millis(100));
        let u2 = c.compute_control(100.0, 50.0);
        // 0.1 * 50 + previous 10
        assert!((u2 - 15.0).abs() < 1e-12);
    }

    #[test]
    fn integral_is_trapezoidal() {
        let gains = Gains {
            kp: 0.0,
            ki: 1.0,
            kd: 0.0,
        };
        let (mut c, clock) = controller(0.0, gains);
        clock.advance(Duration::from_secs(1));
        c.compute_control(10.0, 0.0);
        // (10 + 0) / 2 * 1s
        assert!((c.state().err_sum - 5.0).abs() < 1e-12);
        clock.advance(Duration::from_secs(1));
        c.compute_control(10.0, 0.0);
        assert!((c.state().err_sum - 15.0).abs() < 1e-12);
    }

    #[test]
    fn zero_dt_drops_derivative() {
        let gains = Gains {
            kp: 0.0,
            ki: 0.0,
            kd: 1.0,
        };
        let (mut c, _clock) = controller(0.0, gains);
        let u = c.compute_control(10.0, 0.0);
        assert!(u.is_finite());
        assert!(u.abs() < f64::EPSILON);
    }

    #[test]
    fn zero_ramp_duration_is_a_single_step() {
        let (mut c, _clock) = controller(50.0, Gains::default());
        match c
            .change_velocity(Duration::ZERO, 100.0, &mut Unsupervised)
            .unwrap_or_else(|e| panic!("ramp: {e}"))
        {
            RampResult::Completed(o) => {
                assert!((o.control - 5.0).abs() < 1e-12);
                assert!(!o.changed);
            }
            RampResult::Aborted(c) => panic!("unexpected abort: {c:?}"),
        }
    }
}
