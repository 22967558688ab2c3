//! Collaborator traits shared by the treadmill engine and its hardware backends.
//!
//! Trait methods return `Box<dyn Error + Send + Sync>` so backends can surface
//! their own error types; `treadmill_core::hw_error` maps them to typed errors.

pub mod clock;

pub use clock::{Clock, MonotonicClock};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Motor driver output stage.
///
/// `signal` is PWM-equivalent; implementations clamp it to their own range.
pub trait MotorActuator {
    fn set_speed(&mut self, signal: f64) -> Result<(), BoxError>;
    /// Live read of the driver's fault/diagnostic line.
    fn get_fault(&self) -> Result<bool, BoxError>;
    /// Disable the output stage. Must be safe to call more than once.
    fn force_stop(&mut self) -> Result<(), BoxError>;
}

/// Minimal character display capability.
pub trait DisplayDriver {
    fn write(&mut self, text: &str) -> Result<(), BoxError>;
    fn clear(&mut self) -> Result<(), BoxError>;
}

/// Append-only recorder for per-iteration session data.
pub trait SessionRecorder {
    fn create_session(&mut self) -> Result<(), BoxError>;
    fn record(
        &mut self,
        elapsed_s: f64,
        desired_mps: f64,
        actual_mps: f64,
    ) -> Result<(), BoxError>;
    fn close(&mut self) -> Result<(), BoxError>;
}

/// Quadrature channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    A,
    B,
}

/// Receiver of encoder edge interrupts. Called from interrupt context.
pub trait EdgeSink: Send + Sync {
    fn on_edge(&self, channel: Channel, level: bool);

    /// Seed the last-known channel levels before the first edge arrives.
    fn set_levels(&self, _a: bool, _b: bool) {}
}

impl<T: MotorActuator + ?Sized> MotorActuator for Box<T> {
    fn set_speed(&mut self, signal: f64) -> Result<(), BoxError> {
        (**self).set_speed(signal)
    }
    fn get_fault(&self) -> Result<bool, BoxError> {
        (**self).get_fault()
    }
    fn force_stop(&mut self) -> Result<(), BoxError> {
        (**self).force_stop()
    }
}

impl<T: DisplayDriver + ?Sized> DisplayDriver for Box<T> {
    fn write(&mut self, text: &str) -> Result<(), BoxError> {
        (**self).write(text)
    }
    fn clear(&mut self) -> Result<(), BoxError> {
        (**self).clear()
    }
}

impl<T: SessionRecorder + ?Sized> SessionRecorder for Box<T> {
    fn create_session(&mut self) -> Result<(), BoxError> {
        (**self).create_session()
    }
    fn record(
        &mut self,
        elapsed_s: f64,
        desired_mps: f64,
        actual_mps: f64,
    ) -> Result<(), BoxError> {
        (**self).record(elapsed_s, desired_mps, actual_mps)
    }
    fn close(&mut self) -> Result<(), BoxError> {
        (**self).close()
    }
}

impl<T: EdgeSink + ?Sized> EdgeSink for std::sync::Arc<T> {
    fn on_edge(&self, channel: Channel, level: bool) {
        (**self).on_edge(channel, level);
    }

    fn set_levels(&self, a: bool, b: bool) {
        (**self).set_levels(a, b);
    }
}
