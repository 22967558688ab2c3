//! Quadrature encoder decoding and velocity estimation.
//!
//! Edge handlers run in interrupt context: they only touch atomics. Velocity
//! queries take two position snapshots separated by a settle delay and never
//! hold anything across the sleep.
//!
//! Sign convention (both channels interrupt-driven, positive = belt forward):
//!
//! | trigger | levels equal | levels differ |
//! |---------|--------------|---------------|
//! | A       | -1           | +1            |
//! | B       | +1           | -1            |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use treadmill_traits::{Channel, EdgeSink};

use crate::SharedClock;
use crate::units::counts_per_sec_to_rpm;

/// Source of measured belt velocity for the controller.
pub trait VelocitySource {
    /// Measured output-shaft velocity in RPM. May block for a settle delay.
    fn measure_rpm(&mut self) -> f64;
}

impl<T: VelocitySource + ?Sized> VelocitySource for Box<T> {
    fn measure_rpm(&mut self) -> f64 {
        (**self).measure_rpm()
    }
}

/// Position increment for an edge on `channel` given both channel levels
/// after the transition.
#[inline]
pub fn decode(channel: Channel, a: bool, b: bool) -> i64 {
    match (channel, a == b) {
        (Channel::A, true) | (Channel::B, false) => -1,
        (Channel::A, false) | (Channel::B, true) => 1,
    }
}

/// Levels use `SeqCst` so that A and B callbacks racing on separate
/// interrupt threads cannot both miss the other's store.
#[derive(Debug, Default)]
struct Shared {
    position: AtomicI64,
    level_a: AtomicBool,
    level_b: AtomicBool,
}

impl Shared {
    #[inline]
    fn on_edge(&self, channel: Channel, level: bool) {
        let (a, b) = match channel {
            Channel::A => {
                self.level_a.store(level, Ordering::SeqCst);
                (level, self.level_b.load(Ordering::SeqCst))
            }
            Channel::B => {
                self.level_b.store(level, Ordering::SeqCst);
                (self.level_a.load(Ordering::SeqCst), level)
            }
        };
        self.position
            .fetch_add(decode(channel, a, b), Ordering::AcqRel);
    }

    fn set_levels(&self, a: bool, b: bool) {
        self.level_a.store(a, Ordering::SeqCst);
        self.level_b.store(b, Ordering::SeqCst);
    }
}

/// Cloneable interrupt-side handle. Hand one to each GPIO callback.
#[derive(Debug, Clone)]
pub struct EncoderHandle {
    shared: Arc<Shared>,
}

impl EdgeSink for EncoderHandle {
    #[inline]
    fn on_edge(&self, channel: Channel, level: bool) {
        self.shared.on_edge(channel, level);
    }

    fn set_levels(&self, a: bool, b: bool) {
        self.shared.set_levels(a, b);
    }
}

pub struct QuadratureEncoder {
    shared: Arc<Shared>,
    clock: SharedClock,
    settle: Duration,
    last_rpm: f64,
    last_sample_time: Option<Instant>,
}

impl core::fmt::Debug for QuadratureEncoder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QuadratureEncoder")
            .field("position", &self.position())
            .field("settle", &self.settle)
            .field("last_rpm", &self.last_rpm)
            .finish()
    }
}

impl QuadratureEncoder {
    pub fn new(clock: SharedClock, settle: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            clock,
            settle,
            last_rpm: 0.0,
            last_sample_time: None,
        }
    }

    pub fn handle(&self) -> EncoderHandle {
        EncoderHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Apply an edge using the tracked level of the other channel.
    #[inline]
    pub fn on_edge(&self, channel: Channel, level: bool) {
        self.shared.on_edge(channel, level);
    }

    /// Apply an edge where the caller sampled both channel levels itself.
    #[inline]
    pub fn on_edge_levels(&self, channel: Channel, a: bool, b: bool) {
        self.shared.set_levels(a, b);
        self.shared
            .position
            .fetch_add(decode(channel, a, b), Ordering::AcqRel);
    }

    pub fn position(&self) -> i64 {
        self.shared.position.load(Ordering::Acquire)
    }

    /// Zero the position and velocity memory for a fresh session.
    pub fn reset(&mut self) {
        self.shared.position.store(0, Ordering::Release);
        self.last_rpm = 0.0;
        self.last_sample_time = None;
    }

    pub fn last_sample_time(&self) -> Option<Instant> {
        self.last_sample_time
    }

    /// Velocity in RPM over one settle window. Blocks for `settle`.
    ///
    /// If the clock did not advance across the window, the previous
    /// estimate is returned instead.
    pub fn velocity(&mut self) -> f64 {
        let p0 = self.position();
        let t0 = self.clock.now();
        self.clock.sleep(self.settle);
        let p1 = self.position();
        let t1 = self.clock.now();

        let dt = t1.saturating_duration_since(t0).as_secs_f64();
        if dt <= 0.0 {
            return self.last_rpm;
        }
        #[allow(clippy::cast_precision_loss)]
        let counts = (p1 - p0) as f64;
        self.last_rpm = counts_per_sec_to_rpm(counts / dt);
        self.last_sample_time = Some(t1);
        self.last_rpm
    }
}

impl VelocitySource for QuadratureEncoder {
    fn measure_rpm(&mut self) -> f64 {
        self.velocity()
    }
}
