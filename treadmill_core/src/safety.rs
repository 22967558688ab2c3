//! Safety monitor: driver fault, operator stop and safety beam.
//!
//! Checks run in a fixed order every loop iteration and every ramp tick:
//! driver fault, then operator stop, then beam. The beam counts as broken if
//! it is broken now or was latched broken by an edge interrupt since the last
//! explicit clear.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use treadmill_traits::MotorActuator;

use crate::error::FaultKind;
use crate::hw_error::map_hw_error;

/// Sticky beam-break flag. `trip` is safe to call from interrupt context.
#[derive(Debug, Clone, Default)]
pub struct BeamLatch(Arc<AtomicBool>);

impl BeamLatch {
    pub fn new() -> Self {
        Self::default()
    }
    #[inline]
    pub fn trip(&self) {
        self.0.store(true, Ordering::Release);
    }
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
    pub fn is_latched(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// In-memory start/stop latch toggled by a button or service signal.
#[derive(Debug, Clone)]
pub struct StartStopLatch(Arc<AtomicBool>);

impl StartStopLatch {
    pub fn new(running: bool) -> Self {
        Self(Arc::new(AtomicBool::new(running)))
    }
    /// Flip the latch and return the new "should run" state.
    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::AcqRel)
    }
    pub fn set(&self, running: bool) {
        self.0.store(running, Ordering::Release);
    }
    pub fn should_run(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Counts external interrupts (Ctrl-C). First = soft stop, second = hard stop.
#[derive(Debug, Clone, Default)]
pub struct Interrupts(Arc<AtomicU8>);

impl Interrupts {
    pub fn new() -> Self {
        Self::default()
    }
    /// Record one interrupt and return the new count.
    pub fn raise(&self) -> u8 {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_add(1)))
            .unwrap_or(u8::MAX)
            .saturating_add(1)
    }
    pub fn count(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }
    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// Point-in-time view of every fault input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultFlags {
    pub driver_fault: bool,
    pub beam_broken: bool,
    pub beam_latched: bool,
    pub stop_requested: bool,
}

pub struct SafetyMonitor {
    driver_id: u8,
    beam_pin: u8,
    beam_broken: Option<Box<dyn Fn() -> bool + Send>>,
    beam_latch: BeamLatch,
    start_stop: Option<StartStopLatch>,
}

impl core::fmt::Debug for SafetyMonitor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SafetyMonitor")
            .field("driver_id", &self.driver_id)
            .field("beam_pin", &self.beam_pin)
            .field("beam_latched", &self.beam_latch.is_latched())
            .field("has_live_beam", &self.beam_broken.is_some())
            .field("has_start_stop", &self.start_stop.is_some())
            .finish()
    }
}

impl Default for SafetyMonitor {
    fn default() -> Self {
        Self::new(1, 21)
    }
}

impl SafetyMonitor {
    pub fn new(driver_id: u8, beam_pin: u8) -> Self {
        Self {
            driver_id,
            beam_pin,
            beam_broken: None,
            beam_latch: BeamLatch::new(),
            start_stop: None,
        }
    }

    /// Live beam read; returns true while the beam is interrupted.
    pub fn with_beam_reader<F>(mut self, f: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.beam_broken = Some(Box::new(f));
        self
    }

    pub fn with_beam_latch(mut self, latch: BeamLatch) -> Self {
        self.beam_latch = latch;
        self
    }

    pub fn with_start_stop(mut self, latch: StartStopLatch) -> Self {
        self.start_stop = Some(latch);
        self
    }

    pub fn beam_latch(&self) -> &BeamLatch {
        &self.beam_latch
    }

    pub fn start_stop(&self) -> Option<&StartStopLatch> {
        self.start_stop.as_ref()
    }

    /// First fault in check order, or Ok.
    pub fn check(&self, motor: &dyn MotorActuator) -> Result<(), FaultKind> {
        self.check_except(motor, None)
    }

    /// Like `check`, but skips `ignore` and keeps looking at later sources.
    pub fn check_except(
        &self,
        motor: &dyn MotorActuator,
        ignore: Option<FaultKind>,
    ) -> Result<(), FaultKind> {
        let candidates = [
            (self.driver_faulted(motor), FaultKind::DriverFault {
                driver_id: self.driver_id,
            }),
            (self.stop_requested(), FaultKind::UserStopped),
            (self.beam_tripped(), FaultKind::BeamBroken { pin: self.beam_pin }),
        ];
        match candidates
            .into_iter()
            .find(|(hit, kind)| *hit && Some(*kind) != ignore)
        {
            Some((_, kind)) => Err(kind),
            None => Ok(()),
        }
    }

    pub fn flags(&self, motor: &dyn MotorActuator) -> FaultFlags {
        FaultFlags {
            driver_fault: self.driver_faulted(motor),
            beam_broken: self.beam_live(),
            beam_latched: self.beam_latch.is_latched(),
            stop_requested: self.stop_requested(),
        }
    }

    /// Explicit reset of sticky state before a new session.
    pub fn clear_latches(&self) {
        self.beam_latch.clear();
    }

    fn driver_faulted(&self, motor: &dyn MotorActuator) -> bool {
        match motor.get_fault() {
            Ok(f) => f,
            Err(e) => {
                let err = map_hw_error(e.as_ref());
                tracing::warn!(error = %err, "driver fault line unreadable; treating as faulted");
                true
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.start_stop.as_ref().is_some_and(|l| !l.should_run())
    }

    fn beam_live(&self) -> bool {
        self.beam_broken.as_ref().is_some_and(|f| f())
    }

    fn beam_tripped(&self) -> bool {
        // Evaluate both so a live break is never short-circuited away.
        let live = self.beam_live();
        let latched = self.beam_latch.is_latched();
        live || latched
    }
}
