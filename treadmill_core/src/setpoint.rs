//! Authoritative desired velocity shared by the console, knob and preset
//! producers and read once per cycle by the control loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::InputError;
use crate::units::{MAX_SPEED_MPS, mps_to_rpm};

/// Slack on the knob limits so accumulated steps can land exactly on ±1.5.
pub const LIMIT_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub desired_mps: f64,
    /// Always `mps_to_rpm(desired_mps)`.
    pub desired_rpm: f64,
    /// Raised by producers, cleared by `take_changed`.
    pub changed: bool,
    pub preset_mps: f64,
    pub step_mps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nudge {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KnobEvent {
    Updated(f64),
    /// The step would cross this limit; nothing changed.
    AtLimit(f64),
}

#[derive(Debug, Clone)]
pub struct SetpointSource {
    inner: Arc<Mutex<Setpoint>>,
    coarse_step: f64,
    fine_step: f64,
}

impl Default for SetpointSource {
    fn default() -> Self {
        Self::new(0.1, 0.01)
    }
}

impl SetpointSource {
    pub fn new(coarse_step: f64, fine_step: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Setpoint {
                desired_mps: 0.0,
                desired_rpm: 0.0,
                changed: false,
                preset_mps: 0.0,
                step_mps: coarse_step,
            })),
            coarse_step,
            fine_step,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Setpoint> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate a requested speed without touching state.
    pub fn validate(mps: f64) -> Result<f64, InputError> {
        if !mps.is_finite() || mps.abs() > MAX_SPEED_MPS {
            return Err(InputError::OutOfRange {
                value: mps,
                limit: MAX_SPEED_MPS,
            });
        }
        Ok(mps)
    }

    /// Parse and apply operator text input.
    pub fn submit_text(&self, text: &str) -> Result<f64, InputError> {
        let trimmed = text.trim();
        let mps: f64 = trimmed
            .parse()
            .map_err(|_| InputError::NotANumber(trimmed.to_string()))?;
        self.command(mps)
    }

    /// Apply a validated speed and raise `changed`.
    pub fn command(&self, mps: f64) -> Result<f64, InputError> {
        let mps = Self::validate(mps)?;
        let mut sp = self.lock();
        set_desired(&mut sp, mps);
        sp.changed = true;
        Ok(mps)
    }

    /// Knob detent. Does not raise `changed`; the loop tracks the new value
    /// through `maintain`.
    pub fn nudge(&self, dir: Nudge) -> KnobEvent {
        let mut sp = self.lock();
        let candidate = match dir {
            Nudge::Up => sp.desired_mps + sp.step_mps,
            Nudge::Down => sp.desired_mps - sp.step_mps,
        };
        if candidate > MAX_SPEED_MPS + LIMIT_TOLERANCE {
            return KnobEvent::AtLimit(MAX_SPEED_MPS);
        }
        if candidate < -MAX_SPEED_MPS - LIMIT_TOLERANCE {
            return KnobEvent::AtLimit(-MAX_SPEED_MPS);
        }
        let value = round_to_hundredths(candidate).clamp(-MAX_SPEED_MPS, MAX_SPEED_MPS);
        set_desired(&mut sp, value);
        KnobEvent::Updated(value)
    }

    /// Switch between the coarse and fine knob step. Returns the new step.
    #[allow(clippy::float_cmp)]
    pub fn toggle_fine_step(&self) -> f64 {
        let mut sp = self.lock();
        sp.step_mps = if sp.step_mps == self.coarse_step {
            self.fine_step
        } else {
            self.coarse_step
        };
        sp.step_mps
    }

    /// Snapshot the current speed as the preset and return to rest.
    pub fn store_preset(&self) -> f64 {
        let mut sp = self.lock();
        sp.preset_mps = sp.desired_mps;
        set_desired(&mut sp, 0.0);
        sp.changed = true;
        sp.preset_mps
    }

    /// Resume the stored preset speed.
    pub fn recall_preset(&self) -> f64 {
        let mut sp = self.lock();
        let preset = sp.preset_mps;
        set_desired(&mut sp, preset);
        sp.changed = true;
        preset
    }

    pub fn snapshot(&self) -> Setpoint {
        *self.lock()
    }

    /// Read-then-clear of the changed edge.
    pub fn take_changed(&self) -> Option<Setpoint> {
        let mut sp = self.lock();
        if sp.changed {
            sp.changed = false;
            Some(*sp)
        } else {
            None
        }
    }

    /// Zero the desired speed for a new session. Keeps preset and step.
    pub fn reset(&self) {
        let mut sp = self.lock();
        set_desired(&mut sp, 0.0);
        sp.changed = false;
    }
}

fn set_desired(sp: &mut Setpoint, mps: f64) {
    sp.desired_mps = mps;
    sp.desired_rpm = mps_to_rpm(mps);
}

fn round_to_hundredths(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn out_of_range_text_is_rejected_without_side_effects() {
        let src = SetpointSource::default();
        let err = src.submit_text("2.0").expect_err("2.0 is out of range");
        assert!(matches!(err, InputError::OutOfRange { .. }));
        let sp = src.snapshot();
        assert!(sp.desired_mps.abs() < f64::EPSILON);
        assert!(!sp.changed);
    }

    #[test]
    fn accepted_text_updates_pair_and_changed_once() {
        let src = SetpointSource::default();
        assert_eq!(src.submit_text(" 0.75\n"), Ok(0.75));
        let sp = src.take_changed().expect("changed after accept");
        assert!((sp.desired_mps - 0.75).abs() < f64::EPSILON);
        assert!((sp.desired_rpm - mps_to_rpm(0.75)).abs() < 1e-12);
        assert!(src.take_changed().is_none());
    }

    #[rstest]
    #[case("abc")]
    #[case("")]
    #[case("1.0 m/s")]
    fn garbage_is_not_a_number(#[case] text: &str) {
        let src = SetpointSource::default();
        assert!(matches!(
            src.submit_text(text),
            Err(InputError::NotANumber(_))
        ));
    }

    #[test]
    fn nan_and_infinity_are_out_of_range() {
        let src = SetpointSource::default();
        assert!(src.submit_text("NaN").is_err());
        assert!(src.submit_text("inf").is_err());
    }

    #[test]
    fn knob_walks_to_limit_and_reports_it() {
        let src = SetpointSource::default();
        let mut last = KnobEvent::Updated(0.0);
        for _ in 0..15 {
            last = src.nudge(Nudge::Up);
        }
        assert_eq!(last, KnobEvent::Updated(1.5));
        assert_eq!(src.nudge(Nudge::Up), KnobEvent::AtLimit(1.5));
        assert!((src.snapshot().desired_mps - 1.5).abs() < f64::EPSILON);
        assert!(src.take_changed().is_none(), "knob must not raise changed");
    }

    #[test]
    fn fine_step_toggles() {
        let src = SetpointSource::default();
        assert!((src.toggle_fine_step() - 0.01).abs() < f64::EPSILON);
        assert_eq!(src.nudge(Nudge::Down), KnobEvent::Updated(-0.01));
        assert!((src.toggle_fine_step() - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn preset_store_and_recall() {
        let src = SetpointSource::default();
        src.command(1.2).expect("valid");
        let _ = src.take_changed();
        assert!((src.store_preset() - 1.2).abs() < f64::EPSILON);
        let sp = src.take_changed().expect("preset raises changed");
        assert!(sp.desired_mps.abs() < f64::EPSILON);
        assert!((src.recall_preset() - 1.2).abs() < f64::EPSILON);
        assert!(src.take_changed().is_some());
    }
}
