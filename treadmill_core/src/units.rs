//! Fixed drivetrain constants and unit conversions.
//!
//! The belt is driven by a 2 inch roller on a 9.68:1 gearmotor whose encoder
//! yields 48 counts per motor revolution when both channels are decoded.

use std::f64::consts::PI;

pub const GEAR_RATIO: f64 = 9.68;
pub const COUNTS_PER_REV: f64 = 48.0;
pub const ROLLER_DIAMETER_IN: f64 = 2.0;
pub const INCHES_PER_METER: f64 = 39.3701;

/// Operator setpoint limit in m/s (symmetric).
pub const MAX_SPEED_MPS: f64 = 1.5;

/// Belt speed in m/s for an output-shaft speed in RPM.
#[inline]
pub fn rpm_to_mps(rpm: f64) -> f64 {
    rpm * (PI / 60.0) * (ROLLER_DIAMETER_IN / INCHES_PER_METER)
}

/// Output-shaft speed in RPM for a belt speed in m/s.
#[inline]
pub fn mps_to_rpm(mps: f64) -> f64 {
    mps * (60.0 / PI) / (ROLLER_DIAMETER_IN / INCHES_PER_METER)
}

/// Output-shaft RPM for an encoder count rate.
#[inline]
pub fn counts_per_sec_to_rpm(counts_per_sec: f64) -> f64 {
    counts_per_sec / (GEAR_RATIO * COUNTS_PER_REV) * 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn one_mps_is_about_376_rpm() {
        let rpm = mps_to_rpm(1.0);
        assert!((rpm - 375.957).abs() < 0.001, "rpm={rpm}");
    }

    #[test]
    fn one_rev_per_second_of_counts_is_sixty_rpm() {
        let cps = GEAR_RATIO * COUNTS_PER_REV;
        assert!((counts_per_sec_to_rpm(cps) - 60.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn conversions_are_inverse(x in -MAX_SPEED_MPS..=MAX_SPEED_MPS) {
            let back = rpm_to_mps(mps_to_rpm(x));
            prop_assert!((back - x).abs() <= 1e-9 * x.abs().max(f64::MIN_POSITIVE));
        }
    }
}
