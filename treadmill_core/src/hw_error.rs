//! Maps `Box<dyn Error>` from trait boundaries to typed `TreadmillError`.
//!
//! The traits in `treadmill_traits` use `Box<dyn Error + Send + Sync>` so any
//! backend can plug in; this module converts those to our typed error enum, with
//! an optional feature-gated path for `treadmill_hardware::HwError` downcasting.

use crate::error::TreadmillError;

/// Map a trait-boundary error to a typed `TreadmillError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> TreadmillError {
    #[cfg(feature = "hardware-errors")]
    {
        use treadmill_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Io(io) => TreadmillError::Io(io.to_string()),
                other => TreadmillError::HardwareFault(other.to_string()),
            };
        }
    }

    if let Some(io) = e.downcast_ref::<std::io::Error>() {
        return TreadmillError::Io(io.to_string());
    }
    TreadmillError::Hardware(e.to_string())
}

/// Convenience for `map_err` on trait results.
pub fn to_report(e: treadmill_traits::BoxError) -> eyre::Report {
    eyre::Report::new(map_hw_error(e.as_ref()))
}
