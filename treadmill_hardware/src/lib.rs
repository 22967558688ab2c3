//! Hardware backends for the treadmill rig.
//!
//! The simulated drivetrain is always available. Raspberry Pi backends
//! (TB9051FTG bridge, HD44780 LCD, GPIO interrupt wiring) build with the
//! `hardware` feature on Linux.

pub mod error;
pub mod sim;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod lcd;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod tb9051;

pub use error::HwError;
pub use sim::{LogDisplay, SimCfg, SimFaults, SimMotor};

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use gpio::{BeamInput, watch, wire_beam, wire_encoder};
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use lcd::{Hd44780, LcdPins};
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use tb9051::{Tb9051, Tb9051Pins};
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use rppal::gpio::{Gpio, InputPin, Trigger};
