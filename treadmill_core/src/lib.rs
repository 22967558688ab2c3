#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Closed-loop treadmill speed control (hardware-agnostic).
//!
//! All hardware interaction goes through the `treadmill_traits` seams:
//! `MotorActuator` for the driver output stage, `DisplayDriver` for the
//! character LCD, `SessionRecorder` for per-session data and `EdgeSink` for
//! encoder interrupts.
//!
//! ## Architecture
//!
//! - **Encoder**: lock-free quadrature decoding and windowed velocity (`encoder`)
//! - **Control**: incremental PID with linear setpoint ramps (`controller`)
//! - **Safety**: driver fault, operator stop and latched beam checks (`safety`)
//! - **Setpoint**: shared desired speed with console, knob and preset producers
//! - **Display**: two bounded priority queues feeding one LCD thread (`display`)
//! - **Orchestration**: the session state machine (`control_loop`) and the
//!   once/service runner (`runner`)
//!
//! ## Units
//!
//! The operator works in m/s; the controller works in output-shaft RPM.
//! `units` holds the only conversion between the two.

use std::sync::Arc;

use treadmill_traits::Clock;

pub mod builder;
pub mod config;
pub mod console;
pub mod control_loop;
pub mod controller;
pub mod conversions;
pub mod display;
pub mod encoder;
pub mod error;
pub mod hw_error;
pub mod knob;
pub mod recorder;
pub mod runner;
pub mod safety;
pub mod setpoint;
pub mod status;
pub mod units;

/// Clock shared between the loop, the encoder and the display thread.
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

pub use builder::{Treadmill, TreadmillBuilder, build_control_loop};
pub use config::{DisplayCfg, EncoderCfg, KnobCfg, LoopCfg};
pub use control_loop::ControlLoop;
pub use controller::{Gains, RampResult, VelocityController};
pub use display::{DisplayHandle, DisplayMessage, DisplayQueue};
pub use encoder::{EncoderHandle, QuadratureEncoder, VelocitySource};
pub use error::{BuildError, FaultKind, InputError, Result, TreadmillError};
pub use recorder::{CsvRecorder, TrialSwitch};
pub use runner::{RunMode, RunSummary, RunnerCfg};
pub use safety::{BeamLatch, Interrupts, SafetyMonitor, StartStopLatch};
pub use setpoint::{Setpoint, SetpointSource};
pub use status::{LoopState, LoopStatus, SessionReport, StopCause};
