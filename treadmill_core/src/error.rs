use thiserror::Error;

/// Session-ending fault conditions reported by the safety monitor.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    #[error("motor driver {driver_id} reported a fault")]
    DriverFault { driver_id: u8 },
    #[error("safety beam on pin {pin} was broken")]
    BeamBroken { pin: u8 },
    #[error("stopped by operator")]
    UserStopped,
}

impl FaultKind {
    /// Short text for a 16x2 character display.
    pub fn display_text(&self) -> String {
        match self {
            Self::DriverFault { driver_id } => format!("Driver {driver_id} fault!"),
            Self::BeamBroken { pin } => format!("IR {pin} triggered!"),
            Self::UserStopped => "Program stopped!".to_string(),
        }
    }

    /// Faults that end the process rather than allowing a restart.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::UserStopped)
    }
}

#[derive(Debug, Error, Clone)]
pub enum TreadmillError {
    #[error("session fault: {0}")]
    Fault(FaultKind),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("io error: {0}")]
    Io(String),
}

/// Rejected operator input. Always handled at the producer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputError {
    #[error("not a number: {0:?}")]
    NotANumber(String),
    #[error("{value} m/s is outside [-{limit}, {limit}] m/s")]
    OutOfRange { value: f64, limit: f64 },
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing motor")]
    MissingMotor,
    #[error("missing velocity sensor")]
    MissingSensor,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
