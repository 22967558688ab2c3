//! Simulated drivetrain for bench runs and tests without the rig.
//!
//! `SimMotor` owns a plant thread: a first-order lag from command to shaft
//! speed whose position is fed back as quadrature edges through an
//! `EdgeSink`, exactly as the GPIO interrupt wiring would deliver them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use treadmill_traits::{BoxError, Channel, DisplayDriver, EdgeSink, MotorActuator};

use crate::error::HwError;

#[derive(Debug, Clone, PartialEq)]
pub struct SimCfg {
    /// Command magnitude that maps to full output.
    pub max_command: f64,
    /// Steady-state output-shaft RPM per unit of command.
    pub rpm_per_command: f64,
    /// Plant time constant.
    pub time_constant: Duration,
    /// Decoded encoder counts per output-shaft revolution.
    pub counts_per_rev: f64,
    /// Plant integration step.
    pub step: Duration,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            max_command: 480.0,
            rpm_per_command: 1.25,
            time_constant: Duration::from_millis(200),
            counts_per_rev: 48.0 * 9.68,
            step: Duration::from_millis(1),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    command: AtomicU64,
    rpm: AtomicU64,
    enabled: AtomicBool,
    fault: AtomicBool,
    shutdown: AtomicBool,
}

impl Shared {
    fn load(cell: &AtomicU64) -> f64 {
        f64::from_bits(cell.load(Ordering::Acquire))
    }
    fn store(cell: &AtomicU64, v: f64) {
        cell.store(v.to_bits(), Ordering::Release);
    }
}

/// Fault injection for a running `SimMotor`.
#[derive(Debug, Clone)]
pub struct SimFaults {
    shared: Arc<Shared>,
}

impl SimFaults {
    /// Drive the simulated diagnostic line.
    pub fn set_driver_fault(&self, faulted: bool) {
        self.shared.fault.store(faulted, Ordering::Release);
    }
}

// Quadrature states in forward order: A leads B.
const STATES: [(bool, bool); 4] = [(false, false), (true, false), (true, true), (false, true)];

#[derive(Debug, Default)]
struct Quadrature {
    idx: usize,
}

impl Quadrature {
    fn step<S: EdgeSink + ?Sized>(&mut self, forward: bool, sink: &S) {
        // The channel that changes between state i and i+1 is A for even i.
        let (next, edge_from) = if forward {
            ((self.idx + 1) % 4, self.idx)
        } else {
            let prev = (self.idx + 3) % 4;
            (prev, prev)
        };
        let (a, b) = STATES[next];
        if edge_from % 2 == 0 {
            sink.on_edge(Channel::A, a);
        } else {
            sink.on_edge(Channel::B, b);
        }
        self.idx = next;
    }
}

pub struct SimMotor {
    shared: Arc<Shared>,
    max_command: f64,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl core::fmt::Debug for SimMotor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimMotor")
            .field("command", &self.command())
            .field("rpm", &self.rpm())
            .field("enabled", &self.shared.enabled.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl SimMotor {
    /// Start the plant thread, delivering encoder edges to `sink`.
    pub fn spawn<S>(sink: S, cfg: SimCfg) -> Self
    where
        S: EdgeSink + 'static,
    {
        let shared = Arc::new(Shared::default());
        let plant = Arc::clone(&shared);
        let max_command = cfg.max_command;
        // The simulated shaft starts with both channels low.
        sink.set_levels(false, false);

        let join_handle = std::thread::spawn(move || {
            let tau = cfg.time_constant.as_secs_f64().max(1e-6);
            let mut rpm = 0.0f64;
            let mut pending = 0.0f64;
            let mut quad = Quadrature::default();
            let mut last = Instant::now();
            while !plant.shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(cfg.step);
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f64();
                last = now;

                let command = if plant.enabled.load(Ordering::Acquire) {
                    Shared::load(&plant.command)
                } else {
                    0.0
                };
                let target = command * cfg.rpm_per_command;
                rpm += (target - rpm) * (dt / tau).min(1.0);
                Shared::store(&plant.rpm, rpm);

                pending += rpm / 60.0 * cfg.counts_per_rev * dt;
                while pending >= 1.0 {
                    quad.step(true, &sink);
                    pending -= 1.0;
                }
                while pending <= -1.0 {
                    quad.step(false, &sink);
                    pending += 1.0;
                }
            }
            tracing::trace!("sim plant thread exiting cleanly");
        });

        Self {
            shared,
            max_command,
            join_handle: Some(join_handle),
        }
    }

    pub fn faults(&self) -> SimFaults {
        SimFaults {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current simulated output-shaft speed.
    pub fn rpm(&self) -> f64 {
        Shared::load(&self.shared.rpm)
    }

    /// Last accepted (clamped) command.
    pub fn command(&self) -> f64 {
        Shared::load(&self.shared.command)
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }
}

impl MotorActuator for SimMotor {
    fn set_speed(&mut self, signal: f64) -> Result<(), BoxError> {
        if self.shared.shutdown.load(Ordering::Relaxed) {
            return Err(Box::new(HwError::SimStopped));
        }
        let clamped = signal.clamp(-self.max_command, self.max_command);
        if !self.shared.enabled.swap(true, Ordering::AcqRel) {
            tracing::debug!("sim driver enabled");
        }
        Shared::store(&self.shared.command, clamped);
        Ok(())
    }

    fn get_fault(&self) -> Result<bool, BoxError> {
        Ok(self.shared.fault.load(Ordering::Acquire))
    }

    fn force_stop(&mut self) -> Result<(), BoxError> {
        Shared::store(&self.shared.command, 0.0);
        if self.shared.enabled.swap(false, Ordering::AcqRel) {
            tracing::info!("sim driver disabled");
        }
        Ok(())
    }
}

impl Drop for SimMotor {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("sim plant thread joined"),
                Err(e) => tracing::warn!(?e, "sim plant thread panicked during shutdown"),
            }
        }
    }
}

/// Display backend that writes each message to the log.
#[derive(Debug, Default)]
pub struct LogDisplay {
    writes: u64,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl DisplayDriver for LogDisplay {
    fn write(&mut self, text: &str) -> Result<(), BoxError> {
        self.writes += 1;
        tracing::info!(target: "treadmill::display", text = %text.replace('\n', " | "));
        Ok(())
    }

    fn clear(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}
