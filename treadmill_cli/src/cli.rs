//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "treadmill", version, about = "Closed-loop treadmill speed controller")]
pub struct Cli {
    /// Path to config TOML; a missing file means built-in defaults
    #[arg(long, value_name = "FILE", default_value = "etc/treadmill.toml")]
    pub config: PathBuf,

    /// Log as JSON lines and print the run summary as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            Self::Current
        } else {
            Self::None
        }
    }
}

/// Session policy override for `run`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    /// One session, then exit
    Once,
    /// Return to idle after an operator stop
    Service,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the speed controller
    Run {
        /// Initial desired speed in m/s (console and knob can change it)
        #[arg(long, value_name = "MPS", allow_negative_numbers = true)]
        speed: Option<f64>,
        /// Stop each session after this many seconds (overrides runner.max_session_ms)
        #[arg(long, value_name = "SECS")]
        duration_s: Option<f64>,
        /// Session policy (overrides runner.mode)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Do not read speeds from stdin
        #[arg(long, action = ArgAction::SetTrue)]
        no_console: bool,
        /// Enable real-time mode (SCHED_FIFO, affinity, mlockall)
        #[arg(
            long,
            action = ArgAction::SetTrue,
            long_help = "Enable real-time mode on supported OSes.\n\nLinux: attempts SCHED_FIFO priority, pins the process to one CPU and locks memory with mlockall. Requires CAP_SYS_NICE/CAP_IPC_LOCK or root; failures are logged and the run continues.\n\nmacOS: only mlockall is applied."
        )]
        rt: bool,
        /// Real-time priority for SCHED_FIFO on Linux (1..=max); ignored elsewhere
        #[arg(long, value_name = "PRIO")]
        rt_prio: Option<i32>,
        /// Memory locking mode for --rt: none, current, or all
        #[arg(long, value_enum, value_name = "MODE")]
        rt_lock: Option<RtLock>,
        /// CPU index to pin the process to with --rt (Linux only, default 0)
        #[arg(long, value_name = "CPU")]
        rt_cpu: Option<usize>,
    },
    /// Validate config and probe the selected backend
    SelfCheck,
}
