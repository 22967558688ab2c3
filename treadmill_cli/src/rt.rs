//! Real-time scheduling for the control thread (Linux SCHED_FIFO, affinity,
//! mlockall; macOS mlockall only).
//!
//! Every step is best effort: failures are logged and the run continues on
//! the normal scheduler.

use std::sync::OnceLock;

use crate::cli::RtLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtRequest {
    pub prio: Option<i32>,
    pub lock: RtLock,
    pub cpu: Option<usize>,
}

static RT_ONCE: OnceLock<()> = OnceLock::new();

/// Apply `req` once per process. Later calls are no-ops.
pub fn setup_rt_once(req: RtRequest) {
    RT_ONCE.get_or_init(|| {
        match lock_memory(req.lock) {
            Ok(()) => tracing::info!(lock = ?req.lock, "rt: memory lock applied"),
            Err(e) => tracing::warn!(lock = ?req.lock, error = %e, "rt: mlockall failed"),
        }
        #[cfg(target_os = "linux")]
        {
            match linux::set_fifo(req.prio) {
                Ok(prio) => tracing::info!(prio, "rt: SCHED_FIFO applied"),
                Err(e) => tracing::warn!(error = %e, "rt: SCHED_FIFO not applied"),
            }
            match linux::pin_cpu(req.cpu.unwrap_or(0)) {
                Ok(cpu) => tracing::info!(cpu, "rt: affinity applied"),
                Err(e) => tracing::warn!(error = %e, "rt: affinity not applied"),
            }
        }
        #[cfg(not(target_os = "linux"))]
        tracing::warn!("rt: SCHED_FIFO and affinity are Linux-only; only mlockall applied");
    });
}

#[cfg(unix)]
fn lock_memory(lock: RtLock) -> eyre::Result<()> {
    use libc::{MCL_CURRENT, MCL_FUTURE, mlockall};

    fn lock_with(flags: libc::c_int) -> std::io::Result<()> {
        // SAFETY: mlockall only reads its flag argument.
        let rc = unsafe { mlockall(flags) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    let result = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => lock_with(MCL_CURRENT),
        RtLock::All => lock_with(MCL_CURRENT | MCL_FUTURE),
    };
    let Err(err) = result else {
        return Ok(());
    };
    let retryable = matches!(err.raw_os_error(), Some(c) if c == libc::EPERM || c == libc::ENOMEM);
    // Fall back to resident pages only if future pages were refused.
    if lock == RtLock::All && retryable && lock_with(MCL_CURRENT).is_ok() {
        tracing::warn!(error = %err, "rt: mlockall(current|future) refused; locked current pages only");
        return Ok(());
    }
    let mut msg = format!("mlockall({lock:?}) failed: {err}");
    if retryable {
        if let Some(limit) = memlock_limit() {
            msg.push_str(&format!("; {limit}"));
        }
        msg.push_str("; needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'");
    }
    Err(eyre::eyre!(msg))
}

#[cfg(not(unix))]
fn lock_memory(lock: RtLock) -> eyre::Result<()> {
    match lock {
        RtLock::None => Ok(()),
        other => eyre::bail!("memory locking ({other:?}) is not supported on this OS"),
    }
}

#[cfg(unix)]
fn memlock_limit() -> Option<String> {
    let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
    // SAFETY: getrlimit writes a full rlimit on success.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: rc == 0 above.
    let cur = unsafe { rlim.assume_init() }.rlim_cur;
    if cur == libc::RLIM_INFINITY {
        Some("memlock limit: unlimited".to_string())
    } else {
        Some(format!("memlock limit: {} KiB", cur / 1024))
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use libc::{
        CPU_ISSET, CPU_SET, CPU_ZERO, SCHED_FIFO, sched_get_priority_max, sched_get_priority_min,
        sched_param, sched_setscheduler,
    };

    const CAP_SYS_NICE: u64 = 1 << 23;
    const MAX_CPUSET_BITS: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;

    fn has_sys_nice() -> bool {
        let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
            return true;
        };
        status.lines().any(|line| {
            (line.starts_with("CapEff:") || line.starts_with("CapPrm:"))
                && line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|hex| u64::from_str_radix(hex, 16).ok())
                    .is_some_and(|caps| caps & CAP_SYS_NICE != 0)
        })
    }

    /// Switch to SCHED_FIFO; returns the priority actually applied.
    pub fn set_fifo(prio: Option<i32>) -> eyre::Result<i32> {
        // SAFETY: plain getter.
        let euid = unsafe { libc::geteuid() };
        if !has_sys_nice() && euid != 0 {
            eyre::bail!(
                "needs CAP_SYS_NICE or root (euid {euid}); try 'sudo setcap cap_sys_nice=ep /path/to/treadmill'"
            );
        }
        // SAFETY: plain getters.
        let (min, max) = unsafe {
            (
                sched_get_priority_min(SCHED_FIFO),
                sched_get_priority_max(SCHED_FIFO),
            )
        };
        let (min, max) = if min < 0 || max < 0 { (1, 99) } else { (min, max) };
        let applied = prio.unwrap_or(max).clamp(min, max);
        let param = sched_param {
            sched_priority: applied,
        };
        // SAFETY: param outlives the call.
        let rc = unsafe { sched_setscheduler(0, SCHED_FIFO, &param) };
        if rc != 0 {
            return Err(eyre::eyre!(std::io::Error::last_os_error()));
        }
        Ok(applied)
    }

    /// Pin the process to `cpu` if the current affinity mask allows it.
    pub fn pin_cpu(cpu: usize) -> eyre::Result<usize> {
        // SAFETY: plain getter.
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        let online = usize::try_from(online).unwrap_or(0);
        if online < 1 {
            eyre::bail!("_SC_NPROCESSORS_ONLN < 1");
        }
        if cpu >= online {
            eyre::bail!("requested CPU {cpu} >= online {online}");
        }
        if cpu >= MAX_CPUSET_BITS {
            eyre::bail!("requested CPU {cpu} exceeds cpu_set_t capacity {MAX_CPUSET_BITS}");
        }
        // SAFETY: cpu_set_t is plain data; the set is sized for the call.
        unsafe {
            let mut allowed: libc::cpu_set_t = std::mem::zeroed();
            CPU_ZERO(&mut allowed);
            let rc =
                libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut allowed);
            if rc == 0 && !CPU_ISSET(cpu, &allowed) {
                eyre::bail!("CPU {cpu} not permitted by current affinity mask");
            }
            let mut desired: libc::cpu_set_t = std::mem::zeroed();
            CPU_ZERO(&mut desired);
            CPU_SET(cpu, &mut desired);
            let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &desired);
            if rc != 0 {
                return Err(eyre::eyre!(std::io::Error::last_os_error()));
            }
        }
        Ok(cpu)
    }
}
