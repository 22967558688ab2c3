//! Prioritised, non-blocking display queue.
//!
//! Producers post to one of two bounded queues and never block:
//! - knob: small, drop-newest when full (stale detents are worthless)
//! - main: larger, drop-oldest when full (latest status wins)
//!
//! A single consumer thread owns the `DisplayDriver` and always drains the
//! knob queue before the main queue. The thread is shut down and joined when
//! the `DisplayQueue` is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel as xch;
use treadmill_traits::DisplayDriver;

use crate::SharedClock;
use crate::config::DisplayCfg;
use crate::hw_error::map_hw_error;

/// Slice used when sleeping out a message duration so shutdown stays prompt.
const HOLD_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub text: String,
    /// How long the message stays up before the next one may render.
    pub duration: Duration,
    pub clear_before: bool,
    pub clear_after: bool,
}

impl DisplayMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            duration: Duration::ZERO,
            clear_before: true,
            clear_after: false,
        }
    }

    pub fn with_duration(mut self, d: Duration) -> Self {
        self.duration = d;
        self
    }

    pub fn clear_after(mut self, yes: bool) -> Self {
        self.clear_after = yes;
        self
    }

    pub fn clear_before(mut self, yes: bool) -> Self {
        self.clear_before = yes;
        self
    }
}

/// Cloneable producer side of the queue.
#[derive(Debug, Clone)]
pub struct DisplayHandle {
    knob_tx: xch::Sender<DisplayMessage>,
    main_tx: xch::Sender<DisplayMessage>,
    // Producers evict the oldest main entry through this receiver clone.
    main_evict: xch::Receiver<DisplayMessage>,
    dropped: Arc<AtomicU64>,
}

struct Receivers {
    knob: xch::Receiver<DisplayMessage>,
    main: xch::Receiver<DisplayMessage>,
}

fn channels(cfg: &DisplayCfg) -> (DisplayHandle, Receivers) {
    let (knob_tx, knob_rx) = xch::bounded(cfg.knob_capacity.max(1));
    let (main_tx, main_rx) = xch::bounded(cfg.main_capacity.max(1));
    let handle = DisplayHandle {
        knob_tx,
        main_tx,
        main_evict: main_rx.clone(),
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (
        handle,
        Receivers {
            knob: knob_rx,
            main: main_rx,
        },
    )
}

impl DisplayHandle {
    /// Post to the high-priority queue. Returns false if the message was dropped.
    pub fn post_knob(&self, msg: DisplayMessage) -> bool {
        match self.knob_tx.try_send(msg) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Post to the status queue, evicting the oldest entry if it is full.
    pub fn post_main(&self, msg: DisplayMessage) {
        let mut msg = msg;
        loop {
            match self.main_tx.try_send(msg) {
                Ok(()) => return,
                Err(xch::TrySendError::Full(back)) => {
                    if self.main_evict.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    msg = back;
                }
                Err(xch::TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Messages discarded by either drop policy so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct DisplayQueue {
    handle: DisplayHandle,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl DisplayQueue {
    pub fn spawn<D>(driver: D, cfg: &DisplayCfg, clock: SharedClock) -> Self
    where
        D: DisplayDriver + Send + 'static,
    {
        let (handle, rx) = channels(cfg);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let idle_poll = cfg.idle_poll;

        let join_handle = std::thread::spawn(move || {
            let mut driver = driver;
            while !shutdown_clone.load(Ordering::Relaxed) {
                let next = rx.knob.try_recv().ok().or_else(|| rx.main.try_recv().ok());
                match next {
                    Some(msg) => render(&mut driver, &msg, &clock, &shutdown_clone),
                    None => {
                        if let Ok(msg) = rx.knob.recv_timeout(idle_poll) {
                            render(&mut driver, &msg, &clock, &shutdown_clone);
                        }
                    }
                }
            }
            tracing::trace!("display thread exiting cleanly");
        });

        Self {
            handle,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    pub fn handle(&self) -> DisplayHandle {
        self.handle.clone()
    }
}

impl Drop for DisplayQueue {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("display thread joined"),
                Err(e) => tracing::warn!(?e, "display thread panicked during shutdown"),
            }
        }
    }
}

fn render<D: DisplayDriver>(
    driver: &mut D,
    msg: &DisplayMessage,
    clock: &SharedClock,
    shutdown: &AtomicBool,
) {
    if msg.clear_before
        && let Err(e) = driver.clear()
    {
        tracing::warn!(error = %map_hw_error(e.as_ref()), "display clear failed");
    }
    if let Err(e) = driver.write(&msg.text) {
        tracing::warn!(error = %map_hw_error(e.as_ref()), "display write failed");
        return;
    }
    let mut left = msg.duration;
    while !left.is_zero() && !shutdown.load(Ordering::Relaxed) {
        let slice = left.min(HOLD_SLICE);
        clock.sleep(slice);
        left = left.saturating_sub(slice);
    }
    if msg.clear_after
        && let Err(e) = driver.clear()
    {
        tracing::warn!(error = %map_hw_error(e.as_ref()), "display clear failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(t: &str) -> DisplayMessage {
        DisplayMessage::new(t)
    }

    #[test]
    fn knob_queue_drops_newest_when_full() {
        let (h, rx) = channels(&DisplayCfg::default());
        assert!(h.post_knob(msg("1")));
        assert!(h.post_knob(msg("2")));
        assert!(!h.post_knob(msg("3")));
        assert_eq!(h.dropped(), 1);
        let got: Vec<_> = rx.knob.try_iter().map(|m| m.text).collect();
        assert_eq!(got, ["1", "2"]);
    }

    #[test]
    fn main_queue_drops_oldest_when_full() {
        let cfg = DisplayCfg {
            main_capacity: 3,
            ..DisplayCfg::default()
        };
        let (h, rx) = channels(&cfg);
        for t in ["a", "b", "c", "d", "e"] {
            h.post_main(msg(t));
        }
        assert_eq!(h.dropped(), 2);
        let got: Vec<_> = rx.main.try_iter().map(|m| m.text).collect();
        assert_eq!(got, ["c", "d", "e"]);
    }

    #[test]
    fn builder_style_flags() {
        let m = DisplayMessage::new("x")
            .with_duration(Duration::from_secs(1))
            .clear_before(false)
            .clear_after(true);
        assert_eq!(m.duration, Duration::from_secs(1));
        assert!(!m.clear_before);
        assert!(m.clear_after);
    }
}
