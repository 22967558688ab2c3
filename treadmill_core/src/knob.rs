//! Rotary knob decoding and the preset button hold detector.
//!
//! Both are driven by timestamps handed in by the caller, so GPIO callbacks
//! stay short and tests stay deterministic. Long presses are detected by a
//! polling watcher thread instead of spinning inside a pin callback.
//! `Debounce` gates the plain push buttons the same way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::SharedClock;
use crate::config::KnobCfg;
use crate::display::{DisplayHandle, DisplayMessage};
use crate::setpoint::{KnobEvent, Nudge, SetpointSource};

const KNOB_MESSAGE_HOLD: Duration = Duration::from_millis(750);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnobPin {
    Clk,
    Dt,
}

/// Time-window gate for a contact input: an event is accepted only when the
/// previously accepted one is at least `window` old.
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
    last: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn accept(&mut self, at: Instant) -> bool {
        if self
            .last
            .is_some_and(|t| at.saturating_duration_since(t) < self.window)
        {
            return false;
        }
        self.last = Some(at);
        true
    }
}

/// Turns clk/dt edges into detents.
///
/// A falling clk edge with dt high is one step down; a falling dt edge with
/// clk high is one step up. Falling edges inside the debounce window of the
/// previous accepted edge on the same pin are ignored.
#[derive(Debug, Clone)]
pub struct KnobDecoder {
    clk: bool,
    dt: bool,
    debounce: Duration,
    last_clk: Option<Instant>,
    last_dt: Option<Instant>,
}

impl KnobDecoder {
    pub fn new(debounce: Duration) -> Self {
        Self {
            clk: true,
            dt: true,
            debounce,
            last_clk: None,
            last_dt: None,
        }
    }

    pub fn on_edge(&mut self, pin: KnobPin, level: bool, at: Instant) -> Option<Nudge> {
        match pin {
            KnobPin::Clk => self.clk = level,
            KnobPin::Dt => self.dt = level,
        }
        if level {
            return None;
        }
        let last = match pin {
            KnobPin::Clk => &mut self.last_clk,
            KnobPin::Dt => &mut self.last_dt,
        };
        if last.is_some_and(|t| at.saturating_duration_since(t) < self.debounce) {
            return None;
        }
        *last = Some(at);
        match pin {
            KnobPin::Clk if self.dt => Some(Nudge::Down),
            KnobPin::Dt if self.clk => Some(Nudge::Up),
            _ => None,
        }
    }
}

/// Knob bound to the setpoint and the high-priority display queue.
pub struct Knob {
    decoder: KnobDecoder,
    switch: Debounce,
    setpoint: SetpointSource,
    display: Option<DisplayHandle>,
    clock: SharedClock,
}

impl Knob {
    pub fn new(
        cfg: &KnobCfg,
        setpoint: SetpointSource,
        display: Option<DisplayHandle>,
        clock: SharedClock,
    ) -> Self {
        Self {
            decoder: KnobDecoder::new(cfg.debounce),
            switch: Debounce::new(cfg.switch_debounce),
            setpoint,
            display,
            clock,
        }
    }

    pub fn on_edge(&mut self, pin: KnobPin, level: bool) -> Option<KnobEvent> {
        let nudge = self.decoder.on_edge(pin, level, self.clock.now())?;
        let event = self.setpoint.nudge(nudge);
        if let KnobEvent::AtLimit(limit) = event {
            let side = if limit > 0.0 { "upper" } else { "lower" };
            self.post(format!("Exceeding {side}\nlim of {limit:.1} m/s"));
        }
        Some(event)
    }

    /// Switch press: toggle coarse/fine step. Bounces return `None`.
    pub fn on_switch(&mut self) -> Option<f64> {
        if !self.switch.accept(self.clock.now()) {
            return None;
        }
        let step = self.setpoint.toggle_fine_step();
        self.post(format!("Curr step size:\n{step:.2} m/s"));
        Some(step)
    }

    fn post(&self, text: String) {
        if let Some(d) = &self.display {
            d.post_knob(
                DisplayMessage::new(text)
                    .with_duration(KNOB_MESSAGE_HOLD)
                    .clear_after(true),
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Press {
    Short,
    Long,
    /// Release after a long press that already fired, or with no press.
    Ignored,
}

/// Press/hold/release tracking for the preset button.
///
/// A release inside the debounce window of its press is held back. If the
/// contact is still open once the window has passed, `poll` drops the whole
/// press as a glitch; if it closed again, the press carries on.
#[derive(Debug, Clone)]
pub struct HoldDetector {
    threshold: Duration,
    debounce: Duration,
    pressed_at: Option<Instant>,
    /// Last raw contact state, bounces included.
    contact_down: bool,
    released_at: Option<Instant>,
    fired: bool,
}

impl HoldDetector {
    pub fn new(threshold: Duration, debounce: Duration) -> Self {
        Self {
            threshold,
            debounce,
            pressed_at: None,
            contact_down: false,
            released_at: None,
            fired: false,
        }
    }

    pub fn press(&mut self, now: Instant) {
        self.contact_down = true;
        if self.pressed_at.is_none() {
            self.pressed_at = Some(now);
            self.fired = false;
        }
    }

    /// Returns true exactly once per press, when the hold threshold is crossed.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(t) = self.pressed_at else {
            return false;
        };
        if !self.contact_down {
            if self
                .released_at
                .is_some_and(|r| now.saturating_duration_since(r) >= self.debounce)
            {
                tracing::debug!("preset press shorter than debounce window dropped");
                self.pressed_at = None;
                self.fired = false;
            }
            return false;
        }
        if !self.fired && now.saturating_duration_since(t) >= self.threshold {
            self.fired = true;
            return true;
        }
        false
    }

    pub fn release(&mut self, now: Instant) -> Press {
        self.contact_down = false;
        self.released_at = Some(now);
        let Some(t) = self.pressed_at else {
            return Press::Ignored;
        };
        if now.saturating_duration_since(t) < self.debounce {
            return Press::Ignored;
        }
        self.pressed_at = None;
        if self.fired {
            self.fired = false;
            return Press::Ignored;
        }
        if now.saturating_duration_since(t) >= self.threshold {
            Press::Long
        } else {
            Press::Short
        }
    }
}

/// Preset button: hold to store (and stop), tap to recall.
#[derive(Clone)]
pub struct PresetButton {
    detector: Arc<Mutex<HoldDetector>>,
    setpoint: SetpointSource,
    display: Option<DisplayHandle>,
    clock: SharedClock,
}

impl PresetButton {
    pub fn new(
        cfg: &KnobCfg,
        setpoint: SetpointSource,
        display: Option<DisplayHandle>,
        clock: SharedClock,
    ) -> Self {
        Self {
            detector: Arc::new(Mutex::new(HoldDetector::new(cfg.preset_hold, cfg.debounce))),
            setpoint,
            display,
            clock,
        }
    }

    pub fn press(&self) {
        let now = self.clock.now();
        self.detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .press(now);
    }

    pub fn release(&self) -> Press {
        let now = self.clock.now();
        let press = self
            .detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(now);
        match press {
            Press::Long => self.store(),
            Press::Short => {
                let v = self.setpoint.recall_preset();
                tracing::info!(preset_mps = v, "preset recalled");
                self.post(format!("Preset recalled:\n{v:.2} m/s"));
            }
            Press::Ignored => {}
        }
        press
    }

    /// Check the hold threshold once. Returns true if the preset was stored.
    pub fn poll(&self) -> bool {
        let now = self.clock.now();
        let fired = self
            .detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .poll(now);
        if fired {
            self.store();
        }
        fired
    }

    /// Spawn the hold watcher thread. It stops when the returned guard drops.
    pub fn spawn_watcher(&self, poll: Duration) -> HoldWatcher {
        let button = self.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let join_handle = std::thread::spawn(move || {
            while !shutdown_clone.load(Ordering::Relaxed) {
                button.poll();
                std::thread::sleep(poll);
            }
        });
        HoldWatcher {
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    fn store(&self) {
        let v = self.setpoint.store_preset();
        tracing::info!(preset_mps = v, "preset stored; returning to rest");
        self.post(format!("Preset saved:\n{v:.2} m/s"));
    }

    fn post(&self, text: String) {
        if let Some(d) = &self.display {
            d.post_knob(DisplayMessage::new(text).with_duration(KNOB_MESSAGE_HOLD));
        }
    }
}

pub struct HoldWatcher {
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for HoldWatcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.join_handle.take()
            && h.join().is_err()
        {
            tracing::warn!("preset watcher thread panicked");
        }
    }
}
