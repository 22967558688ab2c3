//! Interrupt wiring for the rig's digital inputs.
//!
//! Pins keep their interrupt registration for as long as the returned
//! `InputPin` lives; callers hold them for the lifetime of the session.

use std::sync::{Arc, Mutex, PoisonError};

use rppal::gpio::{Gpio, InputPin, Level, Trigger};
use treadmill_traits::{Channel, EdgeSink};

use crate::error::Result;

/// Register `on_level` for edges on `pin` (pulled up).
pub fn watch<F>(gpio: &Gpio, pin: u8, trigger: Trigger, mut on_level: F) -> Result<InputPin>
where
    F: FnMut(bool) + Send + 'static,
{
    let mut input = gpio.get(pin)?.into_input_pullup();
    input.set_async_interrupt(trigger, move |level: Level| on_level(level == Level::High))?;
    tracing::debug!(pin, ?trigger, "gpio interrupt armed");
    Ok(input)
}

/// Feed both encoder channels into `sink`, seeded with the levels the pins
/// read once both interrupts are armed.
pub fn wire_encoder<S>(gpio: &Gpio, pin_a: u8, pin_b: u8, sink: S) -> Result<[InputPin; 2]>
where
    S: EdgeSink + 'static,
{
    let sink = Arc::new(sink);
    let sink_a = Arc::clone(&sink);
    let sink_b = Arc::clone(&sink);
    let a = watch(gpio, pin_a, Trigger::Both, move |lvl| sink_a.on_edge(Channel::A, lvl))?;
    let b = watch(gpio, pin_b, Trigger::Both, move |lvl| sink_b.on_edge(Channel::B, lvl))?;
    let (level_a, level_b) = (a.is_high(), b.is_high());
    sink.set_levels(level_a, level_b);
    tracing::debug!(level_a, level_b, "encoder levels seeded");
    Ok([a, b])
}

/// Break-beam receiver. The line reads LOW while the beam is interrupted.
#[derive(Clone)]
pub struct BeamInput {
    pin: Arc<Mutex<InputPin>>,
}

impl core::fmt::Debug for BeamInput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BeamInput")
            .field("broken", &self.is_broken())
            .finish()
    }
}

impl BeamInput {
    pub fn is_broken(&self) -> bool {
        self.pin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_low()
    }
}

/// Arm the beam pin; `on_break` runs on every falling edge.
pub fn wire_beam<F>(gpio: &Gpio, pin: u8, mut on_break: F) -> Result<BeamInput>
where
    F: FnMut() + Send + 'static,
{
    let input = watch(gpio, pin, Trigger::FallingEdge, move |_| on_break())?;
    Ok(BeamInput {
        pin: Arc::new(Mutex::new(input)),
    })
}
