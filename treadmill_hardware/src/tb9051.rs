//! TB9051FTG H-bridge driven from the hardware PWM block.
//!
//! PWM1 carries forward duty, PWM2 reverse duty. EN high with ENB low enables
//! the bridge; DIAG is pulled low by the driver on a fault.

use rppal::gpio::{Gpio, InputPin, OutputPin};
use rppal::pwm::{Channel as PwmChannel, Polarity, Pwm};
use tracing::{debug, info};
use treadmill_traits::{BoxError, MotorActuator};

use crate::error::{HwError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tb9051Pins {
    pub pwm1: u8,
    pub pwm2: u8,
    pub en: u8,
    pub enb: u8,
    pub diag: u8,
}

/// Map a BCM pin to the PWM channel it is muxed onto.
pub fn pwm_channel(pin: u8) -> Result<PwmChannel> {
    match pin {
        12 | 18 => Ok(PwmChannel::Pwm0),
        13 | 19 => Ok(PwmChannel::Pwm1),
        other => Err(HwError::Pwm(format!("pin {other} has no hardware PWM"))),
    }
}

pub struct Tb9051 {
    forward: Pwm,
    reverse: Pwm,
    en: OutputPin,
    enb: OutputPin,
    diag: InputPin,
    max_command: f64,
    enabled: bool,
}

impl core::fmt::Debug for Tb9051 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tb9051")
            .field("max_command", &self.max_command)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl Tb9051 {
    pub fn new(gpio: &Gpio, pins: Tb9051Pins, max_command: f64, pwm_hz: f64) -> Result<Self> {
        let fwd_ch = pwm_channel(pins.pwm1)?;
        let rev_ch = pwm_channel(pins.pwm2)?;
        if fwd_ch == rev_ch {
            return Err(HwError::Pwm(format!(
                "pins {} and {} share a PWM channel",
                pins.pwm1, pins.pwm2
            )));
        }
        let forward = Pwm::with_frequency(fwd_ch, pwm_hz, 0.0, Polarity::Normal, true)?;
        let reverse = Pwm::with_frequency(rev_ch, pwm_hz, 0.0, Polarity::Normal, true)?;
        let mut en = gpio.get(pins.en)?.into_output();
        let mut enb = gpio.get(pins.enb)?.into_output();
        // Start disabled; the first command enables.
        en.set_low();
        enb.set_high();
        let diag = gpio.get(pins.diag)?.into_input_pullup();
        info!(?pins, pwm_hz, "tb9051 ready");
        Ok(Self {
            forward,
            reverse,
            en,
            enb,
            diag,
            max_command,
            enabled: false,
        })
    }

    fn enable(&mut self) {
        if !self.enabled {
            self.en.set_high();
            self.enb.set_low();
            self.enabled = true;
            debug!("tb9051 enabled");
        }
    }

    fn disable(&mut self) {
        self.en.set_low();
        self.enb.set_high();
        if self.enabled {
            self.enabled = false;
            info!("tb9051 disabled");
        }
    }
}

impl MotorActuator for Tb9051 {
    fn set_speed(&mut self, signal: f64) -> std::result::Result<(), BoxError> {
        let clamped = signal.clamp(-self.max_command, self.max_command);
        let duty = (clamped.abs() / self.max_command).clamp(0.0, 1.0);
        self.enable();
        let (on, off) = if clamped >= 0.0 {
            (&self.forward, &self.reverse)
        } else {
            (&self.reverse, &self.forward)
        };
        off.set_duty_cycle(0.0).map_err(HwError::from)?;
        on.set_duty_cycle(duty).map_err(HwError::from)?;
        Ok(())
    }

    fn get_fault(&self) -> std::result::Result<bool, BoxError> {
        Ok(self.diag.is_low())
    }

    fn force_stop(&mut self) -> std::result::Result<(), BoxError> {
        let fwd = self.forward.set_duty_cycle(0.0);
        let rev = self.reverse.set_duty_cycle(0.0);
        self.disable();
        fwd.map_err(HwError::from)?;
        rev.map_err(HwError::from)?;
        Ok(())
    }
}

impl Drop for Tb9051 {
    fn drop(&mut self) {
        let _ = self.force_stop();
        let _ = self.forward.disable();
        let _ = self.reverse.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(12, PwmChannel::Pwm0)]
    #[case(18, PwmChannel::Pwm0)]
    #[case(13, PwmChannel::Pwm1)]
    #[case(19, PwmChannel::Pwm1)]
    fn pwm_capable_pins_map(#[case] pin: u8, #[case] ch: PwmChannel) {
        assert_eq!(pwm_channel(pin).unwrap(), ch);
    }

    #[test]
    fn plain_gpio_pin_is_rejected() {
        assert!(matches!(pwm_channel(4), Err(HwError::Pwm(_))));
    }
}
