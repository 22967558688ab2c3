//! Backend assembly and the run command: config mapping, rig wiring and the
//! session runner.

use std::sync::Arc;
use std::time::Duration;

use eyre::WrapErr;
use treadmill_config::Config;
use treadmill_core::builder::{DynMotor, Extras};
use treadmill_core::console::spawn_console;
use treadmill_core::{
    CsvRecorder, DisplayCfg, DisplayHandle, DisplayQueue, EncoderCfg, Gains, Interrupts, LoopCfg,
    QuadratureEncoder, RunMode, RunSummary, RunnerCfg, SafetyMonitor, SetpointSource,
    SharedClock, TrialSwitch, build_control_loop, runner,
};
use treadmill_traits::{MonotonicClock, SessionRecorder};

use crate::cli::ModeArg;
use crate::rt::{RtRequest, setup_rt_once};

#[cfg(all(feature = "hardware", target_os = "linux"))]
use pi as backend;
#[cfg(not(all(feature = "hardware", target_os = "linux")))]
use sim as backend;

pub const BACKEND: &str = backend::NAME;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub speed: Option<f64>,
    pub duration_s: Option<f64>,
    pub mode: Option<ModeArg>,
    pub console: bool,
    pub rt: Option<RtRequest>,
}

impl From<ModeArg> for RunMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Once => Self::Once,
            ModeArg::Service => Self::Service,
        }
    }
}

/// What a backend attaches to the loop. `guards` keeps interrupt
/// registrations and helper threads alive for the run.
struct Rig {
    motor: DynMotor,
    safety: SafetyMonitor,
    trial: Option<TrialSwitch>,
    guards: backend::Guards,
}

/// Shared state the operator inputs feed.
#[cfg_attr(not(all(feature = "hardware", target_os = "linux")), allow(dead_code))]
struct Operator {
    setpoint: SetpointSource,
    display: DisplayHandle,
    clock: SharedClock,
}

pub fn run_treadmill(cfg: &Config, opts: &RunOptions) -> eyre::Result<RunSummary> {
    if let Some(req) = opts.rt {
        setup_rt_once(req);
    }

    let clock: SharedClock = Arc::new(MonotonicClock::new());
    let knob: treadmill_core::KnobCfg = (&cfg.knob).into();
    let setpoint = SetpointSource::new(knob.coarse_step, knob.fine_step);

    let mut loop_cfg: LoopCfg = cfg.into();
    if let Some(secs) = opts.duration_s {
        if !(secs.is_finite() && secs > 0.0) {
            eyre::bail!("--duration-s must be a positive number of seconds");
        }
        loop_cfg.max_session = Some(Duration::from_secs_f64(secs));
    }
    let mut runner_cfg: RunnerCfg = (&cfg.runner).into();
    if let Some(mode) = opts.mode {
        runner_cfg.mode = mode.into();
    }

    let interrupts = Interrupts::new();
    {
        let interrupts = interrupts.clone();
        ctrlc::set_handler(move || {
            let n = interrupts.raise();
            tracing::warn!(count = n, "interrupt received");
        })
        .wrap_err("install Ctrl-C handler")?;
    }

    let display_cfg: DisplayCfg = (&cfg.display).into();
    let queue = DisplayQueue::spawn(backend::open_display(cfg)?, &display_cfg, clock.clone());

    let enc_cfg: EncoderCfg = (&cfg.encoder).into();
    let encoder = QuadratureEncoder::new(clock.clone(), enc_cfg.settle);
    let Rig {
        motor,
        safety,
        trial,
        guards,
    } = backend::attach(
        cfg,
        &encoder,
        &Operator {
            setpoint: setpoint.clone(),
            display: queue.handle(),
            clock: clock.clone(),
        },
    )?;

    if let Some(speed) = opts.speed {
        setpoint
            .command(speed)
            .map_err(eyre::Report::new)
            .wrap_err("--speed")?;
    }

    let recorder: Option<Box<dyn SessionRecorder + Send>> = if cfg.recording.always
        || trial.is_some()
    {
        tracing::info!(dir = %cfg.recording.dir, trial = trial.is_some(), "session recording enabled");
        Some(Box::new(CsvRecorder::new(&cfg.recording.dir)))
    } else {
        None
    };

    let gains: Gains = (&cfg.controller).into();
    let mut cl = build_control_loop(
        motor,
        encoder,
        gains,
        loop_cfg,
        safety,
        setpoint.clone(),
        Some(clock),
        Extras {
            display: Some(queue.handle()),
            recorder,
            trial,
            interrupts: Some(interrupts),
        },
    )?;

    if opts.console {
        // Detached: a blocked stdin read must not hold up shutdown.
        drop(spawn_console(setpoint));
    }

    tracing::info!(backend = BACKEND, mode = ?runner_cfg.mode, "controller ready");
    let summary = runner::run(&mut cl, &runner_cfg);
    // Release the actuator before tearing down inputs and the display.
    drop(cl);
    drop(guards);
    drop(queue);
    summary
}

/// Probe the configured backend without running the motor.
pub fn self_check(cfg: &Config) -> eyre::Result<()> {
    backend::probe(cfg)
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
mod sim {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use eyre::WrapErr;
    use treadmill_config::Config;
    use treadmill_core::{BeamLatch, QuadratureEncoder, SafetyMonitor};
    use treadmill_hardware::{LogDisplay, SimCfg, SimMotor};
    use treadmill_traits::DisplayDriver;

    use super::{Operator, Rig};

    pub const NAME: &str = "sim";

    pub struct Guards;

    pub fn open_display(_cfg: &Config) -> eyre::Result<Box<dyn DisplayDriver + Send>> {
        Ok(Box::new(LogDisplay::new()))
    }

    fn env_ms(key: &str) -> eyre::Result<Option<Duration>> {
        match std::env::var(key) {
            Ok(v) => {
                let ms: u64 = v.trim().parse().wrap_err_with(|| format!("{key}={v}"))?;
                Ok(Some(Duration::from_millis(ms)))
            }
            Err(_) => Ok(None),
        }
    }

    fn after(delay: Duration, what: &'static str, f: impl FnOnce() + Send + 'static) {
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            tracing::warn!(?delay, "injecting simulated {what}");
            f();
        });
    }

    pub fn attach(cfg: &Config, encoder: &QuadratureEncoder, _op: &Operator) -> eyre::Result<Rig> {
        let motor = SimMotor::spawn(
            encoder.handle(),
            SimCfg {
                max_command: cfg.motor.max_command,
                ..SimCfg::default()
            },
        );

        let beam = Arc::new(AtomicBool::new(false));
        let latch = BeamLatch::new();
        let safety = SafetyMonitor::new(cfg.motor.driver_id, cfg.pins.beam)
            .with_beam_latch(latch.clone())
            .with_beam_reader({
                let beam = beam.clone();
                move || beam.load(Ordering::Acquire)
            });

        if let Some(delay) = env_ms("TREADMILL_SIM_FAULT_AFTER_MS")? {
            let faults = motor.faults();
            after(delay, "driver fault", move || faults.set_driver_fault(true));
        }
        if let Some(delay) = env_ms("TREADMILL_SIM_BEAM_AFTER_MS")? {
            after(delay, "beam break", move || {
                beam.store(true, Ordering::Release);
                latch.trip();
            });
        }

        Ok(Rig {
            motor: Box::new(motor),
            safety,
            trial: None,
            guards: Guards,
        })
    }

    pub fn probe(_cfg: &Config) -> eyre::Result<()> {
        tracing::info!("sim backend needs no hardware");
        Ok(())
    }
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
mod pi {
    use std::sync::{Arc, Mutex, PoisonError};

    use eyre::WrapErr;
    use treadmill_config::Config;
    use treadmill_core::knob::{Debounce, HoldWatcher, Knob, KnobPin, PresetButton};
    use treadmill_core::{
        BeamLatch, KnobCfg, QuadratureEncoder, SafetyMonitor, StartStopLatch, TrialSwitch,
    };
    use treadmill_hardware::{
        BeamInput, Gpio, Hd44780, InputPin, LcdPins, Tb9051, Tb9051Pins, Trigger, watch,
        wire_beam, wire_encoder,
    };
    use treadmill_traits::{Clock, DisplayDriver};

    use super::{Operator, Rig};

    pub const NAME: &str = "raspberry-pi";

    pub struct Guards {
        _pins: Vec<InputPin>,
        _beam: BeamInput,
        _hold: HoldWatcher,
    }

    fn lcd_pins(cfg: &Config) -> LcdPins {
        let p = &cfg.pins;
        LcdPins {
            rs: p.lcd_rs,
            en: p.lcd_en,
            d4: p.lcd_d4,
            d5: p.lcd_d5,
            d6: p.lcd_d6,
            d7: p.lcd_d7,
        }
    }

    fn motor_pins(cfg: &Config) -> Tb9051Pins {
        let p = &cfg.pins;
        Tb9051Pins {
            pwm1: p.motor_pwm1,
            pwm2: p.motor_pwm2,
            en: p.motor_en,
            enb: p.motor_enb,
            diag: p.motor_diag,
        }
    }

    pub fn open_display(cfg: &Config) -> eyre::Result<Box<dyn DisplayDriver + Send>> {
        let gpio = Gpio::new().wrap_err("open gpio")?;
        let lcd = Hd44780::new(&gpio, lcd_pins(cfg)).wrap_err("open lcd")?;
        Ok(Box::new(lcd))
    }

    pub fn attach(cfg: &Config, encoder: &QuadratureEncoder, op: &Operator) -> eyre::Result<Rig> {
        let gpio = Gpio::new().wrap_err("open gpio")?;
        let p = &cfg.pins;
        let motor = Tb9051::new(&gpio, motor_pins(cfg), cfg.motor.max_command, cfg.motor.pwm_hz)
            .wrap_err("open motor driver")?;

        let mut pins: Vec<InputPin> = wire_encoder(&gpio, p.encoder_a, p.encoder_b, encoder.handle())
            .wrap_err("wire encoder")?
            .into();

        let latch = BeamLatch::new();
        let beam = {
            let latch = latch.clone();
            wire_beam(&gpio, p.beam, move || latch.trip()).wrap_err("wire beam")?
        };

        let knob_cfg: KnobCfg = (&cfg.knob).into();

        let start_stop = StartStopLatch::new(false);
        {
            let start_stop = start_stop.clone();
            let clock = op.clock.clone();
            let mut gate = Debounce::new(knob_cfg.debounce);
            pins.push(watch(&gpio, p.start_stop, Trigger::FallingEdge, move |_| {
                if gate.accept(clock.now()) {
                    let running = start_stop.toggle();
                    tracing::info!(running, "start/stop pressed");
                }
            })?);
        }

        let trial = TrialSwitch::new();
        {
            let trial = trial.clone();
            let clock = op.clock.clone();
            let mut gate = Debounce::new(knob_cfg.debounce);
            pins.push(watch(&gpio, p.trial, Trigger::FallingEdge, move |_| {
                if gate.accept(clock.now()) {
                    let on = trial.toggle();
                    tracing::info!(on, "trial switch pressed");
                }
            })?);
        }

        let knob = Arc::new(Mutex::new(Knob::new(
            &knob_cfg,
            op.setpoint.clone(),
            Some(op.display.clone()),
            op.clock.clone(),
        )));
        for (pin, which) in [(p.knob_clk, KnobPin::Clk), (p.knob_dt, KnobPin::Dt)] {
            let knob = knob.clone();
            pins.push(watch(&gpio, pin, Trigger::Both, move |level| {
                knob.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_edge(which, level);
            })?);
        }
        pins.push(watch(&gpio, p.knob_sw, Trigger::FallingEdge, move |_| {
            knob.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_switch();
        })?);

        let preset = PresetButton::new(
            &knob_cfg,
            op.setpoint.clone(),
            Some(op.display.clone()),
            op.clock.clone(),
        );
        let hold = preset.spawn_watcher(knob_cfg.hold_poll);
        pins.push(watch(&gpio, p.preset, Trigger::Both, move |level| {
            if level {
                preset.release();
            } else {
                preset.press();
            }
        })?);

        let safety = SafetyMonitor::new(cfg.motor.driver_id, p.beam)
            .with_beam_latch(latch)
            .with_start_stop(start_stop)
            .with_beam_reader({
                let beam = beam.clone();
                move || beam.is_broken()
            });

        tracing::info!(pins = pins.len(), "rig inputs armed");
        Ok(Rig {
            motor: Box::new(motor),
            safety,
            trial: Some(trial),
            guards: Guards {
                _pins: pins,
                _beam: beam,
                _hold: hold,
            },
        })
    }

    pub fn probe(cfg: &Config) -> eyre::Result<()> {
        let gpio = Gpio::new().wrap_err("open gpio")?;
        let p = &cfg.pins;
        for (name, pin) in [
            ("beam", p.beam),
            ("motor_diag", p.motor_diag),
            ("encoder_a", p.encoder_a),
            ("encoder_b", p.encoder_b),
        ] {
            let level = gpio.get(pin).wrap_err_with(|| format!("pins.{name}"))?.read();
            tracing::info!(name, pin, ?level, "pin readable");
        }
        treadmill_hardware::tb9051::pwm_channel(p.motor_pwm1).wrap_err("pins.motor_pwm1")?;
        treadmill_hardware::tb9051::pwm_channel(p.motor_pwm2).wrap_err("pins.motor_pwm2")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_arg_maps_to_run_mode() {
        assert_eq!(RunMode::from(ModeArg::Once), RunMode::Once);
        assert_eq!(RunMode::from(ModeArg::Service), RunMode::Service);
    }

    #[test]
    fn rejects_non_positive_duration() {
        let opts = RunOptions {
            duration_s: Some(0.0),
            ..RunOptions::default()
        };
        let err = run_treadmill(&Config::default(), &opts).unwrap_err();
        assert!(err.to_string().contains("--duration-s"));
    }
}
