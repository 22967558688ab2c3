use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rstest::rstest;
use treadmill_core::builder::Extras;
use treadmill_core::runner::{self, RunMode, RunnerCfg};
use treadmill_core::{
    BeamLatch, ControlLoop, FaultKind, Gains, Interrupts, LoopCfg, LoopState, LoopStatus,
    SafetyMonitor, SetpointSource, StartStopLatch, StopCause, TrialSwitch, VelocitySource,
    build_control_loop,
};
use treadmill_traits::clock::test_clock::TestClock;
use treadmill_traits::{BoxError, Clock, MotorActuator, SessionRecorder};

const TICK: Duration = Duration::from_millis(100);
const DRIVER: FaultKind = FaultKind::DriverFault { driver_id: 1 };
const BEAM: FaultKind = FaultKind::BeamBroken { pin: 21 };

type Event = Box<dyn FnOnce() + Send>;

/// Test clock that fires scheduled actions as simulated time passes.
#[derive(Clone)]
struct ScriptClock {
    inner: TestClock,
    events: Arc<Mutex<Vec<(Duration, Event)>>>,
}

impl ScriptClock {
    fn new() -> Self {
        Self {
            inner: TestClock::new(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn at(&self, t: Duration, f: impl FnOnce() + Send + 'static) {
        self.events.lock().unwrap().push((t, Box::new(f)));
    }

    fn after(&self, d: Duration, f: impl FnOnce() + Send + 'static) {
        self.at(self.elapsed() + d, f);
    }

    fn elapsed(&self) -> Duration {
        self.inner.elapsed()
    }
}

impl Clock for ScriptClock {
    fn now(&self) -> Instant {
        self.inner.now()
    }

    fn sleep(&self, d: Duration) {
        self.inner.advance(d);
        let now = self.inner.elapsed();
        let due: Vec<Event> = {
            let mut events = self.events.lock().unwrap();
            let (due, keep): (Vec<_>, Vec<_>) =
                events.drain(..).partition(|(t, _)| *t <= now);
            *events = keep;
            due.into_iter().map(|(_, f)| f).collect()
        };
        for f in due {
            f();
        }
    }
}

#[derive(Clone, Default)]
struct SpyMotor {
    last: Arc<Mutex<f64>>,
    fault: Arc<AtomicBool>,
    stops: Arc<AtomicUsize>,
}

impl MotorActuator for SpyMotor {
    fn set_speed(&mut self, signal: f64) -> Result<(), BoxError> {
        *self.last.lock().unwrap() = signal;
        Ok(())
    }
    fn get_fault(&self) -> Result<bool, BoxError> {
        Ok(self.fault.load(Ordering::SeqCst))
    }
    fn force_stop(&mut self) -> Result<(), BoxError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = 0.0;
        Ok(())
    }
}

/// Plant that settles instantly on the last command, one tick per read.
struct Follower {
    clock: ScriptClock,
    last: Arc<Mutex<f64>>,
}

impl VelocitySource for Follower {
    fn measure_rpm(&mut self) -> f64 {
        self.clock.sleep(TICK);
        *self.last.lock().unwrap()
    }
}

#[derive(Clone, Default)]
struct SpyRecorder {
    log: Arc<Mutex<Vec<String>>>,
}

impl SessionRecorder for SpyRecorder {
    fn create_session(&mut self) -> Result<(), BoxError> {
        self.log.lock().unwrap().push("create".into());
        Ok(())
    }
    fn record(&mut self, _elapsed_s: f64, desired_mps: f64, _actual: f64) -> Result<(), BoxError> {
        self.log.lock().unwrap().push(format!("row {desired_mps:.2}"));
        Ok(())
    }
    fn close(&mut self) -> Result<(), BoxError> {
        self.log.lock().unwrap().push("close".into());
        Ok(())
    }
}

struct Rig {
    cl: ControlLoop<SpyMotor, Follower>,
    motor: SpyMotor,
    clock: ScriptClock,
    setpoint: SetpointSource,
    beam: BeamLatch,
    interrupts: Interrupts,
}

fn rig_with(cfg: LoopCfg, start: Option<StartStopLatch>, mut extras: Extras) -> Rig {
    let clock = ScriptClock::new();
    let motor = SpyMotor::default();
    let sensor = Follower {
        clock: clock.clone(),
        last: motor.last.clone(),
    };
    let beam = BeamLatch::new();
    let mut safety = SafetyMonitor::new(1, 21).with_beam_latch(beam.clone());
    if let Some(latch) = start {
        safety = safety.with_start_stop(latch);
    }
    let setpoint = SetpointSource::default();
    let interrupts = Interrupts::new();
    extras.interrupts = Some(interrupts.clone());
    let cl = build_control_loop(
        motor.clone(),
        sensor,
        Gains::default(),
        cfg,
        safety,
        setpoint.clone(),
        Some(Arc::new(clock.clone())),
        extras,
    )
    .expect("build");
    Rig {
        cl,
        motor,
        clock,
        setpoint,
        beam,
        interrupts,
    }
}

fn rig() -> Rig {
    rig_with(LoopCfg::default(), None, Extras::default())
}

fn step_until_halt(cl: &mut ControlLoop<SpyMotor, Follower>, max_steps: usize) -> StopCause {
    for _ in 0..max_steps {
        match cl.step().unwrap_or_else(|e| panic!("step: {e}")) {
            LoopStatus::Running => {}
            LoopStatus::Halting(cause) => return cause,
        }
    }
    panic!("no halt within {max_steps} steps");
}

#[test]
fn setpoint_change_ramps_for_the_configured_time() {
    let mut r = rig();
    r.setpoint.command(1.0).expect("valid speed");
    r.cl.start().expect("start");
    let t0 = r.clock.elapsed();
    assert_eq!(r.cl.step().expect("step"), LoopStatus::Running);
    let took = r.clock.elapsed() - t0;
    assert!(took >= Duration::from_secs(5), "{took:?}");
    assert!(took <= Duration::from_secs(5) + 3 * TICK, "{took:?}");
    assert!(r.setpoint.take_changed().is_none());
}

#[rstest]
#[case(0.0)]
#[case(-0.0)]
fn zero_desired_commands_zero(#[case] mps: f64) {
    let mut r = rig();
    r.setpoint.command(mps).expect("valid speed");
    r.cl.start().expect("start");
    for _ in 0..3 {
        assert_eq!(r.cl.step().expect("step"), LoopStatus::Running);
    }
    assert!(r.motor.last.lock().unwrap().abs() < f64::EPSILON);
}

#[test]
fn driver_fault_halts_on_next_step_and_releases_once() {
    let mut r = rig();
    r.cl.start().expect("start");
    let fault = r.motor.fault.clone();
    r.clock
        .after(Duration::from_millis(350), move || fault.store(true, Ordering::SeqCst));

    for _ in 0..20 {
        let asserted = r.motor.fault.load(Ordering::SeqCst);
        let status = r.cl.step().unwrap_or_else(|e| panic!("step: {e}"));
        if asserted {
            assert_eq!(status, LoopStatus::Halting(StopCause::Fault(DRIVER)));
            break;
        }
        assert_eq!(status, LoopStatus::Running);
    }
    assert_eq!(r.cl.state(), LoopState::RampingDown(StopCause::Fault(DRIVER)));

    let report = r.cl.wind_down().expect("wind down");
    assert_eq!(report.final_state, LoopState::Faulted(DRIVER));
    assert_eq!(report.hard_stop, None);
    assert_eq!(r.motor.stops.load(Ordering::SeqCst), 1);

    let stops = r.motor.stops.clone();
    drop(r);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[test]
fn brief_beam_break_is_latched() {
    let live = Arc::new(AtomicBool::new(false));
    let mut r = {
        let clock = ScriptClock::new();
        let motor = SpyMotor::default();
        let beam = BeamLatch::new();
        let reader = live.clone();
        let safety = SafetyMonitor::new(1, 21)
            .with_beam_latch(beam.clone())
            .with_beam_reader(move || reader.load(Ordering::SeqCst));
        let setpoint = SetpointSource::default();
        let cl = build_control_loop(
            motor.clone(),
            Follower {
                clock: clock.clone(),
                last: motor.last.clone(),
            },
            Gains::default(),
            LoopCfg::default(),
            safety,
            setpoint.clone(),
            Some(Arc::new(clock.clone())),
            Extras::default(),
        )
        .expect("build");
        Rig {
            cl,
            motor,
            clock,
            setpoint,
            beam,
            interrupts: Interrupts::new(),
        }
    };
    r.cl.start().expect("start");

    // Broken for 50 ms, well inside one loop tick.
    let (on, latch) = (live.clone(), r.beam.clone());
    r.clock.at(Duration::from_millis(450), move || {
        on.store(true, Ordering::SeqCst);
        latch.trip();
    });
    let off = live.clone();
    r.clock
        .at(Duration::from_millis(500), move || off.store(false, Ordering::SeqCst));

    let cause = step_until_halt(&mut r.cl, 20);
    assert_eq!(cause, StopCause::Fault(BEAM));
    assert!(!live.load(Ordering::SeqCst));

    let report = r.cl.wind_down().expect("wind down");
    assert_eq!(report.final_state, LoopState::Faulted(BEAM));
    assert!(r.cl.reset_for_restart().is_err());
    assert!(r.cl.start().is_err());
}

#[test]
fn second_interrupt_during_ramp_down_is_a_hard_stop() {
    let mut r = rig();
    r.cl.start().expect("start");
    r.interrupts.raise();
    assert_eq!(step_until_halt(&mut r.cl, 1), StopCause::Interrupted);

    let again = r.interrupts.clone();
    r.clock.after(Duration::from_millis(500), move || {
        again.raise();
    });
    let t0 = r.clock.elapsed();
    let report = r.cl.wind_down().expect("wind down");
    assert!(r.clock.elapsed() - t0 < Duration::from_secs(2));
    assert_eq!(report.hard_stop, Some(StopCause::Interrupted));
    assert_eq!(report.final_state, LoopState::Stopped(StopCause::Interrupted));
    assert_eq!(r.motor.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn persisting_fault_does_not_abort_its_own_ramp_down() {
    let mut r = rig();
    r.cl.start().expect("start");
    r.beam.trip();
    assert_eq!(step_until_halt(&mut r.cl, 1), StopCause::Fault(BEAM));
    let t0 = r.clock.elapsed();
    let report = r.cl.wind_down().expect("wind down");
    assert!(r.clock.elapsed() - t0 >= Duration::from_secs(2));
    assert_eq!(report.hard_stop, None);
}

#[test]
fn second_fault_during_ramp_down_hard_stops_but_keeps_first_cause() {
    let mut r = rig();
    r.cl.start().expect("start");
    r.beam.trip();
    assert_eq!(step_until_halt(&mut r.cl, 1), StopCause::Fault(BEAM));

    let fault = r.motor.fault.clone();
    r.clock
        .after(Duration::from_millis(300), move || fault.store(true, Ordering::SeqCst));
    let report = r.cl.wind_down().expect("wind down");
    assert_eq!(report.cause, StopCause::Fault(BEAM));
    assert_eq!(report.hard_stop, Some(StopCause::Fault(DRIVER)));
    assert_eq!(report.final_state, LoopState::Faulted(BEAM));
    assert_eq!(r.motor.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn session_time_limit_is_a_soft_stop() {
    let cfg = LoopCfg {
        max_session: Some(Duration::from_secs(1)),
        ..LoopCfg::default()
    };
    let mut r = rig_with(cfg, None, Extras::default());
    let report = r.cl.run_session().expect("session");
    assert_eq!(report.cause, StopCause::TimeLimit);
    assert_eq!(report.final_state, LoopState::Stopped(StopCause::TimeLimit));
    assert!(report.iterations >= 9 && report.iterations <= 11, "{}", report.iterations);
}

#[test]
fn release_is_idempotent() {
    let mut r = rig();
    r.cl.start().expect("start");
    r.cl.release();
    r.cl.release();
    assert!(r.cl.is_released());
    let stops = r.motor.stops.clone();
    drop(r);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[test]
fn step_outside_running_is_an_error() {
    let mut r = rig();
    assert!(r.cl.step().is_err());
    assert!(r.cl.wind_down().is_err());
}

#[test]
fn trial_switch_brackets_a_recording() {
    let rec = SpyRecorder::default();
    let trial = TrialSwitch::new();
    let extras = Extras {
        recorder: Some(Box::new(rec.clone())),
        trial: Some(trial.clone()),
        ..Extras::default()
    };
    let mut r = rig_with(LoopCfg::default(), None, extras);
    r.setpoint.command(0.5).expect("valid speed");
    r.cl.start().expect("start");
    assert!(rec.log.lock().unwrap().is_empty());

    trial.set(true);
    assert_eq!(r.cl.step().expect("step"), LoopStatus::Running);
    assert_eq!(r.cl.step().expect("step"), LoopStatus::Running);

    trial.set(false);
    assert_eq!(r.cl.step().expect("step"), LoopStatus::Running);
    assert!(r.setpoint.snapshot().desired_mps.abs() < f64::EPSILON);

    let log = rec.log.lock().unwrap().clone();
    assert_eq!(log.first().map(String::as_str), Some("create"));
    assert_eq!(log.last().map(String::as_str), Some("close"));
    assert!(log.iter().any(|l| l == "row 0.50"));
    assert!(log.iter().any(|l| l == "row 0.00"));

    // Nothing more is recorded once the trial is closed.
    assert_eq!(r.cl.step().expect("step"), LoopStatus::Running);
    assert_eq!(rec.log.lock().unwrap().len(), log.len());
}

#[test]
fn recorder_without_trial_switch_records_whole_session() {
    let rec = SpyRecorder::default();
    let extras = Extras {
        recorder: Some(Box::new(rec.clone())),
        ..Extras::default()
    };
    let mut r = rig_with(LoopCfg::default(), None, extras);
    r.cl.start().expect("start");
    r.cl.step().expect("step");
    r.interrupts.raise();
    step_until_halt(&mut r.cl, 1);
    r.cl.wind_down().expect("wind down");
    let log = rec.log.lock().unwrap();
    assert_eq!(log.first().map(String::as_str), Some("create"));
    assert_eq!(log.last().map(String::as_str), Some("close"));
}

#[rstest]
#[case(RunMode::Once, 1)]
#[case(RunMode::Service, 2)]
fn runner_restarts_after_operator_stop_only_in_service_mode(
    #[case] mode: RunMode,
    #[case] sessions: u32,
) {
    let latch = StartStopLatch::new(true);
    let mut r = rig_with(LoopCfg::default(), Some(latch.clone()), Extras::default());

    let stop = latch.clone();
    r.clock
        .at(Duration::from_secs(1), move || stop.set(false));
    let start = latch.clone();
    r.clock.at(Duration::from_secs(5), move || start.set(true));
    let interrupts = r.interrupts.clone();
    r.clock.at(Duration::from_secs(6), move || {
        interrupts.raise();
    });

    let cfg = RunnerCfg {
        mode,
        ..RunnerCfg::default()
    };
    let summary = runner::run(&mut r.cl, &cfg).expect("run");
    assert_eq!(summary.sessions, sessions);
    let last = summary.last.expect("a session ran");
    match mode {
        RunMode::Once => {
            assert_eq!(last.final_state, LoopState::Stopped(StopCause::Fault(FaultKind::UserStopped)));
        }
        RunMode::Service => {
            assert_eq!(last.final_state, LoopState::Stopped(StopCause::Interrupted));
            assert!(r.clock.elapsed() >= Duration::from_secs(6));
        }
    }
    assert_eq!(r.motor.stops.load(Ordering::SeqCst), sessions as usize);
}

#[test]
fn runner_ends_on_fault_in_service_mode() {
    let mut r = rig_with(LoopCfg::default(), Some(StartStopLatch::new(true)), Extras::default());
    let fault = r.motor.fault.clone();
    r.clock
        .at(Duration::from_millis(700), move || fault.store(true, Ordering::SeqCst));
    let cfg = RunnerCfg {
        mode: RunMode::Service,
        ..RunnerCfg::default()
    };
    let summary = runner::run(&mut r.cl, &cfg).expect("run");
    assert_eq!(summary.sessions, 1);
    assert_eq!(
        summary.last.map(|l| l.final_state),
        Some(LoopState::Faulted(DRIVER))
    );
}

#[test]
fn interrupt_while_idle_starts_nothing() {
    let mut r = rig_with(LoopCfg::default(), Some(StartStopLatch::new(false)), Extras::default());
    r.interrupts.raise();
    let summary = runner::run(&mut r.cl, &RunnerCfg::default()).expect("run");
    assert_eq!(summary.sessions, 0);
    assert!(summary.last.is_none());
}
