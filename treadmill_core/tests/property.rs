use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use treadmill_core::controller::{RampResult, RampSupervisor, RampTick};
use treadmill_core::{Gains, QuadratureEncoder, StopCause, VelocityController, VelocitySource};
use treadmill_traits::clock::test_clock::TestClock;
use treadmill_traits::{BoxError, Channel, Clock, EdgeSink, MotorActuator};

const TICK: Duration = Duration::from_millis(100);

struct NullMotor;
impl MotorActuator for NullMotor {
    fn set_speed(&mut self, _signal: f64) -> Result<(), BoxError> {
        Ok(())
    }
    fn get_fault(&self) -> Result<bool, BoxError> {
        Ok(false)
    }
    fn force_stop(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

struct Constant {
    rpm: f64,
    clock: TestClock,
}
impl VelocitySource for Constant {
    fn measure_rpm(&mut self) -> f64 {
        self.clock.sleep(TICK);
        self.rpm
    }
}

#[derive(Default)]
struct Trace {
    ticks: Vec<RampTick>,
}
impl RampSupervisor for Trace {
    fn check(&mut self, _motor: &dyn MotorActuator) -> Result<(), StopCause> {
        Ok(())
    }
    fn on_tick(&mut self, tick: &RampTick) {
        self.ticks.push(*tick);
    }
}

const FORWARD: [(Channel, bool); 4] = [
    (Channel::A, true),
    (Channel::B, true),
    (Channel::A, false),
    (Channel::B, false),
];
const REVERSE: [(Channel, bool); 4] = [
    (Channel::B, true),
    (Channel::A, true),
    (Channel::B, false),
    (Channel::A, false),
];

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        .. ProptestConfig::default()
    })]

    /// Ramp values move monotonically from start to target and the ramp ends
    /// no later than one tick after its nominal length.
    #[test]
    fn ramp_is_monotonic_and_bounded(
        start in -800.0f64..800.0,
        target in -800.0f64..800.0,
        ramp_ms in 100u64..6_000,
    ) {
        let clock = TestClock::new();
        let mut c = VelocityController::new(
            NullMotor,
            Constant { rpm: start, clock: clock.clone() },
            Arc::new(clock.clone()),
            Gains::default(),
        );
        let ramp = Duration::from_millis(ramp_ms);
        let mut trace = Trace::default();
        let t0 = clock.elapsed();
        let res = c.change_velocity(ramp, target, &mut trace).expect("ramp");
        prop_assert!(matches!(res, RampResult::Completed(_)));

        let took = clock.elapsed() - t0;
        // One settle before the ramp clock starts, one after the last tick.
        prop_assert!(took <= ramp + 2 * TICK, "took {:?} for {:?}", took, ramp);

        let lo = start.min(target) - 1e-9;
        let hi = start.max(target) + 1e-9;
        for w in trace.ticks.windows(2) {
            let (a, b) = (w[0].ramp_rpm, w[1].ramp_rpm);
            if target >= start {
                prop_assert!(b >= a - 1e-9);
            } else {
                prop_assert!(b <= a + 1e-9);
            }
        }
        for t in &trace.ticks {
            prop_assert!(t.ramp_rpm >= lo && t.ramp_rpm <= hi);
            prop_assert!(t.elapsed_s <= ramp.as_secs_f64() + 1e-9);
        }
    }

    /// Net position equals forward minus reverse quarter-steps, regardless of
    /// how the two directions interleave.
    #[test]
    fn encoder_position_tracks_net_steps(moves in prop::collection::vec(any::<bool>(), 0..64)) {
        let enc = QuadratureEncoder::new(Arc::new(TestClock::new()), TICK);
        let sink = enc.handle();
        let mut expected = 0i64;
        for forward in moves {
            let cycle = if forward { FORWARD } else { REVERSE };
            for (ch, level) in cycle {
                sink.on_edge(ch, level);
            }
            expected += if forward { 4 } else { -4 };
        }
        prop_assert_eq!(enc.position(), expected);
    }

    /// Under steady forward motion the position never decreases.
    #[test]
    fn forward_motion_is_monotonic(cycles in 1usize..50) {
        let enc = QuadratureEncoder::new(Arc::new(TestClock::new()), TICK);
        let mut last = enc.position();
        for _ in 0..cycles {
            for (ch, level) in FORWARD {
                enc.on_edge(ch, level);
                let p = enc.position();
                prop_assert!(p >= last);
                last = p;
            }
        }
        prop_assert_eq!(last, i64::try_from(cycles * 4).unwrap_or(i64::MAX));
    }
}
