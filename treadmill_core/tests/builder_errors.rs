use std::time::Duration;

use treadmill_core::error::BuildError;
use treadmill_core::{Gains, LoopCfg, Treadmill, VelocitySource};
use treadmill_traits::{BoxError, MotorActuator};
use rstest::rstest;

struct Idle;
impl MotorActuator for Idle {
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

struct Still;
impl VelocitySource for Still {
    fn measure_rpm(&mut self) -> f64 {
        0.0
    }
}

#[rstest]
#[case(Gains { kp: f64::NAN, ki: 0.0, kd: 0.0 }, LoopCfg::default())]
#[case(Gains::default(), LoopCfg { status_period: Duration::ZERO, ..LoopCfg::default() })]
#[case(Gains::default(), LoopCfg { max_session: Some(Duration::ZERO), ..LoopCfg::default() })]
fn invalid_settings_are_rejected(#[case] gains: Gains, #[case] cfg: LoopCfg) {
    let err = Treadmill::builder()
        .with_motor(Idle)
        .with_sensor(Still)
        .with_gains(gains)
        .with_loop_cfg(cfg)
        .build()
        .expect_err("should fail with InvalidConfig");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::InvalidConfig(_)) => {}
        other => panic!("expected InvalidConfig, got: {other:?}"),
    }
}
