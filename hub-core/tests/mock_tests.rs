use core::convert::Infallible;

use embedded_hal::pwm::{ErrorType, SetDutyCycle};
use embedded_hal_mock::eh1::digital::{
    Mock as PinMock, State as PinState, Transaction as PinTransaction,
};
use hub_core::utils::controllers::{
    hbridge::{HBridge, MotorDriver},
    Passivity,
};

/// Resolution of the fake PWM timer.
const MAX_DUTY: u16 = 1000;

/// PWM channel that records every duty cycle written.
#[derive(Default)]
struct FakePwm {
    duties: Vec<u16>,
}

impl ErrorType for FakePwm {
    type Error = Infallible;
}

impl SetDutyCycle for FakePwm {
    fn max_duty_cycle(&self) -> u16 {
        MAX_DUTY
    }

    fn set_duty_cycle(
        &mut self,
        duty: u16,
    ) -> Result<(), Self::Error> {
        self.duties.push(duty);
        Ok(())
    }
}

fn set(state: PinState) -> PinTransaction {
    PinTransaction::set(state)
}

/// Drive each output in turn and check pins and duty afterwards.
fn run(
    outputs: &[(Passivity, i32)],
    phase: &[PinTransaction],
    disable: &[PinTransaction],
) -> Vec<u16> {
    let mut bridge = HBridge::new(
        FakePwm::default(),
        PinMock::new(phase),
        PinMock::new(disable),
    );
    for &(output, supply) in outputs {
        bridge.drive(output, supply).unwrap();
    }
    let (pwm, mut phase, mut disable) = bridge.release();
    phase.done();
    disable.done();
    pwm.duties
}

#[test]
fn test_coast_disables_outputs() {
    let duties = run(&[(Passivity::Coast, 8000)], &[], &[set(PinState::High)]);
    assert_eq!(duties, vec![0]);
}

#[test]
fn test_brake_keeps_bridge_enabled() {
    let duties = run(&[(Passivity::Brake, 8000)], &[], &[set(PinState::Low)]);
    assert_eq!(duties, vec![0]);
}

#[test]
fn test_duty_follows_sign_and_supply() {
    let duties = run(
        &[
            (Passivity::Duty(4500), 9000),
            (Passivity::Duty(-2000), 8000),
        ],
        &[set(PinState::Low), set(PinState::High)],
        &[set(PinState::Low), set(PinState::Low)],
    );
    assert_eq!(duties, vec![500, 250]);
}

#[test]
fn test_duty_saturates_on_low_battery() {
    let duties = run(
        &[(Passivity::Duty(-9000), 7200), (Passivity::Duty(0), 7200)],
        &[set(PinState::High), set(PinState::Low)],
        &[set(PinState::Low), set(PinState::Low)],
    );
    assert_eq!(duties, vec![MAX_DUTY, 0]);
}

#[test]
fn test_passivity_sequence() {
    let duties = run(
        &[
            (Passivity::Duty(3000), 6000),
            (Passivity::Brake, 6000),
            (Passivity::Coast, 6000),
        ],
        &[set(PinState::Low)],
        &[set(PinState::Low), set(PinState::Low), set(PinState::High)],
    );
    assert_eq!(duties, vec![500, 0, 0]);
}
