//! Simulated motors behind H-bridges.
//!
//! Each port has a bridge driven from the actuator output. The wheel turns
//! at the rate the bridge's effective voltage would give an unloaded motor.

use core::convert::Infallible;

use embedded_hal::{
    digital::{ErrorType as PinErrorType, OutputPin},
    pwm::{ErrorType as PwmErrorType, SetDutyCycle},
};
use hub_core::utils::{
    controllers::{
        actuator::PORT_COUNT,
        hbridge::{HBridge, HBridgeError, MotorDriver},
        servo::Encoder,
        MotorHub, Port,
    },
    HubResult,
};

const PWM_MAX: u16 = 10_000;

#[derive(Debug, Default)]
pub struct SimPwm {
    duty: u16,
}

impl PwmErrorType for SimPwm {
    type Error = Infallible;
}

impl SetDutyCycle for SimPwm {
    fn max_duty_cycle(&self) -> u16 {
        PWM_MAX
    }

    fn set_duty_cycle(
        &mut self,
        duty: u16,
    ) -> Result<(), Self::Error> {
        self.duty = duty;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SimPin {
    high: bool,
}

impl PinErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        Ok(())
    }
}

struct Wheel {
    bridge: HBridge<SimPwm, SimPin, SimPin>,
    angle: f32,
}

impl Wheel {
    fn new() -> Self {
        Self {
            bridge: HBridge::new(SimPwm::default(), SimPin::default(), SimPin::default()),
            angle: 0.0,
        }
    }

    /// Effective motor voltage (mV) the bridge currently applies.
    fn voltage(
        &self,
        supply_mv: i32,
    ) -> f32 {
        let (pwm, phase, disable) = self.bridge.pins();
        if disable.high {
            return 0.0;
        }
        let sign = if phase.high { -1.0 } else { 1.0 };
        sign * supply_mv as f32 * f32::from(pwm.duty) / f32::from(PWM_MAX)
    }
}

pub struct Plant {
    wheels: [Wheel; PORT_COUNT],
    supply_mv: i32,
}

impl Plant {
    pub fn new(supply_mv: i32) -> Self {
        Self {
            wheels: core::array::from_fn(|_| Wheel::new()),
            supply_mv,
        }
    }

    /// Apply every actuator output and advance the wheels by `dt` seconds.
    pub fn step(
        &mut self,
        hub: &MotorHub,
        dt: f32,
    ) {
        for port in Port::all() {
            let Ok(actuator) = hub.actuator(port) else {
                continue;
            };
            let wheel = &mut self.wheels[port.index()];
            if let Err(e) = wheel.bridge.drive(actuator.output(), self.supply_mv) {
                match e {
                    HBridgeError::Pwm(never) | HBridgeError::Pin(never) => match never {},
                }
            }
            let limits = actuator.device().limits();
            if limits.max_voltage == 0 {
                continue;
            }
            let k = limits.rate_limit as f32 / limits.max_voltage as f32;
            wheel.angle += wheel.voltage(self.supply_mv) * k * dt;
        }
    }
}

impl Encoder for Plant {
    fn angle(
        &mut self,
        port: Port,
    ) -> HubResult<i32> {
        Ok(self.wheels[port.index()].angle.round() as i32)
    }
}
