//! H-bridge motor driver.
//!
//! Turns an actuator's [`Passivity`] output into pin and PWM levels. The
//! bridge has an enable (PWM) input, a phase pin selecting the current
//! direction, and an active-high disable pin that puts the outputs in high-Z.

use embedded_hal::{digital::OutputPin, pwm::SetDutyCycle};

use crate::utils::controllers::actuator::Passivity;

/// Something that can apply a signed motor output.
pub trait MotorDriver {
    type Error: core::fmt::Debug;

    /// Apply `output` given the current supply voltage (mV).
    fn drive(
        &mut self,
        output: Passivity,
        supply_mv: i32,
    ) -> Result<(), Self::Error>;
}

/// Errors from the H-bridge pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HBridgeError<PwmE, PinE> {
    Pwm(PwmE),
    Pin(PinE),
}

pub struct HBridge<EN, PH, DIS> {
    enable: EN,
    phase: PH,
    disable: DIS,
}

impl<EN, PH, DIS> HBridge<EN, PH, DIS>
where
    EN: SetDutyCycle,
    PH: OutputPin,
    DIS: OutputPin<Error = PH::Error>,
{
    pub fn new(
        enable: EN,
        phase: PH,
        disable: DIS,
    ) -> Self {
        Self {
            enable,
            phase,
            disable,
        }
    }

    /// Enable, phase and disable pins, in that order.
    pub fn pins(&self) -> (&EN, &PH, &DIS) {
        (&self.enable, &self.phase, &self.disable)
    }

    /// Give the pins back.
    pub fn release(self) -> (EN, PH, DIS) {
        (self.enable, self.phase, self.disable)
    }

    fn coast(&mut self) -> Result<(), HBridgeError<EN::Error, PH::Error>> {
        self.enable
            .set_duty_cycle_fully_off()
            .map_err(HBridgeError::Pwm)?;
        self.disable.set_high().map_err(HBridgeError::Pin)
    }

    fn brake(&mut self) -> Result<(), HBridgeError<EN::Error, PH::Error>> {
        self.enable
            .set_duty_cycle_fully_off()
            .map_err(HBridgeError::Pwm)?;
        self.disable.set_low().map_err(HBridgeError::Pin)
    }
}

impl<EN, PH, DIS> MotorDriver for HBridge<EN, PH, DIS>
where
    EN: SetDutyCycle,
    PH: OutputPin,
    DIS: OutputPin<Error = PH::Error>,
{
    type Error = HBridgeError<EN::Error, PH::Error>;

    fn drive(
        &mut self,
        output: Passivity,
        supply_mv: i32,
    ) -> Result<(), Self::Error> {
        let voltage = match output {
            Passivity::Coast => return self.coast(),
            Passivity::Brake => return self.brake(),
            Passivity::Duty(v) => v,
        };

        if voltage >= 0 {
            self.phase.set_low().map_err(HBridgeError::Pin)?;
        } else {
            self.phase.set_high().map_err(HBridgeError::Pin)?;
        }
        self.disable.set_low().map_err(HBridgeError::Pin)?;

        // Duty saturates at 100 % when the battery sags below the request.
        let supply = supply_mv.clamp(1, u16::MAX as i32) as u16;
        let magnitude = voltage.unsigned_abs().min(supply as u32) as u16;
        self.enable
            .set_duty_cycle_fraction(magnitude, supply)
            .map_err(HBridgeError::Pwm)
    }
}
