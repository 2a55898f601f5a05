//! Per-port motor actuation.
//!
//! An [`Actuator`] is the lowest layer above the motor driver: it owns the
//! passivity state (coast, brake or a constant voltage), the calibrated
//! direction and the voltage bound for the attached device. Calls here are
//! *system level*: they never look at who claimed the motor. The user-level
//! variants that cascade-stop the claiming controller live on
//! [`MotorHub`](super::hub::MotorHub).

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::error::{HubError, HubResult};

/// Number of I/O ports on the hub.
pub const PORT_COUNT: usize = 6;

/// Voltage limit for device types that are not in the table (mV).
pub const DEFAULT_MAX_VOLTAGE: i32 = 9000;

/// Hub I/O port, `A` through `F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Port(u8);

impl Port {
    pub const A: Port = Port(0);
    pub const B: Port = Port(1);
    pub const C: Port = Port(2);
    pub const D: Port = Port(3);
    pub const E: Port = Port(4);
    pub const F: Port = Port(5);

    pub const fn new(index: u8) -> HubResult<Self> {
        if (index as usize) < PORT_COUNT {
            Ok(Port(index))
        } else {
            Err(HubError::InvalidArg)
        }
    }

    pub fn from_letter(letter: char) -> HubResult<Self> {
        let upper = letter.to_ascii_uppercase();
        if !upper.is_ascii_uppercase() {
            return Err(HubError::InvalidArg);
        }
        Port::new(upper as u8 - b'A')
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn letter(self) -> char {
        (b'A' + self.0) as char
    }

    /// All ports in order.
    pub fn all() -> impl Iterator<Item = Port> {
        (0..PORT_COUNT as u8).map(Port)
    }
}

impl fmt::Display for Port {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Port.{}", self.letter())
    }
}

/// Which way the output turns for a positive command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Clockwise,
    Counterclockwise,
}

impl Direction {
    pub const fn sign(self) -> i32 {
        match self {
            Direction::Clockwise => 1,
            Direction::Counterclockwise => -1,
        }
    }
}

/// Motor device types known to the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Plain DC motor without an encoder.
    DcMotor,
    TrainMotor,
    InteractiveMotor,
    MoveHubMotor,
    TechnicLMotor,
    TechnicXlMotor,
    SpikeSMotor,
    SpikeMMotor,
    SpikeLMotor,
    /// Anything the table does not list, by raw type id.
    Unknown(u8),
}

/// Hardware-derived limits for one device type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Maximum drive voltage (mV)
    pub max_voltage: i32,
    /// Maximum output speed (deg/s)
    pub rate_limit: i32,
    /// Maximum output acceleration (deg/s²)
    pub accel_limit: i32,
    /// Whether the device reports its angle.
    pub has_encoder: bool,
}

impl DeviceType {
    pub const fn limits(self) -> DeviceLimits {
        let (max_voltage, rate_limit, accel_limit, has_encoder) = match self {
            DeviceType::DcMotor => (DEFAULT_MAX_VOLTAGE, 0, 0, false),
            DeviceType::TrainMotor => (7200, 0, 0, false),
            DeviceType::InteractiveMotor => (9000, 1000, 2000, true),
            DeviceType::MoveHubMotor => (9000, 1500, 4000, true),
            DeviceType::TechnicLMotor => (9000, 1470, 2000, true),
            DeviceType::TechnicXlMotor => (9000, 1525, 2000, true),
            DeviceType::SpikeSMotor => (9000, 620, 2000, true),
            DeviceType::SpikeMMotor => (9000, 1080, 2000, true),
            DeviceType::SpikeLMotor => (9000, 970, 1500, true),
            DeviceType::Unknown(_) => (DEFAULT_MAX_VOLTAGE, 500, 1000, false),
        };
        DeviceLimits {
            max_voltage,
            rate_limit,
            accel_limit,
            has_encoder,
        }
    }

    /// Static device type to voltage bound lookup.
    pub const fn max_voltage(self) -> i32 {
        self.limits().max_voltage
    }
}

/// Passivity state of a motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Passivity {
    #[default]
    Coast,
    Brake,
    /// Constant voltage in mV.
    Duty(i32),
}

/// Higher-level controller holding a claim on a motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Servo(Port),
    DriveBase,
}

/// One physical motor.
#[derive(Debug, Clone, PartialEq)]
pub struct Actuator {
    port: Port,
    device: DeviceType,
    direction: Direction,
    state: Passivity,
    voltage_now: i32,
    max_voltage: i32,
    /// Lookup-only back reference to the claiming controller.
    claimed_by: Option<Owner>,
}

impl Actuator {
    pub fn new(
        port: Port,
        device: DeviceType,
    ) -> Self {
        Self {
            port,
            device,
            direction: Direction::Clockwise,
            state: Passivity::Coast,
            voltage_now: 0,
            max_voltage: device.max_voltage(),
            claimed_by: None,
        }
    }

    /// Bind the calibrated direction and start out coasting.
    pub fn setup(
        &mut self,
        direction: Direction,
    ) -> HubResult {
        if !cfg!(feature = "dcmotor") {
            return Err(HubError::NotSupported);
        }
        self.direction = direction;
        self.state = Passivity::Coast;
        self.voltage_now = 0;
        self.max_voltage = self.device.max_voltage();
        self.claimed_by = None;
        Ok(())
    }

    pub const fn port(&self) -> Port {
        self.port
    }

    pub const fn device(&self) -> DeviceType {
        self.device
    }

    pub const fn direction(&self) -> Direction {
        self.direction
    }

    pub const fn max_voltage(&self) -> i32 {
        self.max_voltage
    }

    pub const fn claimed_by(&self) -> Option<Owner> {
        self.claimed_by
    }

    /// Current passivity state and applied voltage (mV).
    pub const fn get_state(&self) -> (Passivity, i32) {
        (self.state, self.voltage_now)
    }

    /// Lower the voltage bound. Must stay within the device limit.
    pub fn set_max_voltage(
        &mut self,
        max_voltage: i32,
    ) -> HubResult {
        if max_voltage <= 0 || max_voltage > self.device.max_voltage() {
            return Err(HubError::InvalidArg);
        }
        self.max_voltage = max_voltage;
        if let Passivity::Duty(v) = self.state {
            let v = v.clamp(-max_voltage, max_voltage);
            self.state = Passivity::Duty(v);
            self.voltage_now = v;
        }
        Ok(())
    }

    /// System-level constant voltage, clamped to the voltage bound.
    pub fn set_voltage(
        &mut self,
        voltage: i32,
    ) {
        let v = voltage.clamp(-self.max_voltage, self.max_voltage);
        self.state = Passivity::Duty(v);
        self.voltage_now = v;
    }

    /// System-level coast.
    pub fn stop(&mut self) {
        self.state = Passivity::Coast;
        self.voltage_now = 0;
    }

    /// System-level brake.
    pub fn brake_now(&mut self) {
        self.state = Passivity::Brake;
        self.voltage_now = 0;
    }

    /// Output as seen by the motor driver, with the direction applied.
    pub const fn output(&self) -> Passivity {
        match self.state {
            Passivity::Duty(v) => Passivity::Duty(v * self.direction.sign()),
            other => other,
        }
    }

    pub(crate) fn claim(
        &mut self,
        owner: Owner,
    ) {
        self.claimed_by = Some(owner);
    }

    pub(crate) fn release(&mut self) {
        self.claimed_by = None;
    }
}
