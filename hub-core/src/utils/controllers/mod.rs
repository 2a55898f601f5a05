//! Module Exports
//!
//! Layered motor control, from the bottom up:
//!
//! - `actuator`: per-port voltage, brake and coast
//! - `hbridge`: applies an actuator output to H-bridge pins
//! - `trajectory`: closed-loop tracking of one axis
//! - `servo`: encoder feedback and a trajectory controller on one motor
//! - `drivebase`: two servos driven as distance and heading
//! - `registry`: per-device completion status
//! - `hub`: the shared arena, ownership and the control-loop tick

pub mod actuator;
pub mod drivebase;
pub mod hbridge;
pub mod hub;
pub mod registry;
pub mod servo;
pub mod trajectory;

pub use actuator::{DeviceType, Direction, Passivity, Port};
pub use hub::{wait_for_completion, with_motors, MotorHub, SharedMotors, MOTORS};
pub use registry::{CompletionHandle, Device, Status};
