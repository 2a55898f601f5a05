//! Utility re-exports and helper macros for the control hub.
//!
//! - `connection`: stdio multiplexing over the USB and Bluetooth transports
//! - `controllers`: actuators, servos, trajectory control and the drivebase
//! - `math`: differential-drive kinematics and motion profiles
//! - `system`: supervisor process, status flags and the event bus
//! - `config`, `error`: runtime configuration and result codes
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod config;
pub mod connection;
pub mod controllers;
pub mod error;
pub mod math;
pub mod system;

pub use config::HubConfig;
pub use controllers::{MotorHub, MOTORS};
pub use error::{Completion, HubError, HubResult};
pub use system::EVENTS;

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: $crate::static_cell::StaticCell<$t> =
            $crate::static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
