//! Core firmware for a robotics control hub on no-std embedded platforms.
//!
//! Motors, servos and a two-wheel drivebase live in
//! [`utils::controllers`], the always-on supervisor in [`utils::system`],
//! and the host byte stream in [`utils::connection`].
//!
//! For a host simulation, see the `mock-hub` application.
#![no_std]

pub mod utils;

#[doc(hidden)]
pub use static_cell;
