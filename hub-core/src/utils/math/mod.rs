//! Math utilities for the control hub.
//!
//! - `kinematics`: differential-drive wheel/body transforms
//! - `profile`: trapezoidal motion profiles for trajectory tracking

pub mod kinematics;
pub mod profile;
