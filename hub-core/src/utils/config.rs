//! Runtime configuration for the hub.
//!
//! Every field has a default so a partial (or empty) config document is
//! valid. Durations are stored in milliseconds and exposed as
//! [`embassy_time::Duration`].

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub supervisor: SupervisorConfig,
    pub control: ControlConfig,
    pub geometry: GeometryConfig,
}

/// Supervisor process timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Period of the housekeeping tick (battery, HMI, supervisor polls).
    pub tick_period_ms: u64,
    /// Hardware watchdog timeout. The supervisor loop must iterate faster.
    pub watchdog_timeout_ms: u64,
}

impl SupervisorConfig {
    pub const fn new() -> Self {
        Self {
            tick_period_ms: 50,
            watchdog_timeout_ms: 3000,
        }
    }

    pub const fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub const fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Motor control loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub loop_period_ms: u64,
}

impl ControlConfig {
    pub const fn loop_period(&self) -> Duration {
        Duration::from_millis(self.loop_period_ms)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { loop_period_ms: 5 }
    }
}

/// Drivebase geometry in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub wheel_diameter: f32,
    pub axle_track: f32,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            wheel_diameter: 56.0,
            axle_track: 114.0,
        }
    }
}
