//! Closed-loop trajectory tracking for one axis.
//!
//! A [`Trajectory`] drives a physical axis (a servo output) or a virtual one
//! (drivebase distance or heading) onto a target along a trapezoidal
//! reference, using PID on the tracking error plus a rate feedforward.
//!
//! State machine: `Idle`/`Done` → `Running` on a new target, `Running` →
//! `Done` once the reference has ended and both the position error and the
//! measured rate are within tolerance. `Done` keeps holding the target until
//! [`Trajectory::stop`] returns it to `Idle`.

use embassy_time::Instant;

use crate::utils::{
    error::{HubError, HubResult},
    math::profile::TrapezoidProfile,
};

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlState {
    #[default]
    Idle,
    Running,
    Done,
}

/// Limits, tolerances and gains for one axis, in axis units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlSettings {
    /// Maximum rate (units/s)
    pub rate_limit: i32,
    /// Maximum acceleration (units/s²)
    pub accel_limit: i32,
    /// Maximum actuation (mV)
    pub actuation_limit: i32,
    pub position_tolerance: f32,
    pub rate_tolerance: f32,
    /// mV per unit of position error
    pub kp: f32,
    /// mV per unit·s of accumulated error
    pub ki: f32,
    /// mV per unit/s of rate error
    pub kd: f32,
    /// mV per unit/s of reference rate
    pub feedforward: f32,
}

impl ControlSettings {
    /// Defaults for a motor output shaft in degrees.
    pub fn for_motor(
        rate_limit: i32,
        accel_limit: i32,
        actuation_limit: i32,
    ) -> Self {
        let feedforward = if rate_limit > 0 {
            actuation_limit as f32 / rate_limit as f32
        } else {
            0.0
        };
        Self {
            rate_limit,
            accel_limit,
            actuation_limit,
            position_tolerance: 10.0,
            rate_tolerance: 50.0,
            kp: 40.0,
            ki: 10.0,
            kd: 2.0,
            feedforward,
        }
    }

    /// The same loop expressed on an axis where one axis unit equals
    /// `wheel_per_unit` output degrees.
    pub fn scaled(
        &self,
        wheel_per_unit: f32,
    ) -> Self {
        let to_axis = |v: i32| (v as f32 / wheel_per_unit) as i32;
        Self {
            rate_limit: to_axis(self.rate_limit),
            accel_limit: to_axis(self.accel_limit),
            actuation_limit: self.actuation_limit,
            position_tolerance: self.position_tolerance / wheel_per_unit,
            rate_tolerance: self.rate_tolerance / wheel_per_unit,
            kp: self.kp * wheel_per_unit,
            ki: self.ki * wheel_per_unit,
            kd: self.kd * wheel_per_unit,
            feedforward: self.feedforward * wheel_per_unit,
        }
    }

    /// `(rate_limit, accel_limit, actuation_limit)`
    pub const fn limits(&self) -> (i32, i32, i32) {
        (self.rate_limit, self.accel_limit, self.actuation_limit)
    }
}

/// Trajectory controller for one axis.
#[derive(Debug, Clone)]
pub struct Trajectory {
    state: ControlState,
    settings: ControlSettings,
    profile: TrapezoidProfile,
    started: Instant,
    last_update: Option<Instant>,
    integral: f32,
}

impl Trajectory {
    pub fn new(settings: ControlSettings) -> Self {
        Self {
            state: ControlState::Idle,
            settings,
            profile: TrapezoidProfile::hold(0.0),
            started: Instant::from_ticks(0),
            last_update: None,
            integral: 0.0,
        }
    }

    pub const fn state(&self) -> ControlState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == ControlState::Done
    }

    pub fn is_idle(&self) -> bool {
        self.state == ControlState::Idle
    }

    pub const fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    pub const fn settings_limits(&self) -> (i32, i32, i32) {
        self.settings.limits()
    }

    /// Final position of the active reference.
    pub fn target(&self) -> f32 {
        self.profile.target()
    }

    /// Start tracking from `position` to `target`.
    ///
    /// Rate and acceleration are bounded by the configured limits. Only
    /// accepted while `Idle` or `Done`.
    pub(crate) fn set_target(
        &mut self,
        now: Instant,
        position: f32,
        target: f32,
        rate: i32,
        accel: i32,
    ) -> HubResult {
        if self.state == ControlState::Running {
            return Err(HubError::InvalidOp);
        }
        if !target.is_finite() || !position.is_finite() {
            return Err(HubError::InvalidArg);
        }
        let rate = rate.unsigned_abs().min(self.settings.rate_limit.unsigned_abs());
        let accel = accel.unsigned_abs().min(self.settings.accel_limit.unsigned_abs());
        self.profile = TrapezoidProfile::new(position, target, rate as f32, accel as f32);
        self.started = now;
        self.last_update = None;
        self.integral = 0.0;
        self.state = ControlState::Running;
        Ok(())
    }

    /// Hold `position` as a zero-length move.
    pub(crate) fn hold(
        &mut self,
        now: Instant,
        position: f32,
    ) -> HubResult {
        self.set_target(now, position, position, 0, 0)
    }

    /// Cancel any target and return to `Idle`.
    pub fn stop(&mut self) {
        self.state = ControlState::Idle;
        self.last_update = None;
        self.integral = 0.0;
    }

    /// Run one control step and return the actuation (mV).
    ///
    /// Returns `None` while idle.
    pub fn update(
        &mut self,
        now: Instant,
        position: f32,
        rate: f32,
    ) -> Option<i32> {
        if self.state == ControlState::Idle {
            return None;
        }
        let s = &self.settings;
        let t = seconds_between(self.started, now);
        let dt = self
            .last_update
            .map(|last| seconds_between(last, now))
            .unwrap_or(0.0);
        self.last_update = Some(now);

        let (ref_position, ref_rate) = self.profile.sample(t);
        let error = ref_position - position;
        let rate_error = ref_rate - rate;

        if s.ki > 0.0 {
            let windup = s.actuation_limit as f32 / s.ki;
            self.integral = (self.integral + error * dt).clamp(-windup, windup);
        }

        let limit = s.actuation_limit as f32;
        let out = (s.feedforward * ref_rate + s.kp * error + s.ki * self.integral + s.kd * rate_error)
            .clamp(-limit, limit);

        if self.state == ControlState::Running
            && t >= self.profile.duration()
            && libm::fabsf(self.profile.target() - position) <= s.position_tolerance
            && libm::fabsf(rate) <= s.rate_tolerance
        {
            self.state = ControlState::Done;
            tracing::debug!(goal = self.profile.target(), position, "trajectory done");
        }

        Some(out as i32)
    }
}

fn seconds_between(
    from: Instant,
    to: Instant,
) -> f32 {
    match to.checked_duration_since(from) {
        Some(d) => d.as_micros() as f32 / 1_000_000.0,
        None => 0.0,
    }
}
