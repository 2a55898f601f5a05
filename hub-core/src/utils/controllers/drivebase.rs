//! Two-motor drivebase.
//!
//! A [`DriveBase`] claims the servos on two distinct ports and drives them
//! through two virtual axes: distance (mm) and heading (deg,
//! counterclockwise-positive). Each axis has its own [`Trajectory`]
//! controller; their outputs are mixed into left/right voltages as
//! `distance ∓ heading`.
//!
//! Methods that touch the motors are on [`DriveBaseMut`], obtained from
//! [`MotorHub::drivebase`].

use embassy_time::Instant;
use heapless::HistoryBuffer;
use serde::{Deserialize, Serialize};

use crate::utils::{
    controllers::{
        actuator::{Owner, Port},
        hub::MotorHub,
        registry::{CompletionHandle, Device},
        servo::ServoMode,
        trajectory::{ControlSettings, ControlState, Trajectory},
    },
    error::{HubError, HubResult},
    math::kinematics::DifferentialDrive,
};

/// Number of samples kept by the drivebase log.
pub const LOG_CAPACITY: usize = 64;

/// User-tunable command settings.
///
/// Speeds in mm/s, accelerations in mm/s², turn rate in deg/s and turn
/// acceleration in deg/s².
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriveSettings {
    pub straight_speed: i32,
    pub straight_acceleration: i32,
    pub turn_rate: i32,
    pub turn_acceleration: i32,
}

impl DriveSettings {
    fn map(
        self,
        f: impl Fn(i32) -> i32,
    ) -> Self {
        Self {
            straight_speed: f(self.straight_speed),
            straight_acceleration: f(self.straight_acceleration),
            turn_rate: f(self.turn_rate),
            turn_acceleration: f(self.turn_acceleration),
        }
    }
}

/// Partial settings update; `None` keeps the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriveSettingsUpdate {
    pub straight_speed: Option<i32>,
    pub straight_acceleration: Option<i32>,
    pub turn_rate: Option<i32>,
    pub turn_acceleration: Option<i32>,
}

impl DriveSettingsUpdate {
    pub const fn is_empty(&self) -> bool {
        self.straight_speed.is_none()
            && self.straight_acceleration.is_none()
            && self.turn_rate.is_none()
            && self.turn_acceleration.is_none()
    }
}

/// Kinematic state: `(distance, drive_speed, angle, turn_rate)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DriveState {
    pub distance: f32,
    pub drive_speed: f32,
    pub angle: f32,
    pub turn_rate: f32,
}

impl DriveState {
    pub const fn as_tuple(&self) -> (f32, f32, f32, f32) {
        (self.distance, self.drive_speed, self.angle, self.turn_rate)
    }
}

/// Encoder readings of both wheels (deg, deg/s).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelSample {
    pub left_angle: f32,
    pub right_angle: f32,
    pub left_rate: f32,
    pub right_rate: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DriveMode {
    #[default]
    Passive,
    /// Both axes follow their trajectory controllers.
    Track,
    /// Constant wheel rates (deg/s).
    Velocity { left: f32, right: f32 },
}

/// One entry of the drivebase log.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LogSample {
    pub time_ms: u64,
    pub state: DriveState,
    pub left_voltage: i32,
    pub right_voltage: i32,
}

/// Ring of recent [`LogSample`]s, written by the control loop only.
#[derive(Debug, Clone)]
pub struct DataLog {
    active: bool,
    samples: HistoryBuffer<LogSample, LOG_CAPACITY>,
}

impl Default for DataLog {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLog {
    pub const fn new() -> Self {
        Self {
            active: false,
            samples: HistoryBuffer::new(),
        }
    }

    pub fn start(&mut self) {
        self.active = true;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.len() == 0
    }

    /// Samples from oldest to newest.
    pub fn samples(&self) -> impl Iterator<Item = &LogSample> {
        self.samples.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&LogSample> {
        self.samples.recent()
    }

    pub(crate) fn record(
        &mut self,
        sample: LogSample,
    ) {
        if self.active {
            self.samples.write(sample);
        }
    }
}

/// Drivebase state and control logic.
#[derive(Debug, Clone)]
pub struct DriveBase {
    left: Port,
    right: Port,
    geometry: DifferentialDrive,
    wheel: ControlSettings,
    distance_control: Trajectory,
    heading_control: Trajectory,
    limits: DriveSettings,
    settings: DriveSettings,
    mode: DriveMode,
    distance_offset: f32,
    angle_offset: f32,
    log: DataLog,
}

impl DriveBase {
    /// Combine two servos' settings into the drivebase controllers.
    ///
    /// Rate and acceleration limits are those of the slower wheel, scaled
    /// onto each axis by the wheel geometry. Defaults are a third of the
    /// limits.
    pub fn new(
        left: Port,
        right: Port,
        geometry: DifferentialDrive,
        left_settings: &ControlSettings,
        right_settings: &ControlSettings,
    ) -> Self {
        let wheel = ControlSettings {
            rate_limit: left_settings.rate_limit.min(right_settings.rate_limit),
            accel_limit: left_settings.accel_limit.min(right_settings.accel_limit),
            actuation_limit: left_settings
                .actuation_limit
                .min(right_settings.actuation_limit),
            ..*left_settings
        };
        let distance = wheel.scaled(geometry.distance_scale());
        let heading = wheel.scaled(geometry.heading_scale());
        let limits = DriveSettings {
            straight_speed: distance.rate_limit,
            straight_acceleration: distance.accel_limit,
            turn_rate: heading.rate_limit,
            turn_acceleration: heading.accel_limit,
        };
        Self {
            left,
            right,
            geometry,
            wheel,
            distance_control: Trajectory::new(distance),
            heading_control: Trajectory::new(heading),
            limits,
            settings: limits.map(|v| v / 3),
            mode: DriveMode::Passive,
            distance_offset: 0.0,
            angle_offset: 0.0,
            log: DataLog::new(),
        }
    }

    pub const fn left(&self) -> Port {
        self.left
    }

    pub const fn right(&self) -> Port {
        self.right
    }

    pub const fn geometry(&self) -> &DifferentialDrive {
        &self.geometry
    }

    pub const fn mode(&self) -> DriveMode {
        self.mode
    }

    /// Hardware-derived upper bounds of the settings.
    pub const fn limits(&self) -> DriveSettings {
        self.limits
    }

    pub const fn settings(&self) -> DriveSettings {
        self.settings
    }

    pub const fn distance_control(&self) -> &Trajectory {
        &self.distance_control
    }

    pub const fn heading_control(&self) -> &Trajectory {
        &self.heading_control
    }

    pub const fn log(&self) -> &DataLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut DataLog {
        &mut self.log
    }

    /// Both controllers reached their targets.
    pub fn is_done(&self) -> bool {
        self.distance_control.is_done() && self.heading_control.is_done()
    }

    fn is_running(&self) -> bool {
        self.distance_control.state() == ControlState::Running
            || self.heading_control.state() == ControlState::Running
    }

    /// State without the user reset applied.
    pub fn measure(
        &self,
        wheels: &WheelSample,
    ) -> DriveState {
        let kin = &self.geometry;
        DriveState {
            distance: kin.distance(wheels.left_angle, wheels.right_angle),
            drive_speed: kin.distance(wheels.left_rate, wheels.right_rate),
            angle: kin.heading(wheels.left_angle, wheels.right_angle),
            turn_rate: kin.heading(wheels.left_rate, wheels.right_rate),
        }
    }

    /// State as seen by the user.
    pub fn state(
        &self,
        wheels: &WheelSample,
    ) -> DriveState {
        let raw = self.measure(wheels);
        DriveState {
            distance: raw.distance - self.distance_offset,
            angle: raw.angle - self.angle_offset,
            ..raw
        }
    }

    /// Zero the user-visible distance and angle.
    pub fn reset(
        &mut self,
        wheels: &WheelSample,
    ) {
        let raw = self.measure(wheels);
        self.distance_offset = raw.distance;
        self.angle_offset = raw.angle;
    }

    /// Apply a partial settings update.
    ///
    /// An empty update is a plain read. Anything else requires both
    /// controllers to be idle.
    pub fn update_settings(
        &mut self,
        update: &DriveSettingsUpdate,
    ) -> HubResult<DriveSettings> {
        if update.is_empty() {
            return Ok(self.settings);
        }
        if !self.distance_control.is_idle() || !self.heading_control.is_idle() {
            return Err(HubError::InvalidOp);
        }
        let bound = |value: Option<i32>, current: i32, limit: i32| match value {
            Some(v) => v.saturating_abs().min(limit),
            None => current,
        };
        let (s, l) = (self.settings, self.limits);
        self.settings = DriveSettings {
            straight_speed: bound(update.straight_speed, s.straight_speed, l.straight_speed),
            straight_acceleration: bound(
                update.straight_acceleration,
                s.straight_acceleration,
                l.straight_acceleration,
            ),
            turn_rate: bound(update.turn_rate, s.turn_rate, l.turn_rate),
            turn_acceleration: bound(
                update.turn_acceleration,
                s.turn_acceleration,
                l.turn_acceleration,
            ),
        };
        tracing::debug!(settings = ?self.settings, "drivebase settings updated");
        Ok(self.settings)
    }

    /// Move the distance axis by `distance` mm while holding the heading.
    pub(crate) fn start_straight(
        &mut self,
        now: Instant,
        wheels: &WheelSample,
        distance: f32,
    ) -> HubResult {
        if !distance.is_finite() {
            return Err(HubError::InvalidArg);
        }
        if self.is_running() {
            return Err(HubError::InvalidOp);
        }
        let raw = self.measure(wheels);
        let s = self.settings;
        self.distance_control.set_target(
            now,
            raw.distance,
            raw.distance + distance,
            s.straight_speed,
            s.straight_acceleration,
        )?;
        self.heading_control.hold(now, raw.angle)?;
        self.mode = DriveMode::Track;
        Ok(())
    }

    /// Turn by `angle` deg in place while holding the distance.
    pub(crate) fn start_turn(
        &mut self,
        now: Instant,
        wheels: &WheelSample,
        angle: f32,
    ) -> HubResult {
        if !angle.is_finite() {
            return Err(HubError::InvalidArg);
        }
        if self.is_running() {
            return Err(HubError::InvalidOp);
        }
        let raw = self.measure(wheels);
        let s = self.settings;
        self.heading_control.set_target(
            now,
            raw.angle,
            raw.angle + angle,
            s.turn_rate,
            s.turn_acceleration,
        )?;
        self.distance_control.hold(now, raw.distance)?;
        self.mode = DriveMode::Track;
        Ok(())
    }

    /// Switch to constant wheel rates for `speed` mm/s and `turn_rate` deg/s.
    pub(crate) fn start_drive(
        &mut self,
        speed: f32,
        turn_rate: f32,
    ) -> HubResult {
        if !speed.is_finite() || !turn_rate.is_finite() {
            return Err(HubError::InvalidArg);
        }
        let (left, right) = self.geometry.wheel_rates(speed, turn_rate);
        let limit = self.wheel.rate_limit as f32;
        self.distance_control.stop();
        self.heading_control.stop();
        self.mode = DriveMode::Velocity {
            left: left.clamp(-limit, limit),
            right: right.clamp(-limit, limit),
        };
        Ok(())
    }

    /// Cancel both controllers.
    pub(crate) fn halt(&mut self) {
        self.distance_control.stop();
        self.heading_control.stop();
        self.mode = DriveMode::Passive;
    }

    fn wheel_actuation(
        &self,
        target: f32,
        rate: f32,
    ) -> i32 {
        let w = &self.wheel;
        let limit = w.actuation_limit as f32;
        (w.feedforward * target + w.kd * (target - rate)).clamp(-limit, limit) as i32
    }

    /// One control step. Returns left/right voltages, or `None` when passive.
    pub(crate) fn update(
        &mut self,
        now: Instant,
        wheels: &WheelSample,
    ) -> Option<(i32, i32)> {
        let raw = self.measure(wheels);
        let out = match self.mode {
            DriveMode::Passive => None,
            DriveMode::Track => {
                let d = self
                    .distance_control
                    .update(now, raw.distance, raw.drive_speed)
                    .unwrap_or(0);
                let h = self
                    .heading_control
                    .update(now, raw.angle, raw.turn_rate)
                    .unwrap_or(0);
                let limit = self.wheel.actuation_limit;
                Some((
                    d.saturating_sub(h).clamp(-limit, limit),
                    d.saturating_add(h).clamp(-limit, limit),
                ))
            }
            DriveMode::Velocity { left, right } => Some((
                self.wheel_actuation(left, wheels.left_rate),
                self.wheel_actuation(right, wheels.right_rate),
            )),
        };

        if self.log.is_active() {
            let (left_voltage, right_voltage) = out.unwrap_or((0, 0));
            let state = self.state(wheels);
            self.log.record(LogSample {
                time_ms: now.as_millis(),
                state,
                left_voltage,
                right_voltage,
            });
        }
        out
    }
}

/// Exclusive access to the drivebase and the motors it claims.
pub struct DriveBaseMut<'a> {
    hub: &'a mut MotorHub,
}

impl<'a> DriveBaseMut<'a> {
    pub(crate) fn new(hub: &'a mut MotorHub) -> Self {
        Self { hub }
    }

    fn base(&self) -> HubResult<&DriveBase> {
        self.hub.drivebase.as_ref().ok_or(HubError::NoDev)
    }

    fn base_mut(&mut self) -> HubResult<&mut DriveBase> {
        self.hub.drivebase.as_mut().ok_or(HubError::NoDev)
    }

    fn wheels(&self) -> HubResult<WheelSample> {
        let base = self.base()?;
        self.hub.wheel_sample(base.left, base.right)
    }

    /// Cancel direct commands still running on the wheel servos.
    fn take_wheels(&mut self) -> HubResult {
        let (left, right) = {
            let base = self.base()?;
            (base.left, base.right)
        };
        for port in [left, right] {
            let servo = self.hub.servo_mut(port)?;
            if servo.mode() != ServoMode::Passive {
                servo.halt();
                self.hub.registry.complete(Device::Motor(port), Ok(()));
            }
        }
        Ok(())
    }

    /// Drive `distance` mm straight and report completion on the handle.
    pub fn straight(
        &mut self,
        distance: f32,
    ) -> HubResult<CompletionHandle> {
        let wheels = self.wheels()?;
        let now = self.hub.clock;
        self.base_mut()?.start_straight(now, &wheels, distance)?;
        self.take_wheels()?;
        tracing::debug!(distance, "drivebase straight");
        self.hub.registry.issue(Device::DriveBase)
    }

    /// Turn in place by `angle` deg and report completion on the handle.
    pub fn turn(
        &mut self,
        angle: f32,
    ) -> HubResult<CompletionHandle> {
        let wheels = self.wheels()?;
        let now = self.hub.clock;
        self.base_mut()?.start_turn(now, &wheels, angle)?;
        self.take_wheels()?;
        tracing::debug!(angle, "drivebase turn");
        self.hub.registry.issue(Device::DriveBase)
    }

    /// Keep driving at `speed` mm/s and `turn_rate` deg/s until stopped.
    pub fn drive(
        &mut self,
        speed: f32,
        turn_rate: f32,
    ) -> HubResult {
        self.base_mut()?.start_drive(speed, turn_rate)?;
        self.take_wheels()?;
        tracing::debug!(speed, turn_rate, "drivebase drive");
        self.hub.registry.issue(Device::DriveBase).map(|_| ())
    }

    /// Coast both motors and cancel both controllers.
    pub fn stop(&mut self) -> HubResult {
        self.hub.stop_owner(Owner::DriveBase)
    }

    pub fn distance(&self) -> HubResult<f32> {
        self.state().map(|s| s.distance)
    }

    pub fn angle(&self) -> HubResult<f32> {
        self.state().map(|s| s.angle)
    }

    pub fn state(&self) -> HubResult<DriveState> {
        let wheels = self.wheels()?;
        Ok(self.base()?.state(&wheels))
    }

    /// Zero distance and angle. Controllers are unaffected.
    pub fn reset(&mut self) -> HubResult {
        let wheels = self.wheels()?;
        self.base_mut()?.reset(&wheels);
        Ok(())
    }

    pub fn settings(&self) -> HubResult<DriveSettings> {
        Ok(self.base()?.settings())
    }

    pub fn set_settings(
        &mut self,
        update: &DriveSettingsUpdate,
    ) -> HubResult<DriveSettings> {
        self.base_mut()?.update_settings(update)
    }

    pub fn limits(&self) -> HubResult<DriveSettings> {
        Ok(self.base()?.limits())
    }

    pub fn is_done(&self) -> HubResult<bool> {
        Ok(self.base()?.is_done())
    }

    pub fn controller_states(&self) -> HubResult<(ControlState, ControlState)> {
        let base = self.base()?;
        Ok((
            base.distance_control.state(),
            base.heading_control.state(),
        ))
    }

    pub fn log(&self) -> HubResult<&DataLog> {
        Ok(self.base()?.log())
    }

    pub fn log_mut(&mut self) -> HubResult<&mut DataLog> {
        Ok(self.base_mut()?.log_mut())
    }
}
