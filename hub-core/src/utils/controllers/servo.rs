//! Closed-loop servo layer over one actuator.
//!
//! A [`Servo`] adds angle sensing and a [`Trajectory`] controller to the
//! motor on the same port. It claims that motor while it is set up, and can
//! itself be claimed by a drivebase.

use embassy_time::Instant;

use crate::utils::{
    controllers::{
        actuator::{DeviceType, Direction, Owner, Port},
        trajectory::{ControlSettings, Trajectory},
    },
    error::{HubError, HubResult},
};

/// Angle sensing for every port.
///
/// Signal processing is the implementor's concern; the servo only needs the
/// accumulated output angle.
pub trait Encoder {
    /// Accumulated output angle in degrees, before direction calibration.
    fn angle(
        &mut self,
        port: Port,
    ) -> HubResult<i32>;
}

/// What the servo's own control loop is doing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ServoMode {
    /// No output from the servo loop.
    #[default]
    Passive,
    /// Constant speed (deg/s), never completes.
    Rate(f32),
    /// Following the trajectory controller.
    Track,
}

#[derive(Debug, Clone)]
pub struct Servo {
    port: Port,
    direction: Direction,
    settings: ControlSettings,
    control: Trajectory,
    mode: ServoMode,
    measured: f32,
    offset: f32,
    rate: f32,
    last_sample: Option<Instant>,
    claimed_by: Option<Owner>,
}

impl Servo {
    /// Set up a servo for an encoded motor.
    ///
    /// `actuation_limit` is the voltage bound of the underlying actuator.
    pub fn new(
        port: Port,
        device: DeviceType,
        direction: Direction,
        actuation_limit: i32,
    ) -> HubResult<Self> {
        if !cfg!(feature = "servo") {
            return Err(HubError::NotSupported);
        }
        let limits = device.limits();
        if !limits.has_encoder {
            return Err(HubError::NotSupported);
        }
        let settings =
            ControlSettings::for_motor(limits.rate_limit, limits.accel_limit, actuation_limit);
        Ok(Self {
            port,
            direction,
            settings,
            control: Trajectory::new(settings),
            mode: ServoMode::Passive,
            measured: 0.0,
            offset: 0.0,
            rate: 0.0,
            last_sample: None,
            claimed_by: None,
        })
    }

    pub const fn port(&self) -> Port {
        self.port
    }

    pub const fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    pub const fn control(&self) -> &Trajectory {
        &self.control
    }

    pub const fn mode(&self) -> ServoMode {
        self.mode
    }

    pub const fn claimed_by(&self) -> Option<Owner> {
        self.claimed_by
    }

    /// Calibrated output angle (deg), relative to the last reset.
    pub fn angle(&self) -> f32 {
        self.measured - self.offset
    }

    /// Calibrated angle without the user reset applied.
    pub(crate) fn raw_angle(&self) -> f32 {
        self.measured
    }

    /// Output speed (deg/s).
    pub const fn rate(&self) -> f32 {
        self.rate
    }

    /// Redefine the current angle as `angle`.
    pub fn reset_angle(
        &mut self,
        angle: f32,
    ) -> HubResult {
        if !angle.is_finite() {
            return Err(HubError::InvalidArg);
        }
        self.offset = self.measured - angle;
        Ok(())
    }

    /// Feed a new encoder reading taken at `now`.
    pub fn sample(
        &mut self,
        now: Instant,
        raw_angle: i32,
    ) {
        let measured = raw_angle as f32 * self.direction.sign() as f32;
        if let Some(last) = self.last_sample {
            if let Some(dt) = now.checked_duration_since(last) {
                let dt = dt.as_micros() as f32 / 1_000_000.0;
                if dt > 0.0 {
                    self.rate = (measured - self.measured) / dt;
                }
            }
        }
        self.measured = measured;
        self.last_sample = Some(now);
    }

    /// Voltage that makes the output spin at `target` deg/s.
    pub fn rate_actuation(
        &self,
        target: f32,
    ) -> i32 {
        let s = &self.settings;
        let limit = s.actuation_limit as f32;
        (s.feedforward * target + s.kd * (target - self.rate)).clamp(-limit, limit) as i32
    }

    /// Spin at a constant speed, clamped to the rate limit.
    pub(crate) fn run(
        &mut self,
        rate: f32,
    ) -> HubResult {
        if !rate.is_finite() {
            return Err(HubError::InvalidArg);
        }
        let limit = self.settings.rate_limit as f32;
        self.control.stop();
        self.mode = ServoMode::Rate(rate.clamp(-limit, limit));
        Ok(())
    }

    /// Move to `target` (deg, user frame) at `rate`.
    pub(crate) fn run_target(
        &mut self,
        now: Instant,
        rate: i32,
        target: f32,
    ) -> HubResult {
        if !target.is_finite() {
            return Err(HubError::InvalidArg);
        }
        self.control.stop();
        let accel = self.settings.accel_limit;
        self.control
            .set_target(now, self.measured, target + self.offset, rate, accel)?;
        self.mode = ServoMode::Track;
        Ok(())
    }

    /// Cancel the servo's own control.
    pub(crate) fn halt(&mut self) {
        self.control.stop();
        self.mode = ServoMode::Passive;
    }

    /// One step of the servo loop; `None` when passive.
    pub(crate) fn update(
        &mut self,
        now: Instant,
    ) -> Option<i32> {
        match self.mode {
            ServoMode::Passive => None,
            ServoMode::Rate(target) => Some(self.rate_actuation(target)),
            ServoMode::Track => self.control.update(now, self.measured, self.rate),
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

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_time::Duration;

    #[test]
    fn test_plain_dc_motor_cannot_be_a_servo() {
        let err = Servo::new(Port::A, DeviceType::TrainMotor, Direction::Clockwise, 7200);
        assert_eq!(err.err(), Some(HubError::NotSupported));
    }

    #[test]
    fn test_sample_derives_rate_and_direction() {
        let mut srv =
            Servo::new(Port::A, DeviceType::SpikeMMotor, Direction::Counterclockwise, 9000).unwrap();
        let t0 = Instant::from_millis(0);
        srv.sample(t0, 0);
        srv.sample(t0 + Duration::from_millis(100), -36);
        assert_eq!(srv.angle(), 36.0);
        assert!((srv.rate() - 360.0).abs() < 1e-3);
    }

    #[test]
    fn test_sample_handles_extreme_counts() {
        let mut srv =
            Servo::new(Port::D, DeviceType::SpikeMMotor, Direction::Counterclockwise, 9000).unwrap();
        srv.sample(Instant::from_millis(0), i32::MIN);
        assert_eq!(srv.raw_angle(), 2_147_483_648.0);
    }

    #[test]
    fn test_reset_angle_keeps_raw_frame() {
        let mut srv = Servo::new(Port::B, DeviceType::SpikeLMotor, Direction::Clockwise, 9000).unwrap();
        srv.sample(Instant::from_millis(0), 720);
        srv.reset_angle(90.0).unwrap();
        assert_eq!(srv.angle(), 90.0);
        assert_eq!(srv.raw_angle(), 720.0);
        assert_eq!(srv.reset_angle(f32::INFINITY), Err(HubError::InvalidArg));
    }

    #[test]
    fn test_run_clamps_to_rate_limit() {
        let mut srv = Servo::new(Port::C, DeviceType::SpikeSMotor, Direction::Clockwise, 9000).unwrap();
        srv.run(5000.0).unwrap();
        assert_eq!(srv.mode(), ServoMode::Rate(620.0));
        let out = srv.update(Instant::from_millis(0)).unwrap();
        assert_eq!(out, 9000);
        srv.halt();
        assert_eq!(srv.update(Instant::from_millis(5)), None);
    }
}
