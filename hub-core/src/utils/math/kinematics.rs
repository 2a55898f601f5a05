//! Kinematics for a two-wheeled differential drive.
//!
//! The `DifferentialDrive` struct maps robot-level motion (linear speed and
//! turn rate) to wheel angular rates, and maps measured wheel angles back to
//! travelled distance and heading. Heading is counterclockwise-positive: a
//! positive turn rate makes the right wheel run faster than the left.
//!
//! Units: millimetres for lengths, degrees for angles, seconds for time.
//!
//! # Example
//! ```rust
//! use hub_core::utils::math::kinematics::DifferentialDrive;
//! let kin = DifferentialDrive::new(56.0, 114.0);
//! let (left, right) = kin.wheel_rates(200.0, 0.0);
//! assert!((left - right).abs() < 1e-3);
//! ```
use core::f32::consts::PI;

const DEG_PER_RAD: f32 = 180.0 / PI;

/// Geometry of a differential drivebase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferentialDrive {
    /// Wheel diameter (mm)
    wheel_diameter: f32,
    /// Distance between the wheel contact points (mm)
    axle_track: f32,
}

impl DifferentialDrive {
    pub const fn new(
        wheel_diameter: f32,
        axle_track: f32,
    ) -> Self {
        Self {
            wheel_diameter,
            axle_track,
        }
    }

    /// Both dimensions must be finite and strictly positive.
    pub fn is_valid(
        wheel_diameter: f32,
        axle_track: f32,
    ) -> bool {
        wheel_diameter.is_finite()
            && axle_track.is_finite()
            && wheel_diameter > 0.0
            && axle_track > 0.0
    }

    pub const fn wheel_diameter(&self) -> f32 {
        self.wheel_diameter
    }

    pub const fn axle_track(&self) -> f32 {
        self.axle_track
    }

    /// Ground distance covered by one wheel for the given wheel angle.
    pub fn wheel_travel(
        &self,
        wheel_angle: f32,
    ) -> f32 {
        wheel_angle * PI * self.wheel_diameter / 360.0
    }

    /// Wheel degrees per millimetre of straight travel.
    pub fn distance_scale(&self) -> f32 {
        360.0 / (PI * self.wheel_diameter)
    }

    /// Wheel degrees per degree of heading when spinning in place.
    pub fn heading_scale(&self) -> f32 {
        self.axle_track / self.wheel_diameter
    }

    /// Linear distance from the two wheel angles: half the summed travel.
    pub fn distance(
        &self,
        left: f32,
        right: f32,
    ) -> f32 {
        (self.wheel_travel(left) + self.wheel_travel(right)) / 2.0
    }

    /// Heading from the two wheel angles: travel difference over the axle track.
    pub fn heading(
        &self,
        left: f32,
        right: f32,
    ) -> f32 {
        (self.wheel_travel(right) - self.wheel_travel(left)) / self.axle_track * DEG_PER_RAD
    }

    /// Wheel angular rates (deg/s) for a linear `speed` (mm/s) and a
    /// `turn_rate` (deg/s).
    ///
    /// `wheel_rate = (speed ∓ turn_rate · axle_track / 2) / (wheel_diameter / 2)`,
    /// left wheel takes the minus branch.
    pub fn wheel_rates(
        &self,
        speed: f32,
        turn_rate: f32,
    ) -> (f32, f32) {
        let spin = turn_rate / DEG_PER_RAD * self.axle_track / 2.0;
        let half_d = self.wheel_diameter / 2.0;
        let left = (speed - spin) / half_d * DEG_PER_RAD;
        let right = (speed + spin) / half_d * DEG_PER_RAD;
        (left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_rates_are_equal() {
        let kin = DifferentialDrive::new(56.0, 114.0);
        let (l, r) = kin.wheel_rates(200.0, 0.0);
        assert!((l - r).abs() < 1e-3);
        // 200 mm/s on a 56 mm wheel is about 409 deg/s
        assert!((l - 409.26).abs() < 0.1, "left = {}", l);
    }

    #[test]
    fn test_positive_turn_speeds_up_right_wheel() {
        let kin = DifferentialDrive::new(56.0, 114.0);
        let (l, r) = kin.wheel_rates(0.0, 90.0);
        assert!(r > 0.0);
        assert!((l + r).abs() < 1e-3);
        assert!((r - 90.0 * kin.heading_scale()).abs() < 1e-2);
    }

    #[test]
    fn test_heading_inverts_wheel_rates() {
        let kin = DifferentialDrive::new(56.0, 114.0);
        // One second at the commanded rates.
        let (l, r) = kin.wheel_rates(100.0, 45.0);
        assert!((kin.distance(l, r) - 100.0).abs() < 1e-2);
        assert!((kin.heading(l, r) - 45.0).abs() < 1e-2);
    }

    #[test]
    fn test_scales_match_travel() {
        let kin = DifferentialDrive::new(43.2, 120.0);
        assert!((kin.wheel_travel(kin.distance_scale()) - 1.0).abs() < 1e-5);
        let w = kin.heading_scale();
        assert!((kin.heading(-w, w) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_geometry_validation() {
        assert!(DifferentialDrive::is_valid(56.0, 114.0));
        assert!(!DifferentialDrive::is_valid(0.0, 114.0));
        assert!(!DifferentialDrive::is_valid(56.0, -1.0));
        assert!(!DifferentialDrive::is_valid(f32::NAN, 114.0));
    }
}
