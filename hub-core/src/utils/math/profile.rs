//! Trapezoidal motion profiles.
//!
//! A profile accelerates at a constant rate up to a peak speed, cruises, and
//! decelerates symmetrically onto the target. Short moves never reach the
//! requested speed and become triangular.

/// Time-parametrised reference for one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrapezoidProfile {
    start: f32,
    target: f32,
    /// +1 or -1 depending on the move direction
    sign: f32,
    peak_rate: f32,
    accel: f32,
    t_accel: f32,
    t_cruise: f32,
}

impl TrapezoidProfile {
    /// Profile that sits at `position` forever.
    pub const fn hold(position: f32) -> Self {
        Self {
            start: position,
            target: position,
            sign: 1.0,
            peak_rate: 0.0,
            accel: 0.0,
            t_accel: 0.0,
            t_cruise: 0.0,
        }
    }

    /// Build a profile from `start` to `target`.
    ///
    /// Signs of `rate` and `accel` are ignored. A zero rate gives a
    /// zero-length profile. A zero acceleration gives a constant-speed move.
    pub fn new(
        start: f32,
        target: f32,
        rate: f32,
        accel: f32,
    ) -> Self {
        let distance = libm::fabsf(target - start);
        let rate = libm::fabsf(rate);
        let accel = libm::fabsf(accel);
        if distance == 0.0 || rate == 0.0 || !distance.is_finite() {
            return Self::hold(target);
        }
        let sign = if target >= start { 1.0 } else { -1.0 };

        if accel == 0.0 {
            return Self {
                start,
                target,
                sign,
                peak_rate: rate,
                accel,
                t_accel: 0.0,
                t_cruise: distance / rate,
            };
        }

        let t_ramp = rate / accel;
        let ramp_distance = 0.5 * rate * t_ramp;
        let (peak_rate, t_accel, t_cruise) = if 2.0 * ramp_distance >= distance {
            let peak = libm::sqrtf(distance * accel);
            (peak, peak / accel, 0.0)
        } else {
            (rate, t_ramp, (distance - 2.0 * ramp_distance) / rate)
        };

        Self {
            start,
            target,
            sign,
            peak_rate,
            accel,
            t_accel,
            t_cruise,
        }
    }

    pub const fn target(&self) -> f32 {
        self.target
    }

    /// Total duration in seconds.
    pub fn duration(&self) -> f32 {
        2.0 * self.t_accel + self.t_cruise
    }

    /// Reference `(position, rate)` at `t` seconds after the start.
    pub fn sample(
        &self,
        t: f32,
    ) -> (f32, f32) {
        let total = self.duration();
        if t >= total {
            return (self.target, 0.0);
        }
        if t <= 0.0 {
            return (self.start, 0.0);
        }

        let (travelled, rate) = if t < self.t_accel {
            (0.5 * self.accel * t * t, self.accel * t)
        } else if t < self.t_accel + self.t_cruise {
            let ramp = 0.5 * self.accel * self.t_accel * self.t_accel;
            (ramp + self.peak_rate * (t - self.t_accel), self.peak_rate)
        } else {
            let remaining = total - t;
            let distance = libm::fabsf(self.target - self.start);
            (
                distance - 0.5 * self.accel * remaining * remaining,
                self.accel * remaining,
            )
        };

        (self.start + self.sign * travelled, self.sign * rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_length_profile() {
        let p = TrapezoidProfile::new(10.0, 10.0, 100.0, 200.0);
        assert_eq!(p.duration(), 0.0);
        assert_eq!(p.sample(0.0), (10.0, 0.0));
        assert_eq!(p.sample(1.0), (10.0, 0.0));
    }

    #[test]
    fn test_trapezoid_reaches_target_at_end() {
        let p = TrapezoidProfile::new(0.0, 1000.0, 200.0, 400.0);
        // 0.5 s ramp each side (50 mm each), 900 mm cruise at 200 mm/s
        assert!((p.duration() - 5.5).abs() < 1e-4);
        let (mid_pos, mid_rate) = p.sample(p.duration() / 2.0);
        assert!((mid_pos - 500.0).abs() < 1e-2);
        assert!((mid_rate - 200.0).abs() < 1e-4);
        assert_eq!(p.sample(p.duration()), (1000.0, 0.0));
    }

    #[test]
    fn test_short_move_is_triangular() {
        let p = TrapezoidProfile::new(0.0, -10.0, 500.0, 100.0);
        let (_, peak) = p.sample(p.duration() / 2.0);
        assert!(peak < 0.0);
        assert!(libm::fabsf(peak) < 500.0);
        assert!((libm::fabsf(peak) - libm::sqrtf(1000.0)).abs() < 1e-2);
    }

    #[test]
    fn test_zero_acceleration_is_constant_speed() {
        let p = TrapezoidProfile::new(0.0, 90.0, 45.0, 0.0);
        assert!((p.duration() - 2.0).abs() < 1e-5);
        let (pos, rate) = p.sample(1.0);
        assert!((pos - 45.0).abs() < 1e-4);
        assert_eq!(rate, 45.0);
    }
}
