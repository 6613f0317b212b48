//! Generated attitude for hosts without an orientation sensor.
//!
//! The device turns about the vertical axis at a constant rate while rocking
//! gently in roll and pitch.

use crate::domain::models::{Acceleration, MotionReading};
use crate::domain::settings::SyntheticMotionSettings;
use crate::infrastructure::motion::polling::AttitudeProvider;
use nalgebra::UnitQuaternion;
use std::f64::consts::{PI, TAU};
use std::time::Instant;

/// Period of the roll/pitch rocking motion, in seconds
const ROCKING_PERIOD_SECS: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct SyntheticAttitude {
    started: Instant,
    yaw_rate: f64,
    tilt_amplitude: f64,
}

impl SyntheticAttitude {
    pub fn new(settings: &SyntheticMotionSettings) -> Self {
        Self {
            started: Instant::now(),
            yaw_rate: settings.yaw_rate_deg_per_sec.to_radians(),
            tilt_amplitude: settings.tilt_amplitude_deg.to_radians(),
        }
    }

    /// Reading `secs` seconds after construction
    pub fn reading_at(&self, secs: f64) -> MotionReading {
        let phase = TAU * secs / ROCKING_PERIOD_SECS;
        let roll = self.tilt_amplitude * phase.sin();
        let pitch = 0.5 * self.tilt_amplitude * phase.cos();
        let yaw = wrap_angle(self.yaw_rate * secs);

        // Centripetal-looking wobble, in g
        let omega = TAU / ROCKING_PERIOD_SECS;
        let wobble = self.tilt_amplitude * omega * omega / 9.81;
        let acceleration = Acceleration::new(-wobble * phase.sin(), -0.5 * wobble * phase.cos(), 0.0);

        MotionReading::new(UnitQuaternion::from_euler_angles(roll, pitch, yaw), acceleration)
    }
}

impl AttitudeProvider for SyntheticAttitude {
    fn read(&self) -> Option<MotionReading> {
        Some(self.reading_at(self.started.elapsed().as_secs_f64()))
    }
}

/// Map an angle onto (-pi, pi]
fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn attitude() -> SyntheticAttitude {
        SyntheticAttitude::new(&SyntheticMotionSettings {
            yaw_rate_deg_per_sec: 30.0,
            tilt_amplitude_deg: 10.0,
        })
    }

    #[test]
    fn test_yaw_turns_at_configured_rate() {
        let attitude = attitude();
        assert_abs_diff_eq!(attitude.reading_at(0.0).yaw(), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(attitude.reading_at(1.0).yaw(), 30f64.to_radians(), epsilon = 1e-9);
        // 210 degrees wraps to -150
        assert_abs_diff_eq!(
            attitude.reading_at(7.0).yaw(),
            (-150f64).to_radians(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_tilt_stays_within_amplitude() {
        let attitude = attitude();
        let limit = 10f64.to_radians() + 1e-9;
        for step in 0..40 {
            let (roll, pitch, _) = attitude.reading_at(step as f64 * 0.1).attitude.euler_angles();
            assert!(roll.abs() <= limit);
            assert!(pitch.abs() <= limit);
        }
    }

    #[test]
    fn test_wrap_angle() {
        assert_eq!(wrap_angle(PI), PI);
        assert_abs_diff_eq!(wrap_angle(-0.5), -0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_angle(TAU + 0.25), 0.25, epsilon = 1e-12);
    }
}
