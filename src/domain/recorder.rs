//! In-memory log of streamed samples, each tagged with the last pressed button.

use crate::domain::models::{Acceleration, ButtonId, Orientation, Sample};

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Seconds since the start of the session
    pub timestamp: f64,
    pub orientation: Orientation,
    pub acceleration: Acceleration,
    /// Button pressed since the previous sample, 0 if none
    pub button_id: ButtonId,
}

#[derive(Debug, Default)]
pub struct MotionRecorder {
    measurements: Vec<Measurement>,
    button_id: ButtonId,
}

impl MotionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample and return the number of recorded measurements
    pub fn record(&mut self, sample: &Sample) -> usize {
        self.measurements.push(Measurement {
            timestamp: f64::from(sample.timestamp_micros) / 1_000_000.0,
            orientation: sample.orientation,
            acceleration: sample.acceleration,
            button_id: self.button_id,
        });
        self.button_id = 0;
        self.measurements.len()
    }

    /// The id is attached to the next recorded sample only.
    pub fn button_pressed(&mut self, button_id: ButtonId) {
        self.button_id = button_id;
    }

    pub fn clear(&mut self) {
        self.measurements.clear();
        self.button_id = 0;
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::UnitQuaternion;

    fn sample(timestamp_micros: u32) -> Sample {
        Sample {
            timestamp_micros,
            orientation: UnitQuaternion::identity(),
            acceleration: Acceleration::zeros(),
        }
    }

    #[test]
    fn test_button_tags_next_sample_only() {
        let mut recorder = MotionRecorder::new();
        recorder.record(&sample(0));
        recorder.button_pressed(3);
        recorder.record(&sample(16667));
        let count = recorder.record(&sample(33333));

        assert_eq!(count, 3);
        let buttons: Vec<ButtonId> = recorder.measurements().iter().map(|m| m.button_id).collect();
        assert_eq!(buttons, vec![0, 3, 0]);
        assert!((recorder.measurements()[1].timestamp - 0.016667).abs() < 1e-9);
    }

    #[test]
    fn test_clear() {
        let mut recorder = MotionRecorder::new();
        recorder.button_pressed(1);
        recorder.record(&sample(0));
        recorder.button_pressed(2);
        recorder.clear();

        assert!(recorder.is_empty());
        recorder.record(&sample(0));
        assert_eq!(recorder.measurements()[0].button_id, 0);
    }
}
