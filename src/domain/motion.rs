//! Motion Source Adapter
//!
//! Wraps a motion/orientation sensor behind [`MotionSource`], applies the
//! heading correction and stamps every reading with a session timestamp.
//!
//! Sources deliver raw readings through a [`SampleTick`]. Each `start()` opens
//! a new session; readings from an earlier session are discarded by
//! [`MotionSourceAdapter::accept`], so nothing produced before `stop()`
//! returned can reach the radio afterwards.

use crate::domain::models::{MotionReading, Orientation, Sample, UpdateRate};
use crate::error::{Result, TrackerError};
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Sampling session counter
pub type SessionId = u64;

/// Consumer of raw readings. The tracker funnels them into its event loop.
pub trait MotionSink: Send + Sync {
    fn on_sample(&self, session: SessionId, reading: MotionReading);
}

/// Delivery handle given to a source for one sampling session
#[derive(Clone)]
pub struct SampleTick {
    session: SessionId,
    sink: Arc<dyn MotionSink>,
}

impl SampleTick {
    pub fn new(session: SessionId, sink: Arc<dyn MotionSink>) -> Self {
        Self { session, sink }
    }

    /// Deliver one reading
    pub fn deliver(&self, reading: MotionReading) {
        self.sink.on_sample(self.session, reading);
    }
}

/// A device producing attitude and acceleration readings.
///
/// A source may push readings from its own callback or be polled on a timer
/// (see `PollingMotionSource`); either way it calls [`SampleTick::deliver`]
/// once per tick.
pub trait MotionSource: Send {
    fn start(&mut self, rate: UpdateRate, tick: SampleTick) -> Result<()>;

    /// Halt delivery. Must be idempotent.
    fn stop(&mut self);

    /// Latest raw reading, if the sensor has one
    fn current(&self) -> Option<MotionReading>;
}

/// How sample timestamps are derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampClock {
    /// `index / rate`, deterministic
    #[default]
    SampleIndex,
    /// Wall-clock time since the first sample of the session
    Elapsed,
}

/// Timestamp of the `index`-th sample of a session at `rate`, rounded to the
/// nearest microsecond and wrapped modulo 2^32.
pub fn sample_timestamp(index: u64, rate: UpdateRate) -> u32 {
    let hz = u128::from(rate.hz());
    let micros = (u128::from(index) * 1_000_000 + hz / 2) / hz;
    wrap_micros(micros)
}

fn wrap_micros(micros: u128) -> u32 {
    (micros % (1u128 << 32)) as u32
}

pub struct MotionSourceAdapter {
    source: Box<dyn MotionSource>,
    sink: Arc<dyn MotionSink>,
    clock: TimestampClock,
    rate: UpdateRate,
    heading_offset: Orientation,
    session: SessionId,
    active: bool,
    sample_index: u64,
    session_start: Option<Instant>,
}

impl MotionSourceAdapter {
    pub fn new(
        source: Box<dyn MotionSource>,
        sink: Arc<dyn MotionSink>,
        clock: TimestampClock,
    ) -> Self {
        Self {
            source,
            sink,
            clock,
            rate: UpdateRate::DEFAULT,
            heading_offset: UnitQuaternion::identity(),
            session: 0,
            active: false,
            sample_index: 0,
            session_start: None,
        }
    }

    /// Begin a new sampling session at `rate`. Restarts if already sampling.
    pub fn start(&mut self, rate: UpdateRate) -> Result<()> {
        if self.active {
            self.stop();
        }

        self.rate = rate;
        self.session += 1;
        self.restart_clock();

        let tick = SampleTick::new(self.session, self.sink.clone());
        self.source.start(rate, tick)?;
        self.active = true;

        info!("Motion sampling started at {} (session {})", rate, self.session);
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.source.stop();
        self.active = false;
        info!("Motion sampling stopped (session {})", self.session);
    }

    /// Change the rate used by the next `start()`.
    pub fn set_rate(&mut self, rate: UpdateRate) {
        self.rate = rate;
    }

    pub fn rate(&self) -> UpdateRate {
        self.rate
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn heading_offset(&self) -> Orientation {
        self.heading_offset
    }

    /// Redefine zero yaw as the sensor's current heading.
    pub fn reset_heading(&mut self) -> Result<()> {
        let reading = self.source.current().ok_or(TrackerError::SensorUnavailable)?;
        let yaw = reading.yaw();
        self.heading_offset = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -yaw);
        debug!("Heading offset reset (yaw {:.4} rad)", yaw);
        Ok(())
    }

    /// Timestamps of the following samples start again from zero.
    pub fn restart_clock(&mut self) {
        self.sample_index = 0;
        self.session_start = None;
    }

    /// Turn a raw reading into a sample. Readings from a stopped or earlier
    /// session yield `None`.
    pub fn accept(&mut self, session: SessionId, reading: MotionReading) -> Option<Sample> {
        if !self.active || session != self.session {
            trace!(
                "Dropping reading from session {} (current {})",
                session,
                self.session
            );
            return None;
        }

        let timestamp_micros = match self.clock {
            TimestampClock::SampleIndex => sample_timestamp(self.sample_index, self.rate),
            TimestampClock::Elapsed => match self.session_start {
                Some(start) => wrap_micros(start.elapsed().as_micros()),
                None => {
                    self.session_start = Some(Instant::now());
                    0
                }
            },
        };
        self.sample_index += 1;

        Some(Sample {
            timestamp_micros,
            orientation: self.heading_offset * reading.attitude,
            acceleration: reading.user_acceleration,
        })
    }
}

impl Drop for MotionSourceAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Acceleration;
    use crate::testing::{FakeMotionSource, NullSink};
    use approx::assert_abs_diff_eq;
    use std::time::Duration;

    fn adapter() -> (MotionSourceAdapter, crate::testing::FakeMotionControl) {
        adapter_with(TimestampClock::SampleIndex)
    }

    fn adapter_with(clock: TimestampClock) -> (MotionSourceAdapter, crate::testing::FakeMotionControl) {
        let (source, control) = FakeMotionSource::new();
        let adapter = MotionSourceAdapter::new(Box::new(source), Arc::new(NullSink), clock);
        (adapter, control)
    }

    fn reading(roll: f64, pitch: f64, yaw: f64) -> MotionReading {
        MotionReading::new(
            UnitQuaternion::from_euler_angles(roll, pitch, yaw),
            Acceleration::new(0.0, 0.0, 0.1),
        )
    }

    #[test]
    fn test_timestamps_at_60_hz() {
        let rate = UpdateRate::new(60).unwrap();
        let timestamps: Vec<u32> = (0..5).map(|i| sample_timestamp(i, rate)).collect();
        assert_eq!(timestamps, vec![0, 16667, 33333, 50000, 66667]);
    }

    #[test]
    fn test_timestamps_wrap_at_u32() {
        let rate = UpdateRate::new(1).unwrap();
        // 4295 s is just past 2^32 microseconds
        assert_eq!(sample_timestamp(4294, rate), 4_294_000_000);
        assert_eq!(sample_timestamp(4295, rate), (4_295_000_000u64 - (1u64 << 32)) as u32);
    }

    #[test]
    fn test_accept_stamps_consecutive_samples() {
        let (mut adapter, _control) = adapter();
        adapter.start(UpdateRate::new(60).unwrap()).unwrap();
        let session = adapter.session();

        let stamps: Vec<u32> = (0..5)
            .filter_map(|_| adapter.accept(session, reading(0.0, 0.0, 0.0)))
            .map(|s| s.timestamp_micros)
            .collect();
        assert_eq!(stamps, vec![0, 16667, 33333, 50000, 66667]);
    }

    #[test]
    fn test_elapsed_clock_restarts_each_session() {
        let (mut adapter, _control) = adapter_with(TimestampClock::Elapsed);
        adapter.start(UpdateRate::DEFAULT).unwrap();
        let session = adapter.session();

        let mut stamp = || {
            adapter
                .accept(session, reading(0.0, 0.0, 0.0))
                .unwrap()
                .timestamp_micros
        };
        assert_eq!(stamp(), 0);
        std::thread::sleep(Duration::from_millis(5));
        let second = stamp();
        let third = stamp();
        assert!(second >= 5_000);
        assert!(third >= second);

        adapter.restart_clock();
        assert_eq!(
            adapter.accept(session, reading(0.0, 0.0, 0.0)).unwrap().timestamp_micros,
            0
        );

        std::thread::sleep(Duration::from_millis(5));
        adapter.start(UpdateRate::DEFAULT).unwrap();
        assert_eq!(
            adapter
                .accept(adapter.session(), reading(0.0, 0.0, 0.0))
                .unwrap()
                .timestamp_micros,
            0
        );
    }

    #[test]
    fn test_stale_session_is_dropped() {
        let (mut adapter, _control) = adapter();
        adapter.start(UpdateRate::DEFAULT).unwrap();
        let first = adapter.session();
        adapter.start(UpdateRate::DEFAULT).unwrap();

        assert!(adapter.accept(first, reading(0.0, 0.0, 0.0)).is_none());
        assert!(adapter.accept(adapter.session(), reading(0.0, 0.0, 0.0)).is_some());

        adapter.stop();
        assert!(adapter.accept(adapter.session(), reading(0.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (mut adapter, control) = adapter();
        adapter.stop();
        assert_eq!(control.stop_count(), 0);

        adapter.start(UpdateRate::DEFAULT).unwrap();
        adapter.stop();
        adapter.stop();
        assert_eq!(control.stop_count(), 1);
        assert!(!control.is_running());
    }

    #[test]
    fn test_set_rate_applies_on_next_start() {
        let (mut adapter, control) = adapter();
        adapter.start(UpdateRate::DEFAULT).unwrap();
        adapter.set_rate(UpdateRate::new(10).unwrap());
        assert_eq!(control.started_rate(), Some(UpdateRate::DEFAULT));

        let rate = adapter.rate();
        adapter.start(rate).unwrap();
        assert_eq!(control.started_rate(), UpdateRate::new(10));
    }

    #[test]
    fn test_reset_heading_zeroes_yaw() {
        let (mut adapter, control) = adapter();
        adapter.start(UpdateRate::DEFAULT).unwrap();

        for yaw in [-2.8, -0.4, 0.0, 1.3, 3.0] {
            let raw = reading(0.2, -0.35, yaw);
            control.set_current(Some(raw));
            adapter.reset_heading().unwrap();

            let sample = adapter.accept(adapter.session(), raw).unwrap();
            let (roll, pitch, corrected_yaw) = sample.orientation.euler_angles();
            assert_abs_diff_eq!(corrected_yaw, 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(roll, 0.2, epsilon = 1e-9);
            assert_abs_diff_eq!(pitch, -0.35, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_reset_heading_without_reading() {
        let (mut adapter, _control) = adapter();
        assert!(matches!(
            adapter.reset_heading(),
            Err(TrackerError::SensorUnavailable)
        ));
        assert_eq!(adapter.heading_offset(), UnitQuaternion::identity());
    }
}
