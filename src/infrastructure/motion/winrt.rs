//! WinRT orientation sensor
//!
//! Pushes `OrientationSensor` readings as they arrive. User acceleration is
//! derived from the accelerometer by removing gravity rotated into the
//! device frame.

use crate::domain::models::{Acceleration, MotionReading, UpdateRate};
use crate::domain::motion::{MotionSource, SampleTick};
use crate::error::{Result, TrackerError};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use std::sync::Arc;
use tracing::{debug, warn};
use windows::Devices::Sensors::{
    Accelerometer, OrientationSensor, OrientationSensorReading,
    OrientationSensorReadingChangedEventArgs,
};
use windows::Foundation::TypedEventHandler;

fn motion_error(e: windows::core::Error) -> TrackerError {
    TrackerError::Motion(e.to_string())
}

fn attitude(reading: &OrientationSensorReading) -> windows::core::Result<UnitQuaternion<f64>> {
    let q = reading.Quaternion()?;
    Ok(UnitQuaternion::from_quaternion(Quaternion::new(
        f64::from(q.W()?),
        f64::from(q.X()?),
        f64::from(q.Y()?),
        f64::from(q.Z()?),
    )))
}

/// Accelerometer reading minus gravity, in g
fn user_acceleration(
    accelerometer: Option<&Accelerometer>,
    attitude: &UnitQuaternion<f64>,
) -> Acceleration {
    let Some(reading) = accelerometer.and_then(|a| a.GetCurrentReading().ok()) else {
        return Acceleration::zeros();
    };
    let measured = match (
        reading.AccelerationX(),
        reading.AccelerationY(),
        reading.AccelerationZ(),
    ) {
        (Ok(x), Ok(y), Ok(z)) => Vector3::new(x, y, z),
        _ => return Acceleration::zeros(),
    };
    let gravity = attitude.inverse_transform_vector(&Vector3::new(0.0, 0.0, -1.0));
    measured - gravity
}

fn reading_of(
    reading: &OrientationSensorReading,
    accelerometer: Option<&Accelerometer>,
) -> windows::core::Result<MotionReading> {
    let attitude = attitude(reading)?;
    Ok(MotionReading::new(
        attitude,
        user_acceleration(accelerometer, &attitude),
    ))
}

pub struct WinRtMotionSource {
    sensor: OrientationSensor,
    accelerometer: Option<Arc<Accelerometer>>,
    token: Option<i64>,
}

impl WinRtMotionSource {
    pub fn new() -> Result<Self> {
        let sensor = OrientationSensor::GetDefault().map_err(|_| TrackerError::SensorUnavailable)?;
        let accelerometer = match Accelerometer::GetDefault() {
            Ok(accelerometer) => Some(Arc::new(accelerometer)),
            Err(_) => {
                warn!("No accelerometer; user acceleration will be zero");
                None
            }
        };
        Ok(Self {
            sensor,
            accelerometer,
            token: None,
        })
    }
}

impl MotionSource for WinRtMotionSource {
    fn start(&mut self, rate: UpdateRate, tick: SampleTick) -> Result<()> {
        self.stop();

        let minimum = self.sensor.MinimumReportInterval().map_err(motion_error)?;
        let interval = (1000 / u32::from(rate.hz())).max(minimum);
        self.sensor.SetReportInterval(interval).map_err(motion_error)?;
        if let Some(accelerometer) = &self.accelerometer {
            let minimum = accelerometer.MinimumReportInterval().unwrap_or(interval);
            let _ = accelerometer.SetReportInterval(interval.max(minimum));
        }

        let accelerometer = self.accelerometer.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<OrientationSensor>,
                  args: windows::core::Ref<OrientationSensorReadingChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let reading = args.Reading()?;
                    tick.deliver(reading_of(&reading, accelerometer.as_deref())?);
                }
                Ok(())
            },
        );
        self.token = Some(self.sensor.ReadingChanged(&handler).map_err(motion_error)?);

        debug!("Orientation sensor reporting every {} ms", interval);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.sensor.RemoveReadingChanged(token) {
                warn!("Failed to detach orientation handler: {}", e);
            }
            let _ = self.sensor.SetReportInterval(0);
        }
    }

    fn current(&self) -> Option<MotionReading> {
        let reading = self.sensor.GetCurrentReading().ok()?;
        reading_of(&reading, self.accelerometer.as_deref()).ok()
    }
}

impl Drop for WinRtMotionSource {
    fn drop(&mut self) {
        self.stop();
    }
}
