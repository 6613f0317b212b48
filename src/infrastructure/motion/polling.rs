//! Timer-driven motion source
//!
//! Polls an [`AttitudeProvider`] once per sampling period on the tokio
//! runtime. Ticks where the provider has no reading are skipped.

use crate::domain::models::{MotionReading, UpdateRate};
use crate::domain::motion::{MotionSource, SampleTick};
use crate::error::{Result, TrackerError};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

/// Something that can be asked for the current attitude at any time
pub trait AttitudeProvider: Send + Sync + 'static {
    fn read(&self) -> Option<MotionReading>;
}

pub struct PollingMotionSource<P> {
    provider: Arc<P>,
    task: Option<JoinHandle<()>>,
}

impl<P: AttitudeProvider> PollingMotionSource<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
            task: None,
        }
    }
}

impl<P: AttitudeProvider> MotionSource for PollingMotionSource<P> {
    fn start(&mut self, rate: UpdateRate, tick: SampleTick) -> Result<()> {
        self.stop();

        let runtime = Handle::try_current().map_err(|e| TrackerError::Motion(e.to_string()))?;
        let provider = self.provider.clone();
        let period = rate.period();

        self.task = Some(runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match provider.read() {
                    Some(reading) => tick.deliver(reading),
                    None => trace!("No attitude available, tick skipped"),
                }
            }
        }));

        debug!("Polling motion source every {:?}", period);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn current(&self) -> Option<MotionReading> {
        self.provider.read()
    }
}

impl<P> Drop for PollingMotionSource<P> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
