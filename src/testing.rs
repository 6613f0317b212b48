//! Test doubles shared by the unit tests

use crate::domain::models::{
    ButtonId, HostEvent, MotionReading, PeripheralState, StatusMessage, UpdateRate,
};
use crate::domain::motion::{
    MotionSink, MotionSource, MotionSourceAdapter, SampleTick, SessionId, TimestampClock,
};
use crate::domain::observer::TrackerObserver;
use crate::error::{Result, TrackerError};
use crate::infrastructure::bluetooth::loopback::{LoopbackCentral, LoopbackRadio};
use crate::infrastructure::bluetooth::peripheral::{PeripheralConfig, PeripheralStateMachine};
use crate::infrastructure::bluetooth::protocol::CharacteristicId;
use crate::infrastructure::bluetooth::radio::RadioStack;
use crate::infrastructure::bluetooth::service::{self, TrackerEvent};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Default)]
struct FakeMotionState {
    starts: Vec<UpdateRate>,
    stops: usize,
    tick: Option<SampleTick>,
    retired: Option<SampleTick>,
    current: Option<MotionReading>,
}

/// Motion source whose readings are pushed by the test
pub struct FakeMotionSource {
    state: Arc<Mutex<FakeMotionState>>,
}

#[derive(Clone)]
pub struct FakeMotionControl {
    state: Arc<Mutex<FakeMotionState>>,
}

impl FakeMotionSource {
    pub fn new() -> (Self, FakeMotionControl) {
        let state = Arc::new(Mutex::new(FakeMotionState::default()));
        (
            Self {
                state: state.clone(),
            },
            FakeMotionControl { state },
        )
    }
}

impl MotionSource for FakeMotionSource {
    fn start(&mut self, rate: UpdateRate, tick: SampleTick) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.starts.push(rate);
        state.tick = Some(tick);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        if let Some(tick) = state.tick.take() {
            state.retired = Some(tick);
        }
    }

    fn current(&self) -> Option<MotionReading> {
        self.state.lock().unwrap().current
    }
}

impl FakeMotionControl {
    fn lock(&self) -> MutexGuard<'_, FakeMotionState> {
        self.state.lock().unwrap()
    }

    pub fn set_current(&self, reading: Option<MotionReading>) {
        self.lock().current = reading;
    }

    /// Make `reading` current and deliver it. Returns false when stopped.
    pub fn push(&self, reading: MotionReading) -> bool {
        let tick = {
            let mut state = self.lock();
            state.current = Some(reading);
            state.tick.clone()
        };
        match tick {
            Some(tick) => {
                tick.deliver(reading);
                true
            }
            None => false,
        }
    }

    /// Deliver through the tick of the last stopped session, as a late
    /// sensor callback would.
    pub fn push_stale(&self, reading: MotionReading) {
        let retired = self.lock().retired.clone();
        if let Some(tick) = retired {
            tick.deliver(reading);
        }
    }

    pub fn started_rate(&self) -> Option<UpdateRate> {
        self.lock().starts.last().copied()
    }

    pub fn stop_count(&self) -> usize {
        self.lock().stops
    }

    pub fn is_running(&self) -> bool {
        self.lock().tick.is_some()
    }
}

pub struct NullSink;

impl MotionSink for NullSink {
    fn on_sample(&self, _session: SessionId, _reading: MotionReading) {}
}

/// Observer that keeps every host event
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<HostEvent>>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: HostEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl TrackerObserver for RecordingObserver {
    fn on_status(&self, status: StatusMessage) {
        self.push(HostEvent::Status(status));
    }

    fn on_state_changed(&self, state: PeripheralState) {
        self.push(HostEvent::StateChanged(state));
    }

    fn on_sample_count(&self, count: usize) {
        self.push(HostEvent::SampleCount(count));
    }

    fn on_button_notified(&self, button: ButtonId) {
        self.push(HostEvent::ButtonNotified(button));
    }
}

/// A state machine wired to a loopback radio and a fake motion source.
/// Events are processed synchronously by [`Harness::pump`].
pub struct Harness {
    pub machine: PeripheralStateMachine,
    pub central: LoopbackCentral,
    pub motion: FakeMotionControl,
    pub host: RecordingObserver,
    receiver: mpsc::UnboundedReceiver<TrackerEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(PeripheralConfig::default())
    }

    pub fn with_config(config: PeripheralConfig) -> Self {
        Self::with_radio(config, |radio| Box::new(radio))
    }

    /// Like [`Harness::with_config`], with the loopback radio wrapped by `wrap`
    pub fn with_radio(
        config: PeripheralConfig,
        wrap: impl FnOnce(LoopbackRadio) -> Box<dyn RadioStack>,
    ) -> Self {
        let (events, receiver) = service::channel();
        let (radio, central) = LoopbackRadio::new(events.clone());
        let (source, motion) = FakeMotionSource::new();
        let adapter = MotionSourceAdapter::new(
            Box::new(source),
            Arc::new(events),
            TimestampClock::SampleIndex,
        );
        let host = RecordingObserver::default();
        let machine =
            PeripheralStateMachine::new(config, wrap(radio), adapter, Box::new(host.clone()));

        Self {
            machine,
            central,
            motion,
            host,
            receiver,
        }
    }

    /// Process one queued event, returning its error if any
    pub fn pump_one(&mut self) -> Option<TrackerError> {
        let event = self.receiver.try_recv().ok()?;
        service::apply(&mut self.machine, event).err()
    }

    /// Process queued events until the channel is empty
    pub fn pump(&mut self) -> Vec<TrackerError> {
        let mut errors = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            if let Err(e) = service::apply(&mut self.machine, event) {
                errors.push(e);
            }
        }
        errors
    }

    /// Walk the lifecycle up to `state` through the loopback central
    pub fn drive_to(&mut self, state: PeripheralState) {
        use PeripheralState::*;

        if state == Idle {
            return;
        }
        self.central.power_on();
        if state == Initializing {
            self.pump_one();
            assert_eq!(self.machine.state(), Initializing);
            return;
        }
        self.pump();
        if state == Advertising {
            assert_eq!(self.machine.state(), Advertising);
            return;
        }

        self.central.connect();
        self.pump();
        if state == Connected {
            assert_eq!(self.machine.state(), Connected);
            return;
        }

        self.central.subscribe(CharacteristicId::Orientation);
        self.pump();
        assert_eq!(self.machine.state(), Measuring);
    }
}
