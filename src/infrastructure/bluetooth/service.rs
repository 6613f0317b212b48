//! Tracker Service Module
//!
//! Runs the peripheral state machine on a single task. Radio callbacks,
//! motion readings and host commands all arrive through one unbounded
//! channel, so the machine sees them serialized and never needs a lock.

use crate::domain::models::{ButtonId, MotionReading};
use crate::domain::motion::{MotionSink, SessionId};
use crate::error::{Result, TrackerError};
use crate::infrastructure::bluetooth::peripheral::PeripheralStateMachine;
use crate::infrastructure::bluetooth::radio::RadioEvent;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Everything the tracker's event loop reacts to
#[derive(Debug)]
pub enum TrackerEvent {
    Radio(RadioEvent),
    Motion {
        session: SessionId,
        reading: MotionReading,
    },
    ButtonPressed(ButtonId),
    RequestDisconnection(ButtonId),
    ClearRecording,
    Disable(oneshot::Sender<()>),
}

/// Producer side of the tracker channel, handed to radio and motion backends
#[derive(Clone)]
pub struct EventSender {
    sender: mpsc::UnboundedSender<TrackerEvent>,
}

impl EventSender {
    /// Forward a radio callback. Returns false once the tracker is gone.
    pub fn radio(&self, event: RadioEvent) -> bool {
        self.sender.send(TrackerEvent::Radio(event)).is_ok()
    }

    fn send(&self, event: TrackerEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|_| TrackerError::NotInitialized)
    }
}

impl MotionSink for EventSender {
    fn on_sample(&self, session: SessionId, reading: MotionReading) {
        let _ = self.sender.send(TrackerEvent::Motion { session, reading });
    }
}

pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<TrackerEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventSender { sender }, receiver)
}

/// Host-facing handle to a running tracker
#[derive(Clone)]
pub struct TrackerHandle {
    events: EventSender,
}

impl TrackerHandle {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    pub fn press_button(&self, button: ButtonId) -> Result<()> {
        self.events.send(TrackerEvent::ButtonPressed(button))
    }

    pub fn request_disconnection(&self, group: ButtonId) -> Result<()> {
        self.events.send(TrackerEvent::RequestDisconnection(group))
    }

    pub fn clear_recording(&self) -> Result<()> {
        self.events.send(TrackerEvent::ClearRecording)
    }

    /// Tear the tracker down and wait for the event loop to release its
    /// radio and motion handles.
    pub async fn disable(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.events.send(TrackerEvent::Disable(ack))?;
        done.await.map_err(|_| TrackerError::NotInitialized)
    }
}

pub struct TrackerService {
    machine: PeripheralStateMachine,
    receiver: mpsc::UnboundedReceiver<TrackerEvent>,
}

impl TrackerService {
    pub fn new(
        machine: PeripheralStateMachine,
        receiver: mpsc::UnboundedReceiver<TrackerEvent>,
    ) -> Self {
        Self { machine, receiver }
    }

    /// Process events until the tracker is disabled or every sender is gone
    pub async fn run(mut self) {
        info!("Tracker event loop started");
        while let Some(event) = self.receiver.recv().await {
            let disabling = matches!(event, TrackerEvent::Disable(_));
            if let Err(e) = apply(&mut self.machine, event) {
                report(&e);
            }
            if disabling {
                break;
            }
        }
        if self.machine.is_enabled() {
            self.machine.disable();
        }
        info!("Tracker event loop finished");
    }
}

/// Route one event to the state machine
pub(crate) fn apply(machine: &mut PeripheralStateMachine, event: TrackerEvent) -> Result<()> {
    match event {
        TrackerEvent::Radio(event) => machine.handle_event(event),
        TrackerEvent::Motion { session, reading } => machine.on_motion(session, reading),
        TrackerEvent::ButtonPressed(button) => machine.press_button(button),
        TrackerEvent::RequestDisconnection(group) => machine.request_disconnection(group),
        TrackerEvent::ClearRecording => machine.clear_recording(),
        TrackerEvent::Disable(ack) => {
            machine.disable();
            let _ = ack.send(());
            Ok(())
        }
    }
}

fn report(e: &TrackerError) {
    match e {
        TrackerError::UnhandledEvent { .. } | TrackerError::InvalidControlWrite { .. } => {
            warn!("{}", e)
        }
        TrackerError::SensorUnavailable => debug!("{}", e),
        _ => error!("{}", e),
    }
}
