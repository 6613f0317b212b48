//! Peripheral State Machine
//!
//! Owns the tracker lifecycle and every piece of mutable peripheral state.
//! Radio callbacks arrive as [`RadioEvent`]s, one at a time, from the
//! tracker's event loop:
//!
//! ```text
//!   Idle ──RadioReady──▶ Initializing ──ServiceAdded (queue empty)──▶ Advertising
//!                          ▲      │                                  │     ▲
//!                          └──────┘ ServiceAdded (queue non-empty)   │     │ CentralDisconnected
//!                                                   CentralConnected ▼     │
//!                      Measuring ◀──SubscribedTo(orientation)──── Connected
//!                                ──UnsubscribedFrom(orientation)──▶
//! ```
//!
//! [`transition`] is the complete table. A lookup miss is an unhandled event:
//! it is reported and the state does not change. Choice-points (power state,
//! pending queue, in-flight characteristic) are resolved within the same
//! `handle_event` call that received the event.

use crate::domain::models::{
    ButtonId, MessageSeverity, MotionReading, Orientation, PeripheralState, StatusMessage,
    UpdateRate,
};
use crate::domain::motion::{MotionSourceAdapter, SessionId};
use crate::domain::observer::TrackerObserver;
use crate::domain::recorder::MotionRecorder;
use crate::domain::settings::Settings;
use crate::error::{Result, TrackerError};
use crate::infrastructure::bluetooth::gatt::{GattSurfaceBuilder, PendingServiceQueue};
use crate::infrastructure::bluetooth::protocol::{self, CharacteristicId, ServiceId};
use crate::infrastructure::bluetooth::radio::{
    Advertisement, AttError, AttResponse, PowerState, RadioError, RadioEvent, RadioStack,
};
use tracing::{debug, info, trace, warn};

/// Static configuration of the peripheral
#[derive(Debug, Clone)]
pub struct PeripheralConfig {
    pub local_name: String,
    pub update_rate: UpdateRate,
    pub surface: GattSurfaceBuilder,
    pub record_samples: bool,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            local_name: protocol::LOCAL_NAME.to_string(),
            update_rate: UpdateRate::DEFAULT,
            surface: GattSurfaceBuilder::new(),
            record_samples: false,
        }
    }
}

impl From<&Settings> for PeripheralConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            local_name: settings.local_name.clone(),
            update_rate: settings.update_rate,
            surface: GattSurfaceBuilder::new()
                .with_user_interface(settings.enable_user_interface_service),
            record_samples: settings.record_samples,
        }
    }
}

/// Event kinds as seen by the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    RadioReady,
    ServiceAdded,
    CentralConnected,
    CentralDisconnected,
    SubscribedTo(CharacteristicId),
    UnsubscribedFrom(CharacteristicId),
    ReadRequested,
    WriteRequested,
}

impl Trigger {
    pub fn of(event: &RadioEvent) -> Self {
        match event {
            RadioEvent::RadioReady => Self::RadioReady,
            RadioEvent::ServiceAdded { .. } => Self::ServiceAdded,
            RadioEvent::CentralConnected => Self::CentralConnected,
            RadioEvent::CentralDisconnected => Self::CentralDisconnected,
            RadioEvent::SubscribedTo(c) => Self::SubscribedTo(*c),
            RadioEvent::UnsubscribedFrom(c) => Self::UnsubscribedFrom(*c),
            RadioEvent::ReadRequested { .. } => Self::ReadRequested,
            RadioEvent::WriteRequested { .. } => Self::WriteRequested,
        }
    }

    /// Every trigger the machine can observe after normalization
    pub fn all() -> Vec<Trigger> {
        let mut triggers = vec![
            Self::RadioReady,
            Self::ServiceAdded,
            Self::CentralConnected,
            Self::CentralDisconnected,
            Self::ReadRequested,
            Self::WriteRequested,
        ];
        for characteristic in CharacteristicId::ALL {
            if characteristic != CharacteristicId::Disconnection {
                triggers.push(Self::SubscribedTo(characteristic));
                triggers.push(Self::UnsubscribedFrom(characteristic));
            }
        }
        triggers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Choice-point: initialize if the radio is powered on
    CheckPower,
    /// Choice-point: register the next service or start advertising
    ServiceRegistered,
    StopAdvertising,
    ResumeAdvertising,
    StartMeasuring,
    StopMeasuring,
    StopMeasuringAndAdvertise,
    /// Choice-point on the in-flight characteristic while connected
    Configure,
    /// Choice-point on the in-flight characteristic while measuring
    ResetHeading,
    RespondRead,
    Ignore,
}

/// The transition table. `None` means the event is not valid in `state`.
pub fn transition(state: PeripheralState, trigger: Trigger) -> Option<Action> {
    use CharacteristicId::{ButtonPressed, Orientation};
    use PeripheralState::*;

    let action = match (state, trigger) {
        (Idle, Trigger::RadioReady) => Action::CheckPower,

        (Initializing, Trigger::ServiceAdded) => Action::ServiceRegistered,

        (Advertising, Trigger::CentralConnected) => Action::StopAdvertising,
        (Advertising, Trigger::UnsubscribedFrom(_)) => Action::Ignore,

        (Connected, Trigger::SubscribedTo(Orientation)) => Action::StartMeasuring,
        (Connected, Trigger::WriteRequested) => Action::Configure,
        (Connected, Trigger::CentralDisconnected) => Action::ResumeAdvertising,

        (Measuring, Trigger::WriteRequested) => Action::ResetHeading,
        (Measuring, Trigger::CentralDisconnected) => Action::StopMeasuringAndAdvertise,
        (Measuring, Trigger::UnsubscribedFrom(Orientation)) => Action::StopMeasuring,

        (Connected | Measuring, Trigger::ReadRequested) => Action::RespondRead,
        (Connected | Measuring, Trigger::SubscribedTo(ButtonPressed)) => Action::Ignore,
        (Connected | Measuring, Trigger::UnsubscribedFrom(ButtonPressed)) => Action::Ignore,

        _ => return None,
    };
    Some(action)
}

/// Stacks without link callbacks signal a connection by the central
/// subscribing to the disconnection characteristic.
fn normalize(event: RadioEvent) -> RadioEvent {
    match event {
        RadioEvent::SubscribedTo(CharacteristicId::Disconnection) => RadioEvent::CentralConnected,
        RadioEvent::UnsubscribedFrom(CharacteristicId::Disconnection) => {
            RadioEvent::CentralDisconnected
        }
        other => other,
    }
}

pub struct PeripheralStateMachine {
    state: PeripheralState,
    pending: PendingServiceQueue,
    registered: Vec<ServiceId>,
    update_rate: UpdateRate,
    in_flight: Option<CharacteristicId>,
    local_name: String,
    surface: GattSurfaceBuilder,
    recorder: Option<MotionRecorder>,
    radio: Option<Box<dyn RadioStack>>,
    motion: Option<MotionSourceAdapter>,
    observer: Box<dyn TrackerObserver>,
}

impl PeripheralStateMachine {
    pub fn new(
        config: PeripheralConfig,
        radio: Box<dyn RadioStack>,
        mut motion: MotionSourceAdapter,
        observer: Box<dyn TrackerObserver>,
    ) -> Self {
        motion.set_rate(config.update_rate);
        Self {
            state: PeripheralState::Idle,
            pending: PendingServiceQueue::new(),
            registered: Vec::new(),
            update_rate: config.update_rate,
            in_flight: None,
            local_name: config.local_name,
            surface: config.surface,
            recorder: config.record_samples.then(MotionRecorder::new),
            radio: Some(radio),
            motion: Some(motion),
            observer,
        }
    }

    pub fn state(&self) -> PeripheralState {
        self.state
    }

    pub fn update_rate(&self) -> UpdateRate {
        self.update_rate
    }

    pub fn pending_services(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> Option<CharacteristicId> {
        self.in_flight
    }

    pub fn heading_offset(&self) -> Option<Orientation> {
        self.motion.as_ref().map(MotionSourceAdapter::heading_offset)
    }

    pub fn recorder(&self) -> Option<&MotionRecorder> {
        self.recorder.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.radio.is_some()
    }

    /// Process one radio-stack event to completion
    pub fn handle_event(&mut self, event: RadioEvent) -> Result<()> {
        if self.radio.is_none() {
            return Err(TrackerError::NotInitialized);
        }

        let event = normalize(event);
        if let RadioEvent::ReadRequested { characteristic, .. }
        | RadioEvent::WriteRequested { characteristic, .. } = &event
        {
            self.in_flight = Some(*characteristic);
        }

        let trigger = Trigger::of(&event);
        let Some(action) = transition(self.state, trigger) else {
            self.refuse(&event);
            return Err(TrackerError::UnhandledEvent {
                state: self.state,
                event: format!("{:?}", trigger),
            });
        };

        debug!("{:?} in {} -> {:?}", trigger, self.state, action);
        let (next, outcome) = self.perform(action, event);
        self.enter(next);
        outcome
    }

    /// Stream one motion reading while measuring
    pub fn on_motion(&mut self, session: SessionId, reading: MotionReading) -> Result<()> {
        let motion = self.motion.as_mut().ok_or(TrackerError::NotInitialized)?;
        if self.state != PeripheralState::Measuring {
            trace!("Reading outside Measuring dropped");
            return Ok(());
        }
        let Some(sample) = motion.accept(session, reading) else {
            return Ok(());
        };

        if let Some(recorder) = self.recorder.as_mut() {
            let count = recorder.record(&sample);
            self.observer.on_sample_count(count);
        }

        if !self.registered.contains(&ServiceId::Measurement) {
            trace!("Measurement service not registered, sample dropped");
            return Ok(());
        }

        let packet = protocol::encode_sample(&sample);
        trace!("Notify orientation t={}us", sample.timestamp_micros);
        let radio = self.radio.as_mut().ok_or(TrackerError::NotInitialized)?;
        radio.notify(CharacteristicId::Orientation, &packet)?;
        Ok(())
    }

    /// Post a button event on the user-interface characteristic
    pub fn press_button(&mut self, button: ButtonId) -> Result<()> {
        let radio = self.radio.as_mut().ok_or(TrackerError::NotInitialized)?;

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.button_pressed(button);
        }

        if !self.registered.contains(&ServiceId::UserInterface) {
            debug!("Button {} pressed without user-interface service", button);
            return Ok(());
        }

        radio.notify(CharacteristicId::ButtonPressed, &protocol::encode_button(button))?;
        self.observer.on_button_notified(button);
        Ok(())
    }

    /// Ask the connected central to drop the link
    pub fn request_disconnection(&mut self, group: ButtonId) -> Result<()> {
        let radio = self.radio.as_mut().ok_or(TrackerError::NotInitialized)?;
        if !matches!(
            self.state,
            PeripheralState::Connected | PeripheralState::Measuring
        ) {
            return Err(TrackerError::UnhandledEvent {
                state: self.state,
                event: "RequestDisconnection".to_string(),
            });
        }

        radio.notify(CharacteristicId::Disconnection, &protocol::encode_button(group))?;
        info!("Disconnection requested (group {})", group);
        Ok(())
    }

    pub fn clear_recording(&mut self) -> Result<()> {
        let motion = self.motion.as_mut().ok_or(TrackerError::NotInitialized)?;
        motion.restart_clock();
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.clear();
            self.observer.on_sample_count(0);
        }
        Ok(())
    }

    /// Stop sampling and release the radio and motion handles.
    pub fn disable(&mut self) {
        if let Some(mut motion) = self.motion.take() {
            motion.stop();
        }
        if let Some(mut radio) = self.radio.take() {
            if self.state == PeripheralState::Advertising {
                if let Err(e) = radio.stop_advertising() {
                    warn!("Failed to stop advertising during teardown: {}", e);
                }
            }
        }

        self.pending.clear();
        self.registered.clear();
        self.in_flight = None;
        self.enter(PeripheralState::Idle);
        self.status("Tracker disabled", MessageSeverity::Info);
    }

    fn perform(&mut self, action: Action, event: RadioEvent) -> (PeripheralState, Result<()>) {
        use PeripheralState::*;

        match action {
            Action::CheckPower => self.check_power(),
            Action::ServiceRegistered => self.service_registered(event),
            Action::StopAdvertising => (Connected, self.stop_advertising()),
            Action::ResumeAdvertising => (Advertising, self.start_advertising()),
            Action::StartMeasuring => (Measuring, self.start_measuring()),
            Action::StopMeasuring => (Connected, self.stop_measuring()),
            Action::StopMeasuringAndAdvertise => {
                let stopped = self.stop_measuring();
                let advertising = self.start_advertising();
                (Advertising, stopped.and(advertising))
            }
            Action::Configure => (Connected, self.configure(event)),
            Action::ResetHeading => (Measuring, self.reset_heading(event)),
            Action::RespondRead => (self.state, self.respond_read(event)),
            Action::Ignore => (self.state, Ok(())),
        }
    }

    fn check_power(&mut self) -> (PeripheralState, Result<()>) {
        let powered = self
            .radio
            .as_ref()
            .map(|radio| radio.power_state() == PowerState::PoweredOn)
            .unwrap_or(false);

        if !powered {
            info!("Radio is not powered on, staying idle");
            self.status("Bluetooth is off", MessageSeverity::Warning);
            return (PeripheralState::Idle, Ok(()));
        }

        self.pending = self.surface.build();
        self.registered.clear();
        info!("Registering {} services", self.pending.len());
        self.register_pending(Ok(()))
    }

    /// Hand the next pending service to the radio, or advertise once the
    /// queue is drained. A service the radio refuses outright counts as a
    /// failed registration. A radio that is off sends the machine back to Idle.
    fn register_pending(&mut self, mut outcome: Result<()>) -> (PeripheralState, Result<()>) {
        loop {
            let Some(service) = self.pending.front() else {
                return match self.start_advertising() {
                    Err(TrackerError::Radio(RadioError::PoweredOff)) => self.powered_down(outcome),
                    advertising => (PeripheralState::Advertising, outcome.and(advertising)),
                };
            };
            let Some(radio) = self.radio.as_mut() else {
                return (self.state, Err(TrackerError::NotInitialized));
            };

            let uuid = service.uuid();
            debug!("Adding service {}", uuid);
            match radio.register_service(service) {
                Ok(()) => return (PeripheralState::Initializing, outcome),
                Err(RadioError::PoweredOff) => return self.powered_down(outcome),
                Err(e) => {
                    self.pending.pop_front();
                    outcome = outcome.and(Err(TrackerError::ServiceRegistrationFailed {
                        service: uuid,
                        reason: e.to_string(),
                    }));
                }
            }
        }
    }

    fn powered_down(&mut self, outcome: Result<()>) -> (PeripheralState, Result<()>) {
        info!("Radio powered off during initialization");
        self.pending.clear();
        self.registered.clear();
        self.status("Bluetooth is off", MessageSeverity::Warning);
        (
            PeripheralState::Idle,
            outcome.and(Err(RadioError::PoweredOff.into())),
        )
    }

    fn service_registered(&mut self, event: RadioEvent) -> (PeripheralState, Result<()>) {
        let RadioEvent::ServiceAdded { service, error } = event else {
            return (self.state, Ok(()));
        };

        if let Some(descriptor) = self.pending.pop_front() {
            if descriptor.uuid() != service {
                warn!(
                    "Service {} reported while {} was pending",
                    service,
                    descriptor.uuid()
                );
            }
            if error.is_none() {
                self.registered.push(descriptor.id);
            }
        }

        // Registration is not retried; initialization proceeds either way.
        let outcome = match error {
            Some(reason) => Err(TrackerError::ServiceRegistrationFailed { service, reason }),
            None => Ok(()),
        };

        self.register_pending(outcome)
    }

    fn start_advertising(&mut self) -> Result<()> {
        let advertisement = Advertisement {
            local_name: self.local_name.clone(),
            service_uuids: self.surface.advertised_uuids(),
        };
        let radio = self.radio.as_mut().ok_or(TrackerError::NotInitialized)?;
        radio.start_advertising(&advertisement)?;
        self.status(
            format!("Advertising as {}", self.local_name),
            MessageSeverity::Info,
        );
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<()> {
        let radio = self.radio.as_mut().ok_or(TrackerError::NotInitialized)?;
        radio.stop_advertising()?;
        self.status("Central connected", MessageSeverity::Success);
        Ok(())
    }

    fn start_measuring(&mut self) -> Result<()> {
        let motion = self.motion.as_mut().ok_or(TrackerError::NotInitialized)?;
        motion.start(self.update_rate)?;
        self.status(
            format!("Streaming at {}", self.update_rate),
            MessageSeverity::Info,
        );
        Ok(())
    }

    fn stop_measuring(&mut self) -> Result<()> {
        let motion = self.motion.as_mut().ok_or(TrackerError::NotInitialized)?;
        motion.stop();
        Ok(())
    }

    fn configure(&mut self, event: RadioEvent) -> Result<()> {
        let RadioEvent::WriteRequested { request, value, .. } = event else {
            return Ok(());
        };

        if self.in_flight != Some(CharacteristicId::UpdateRate) {
            debug!("Write to {:?} ignored while connected", self.in_flight);
            return self.respond(request, AttResponse::Success(Vec::new()));
        }

        match protocol::decode_update_rate(&value) {
            Ok(rate) => {
                self.respond(request, AttResponse::Success(Vec::new()))?;
                self.update_rate = rate;
                if let Some(motion) = self.motion.as_mut() {
                    motion.set_rate(rate);
                }
                info!("Update rate set to {}", rate);
                Ok(())
            }
            Err(source) => {
                let refused = AttResponse::Failure(AttError::InvalidAttributeValueLength);
                self.respond(request, refused)?;
                Err(TrackerError::InvalidControlWrite {
                    characteristic: CharacteristicId::UpdateRate,
                    source,
                })
            }
        }
    }

    fn reset_heading(&mut self, event: RadioEvent) -> Result<()> {
        let RadioEvent::WriteRequested { request, value, .. } = event else {
            return Ok(());
        };

        if self.in_flight != Some(CharacteristicId::ResetHeading) {
            debug!("Write to {:?} ignored while measuring", self.in_flight);
            return self.respond(request, AttResponse::Success(Vec::new()));
        }

        if let Err(source) = protocol::decode_reset_heading(&value) {
            let refused = AttResponse::Failure(AttError::InvalidAttributeValueLength);
            self.respond(request, refused)?;
            return Err(TrackerError::InvalidControlWrite {
                characteristic: CharacteristicId::ResetHeading,
                source,
            });
        }

        self.respond(request, AttResponse::Success(Vec::new()))?;
        let motion = self.motion.as_mut().ok_or(TrackerError::NotInitialized)?;
        motion.reset_heading()?;
        self.status("Heading reset", MessageSeverity::Info);
        Ok(())
    }

    fn respond_read(&mut self, event: RadioEvent) -> Result<()> {
        let RadioEvent::ReadRequested { request, .. } = event else {
            return Ok(());
        };

        let response = match self.in_flight {
            Some(CharacteristicId::UpdateRate) => {
                AttResponse::Success(protocol::encode_update_rate(self.update_rate).to_vec())
            }
            _ => AttResponse::Failure(AttError::ReadNotPermitted),
        };
        self.respond(request, response)
    }

    fn respond(&mut self, request: u64, response: AttResponse) -> Result<()> {
        let radio = self.radio.as_mut().ok_or(TrackerError::NotInitialized)?;
        radio.respond(request, response)?;
        Ok(())
    }

    /// Answer a request that arrived in a state that cannot serve it
    fn refuse(&mut self, event: &RadioEvent) {
        let (request, error) = match event {
            RadioEvent::ReadRequested { request, .. } => (*request, AttError::ReadNotPermitted),
            RadioEvent::WriteRequested { request, .. } => (*request, AttError::WriteNotPermitted),
            _ => return,
        };
        if let Err(e) = self.respond(request, AttResponse::Failure(error)) {
            warn!("Failed to refuse request {}: {}", request, e);
        }
    }

    fn enter(&mut self, next: PeripheralState) {
        if next == self.state {
            return;
        }
        info!("State {} -> {}", self.state, next);
        self.state = next;
        self.observer.on_state_changed(next);
    }

    fn status(&self, message: impl Into<String>, severity: MessageSeverity) {
        self.observer.on_status(StatusMessage::new(message, severity));
    }
}
