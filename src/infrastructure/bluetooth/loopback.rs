//! Loopback Radio
//!
//! An in-memory radio stack with a simulated central attached. Used by the
//! console host on machines without a peripheral-capable adapter and by the
//! tests. Callbacks are posted to the tracker channel exactly like a real
//! backend would post them.

use crate::infrastructure::bluetooth::gatt::ServiceDescriptor;
use crate::infrastructure::bluetooth::protocol::{CharacteristicId, ServiceId};
use crate::infrastructure::bluetooth::radio::{
    Advertisement, AttResponse, PowerState, RadioError, RadioEvent, RadioStack, RequestId,
};
use crate::infrastructure::bluetooth::service::EventSender;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct LoopbackState {
    power: PowerState,
    services: Vec<ServiceId>,
    failing: HashSet<ServiceId>,
    advertisement: Option<Advertisement>,
    advertising_count: usize,
    subscriptions: HashSet<CharacteristicId>,
    notifications: Vec<(CharacteristicId, Vec<u8>)>,
    pending: HashSet<RequestId>,
    responses: HashMap<RequestId, AttResponse>,
    next_request: RequestId,
}

fn lock(shared: &Mutex<LoopbackState>) -> MutexGuard<'_, LoopbackState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Radio side, owned by the state machine
pub struct LoopbackRadio {
    shared: Arc<Mutex<LoopbackState>>,
    events: EventSender,
}

/// Central side, driven by the host or a test
#[derive(Clone)]
pub struct LoopbackCentral {
    shared: Arc<Mutex<LoopbackState>>,
    events: EventSender,
}

impl LoopbackRadio {
    /// Create a powered-on radio. Nothing is posted until the central
    /// calls [`LoopbackCentral::power_on`].
    pub fn new(events: EventSender) -> (Self, LoopbackCentral) {
        let shared = Arc::new(Mutex::new(LoopbackState {
            power: PowerState::PoweredOn,
            ..Default::default()
        }));
        let central = LoopbackCentral {
            shared: shared.clone(),
            events: events.clone(),
        };
        (Self { shared, events }, central)
    }
}

impl RadioStack for LoopbackRadio {
    fn power_state(&self) -> PowerState {
        lock(&self.shared).power
    }

    fn register_service(&mut self, service: &ServiceDescriptor) -> Result<(), RadioError> {
        let error = {
            let mut state = lock(&self.shared);
            if state.power != PowerState::PoweredOn {
                return Err(RadioError::PoweredOff);
            }
            if state.failing.contains(&service.id) {
                Some("simulated registration failure".to_string())
            } else {
                state.services.push(service.id);
                None
            }
        };

        debug!("Loopback: service {} added", service.uuid());
        self.events.radio(RadioEvent::ServiceAdded {
            service: service.uuid(),
            error,
        });
        Ok(())
    }

    fn start_advertising(&mut self, advertisement: &Advertisement) -> Result<(), RadioError> {
        let mut state = lock(&self.shared);
        if state.power != PowerState::PoweredOn {
            return Err(RadioError::PoweredOff);
        }
        state.advertisement = Some(advertisement.clone());
        state.advertising_count += 1;
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), RadioError> {
        lock(&self.shared).advertisement = None;
        Ok(())
    }

    fn notify(&mut self, characteristic: CharacteristicId, value: &[u8]) -> Result<(), RadioError> {
        let mut state = lock(&self.shared);
        if !state.services.contains(&characteristic.service()) {
            return Err(RadioError::NotRegistered(characteristic));
        }
        if state.subscriptions.contains(&characteristic) {
            trace!("Loopback: notify {} ({} bytes)", characteristic, value.len());
            state.notifications.push((characteristic, value.to_vec()));
        }
        Ok(())
    }

    fn respond(&mut self, request: RequestId, response: AttResponse) -> Result<(), RadioError> {
        let mut state = lock(&self.shared);
        if !state.pending.remove(&request) {
            return Err(RadioError::UnknownRequest(request));
        }
        state.responses.insert(request, response);
        Ok(())
    }
}

impl LoopbackCentral {
    pub fn power_on(&self) {
        lock(&self.shared).power = PowerState::PoweredOn;
        self.events.radio(RadioEvent::RadioReady);
    }

    pub fn power_off(&self) {
        {
            let mut state = lock(&self.shared);
            state.power = PowerState::PoweredOff;
            state.advertisement = None;
        }
        self.events.radio(RadioEvent::RadioReady);
    }

    /// Make registration of `service` fail
    pub fn fail_registration(&self, service: ServiceId) {
        lock(&self.shared).failing.insert(service);
    }

    /// Connect by subscribing to the disconnection characteristic
    pub fn connect(&self) {
        self.subscribe(CharacteristicId::Disconnection);
    }

    pub fn disconnect(&self) {
        lock(&self.shared).subscriptions.clear();
        self.events.radio(RadioEvent::CentralDisconnected);
    }

    pub fn subscribe(&self, characteristic: CharacteristicId) {
        lock(&self.shared).subscriptions.insert(characteristic);
        self.events.radio(RadioEvent::SubscribedTo(characteristic));
    }

    pub fn unsubscribe(&self, characteristic: CharacteristicId) {
        lock(&self.shared).subscriptions.remove(&characteristic);
        self.events.radio(RadioEvent::UnsubscribedFrom(characteristic));
    }

    pub fn read(&self, characteristic: CharacteristicId) -> RequestId {
        let request = self.next_request();
        self.events.radio(RadioEvent::ReadRequested {
            request,
            characteristic,
        });
        request
    }

    pub fn write(&self, characteristic: CharacteristicId, value: &[u8]) -> RequestId {
        let request = self.next_request();
        self.events.radio(RadioEvent::WriteRequested {
            request,
            characteristic,
            value: value.to_vec(),
        });
        request
    }

    fn next_request(&self) -> RequestId {
        let mut state = lock(&self.shared);
        state.next_request += 1;
        let request = state.next_request;
        state.pending.insert(request);
        request
    }

    /// Answer given to `request`, once the peripheral has responded
    pub fn response(&self, request: RequestId) -> Option<AttResponse> {
        lock(&self.shared).responses.get(&request).cloned()
    }

    pub fn notifications(&self) -> Vec<(CharacteristicId, Vec<u8>)> {
        lock(&self.shared).notifications.clone()
    }

    pub fn notifications_for(&self, characteristic: CharacteristicId) -> Vec<Vec<u8>> {
        lock(&self.shared)
            .notifications
            .iter()
            .filter(|(c, _)| *c == characteristic)
            .map(|(_, value)| value.clone())
            .collect()
    }

    pub fn take_notifications(&self) -> Vec<(CharacteristicId, Vec<u8>)> {
        std::mem::take(&mut lock(&self.shared).notifications)
    }

    pub fn is_advertising(&self) -> bool {
        lock(&self.shared).advertisement.is_some()
    }

    pub fn advertisement(&self) -> Option<Advertisement> {
        lock(&self.shared).advertisement.clone()
    }

    /// How many times advertising has been started
    pub fn advertising_count(&self) -> usize {
        lock(&self.shared).advertising_count
    }

    pub fn registered_services(&self) -> Vec<ServiceId> {
        lock(&self.shared).services.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::gatt::GattSurfaceBuilder;
    use crate::infrastructure::bluetooth::radio::AttError;
    use crate::infrastructure::bluetooth::service::{channel, TrackerEvent};

    fn radio_event(event: Option<TrackerEvent>) -> RadioEvent {
        match event {
            Some(TrackerEvent::Radio(event)) => event,
            other => panic!("expected radio event, got {:?}", other),
        }
    }

    #[test]
    fn test_registration_posts_service_added() {
        let (events, mut rx) = channel();
        let (mut radio, central) = LoopbackRadio::new(events);
        central.fail_registration(ServiceId::Measurement);

        for service in GattSurfaceBuilder::new().build() {
            radio.register_service(&service).unwrap();
            let event = radio_event(rx.try_recv().ok());
            let RadioEvent::ServiceAdded { service: uuid, error } = event else {
                panic!("expected ServiceAdded");
            };
            assert_eq!(uuid, service.uuid());
            assert_eq!(error.is_some(), service.id == ServiceId::Measurement);
        }
        assert_eq!(central.registered_services().len(), 3);
    }

    #[test]
    fn test_powered_off_radio_refuses_work() {
        let (events, _rx) = channel();
        let (mut radio, central) = LoopbackRadio::new(events);
        central.power_off();

        assert_eq!(radio.power_state(), PowerState::PoweredOff);
        let service = GattSurfaceBuilder::new().build().pop_front().unwrap();
        assert_eq!(
            radio.register_service(&service),
            Err(RadioError::PoweredOff)
        );
    }

    #[test]
    fn test_notify_requires_registration_and_subscription() {
        let (events, _rx) = channel();
        let (mut radio, central) = LoopbackRadio::new(events);

        assert_eq!(
            radio.notify(CharacteristicId::Orientation, &[0; 20]),
            Err(RadioError::NotRegistered(CharacteristicId::Orientation))
        );

        for service in GattSurfaceBuilder::new().build() {
            radio.register_service(&service).unwrap();
        }
        radio.notify(CharacteristicId::Orientation, &[0; 20]).unwrap();
        assert!(central.notifications().is_empty());

        central.subscribe(CharacteristicId::Orientation);
        radio.notify(CharacteristicId::Orientation, &[1; 20]).unwrap();
        assert_eq!(central.take_notifications().len(), 1);
        assert!(central.notifications().is_empty());
    }

    #[test]
    fn test_requests_are_answered_once() {
        let (events, mut rx) = channel();
        let (mut radio, central) = LoopbackRadio::new(events);

        let request = central.read(CharacteristicId::UpdateRate);
        assert_eq!(
            radio_event(rx.try_recv().ok()),
            RadioEvent::ReadRequested {
                request,
                characteristic: CharacteristicId::UpdateRate
            }
        );

        radio
            .respond(request, AttResponse::Failure(AttError::ReadNotPermitted))
            .unwrap();
        assert_eq!(
            radio.respond(request, AttResponse::Success(vec![])),
            Err(RadioError::UnknownRequest(request))
        );
        assert_eq!(
            central.response(request),
            Some(AttResponse::Failure(AttError::ReadNotPermitted))
        );
    }
}
