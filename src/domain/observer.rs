use crate::domain::models::{ButtonId, HostEvent, PeripheralState, StatusMessage};
use tokio::sync::mpsc;

/// Outbound notifications from the tracker to its host (UI, recorder view).
///
/// Called on the tracker's event loop; implementations must not block.
pub trait TrackerObserver: Send {
    fn on_status(&self, status: StatusMessage);

    fn on_state_changed(&self, _state: PeripheralState) {}

    fn on_sample_count(&self, _count: usize) {}

    fn on_button_notified(&self, _button: ButtonId) {}
}

/// Forwards every notification as a [`HostEvent`] over a channel
pub struct ChannelObserver {
    event_sender: mpsc::UnboundedSender<HostEvent>,
}

impl ChannelObserver {
    pub fn new(event_sender: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self { event_sender }
    }

    fn send(&self, event: HostEvent) {
        // The host may have gone away; the tracker keeps running regardless.
        let _ = self.event_sender.send(event);
    }
}

impl TrackerObserver for ChannelObserver {
    fn on_status(&self, status: StatusMessage) {
        self.send(HostEvent::Status(status));
    }

    fn on_state_changed(&self, state: PeripheralState) {
        self.send(HostEvent::StateChanged(state));
    }

    fn on_sample_count(&self, count: usize) {
        self.send(HostEvent::SampleCount(count));
    }

    fn on_button_notified(&self, button: ButtonId) {
        self.send(HostEvent::ButtonNotified(button));
    }
}
