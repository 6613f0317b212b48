use ble_motion_tracker::domain::motion::MotionSourceAdapter;
use ble_motion_tracker::domain::observer::ChannelObserver;
use ble_motion_tracker::domain::settings::SettingsService;
use ble_motion_tracker::infrastructure::bluetooth::{
    self, service, PeripheralConfig, PeripheralStateMachine, TrackerHandle, TrackerService,
};
use ble_motion_tracker::infrastructure::{logging, motion};
use ble_motion_tracker::presentation::console::ConsoleApp;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting BLE motion tracker");
    info!("Settings: {}", settings_service.path().display());
    if !settings_service.path().exists() {
        if let Err(e) = settings_service.save() {
            warn!("Failed to write default settings: {}", e);
        }
    }

    let (events, receiver) = service::channel();
    let (host_tx, host_rx) = mpsc::unbounded_channel();

    let (radio, central) = bluetooth::open(&settings, events.clone()).await?;
    let adapter = MotionSourceAdapter::new(
        motion::open(&settings),
        Arc::new(events.clone()),
        settings.timestamp_clock,
    );
    let machine = PeripheralStateMachine::new(
        PeripheralConfig::from(&settings),
        radio,
        adapter,
        Box::new(ChannelObserver::new(host_tx)),
    );

    let tracker = tokio::spawn(TrackerService::new(machine, receiver).run());

    // The simulated radio comes up powered, like an adapter at boot
    if let Some(central) = &central {
        central.power_on();
    }

    ConsoleApp::new(TrackerHandle::new(events), central, host_rx)
        .run()
        .await?;

    tracker.await?;
    info!("Tracker stopped");
    Ok(())
}
