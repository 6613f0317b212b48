//! WinRT GATT Server
//!
//! Radio stack backed by `GattServiceProvider`. WinRT has no peripheral-side
//! connection callback, so subscriber-count changes on each characteristic
//! are reported as subscribe/unsubscribe events and the state machine treats
//! the disconnection characteristic as the link indicator.
//!
//! Read and write requests are held with their deferral until the state
//! machine answers them through [`RadioStack::respond`].

use crate::infrastructure::bluetooth::gatt::{Properties, ServiceDescriptor};
use crate::infrastructure::bluetooth::protocol::{CharacteristicId, ServiceId};
use crate::infrastructure::bluetooth::radio::{
    Advertisement, AttResponse, PowerState, RadioError, RadioEvent, RadioStack, RequestId,
};
use crate::infrastructure::bluetooth::service::EventSender;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::{IInspectable, GUID, HSTRING};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristicProperties, GattLocalCharacteristic, GattLocalCharacteristicParameters,
    GattProtectionLevel, GattReadRequest, GattReadRequestedEventArgs, GattServiceProvider,
    GattServiceProviderAdvertisingParameters, GattWriteOption, GattWriteRequest,
    GattWriteRequestedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothAdapter, BluetoothError};
use windows::Devices::Radios::{Radio, RadioState};
use windows::Foundation::{Deferral, TypedEventHandler};
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

enum PendingRequest {
    Read(GattReadRequest, Deferral),
    Write(GattWriteRequest, Deferral),
}

#[derive(Default)]
struct Shared {
    providers: Vec<(ServiceId, GattServiceProvider)>,
    characteristics: HashMap<CharacteristicId, GattLocalCharacteristic>,
    subscribers: HashMap<CharacteristicId, u32>,
    pending: HashMap<RequestId, PendingRequest>,
    next_request: RequestId,
}

impl Shared {
    fn hold(&mut self, request: PendingRequest) -> RequestId {
        self.next_request += 1;
        self.pending.insert(self.next_request, request);
        self.next_request
    }
}

fn lock<T>(shared: &Mutex<T>) -> MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn backend(e: windows::core::Error) -> RadioError {
    RadioError::Backend(e.to_string())
}

fn guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn power_of(radio: &Radio) -> PowerState {
    match radio.State() {
        Ok(RadioState::On) => PowerState::PoweredOn,
        _ => PowerState::PoweredOff,
    }
}

fn buffer(value: &[u8]) -> windows::core::Result<IBuffer> {
    let writer = DataWriter::new()?;
    writer.WriteBytes(value)?;
    writer.DetachBuffer()
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut value = vec![0u8; reader.UnconsumedBufferLength()? as usize];
    reader.ReadBytes(&mut value)?;
    Ok(value)
}

fn properties(properties: Properties) -> GattCharacteristicProperties {
    let mut flags = GattCharacteristicProperties::None;
    if properties.read {
        flags = flags | GattCharacteristicProperties::Read;
    }
    if properties.write {
        flags = flags | GattCharacteristicProperties::Write;
    }
    if properties.notify {
        flags = flags | GattCharacteristicProperties::Notify;
    }
    flags
}

pub struct WinRtRadio {
    shared: Arc<Mutex<Shared>>,
    power: Arc<Mutex<PowerState>>,
    events: EventSender,
    runtime: Handle,
    // Keeps the StateChanged registration alive
    _radio: Radio,
}

impl WinRtRadio {
    /// Open the default adapter in peripheral role and post the initial
    /// `RadioReady`.
    pub async fn new(events: EventSender) -> Result<Self, RadioError> {
        let adapter = BluetoothAdapter::GetDefaultAsync()
            .map_err(backend)?
            .await
            .map_err(backend)?;
        if !adapter.IsPeripheralRoleSupported().map_err(backend)? {
            return Err(RadioError::Unsupported);
        }

        let radio = adapter
            .GetRadioAsync()
            .map_err(backend)?
            .await
            .map_err(backend)?;
        let power = Arc::new(Mutex::new(power_of(&radio)));

        let power_handle = power.clone();
        let sender = events.clone();
        let handler = TypedEventHandler::new(
            move |radio: windows::core::Ref<Radio>, _: windows::core::Ref<IInspectable>| {
                if let Some(radio) = radio.as_ref() {
                    let state = power_of(radio);
                    let changed = {
                        let mut power = lock(&power_handle);
                        let changed = *power != state;
                        *power = state;
                        changed
                    };
                    if changed {
                        info!("Bluetooth radio is now {:?}", state);
                        sender.radio(RadioEvent::RadioReady);
                    }
                }
                Ok(())
            },
        );
        radio.StateChanged(&handler).map_err(backend)?;

        info!("Bluetooth adapter ready ({:?})", *lock(&power));
        events.radio(RadioEvent::RadioReady);

        Ok(Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            power,
            events,
            runtime: Handle::current(),
            _radio: radio,
        })
    }
}

async fn create_service(
    descriptor: ServiceDescriptor,
    shared: Arc<Mutex<Shared>>,
    events: EventSender,
    runtime: Handle,
) -> anyhow::Result<()> {
    let created = GattServiceProvider::CreateAsync(guid(descriptor.uuid()))?.await?;
    let status = created.Error()?;
    if status != BluetoothError::Success {
        anyhow::bail!("service provider unavailable: {:?}", status);
    }
    let provider = created.ServiceProvider()?;
    let service = provider.Service()?;

    for characteristic in &descriptor.characteristics {
        let parameters = GattLocalCharacteristicParameters::new()?;
        parameters.SetCharacteristicProperties(properties(characteristic.properties))?;
        parameters.SetReadProtectionLevel(GattProtectionLevel::Plain)?;
        parameters.SetWriteProtectionLevel(GattProtectionLevel::Plain)?;
        parameters.SetUserDescription(&HSTRING::from(characteristic.description))?;

        let result = service
            .CreateCharacteristicAsync(guid(characteristic.uuid()), &parameters)?
            .await?;
        let local = result.Characteristic()?;
        hook(&local, characteristic.id, &shared, &events, &runtime)?;
        lock(&shared).characteristics.insert(characteristic.id, local);
    }

    lock(&shared).providers.push((descriptor.id, provider));
    Ok(())
}

/// Route request and subscription callbacks of one characteristic
fn hook(
    local: &GattLocalCharacteristic,
    id: CharacteristicId,
    shared: &Arc<Mutex<Shared>>,
    events: &EventSender,
    runtime: &Handle,
) -> windows::core::Result<()> {
    let (state, sender, spawner) = (shared.clone(), events.clone(), runtime.clone());
    let read_handler = TypedEventHandler::new(
        move |_: windows::core::Ref<GattLocalCharacteristic>,
              args: windows::core::Ref<GattReadRequestedEventArgs>| {
            if let Some(args) = args.as_ref() {
                let deferral = args.GetDeferral()?;
                let operation = args.GetRequestAsync()?;
                let (state, sender) = (state.clone(), sender.clone());
                spawner.spawn(async move {
                    match operation.await {
                        Ok(request) => {
                            let request = lock(&state).hold(PendingRequest::Read(request, deferral));
                            sender.radio(RadioEvent::ReadRequested {
                                request,
                                characteristic: id,
                            });
                        }
                        Err(e) => {
                            warn!("Read request on {} lost: {}", id, e);
                            let _ = deferral.Complete();
                        }
                    }
                });
            }
            Ok(())
        },
    );
    local.ReadRequested(&read_handler)?;

    let (state, sender, spawner) = (shared.clone(), events.clone(), runtime.clone());
    let write_handler = TypedEventHandler::new(
        move |_: windows::core::Ref<GattLocalCharacteristic>,
              args: windows::core::Ref<GattWriteRequestedEventArgs>| {
            if let Some(args) = args.as_ref() {
                let deferral = args.GetDeferral()?;
                let operation = args.GetRequestAsync()?;
                let (state, sender) = (state.clone(), sender.clone());
                spawner.spawn(async move {
                    let received = operation
                        .await
                        .and_then(|request| Ok((read_buffer(&request.Value()?)?, request)));
                    match received {
                        Ok((value, request)) => {
                            let request =
                                lock(&state).hold(PendingRequest::Write(request, deferral));
                            sender.radio(RadioEvent::WriteRequested {
                                request,
                                characteristic: id,
                                value,
                            });
                        }
                        Err(e) => {
                            warn!("Write request on {} lost: {}", id, e);
                            let _ = deferral.Complete();
                        }
                    }
                });
            }
            Ok(())
        },
    );
    local.WriteRequested(&write_handler)?;

    let (state, sender) = (shared.clone(), events.clone());
    let subscription_handler = TypedEventHandler::new(
        move |local: windows::core::Ref<GattLocalCharacteristic>,
              _: windows::core::Ref<IInspectable>| {
            if let Some(local) = local.as_ref() {
                let count = local.SubscribedClients()?.Size()?;
                let previous = lock(&state).subscribers.insert(id, count).unwrap_or(0);
                if count > previous {
                    sender.radio(RadioEvent::SubscribedTo(id));
                } else if count < previous {
                    sender.radio(RadioEvent::UnsubscribedFrom(id));
                }
            }
            Ok(())
        },
    );
    local.SubscribedClientsChanged(&subscription_handler)?;

    Ok(())
}

impl RadioStack for WinRtRadio {
    fn power_state(&self) -> PowerState {
        *lock(&self.power)
    }

    fn register_service(&mut self, service: &ServiceDescriptor) -> Result<(), RadioError> {
        if self.power_state() != PowerState::PoweredOn {
            return Err(RadioError::PoweredOff);
        }

        let uuid = service.uuid();
        let (shared, events, runtime) =
            (self.shared.clone(), self.events.clone(), self.runtime.clone());
        let task = create_service(service.clone(), shared, events.clone(), runtime);
        self.runtime.spawn(async move {
            let error = task.await.err().map(|e| e.to_string());
            events.radio(RadioEvent::ServiceAdded {
                service: uuid,
                error,
            });
        });
        Ok(())
    }

    fn start_advertising(&mut self, advertisement: &Advertisement) -> Result<(), RadioError> {
        // WinRT advertises the adapter's own name; only the services are ours.
        debug!(
            "Advertising {} services (requested name {})",
            advertisement.service_uuids.len(),
            advertisement.local_name
        );
        let shared = lock(&self.shared);
        for (_, provider) in &shared.providers {
            let parameters = GattServiceProviderAdvertisingParameters::new().map_err(backend)?;
            parameters.SetIsConnectable(true).map_err(backend)?;
            parameters.SetIsDiscoverable(true).map_err(backend)?;
            provider
                .StartAdvertisingWithParameters(&parameters)
                .map_err(backend)?;
        }
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), RadioError> {
        let shared = lock(&self.shared);
        for (_, provider) in &shared.providers {
            provider.StopAdvertising().map_err(backend)?;
        }
        Ok(())
    }

    fn notify(&mut self, characteristic: CharacteristicId, value: &[u8]) -> Result<(), RadioError> {
        let shared = lock(&self.shared);
        let local = shared
            .characteristics
            .get(&characteristic)
            .ok_or(RadioError::NotRegistered(characteristic))?;
        let buffer = buffer(value).map_err(backend)?;
        // Fire-and-forget; completion is not awaited
        let _ = local.NotifyValueAsync(&buffer).map_err(backend)?;
        Ok(())
    }

    fn respond(&mut self, request: RequestId, response: AttResponse) -> Result<(), RadioError> {
        let pending = lock(&self.shared)
            .pending
            .remove(&request)
            .ok_or(RadioError::UnknownRequest(request))?;

        let (answered, deferral) = match pending {
            PendingRequest::Read(read, deferral) => {
                let answered = match response {
                    AttResponse::Success(value) => {
                        buffer(&value).and_then(|b| read.RespondWithValue(&b))
                    }
                    AttResponse::Failure(error) => read.RespondWithProtocolError(error.code()),
                };
                (answered, deferral)
            }
            PendingRequest::Write(write, deferral) => {
                let answered = match response {
                    AttResponse::Success(_) => match write.Option() {
                        Ok(GattWriteOption::WriteWithResponse) => write.Respond(),
                        Ok(_) => Ok(()),
                        Err(e) => Err(e),
                    },
                    AttResponse::Failure(error) => write.RespondWithProtocolError(error.code()),
                };
                (answered, deferral)
            }
        };

        let completed = deferral.Complete();
        answered.and(completed).map_err(backend)
    }
}

impl Drop for WinRtRadio {
    fn drop(&mut self) {
        for (service, provider) in &lock(&self.shared).providers {
            if let Err(e) = provider.StopAdvertising() {
                debug!("Stop advertising {:?} on drop: {}", service, e);
            }
        }
    }
}
