//! Device session: one connected peripheral's lifetime, discovery
//! orchestration, and disconnect plumbing.

use std::sync::{Arc, Mutex, Weak};

use log::{debug, error, info, warn};
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::SessionError;
use crate::gatt::{AdapterEvent, GattAdapter, GattDevice, GattService};
use crate::session::characteristic::CharacteristicHandle;
use crate::session::discovery::{DiscoveryState, ServiceGroup, run_discovery};
use crate::session::events::{AlertSink, SessionEvent, SessionProperty};

/// Formats the low six bytes of a device identity as a colon-separated MAC
/// string, e.g. `AA:BB:CC:DD:EE:FF`.
pub fn mac_address(id: Uuid) -> String {
    id.as_bytes()[10..]
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// One BLE peripheral's connected lifetime.
///
/// The session mediates every GATT operation against its device: it tracks
/// the link state, runs the two-phase service/characteristic discovery (at
/// most one run in flight, cancellable), owns the discovered
/// characteristic-by-service index, and exposes disconnect. Library failures
/// never escape un-translated; each operation settles session state and
/// reports through the log and alert collaborators before returning.
pub struct DeviceSession {
    device: Arc<dyn GattDevice>,
    adapter: Arc<dyn GattAdapter>,
    alerts: Arc<dyn AlertSink>,
    mac_address: String,
    /// Grouped result of the latest successful discovery run. Replaced
    /// wholesale, never merged, so the groups always belong to one run.
    state: AsyncMutex<Vec<ServiceGroup>>,
    discovery: AsyncMutex<DiscoveryState>,
    events: broadcast::Sender<SessionEvent>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSession {
    /// Creates a session for an already-connected device and starts
    /// listening for the adapter's connection events.
    pub fn new(
        adapter: Arc<dyn GattAdapter>,
        device: Arc<dyn GattDevice>,
        alerts: Arc<dyn AlertSink>,
    ) -> Arc<Self> {
        let mac_address = mac_address(device.id());
        let (events, _) = broadcast::channel(64);
        let session = Arc::new(Self {
            adapter,
            device,
            alerts,
            mac_address,
            state: AsyncMutex::new(Vec::new()),
            discovery: AsyncMutex::new(DiscoveryState::Idle),
            events,
            listener: Mutex::new(None),
        });
        let listener = tokio::spawn(listen_adapter_events(
            Arc::downgrade(&session),
            session.adapter.events(),
        ));
        *session.listener.lock().unwrap() = Some(listener);
        session
    }

    pub fn name(&self) -> Option<String> {
        self.device.name()
    }

    pub fn device_id(&self) -> Uuid {
        self.device.id()
    }

    pub fn mac_address(&self) -> &str {
        &self.mac_address
    }

    /// Subscribes to the session's change notifications.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current link state, observed from the device on every call.
    pub async fn connected(&self) -> bool {
        self.device.connection_state().await.is_connected()
    }

    /// Whether a discovery may be started right now. The UI binds its
    /// discovery trigger to this.
    pub async fn discovery_allowed(&self) -> bool {
        self.connected().await && self.discovery.lock().await.is_idle()
    }

    pub async fn services(&self) -> Vec<Arc<dyn GattService>> {
        self.state
            .lock()
            .await
            .iter()
            .map(|group| group.service.clone())
            .collect()
    }

    pub async fn service_count(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn service_groups(&self) -> Vec<ServiceGroup> {
        self.state.lock().await.clone()
    }

    pub async fn characteristics_for(
        &self,
        service_uuid: Uuid,
    ) -> Option<Vec<Arc<CharacteristicHandle>>> {
        self.state
            .lock()
            .await
            .iter()
            .find(|group| group.service.uuid() == service_uuid)
            .map(|group| group.characteristics.clone())
    }

    /// Runs the two-phase discovery and replaces the service index with the
    /// result.
    ///
    /// A no-op while disconnected or while another run is in flight. On
    /// success the service list and the characteristic grouping become
    /// visible together and their change notifications fire once each; on
    /// failure or cancellation the previous index is left exactly as it was.
    pub async fn start_discovery(&self) {
        let cancel = {
            let mut discovery = self.discovery.lock().await;
            if !discovery.is_idle() {
                debug!(
                    "Discovery already in flight for {}, ignoring",
                    self.device.id()
                );
                return;
            }
            if !self.connected().await {
                debug!(
                    "Device {} is not connected, discovery not allowed",
                    self.device.id()
                );
                return;
            }
            info!("Starting discovery of services");
            let cancel = CancellationToken::new();
            *discovery = DiscoveryState::Discovering(cancel.clone());
            cancel
        };
        self.publish(SessionProperty::DiscoveryAllowed);

        match run_discovery(&self.device, &self.alerts, &cancel).await {
            Ok(groups) => {
                let superseded = {
                    let mut state = self.state.lock().await;
                    std::mem::replace(&mut *state, groups)
                };
                self.publish(SessionProperty::Services);
                self.publish(SessionProperty::ServiceCount);
                self.publish(SessionProperty::Characteristics);
                for group in superseded {
                    for characteristic in group.characteristics {
                        characteristic.teardown().await;
                    }
                }
            }
            Err(e) if e.is_cancelled() => {
                info!("Discovery cancelled");
            }
            Err(e) => {
                error!("{}", SessionError::Discovery(e));
            }
        }

        *self.discovery.lock().await = DiscoveryState::Idle;
        self.publish(SessionProperty::DiscoveryAllowed);
        info!("Discovery... DONE");
    }

    /// Signals cancellation to the in-flight discovery, if there is one. The
    /// run observes it at its next checkpoint and terminates through the
    /// failure path without touching committed state.
    pub async fn cancel_discovery(&self) {
        let discovery = self.discovery.lock().await;
        if let DiscoveryState::Discovering(cancel) = &*discovery {
            info!("Cancelling service discovery for {}", self.device.id());
            cancel.cancel();
        }
    }

    /// Requests disconnect from the adapter. Whether or not the request
    /// succeeds, the observed connection state is republished and the
    /// settled signal fires so navigation can proceed.
    pub async fn disconnect(&self) {
        let device_id = self.device.id();
        info!(
            "Disconnecting device: {:?} ({})",
            self.device.name(),
            device_id
        );
        if let Err(e) = self.adapter.disconnect_device(device_id).await {
            error!(
                "Error whilst disconnecting from device {}: {}",
                device_id,
                SessionError::Disconnect(e)
            );
        }
        self.republish_connection_state();
        self.teardown_subscriptions().await;
        let _ = self.events.send(SessionEvent::DisconnectSettled);
    }

    /// Tears the session down before it is dropped: cancels any in-flight
    /// discovery and detaches subscriptions and the adapter listener.
    pub async fn close(&self) {
        self.cancel_discovery().await;
        self.teardown_subscriptions().await;
        if let Some(listener) = self.listener.lock().unwrap().take() {
            listener.abort();
        }
    }

    async fn teardown_subscriptions(&self) {
        let groups = self.state.lock().await.clone();
        for group in groups {
            for characteristic in group.characteristics {
                characteristic.teardown().await;
            }
        }
    }

    fn handle_adapter_event(&self, event: AdapterEvent) {
        if event.device_id() != self.device.id() {
            return;
        }
        match event {
            AdapterEvent::ConnectionLost { device_id, error } => {
                info!(
                    "DeviceConnectionLost: {:?} {} {}",
                    self.device.name(),
                    device_id,
                    error.unwrap_or_default()
                );
            }
            AdapterEvent::Disconnected { device_id } => {
                info!("DeviceDisconnected: {:?} {}", self.device.name(), device_id);
            }
        }
        self.republish_connection_state();
    }

    fn republish_connection_state(&self) {
        self.publish(SessionProperty::Connected);
        self.publish(SessionProperty::DiscoveryAllowed);
    }

    fn publish(&self, property: SessionProperty) {
        let _ = self.events.send(SessionEvent::PropertyChanged(property));
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().unwrap().take() {
            listener.abort();
        }
    }
}

/// Relays adapter pushes into the session until the channel closes or the
/// session goes away.
async fn listen_adapter_events(
    session: Weak<DeviceSession>,
    mut events: broadcast::Receiver<AdapterEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.handle_adapter_event(event);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Adapter event listener lagged, {} events dropped", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
