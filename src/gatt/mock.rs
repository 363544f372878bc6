//! In-memory fakes of the GATT contracts for tests.
//!
//! Call counts and failure switches let tests assert exactly which library
//! calls a session operation issued; `Gate` holds a fake call open so a test
//! can act (cancel, push an adapter event) while the call is in flight.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::{Notify, broadcast};
use uuid::Uuid;

use crate::error::GattError;
use crate::gatt::{
    AdapterEvent, CharacteristicProps, ConnectionState, GattAdapter, GattCharacteristic,
    GattDescriptor, GattDevice, GattService, ReadResult, ValueStream, WriteType,
};

/// Two-stage rendezvous: the fake call signals `entered` and then parks on
/// `release` until the test lets it continue.
pub(crate) struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    pub async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }

    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

pub(crate) struct FakeAdapter {
    events: broadcast::Sender<AdapterEvent>,
    pub connected: Arc<AtomicBool>,
    pub disconnect_calls: AtomicUsize,
    pub fail_disconnect: AtomicBool,
}

impl FakeAdapter {
    pub fn new(connected: Arc<AtomicBool>) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            events,
            connected,
            disconnect_calls: AtomicUsize::new(0),
            fail_disconnect: AtomicBool::new(false),
        })
    }

    pub fn push(&self, event: AdapterEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl GattAdapter for FakeAdapter {
    async fn disconnect_device(&self, _device_id: Uuid) -> Result<(), GattError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(GattError::Operation("disconnect refused".to_string()));
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}

pub(crate) struct FakeDevice {
    id: Uuid,
    pub connected: Arc<AtomicBool>,
    pub services: Mutex<Vec<Arc<FakeService>>>,
    pub services_calls: AtomicUsize,
    pub fail_services: AtomicBool,
    pub services_gate: Mutex<Option<Arc<Gate>>>,
}

impl FakeDevice {
    pub fn new(id: Uuid, connected: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            id,
            connected,
            services: Mutex::new(Vec::new()),
            services_calls: AtomicUsize::new(0),
            fail_services: AtomicBool::new(false),
            services_gate: Mutex::new(None),
        })
    }
}

#[async_trait]
impl GattDevice for FakeDevice {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> Option<String> {
        Some("Fake Peripheral".to_string())
    }

    async fn connection_state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn services(&self) -> Result<Vec<Arc<dyn GattService>>, GattError> {
        self.services_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.services_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.fail_services.load(Ordering::SeqCst) {
            return Err(GattError::Operation(
                "service enumeration failed".to_string(),
            ));
        }
        Ok(self
            .services
            .lock()
            .unwrap()
            .iter()
            .map(|service| service.clone() as Arc<dyn GattService>)
            .collect())
    }
}

pub(crate) struct FakeService {
    uuid: Uuid,
    pub characteristics: Mutex<Vec<Arc<FakeCharacteristic>>>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub gate: Mutex<Option<Arc<Gate>>>,
}

impl FakeService {
    pub fn new(uuid: Uuid) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            characteristics: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            gate: Mutex::new(None),
        })
    }
}

#[async_trait]
impl GattService for FakeService {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn characteristics(&self) -> Result<Vec<Arc<dyn GattCharacteristic>>, GattError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(GattError::Operation(
                "characteristic enumeration failed".to_string(),
            ));
        }
        Ok(self
            .characteristics
            .lock()
            .unwrap()
            .iter()
            .map(|characteristic| characteristic.clone() as Arc<dyn GattCharacteristic>)
            .collect())
    }
}

pub(crate) struct FakeCharacteristic {
    uuid: Uuid,
    pub props: CharacteristicProps,
    pub value: Mutex<Vec<u8>>,
    pub read_calls: AtomicUsize,
    pub fail_read: AtomicBool,
    pub written: Mutex<Vec<(Vec<u8>, WriteType)>>,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub fail_start: AtomicBool,
    updates: broadcast::Sender<Vec<u8>>,
}

impl FakeCharacteristic {
    pub fn new(uuid: Uuid) -> Arc<Self> {
        let (updates, _) = broadcast::channel(16);
        Arc::new(Self {
            uuid,
            props: CharacteristicProps {
                read: true,
                write: true,
                write_without_response: false,
                notify: true,
            },
            value: Mutex::new(Vec::new()),
            read_calls: AtomicUsize::new(0),
            fail_read: AtomicBool::new(false),
            written: Mutex::new(Vec::new()),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            fail_start: AtomicBool::new(false),
            updates,
        })
    }

    /// Pushes a value notification to every active subscription stream.
    pub fn push_value(&self, value: &[u8]) {
        let _ = self.updates.send(value.to_vec());
    }
}

#[async_trait]
impl GattCharacteristic for FakeCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn properties(&self) -> Result<CharacteristicProps, GattError> {
        Ok(self.props)
    }

    async fn read(&self) -> Result<ReadResult, GattError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_read.load(Ordering::SeqCst) {
            return Err(GattError::Operation("read failed".to_string()));
        }
        Ok(ReadResult {
            data: self.value.lock().unwrap().clone(),
            result_code: 0,
        })
    }

    async fn write(&self, data: &[u8], write_type: WriteType) -> Result<i32, GattError> {
        self.written
            .lock()
            .unwrap()
            .push((data.to_vec(), write_type));
        Ok(0)
    }

    async fn start_updates(&self) -> Result<ValueStream, GattError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(GattError::Operation("subscribe rejected".to_string()));
        }
        let rx = self.updates.subscribe();
        Ok(stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(value) => Some((Ok(value), rx)),
                Err(_) => None,
            }
        })
        .boxed())
    }

    async fn stop_updates(&self) -> Result<(), GattError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn descriptors(&self) -> Result<Vec<Arc<dyn GattDescriptor>>, GattError> {
        Ok(Vec::new())
    }
}
