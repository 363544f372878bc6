//! Characteristic handle: cached value, derived views, and the
//! subscription relay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{GattError, SessionError};
use crate::gatt::{
    CharacteristicProps, GattCharacteristic, GattDescriptor, ReadResult, ValueStream, WriteType,
};
use crate::session::events::{AlertSink, CharacteristicEvent, CharacteristicProperty};

/// Formats bytes as uppercase hex pairs separated by spaces, e.g. `"DE AD"`.
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

struct Subscription {
    cancel: CancellationToken,
    relay: JoinHandle<()>,
}

/// Wraps one GATT characteristic with a cached last-read value, views
/// derived from it, and a notification subscription toggle.
///
/// The cached value changes on an explicit [`read`](Self::read) (only when
/// the bytes differ) and on every pushed notification while subscribed
/// (unconditionally; each push is a new sample).
pub struct CharacteristicHandle {
    weak: Weak<CharacteristicHandle>,
    characteristic: Arc<dyn GattCharacteristic>,
    alerts: Arc<dyn AlertSink>,
    last_value: Mutex<Option<Vec<u8>>>,
    write_type: Mutex<WriteType>,
    subscribed: AtomicBool,
    subscription: AsyncMutex<Option<Subscription>>,
    events: broadcast::Sender<CharacteristicEvent>,
}

impl CharacteristicHandle {
    pub fn new(
        characteristic: Arc<dyn GattCharacteristic>,
        alerts: Arc<dyn AlertSink>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            characteristic,
            alerts,
            last_value: Mutex::new(None),
            write_type: Mutex::new(WriteType::WithResponse),
            subscribed: AtomicBool::new(false),
            subscription: AsyncMutex::new(None),
            events,
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.characteristic.uuid()
    }

    pub fn events(&self) -> broadcast::Receiver<CharacteristicEvent> {
        self.events.subscribe()
    }

    pub async fn properties(&self) -> Result<CharacteristicProps, GattError> {
        self.characteristic.properties().await
    }

    pub async fn descriptors(&self) -> Result<Vec<Arc<dyn GattDescriptor>>, GattError> {
        self.characteristic.descriptors().await
    }

    /// The last value read from or pushed by the peripheral, if any.
    pub fn value(&self) -> Option<Vec<u8>> {
        self.last_value.lock().unwrap().clone()
    }

    pub fn value_byte_count(&self) -> usize {
        self.last_value
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, Vec::len)
    }

    pub fn value_as_hex(&self) -> String {
        self.last_value
            .lock()
            .unwrap()
            .as_deref()
            .map_or_else(String::new, hex_string)
    }

    pub fn string_value(&self) -> String {
        self.last_value
            .lock()
            .unwrap()
            .as_deref()
            .map_or_else(String::new, |value| {
                String::from_utf8_lossy(value).into_owned()
            })
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn write_type(&self) -> WriteType {
        *self.write_type.lock().unwrap()
    }

    pub fn set_write_type(&self, write_type: WriteType) {
        let changed = {
            let mut current = self.write_type.lock().unwrap();
            let changed = *current != write_type;
            *current = write_type;
            changed
        };
        if changed {
            self.publish(CharacteristicProperty::WriteType);
        }
    }

    /// Reads the current value from the peripheral.
    ///
    /// Updates the cached value and publishes the derived-view notifications
    /// only when the returned bytes differ from the cache; the read result
    /// is returned to the caller either way.
    pub async fn read(&self) -> Result<ReadResult, SessionError> {
        let result = match self.characteristic.read().await {
            Ok(result) => result,
            Err(source) => {
                error!("Read from characteristic {} failed: {}", self.uuid(), source);
                return Err(SessionError::Read {
                    uuid: self.uuid(),
                    source,
                });
            }
        };

        let changed = {
            let mut last = self.last_value.lock().unwrap();
            if last.as_deref() == Some(result.data.as_slice()) {
                false
            } else {
                *last = Some(result.data.clone());
                true
            }
        };
        if changed {
            self.publish_value_views();
        }
        Ok(result)
    }

    /// Writes to the peripheral using the current write type. The cached
    /// value is left untouched; callers re-read to observe the applied
    /// mutation.
    pub async fn write(&self, data: &[u8]) -> Result<i32, SessionError> {
        let write_type = self.write_type();
        self.characteristic
            .write(data, write_type)
            .await
            .map_err(|source| {
                error!("Write to characteristic {} failed: {}", self.uuid(), source);
                SessionError::Write {
                    uuid: self.uuid(),
                    source,
                }
            })
    }

    /// Starts value notifications. A no-op when already subscribed; a
    /// failure is logged and surfaced as an alert.
    pub async fn subscribe(&self) {
        let mut slot = self.subscription.lock().await;
        if slot.is_some() {
            return;
        }

        let updates = match self.characteristic.start_updates().await {
            Ok(updates) => updates,
            Err(source) => {
                let e = SessionError::Subscribe {
                    uuid: self.uuid(),
                    source,
                };
                error!("{}", e);
                self.alerts.show_alert("Failed to Subscribe", &e.to_string());
                return;
            }
        };

        let cancel = CancellationToken::new();
        let relay = tokio::spawn(relay_updates(
            self.weak.clone(),
            updates,
            cancel.clone(),
        ));
        *slot = Some(Subscription { cancel, relay });
        drop(slot);

        self.subscribed.store(true, Ordering::SeqCst);
        info!("Subscribed to {}", self.uuid());
        self.publish(CharacteristicProperty::Subscribed);
    }

    /// Stops value notifications. A no-op when not subscribed; a failure is
    /// logged and surfaced as an alert, but the local listener is detached
    /// regardless.
    pub async fn unsubscribe(&self) {
        let mut slot = self.subscription.lock().await;
        let Some(subscription) = slot.take() else {
            return;
        };
        subscription.cancel.cancel();
        let _ = subscription.relay.await;
        drop(slot);

        match self.characteristic.stop_updates().await {
            Ok(()) => info!("Unsubscribed from {}", self.uuid()),
            Err(source) => {
                let e = SessionError::Unsubscribe {
                    uuid: self.uuid(),
                    source,
                };
                error!("{}", e);
                self.alerts
                    .show_alert("Failed to Unsubscribe", &e.to_string());
            }
        }

        self.subscribed.store(false, Ordering::SeqCst);
        self.publish(CharacteristicProperty::Subscribed);
    }

    /// Silently drops an active subscription. Used when the handle is
    /// superseded by a new discovery run or the session disconnects.
    pub(crate) async fn teardown(&self) {
        let subscription = self.subscription.lock().await.take();
        if let Some(subscription) = subscription {
            subscription.cancel.cancel();
            let _ = subscription.relay.await;
            if let Err(e) = self.characteristic.stop_updates().await {
                debug!(
                    "Ignoring stop-updates failure for discarded handle {}: {}",
                    self.uuid(),
                    e
                );
            }
            self.subscribed.store(false, Ordering::SeqCst);
        }
    }

    /// Applies a pushed notification: unconditional, even when the bytes
    /// match the cached value.
    fn apply_update(&self, value: Vec<u8>) {
        debug!(
            "Characteristic {} update: {} bytes",
            self.uuid(),
            value.len()
        );
        *self.last_value.lock().unwrap() = Some(value);
        self.publish_value_views();
    }

    fn publish_value_views(&self) {
        self.publish(CharacteristicProperty::Value);
        self.publish(CharacteristicProperty::ValueByteCount);
        self.publish(CharacteristicProperty::ValueAsHex);
        self.publish(CharacteristicProperty::StringValue);
    }

    fn publish(&self, property: CharacteristicProperty) {
        let _ = self
            .events
            .send(CharacteristicEvent::PropertyChanged(property));
    }
}

impl Drop for CharacteristicHandle {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.subscription.try_lock() {
            if let Some(subscription) = slot.take() {
                subscription.cancel.cancel();
            }
        }
    }
}

/// Forwards pushed values into the owning handle until cancelled, the
/// stream ends, or the handle is dropped.
async fn relay_updates(
    handle: Weak<CharacteristicHandle>,
    mut updates: ValueStream,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = updates.next() => match next {
                Some(Ok(value)) => {
                    let Some(handle) = handle.upgrade() else { break };
                    handle.apply_update(value);
                }
                Some(Err(e)) => {
                    error!("Error in notification stream: {}", e);
                    break;
                }
                None => {
                    info!("Notification stream ended");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::mock::FakeCharacteristic;
    use crate::session::events::test_support::RecordingAlertSink;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn handle_over(
        fake: &Arc<FakeCharacteristic>,
    ) -> (Arc<CharacteristicHandle>, Arc<RecordingAlertSink>) {
        let alerts = Arc::new(RecordingAlertSink::default());
        let handle = CharacteristicHandle::new(fake.clone(), alerts.clone());
        (handle, alerts)
    }

    fn drain(rx: &mut broadcast::Receiver<CharacteristicEvent>) -> Vec<CharacteristicEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn value_view_set() -> Vec<CharacteristicEvent> {
        [
            CharacteristicProperty::Value,
            CharacteristicProperty::ValueByteCount,
            CharacteristicProperty::ValueAsHex,
            CharacteristicProperty::StringValue,
        ]
        .into_iter()
        .map(CharacteristicEvent::PropertyChanged)
        .collect()
    }

    async fn recv_value_view_set(rx: &mut broadcast::Receiver<CharacteristicEvent>) {
        for expected in value_view_set() {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            assert_eq!(event, expected);
        }
    }

    #[test]
    fn hex_string_renders_uppercase_pairs() {
        assert_eq!(hex_string(&[0xDE, 0xAD]), "DE AD");
        assert_eq!(hex_string(&[0x00]), "00");
        assert_eq!(hex_string(&[]), "");
    }

    #[tokio::test]
    async fn read_with_changed_bytes_publishes_one_view_set() {
        let fake = FakeCharacteristic::new(Uuid::from_u128(1));
        *fake.value.lock().unwrap() = vec![0xDE, 0xAD];
        let (handle, _) = handle_over(&fake);
        let mut rx = handle.events();

        let result = handle.read().await.unwrap();
        assert_eq!(result.data, vec![0xDE, 0xAD]);
        assert_eq!(result.result_code, 0);
        assert_eq!(drain(&mut rx), value_view_set());
        assert_eq!(handle.value_as_hex(), "DE AD");
        assert_eq!(handle.value_byte_count(), 2);
    }

    #[tokio::test]
    async fn read_with_unchanged_bytes_stays_quiet_but_returns_result() {
        let fake = FakeCharacteristic::new(Uuid::from_u128(1));
        *fake.value.lock().unwrap() = vec![0x01, 0x02];
        let (handle, _) = handle_over(&fake);

        handle.read().await.unwrap();
        let mut rx = handle.events();
        let result = handle.read().await.unwrap();

        assert_eq!(result.data, vec![0x01, 0x02]);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(fake.read_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn read_failure_is_translated() {
        let fake = FakeCharacteristic::new(Uuid::from_u128(7));
        fake.fail_read.store(true, Ordering::SeqCst);
        let (handle, _) = handle_over(&fake);

        let err = handle.read().await.unwrap_err();
        assert!(matches!(err, SessionError::Read { uuid, .. } if uuid == Uuid::from_u128(7)));
        assert_eq!(handle.value(), None);
    }

    #[tokio::test]
    async fn write_leaves_cached_value_untouched() {
        let fake = FakeCharacteristic::new(Uuid::from_u128(1));
        let (handle, _) = handle_over(&fake);
        let mut rx = handle.events();

        let code = handle.write(&[0xAA]).await.unwrap();

        assert_eq!(code, 0);
        assert_eq!(handle.value(), None);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(
            fake.written.lock().unwrap().as_slice(),
            &[(vec![0xAA], WriteType::WithResponse)]
        );
    }

    #[tokio::test]
    async fn pushed_notifications_update_unconditionally() {
        let fake = FakeCharacteristic::new(Uuid::from_u128(1));
        let (handle, _) = handle_over(&fake);
        let mut rx = handle.events();

        handle.subscribe().await;
        assert!(handle.is_subscribed());
        assert_eq!(
            rx.recv().await.unwrap(),
            CharacteristicEvent::PropertyChanged(CharacteristicProperty::Subscribed)
        );

        fake.push_value(&[0x42]);
        recv_value_view_set(&mut rx).await;

        // Same bytes again: still a full notification set.
        fake.push_value(&[0x42]);
        recv_value_view_set(&mut rx).await;
        assert_eq!(handle.value(), Some(vec![0x42]));
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_are_idempotent() {
        let fake = FakeCharacteristic::new(Uuid::from_u128(1));
        let (handle, _) = handle_over(&fake);

        handle.subscribe().await;
        handle.subscribe().await;
        assert_eq!(fake.start_calls.load(Ordering::SeqCst), 1);
        assert!(handle.is_subscribed());

        handle.unsubscribe().await;
        handle.unsubscribe().await;
        assert_eq!(fake.stop_calls.load(Ordering::SeqCst), 1);
        assert!(!handle.is_subscribed());

        // The relay is detached: a late push reaches no listener.
        fake.push_value(&[0x01]);
        let mut rx = handle.events();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(handle.value(), None);
    }

    #[tokio::test]
    async fn subscribe_failure_raises_alert() {
        let fake = FakeCharacteristic::new(Uuid::from_u128(1));
        fake.fail_start.store(true, Ordering::SeqCst);
        let (handle, alerts) = handle_over(&fake);

        handle.subscribe().await;

        assert!(!handle.is_subscribed());
        let recorded = alerts.alerts.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "Failed to Subscribe");
    }

    #[tokio::test]
    async fn write_type_change_notifies_once() {
        let fake = FakeCharacteristic::new(Uuid::from_u128(1));
        let (handle, _) = handle_over(&fake);
        let mut rx = handle.events();

        handle.set_write_type(WriteType::WithoutResponse);
        handle.set_write_type(WriteType::WithoutResponse);

        assert_eq!(
            drain(&mut rx),
            vec![CharacteristicEvent::PropertyChanged(
                CharacteristicProperty::WriteType
            )]
        );
        assert_eq!(handle.write_type(), WriteType::WithoutResponse);
    }

    #[tokio::test]
    async fn string_value_decodes_utf8() {
        let fake = FakeCharacteristic::new(Uuid::from_u128(1));
        *fake.value.lock().unwrap() = b"aranet".to_vec();
        let (handle, _) = handle_over(&fake);

        handle.read().await.unwrap();
        assert_eq!(handle.string_value(), "aranet");
    }
}
