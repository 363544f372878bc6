//! Device scanning over the `bluest` adapter.
//!
//! The scan runs as its own task streaming advertisements until stopped;
//! discovered devices are registered with the GATT stack (so they can be
//! connected later by id) and fanned out as `ScannerEvent`s.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, error, info};
use regex::Regex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ScanConfig;
use crate::error::GattError;
use crate::gatt::bluest::BluestGatt;

/// Represents a discovered Bluetooth device
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredDevice {
    /// Stable identifier for the device, usable with the GATT stack
    pub id: Uuid,
    /// The name of the device, if available
    pub name: String,
    /// The address of the device (MAC address on most platforms, may be "N/A" on macOS)
    pub address: String,
    /// The signal strength (RSSI) of the device
    pub rssi: Option<i16>,
    /// Whether the device is paired
    pub is_paired: bool,
    /// Whether the device is connected
    pub is_connected: bool,
}

#[derive(Debug, Clone)]
pub enum ScannerEvent {
    ScanStarted,
    DeviceFound(DiscoveredDevice),
    ScanStopped,
}

pub struct DeviceScanner {
    gatt: Arc<BluestGatt>,
    config: ScanConfig,
    events: broadcast::Sender<ScannerEvent>,
    cancel_token: Arc<CancellationToken>,
    scan_task: Option<JoinHandle<Result<(), GattError>>>,
}

impl DeviceScanner {
    pub fn new(gatt: Arc<BluestGatt>, config: ScanConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            gatt,
            config,
            events,
            cancel_token: Arc::new(CancellationToken::new()),
            scan_task: None,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<ScannerEvent> {
        self.events.subscribe()
    }

    /// Starts the scan task. A scan already in progress is stopped first.
    pub async fn start_scan(&mut self) -> Result<(), GattError> {
        if self.scan_task.is_some() {
            self.stop_scan().await?;
        }

        self.cancel_token = Arc::new(CancellationToken::new());
        let cancel_token = self.cancel_token.clone();
        let gatt = self.gatt.clone();
        let config = self.config.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let result = Self::scan_task(gatt, config, events.clone(), cancel_token).await;
            if let Err(e) = &result {
                error!("Scan task failed: {}", e);
            }
            let _ = events.send(ScannerEvent::ScanStopped);
            result
        });
        self.scan_task = Some(handle);

        let _ = self.events.send(ScannerEvent::ScanStarted);
        info!("Device scan task started.");
        Ok(())
    }

    async fn scan_task(
        gatt: Arc<BluestGatt>,
        config: ScanConfig,
        events: broadcast::Sender<ScannerEvent>,
        cancel_token: Arc<CancellationToken>,
    ) -> Result<(), GattError> {
        let adapter = gatt.adapter().clone();
        let mut seen = HashSet::new();

        // Already-connected devices never advertise, so report them first.
        info!("Checking for connected devices");
        for device in adapter.connected_devices().await.map_err(GattError::from)? {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            if !matches_name_filter(&config, &name) {
                continue;
            }
            Self::emit_device_found(&gatt, &events, &mut seen, device, None).await;
        }

        info!("Starting bluetooth scan");
        let mut scan_stream = adapter.scan(&[]).await.map_err(GattError::from)?;

        loop {
            tokio::select! {
                next = scan_stream.next() => {
                    match next {
                        Some(discovered) => {
                            let device = discovered.device;
                            let rssi = discovered.rssi;
                            debug!("Found device - Device: {:?}, RSSI: {:?}", device, rssi);

                            if rssi.is_some_and(|signal| signal < config.min_rssi) {
                                continue;
                            }
                            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
                            if !matches_name_filter(&config, &name) {
                                continue;
                            }
                            Self::emit_device_found(&gatt, &events, &mut seen, device, rssi).await;
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Registers the device and emits a device-found event, once per device.
    async fn emit_device_found(
        gatt: &Arc<BluestGatt>,
        events: &broadcast::Sender<ScannerEvent>,
        seen: &mut HashSet<Uuid>,
        device: bluest::Device,
        rssi: Option<i16>,
    ) {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let platform_id = device.id().to_string();
        let address = extract_mac_address(&platform_id).unwrap_or_else(|| "N/A".to_string());
        let is_paired = device.is_paired().await.unwrap_or(false);
        let is_connected = device.is_connected().await;

        let id = gatt.register(device).await;
        if !seen.insert(id) {
            return;
        }

        info!(
            "Found device: Address: {}, ID: {}, Name: {:?}, RSSI: {:?}, Is Paired: {:?}, Is Connected: {:?}",
            address, id, name, rssi, is_paired, is_connected
        );
        let _ = events.send(ScannerEvent::DeviceFound(DiscoveredDevice {
            id,
            name,
            address,
            rssi,
            is_paired,
            is_connected,
        }));
    }

    /// Stops the scan task and waits for it to wind down.
    pub async fn stop_scan(&mut self) -> Result<(), GattError> {
        info!("Stopping Bluetooth scan.");
        self.cancel_token.cancel();

        if let Some(handle) = self.scan_task.take() {
            info!("Waiting for scan task to finish...");
            match handle.await {
                Ok(Ok(())) => info!("Scan task finished successfully after cancellation."),
                Ok(Err(e)) => error!("Scan task finished with an error: {:?}", e),
                Err(e) => {
                    if e.is_cancelled() {
                        info!("Scan task was cancelled successfully.");
                    } else {
                        error!("Scan task finished with an unexpected join error: {:?}", e);
                    }
                }
            }
        } else {
            info!("No active scan task handle found to wait for.");
        }
        Ok(())
    }
}

fn matches_name_filter(config: &ScanConfig, name: &str) -> bool {
    config
        .name_filter
        .as_deref()
        .map(|filter| name.to_lowercase().contains(&filter.to_lowercase()))
        .unwrap_or(true)
}

/// Pulls a MAC address out of a platform device-id string, when it embeds
/// one.
fn extract_mac_address(device_id: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").unwrap();
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().to_uppercase())
}
