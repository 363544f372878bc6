//! CLI walkthrough of the session layer: scan for a device by name,
//! connect, discover its GATT tree, read what is readable, disconnect.

use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::info;

use ble_session::config::AppConfig;
use ble_session::gatt::bluest::BluestGatt;
use ble_session::gatt::uuids;
use ble_session::scanner::{DeviceScanner, ScannerEvent};
use ble_session::session::{DeviceSession, LogAlertSink};

const SCAN_TIMEOUT: Duration = Duration::from_secs(30);
const CONFIG_FILE_NAME: &str = "ble-session.json";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(target_name) = args.get(1) else {
        eprintln!("Usage: {} <DEVICE_NAME>", args[0]);
        std::process::exit(1);
    };

    let mut config = AppConfig::load(Path::new(CONFIG_FILE_NAME)).await?;
    config.scan.name_filter = Some(target_name.clone());

    let gatt = Arc::new(BluestGatt::new().await?);

    println!("Scanning for {}...", target_name);
    let mut scanner = DeviceScanner::new(gatt.clone(), config.scan.clone());
    let mut events = scanner.events();
    scanner.start_scan().await?;

    let found = tokio::time::timeout(SCAN_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(ScannerEvent::DeviceFound(device)) => break Some(device),
                Ok(_) => continue,
                Err(_) => break None,
            }
        }
    })
    .await;
    scanner.stop_scan().await?;

    let Ok(Some(found)) = found else {
        bail!("device not found: {}", target_name);
    };
    println!("Found: {} ({})", found.name, found.address);

    println!("Connecting...");
    let device = gatt
        .connect_with_retry(found.id, &config.connection)
        .await
        .context("could not connect")?;

    let session = DeviceSession::new(gatt.clone(), device, Arc::new(LogAlertSink));
    println!("Connected to {} [{}]", found.name, session.mac_address());

    session.start_discovery().await;
    let groups = session.service_groups().await;
    if groups.is_empty() {
        info!("No services discovered");
    }

    for group in &groups {
        let service_uuid = group.service.uuid();
        match uuids::service_name(service_uuid) {
            Some(name) => println!("Service: {} ({})", service_uuid, name),
            None => println!("Service: {}", service_uuid),
        }

        for characteristic in &group.characteristics {
            let uuid = characteristic.uuid();
            match uuids::characteristic_name(uuid) {
                Some(name) => println!("  Char: {} ({})", uuid, name),
                None => println!("  Char: {}", uuid),
            }

            let readable = characteristic
                .properties()
                .await
                .map(|props| props.read)
                .unwrap_or(false);
            if readable {
                match characteristic.read().await {
                    Ok(_) => {
                        println!(
                            "        -> {} [{} bytes] \"{}\"",
                            characteristic.value_as_hex(),
                            characteristic.value_byte_count(),
                            characteristic.string_value()
                        );
                    }
                    Err(e) => println!("        -> (read error: {})", e),
                }
            }
        }
    }

    println!("Disconnecting...");
    session.disconnect().await;
    session.close().await;
    println!("Disconnected.");
    Ok(())
}
