//! Two-phase GATT discovery sequencing.

use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;

use crate::error::GattError;
use crate::gatt::{GattDevice, GattService};
use crate::session::characteristic::CharacteristicHandle;
use crate::session::events::AlertSink;

/// One discovered service together with its characteristic handles.
///
/// Groups are only ever built from a single discovery run, so a group's
/// service is always an element of the same run's service list.
#[derive(Clone)]
pub struct ServiceGroup {
    pub service: Arc<dyn GattService>,
    pub characteristics: Vec<Arc<CharacteristicHandle>>,
}

/// Whether a discovery is currently in flight for a session.
///
/// The cancellation handle exists only while discovering, so cancelling is
/// only possible against the run that owns the token.
pub(crate) enum DiscoveryState {
    Idle,
    Discovering(CancellationToken),
}

impl DiscoveryState {
    pub fn is_idle(&self) -> bool {
        matches!(self, DiscoveryState::Idle)
    }
}

/// Runs the two-phase enumeration: the service list first, then each
/// service's characteristics in discovery order, one call in flight at a
/// time. Cancellation is observed after the service list arrives and before
/// and after every per-service characteristic call.
///
/// Nothing is committed here; the caller swaps the result in wholesale so a
/// failed run never leaves partial state behind.
pub(crate) async fn run_discovery(
    device: &Arc<dyn GattDevice>,
    alerts: &Arc<dyn AlertSink>,
    cancel: &CancellationToken,
) -> Result<Vec<ServiceGroup>, GattError> {
    let services = tokio::select! {
        result = device.services() => result?,
        _ = cancel.cancelled() => return Err(GattError::Cancelled),
    };
    info!("Discovered {} services", services.len());
    if cancel.is_cancelled() {
        return Err(GattError::Cancelled);
    }

    let mut groups = Vec::with_capacity(services.len());
    for service in services {
        if cancel.is_cancelled() {
            return Err(GattError::Cancelled);
        }
        info!("Retrieving characteristics for service {}", service.uuid());
        let characteristics = service.characteristics().await?;
        info!("Received {} characteristics", characteristics.len());
        if cancel.is_cancelled() {
            return Err(GattError::Cancelled);
        }

        let characteristics = characteristics
            .into_iter()
            .map(|characteristic| CharacteristicHandle::new(characteristic, alerts.clone()))
            .collect();
        groups.push(ServiceGroup {
            service,
            characteristics,
        });
    }
    Ok(groups)
}
