use std::time::Duration;

use btleplug::api::{BDAddr, Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;

use crate::bliss::error::BlissError;

pub async fn mk_ble_adapter() -> Result<Adapter, BlissError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(BlissError::AdapterNotAvailable)
}

pub fn parse_mac(mac: &str) -> Result<BDAddr, BlissError> {
    BDAddr::from_str_delim(mac).map_err(|_| BlissError::InvalidAddress {
        mac: mac.to_string(),
    })
}

/// Scan until the peripheral with the given address shows up, bounded by a
/// deadline.
pub async fn find_peripheral(
    adapter: &Adapter,
    address: BDAddr,
    timeout: Duration,
) -> Result<Peripheral, BlissError> {
    let mut events = adapter.events().await?;
    adapter.start_scan(ScanFilter::default()).await?;

    let deadline = tokio::time::Instant::now() + timeout;

    let found = loop {
        if let Some(peripheral) = peripheral_with_address(adapter, address).await? {
            break Some(peripheral);
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break None;
        }

        // Any central event is a cue to re-check the peripheral list
        match tokio::time::timeout(remaining, events.next()).await {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break None,
        }
    };

    if let Err(err) = adapter.stop_scan().await {
        log::warn!("failed to stop BLE scan: {err}");
    }

    found.ok_or(BlissError::DeviceNotFound {
        address,
        timeout_secs: timeout.as_secs(),
    })
}

async fn peripheral_with_address(
    adapter: &Adapter,
    address: BDAddr,
) -> Result<Option<Peripheral>, BlissError> {
    for peripheral in adapter.peripherals().await? {
        if peripheral.address() == address {
            return Ok(Some(peripheral));
        }
    }

    Ok(None)
}
