//! Startup scan for Bliss fixtures that are not in the settings yet.
//!
//! A daemon has no pairing wizard; instead the scan logs every matching
//! fixture with the fields needed to add it to `Settings.toml`.

use std::collections::HashSet;
use std::time::Duration;

use btleplug::api::{Central, Peripheral as _, ScanFilter};
use btleplug::platform::Adapter;
use color_eyre::Result;

use crate::settings::Settings;

/// Bliss fixtures advertise local names like `HD1234` or `TS0042`.
pub fn is_bliss_name(name: &str) -> bool {
    let Some(digits) = name
        .strip_prefix("HD")
        .or_else(|| name.strip_prefix("TS"))
    else {
        return false;
    };

    digits.len() == 4 && digits.bytes().all(|b| b.is_ascii_digit())
}

pub async fn log_unconfigured_lights(adapter: &Adapter, settings: &Settings) -> Result<()> {
    let configured: HashSet<String> = settings.devices.iter().map(|d| d.id()).collect();

    log::info!(
        "scanning {}s for bliss lights",
        settings.discovery.scan_seconds
    );

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(settings.discovery.scan_seconds)).await;

    for peripheral in adapter.peripherals().await? {
        let Some(properties) = peripheral.properties().await? else {
            continue;
        };

        let name = properties.local_name.unwrap_or_default();
        if !is_bliss_name(&name) {
            continue;
        }

        let mac = peripheral.address().to_string();
        if configured.contains(&mac.to_lowercase()) {
            continue;
        }

        log::info!(
            "found unconfigured bliss light {name} at {mac} (rssi {})",
            properties
                .rssi
                .map_or_else(|| "unknown".to_string(), |rssi| rssi.to_string())
        );
    }

    adapter.stop_scan().await?;

    Ok(())
}
