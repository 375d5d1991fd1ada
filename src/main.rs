use std::collections::HashMap;

use color_eyre::Result;

use crate::bliss::device::start_device_loop;
use crate::bliss::discovery::log_unconfigured_lights;
use crate::mqtt::events::start_mqtt_events_loop;
use crate::protocols::ble::mk_ble_adapter;
use crate::protocols::mqtt::mk_mqtt_client;
use crate::settings::read_settings;

mod bliss;
mod mqtt;
mod protocols;
mod settings;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    pretty_env_logger::init();

    let settings = read_settings()?;
    let mqtt_client = mk_mqtt_client(&settings).await?;
    let adapter = mk_ble_adapter().await?;

    if settings.discovery.enabled {
        log_unconfigured_lights(&adapter, &settings).await?;
    }

    let mut device_handles = HashMap::new();
    for device_settings in &settings.devices {
        let handle = start_device_loop(&settings, device_settings, &adapter, &mqtt_client)?;
        device_handles.insert(device_settings.id(), handle);
    }

    start_mqtt_events_loop(&mqtt_client, device_handles);

    tokio::signal::ctrl_c().await?;

    Ok(())
}
