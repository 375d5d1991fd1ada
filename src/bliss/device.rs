//! One task per configured fixture: applies incoming command documents and
//! polls the fixture for state, publishing every result to MQTT.

use std::time::Duration;

use btleplug::platform::Adapter;
use color_eyre::Result;
use tokio::sync::mpsc;

use crate::bliss::client::{fraction_for_level, BlissLightClient, LightState};
use crate::bliss::error::BlissError;
use crate::mqtt::mqtt_device::{
    publish_mqtt_device, Capabilities, MqttDevice, MqttDeviceBuilder,
};
use crate::protocols::mqtt::MqttClient;
use crate::settings::{DeviceSettings, Settings};

const COMMAND_QUEUE_DEPTH: usize = 8;

/// Routing endpoint for one running device task.
#[derive(Clone)]
pub struct DeviceHandle {
    pub settings: DeviceSettings,
    tx: mpsc::Sender<MqttDevice>,
}

impl DeviceHandle {
    pub async fn send(&self, command: MqttDevice) {
        if self.tx.send(command).await.is_err() {
            log::error!("device task for {} is gone", self.settings.name);
        }
    }
}

pub fn start_device_loop(
    settings: &Settings,
    device_settings: &DeviceSettings,
    adapter: &Adapter,
    mqtt_client: &MqttClient,
) -> Result<DeviceHandle> {
    let client = BlissLightClient::new(device_settings)?;
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

    let handle = DeviceHandle {
        settings: device_settings.clone(),
        tx,
    };

    tokio::spawn(run_device_loop(
        client,
        settings.clone(),
        device_settings.clone(),
        adapter.clone(),
        mqtt_client.clone(),
        rx,
    ));

    Ok(handle)
}

async fn run_device_loop(
    mut client: BlissLightClient,
    settings: Settings,
    device_settings: DeviceSettings,
    adapter: Adapter,
    mqtt_client: MqttClient,
    mut rx: mpsc::Receiver<MqttDevice>,
) {
    let standard = Duration::from_secs(device_settings.poll_interval_seconds);
    let fast = Duration::from_secs(device_settings.fast_poll_interval_seconds);
    let window = Duration::from_secs(device_settings.fast_poll_window_seconds);

    let mut last_command_at: Option<tokio::time::Instant> = None;

    // First poll fires immediately so the retained state topic is fresh on
    // startup.
    let mut next_poll = tokio::time::Instant::now();

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else { break };

                match apply_command(&mut client, &adapter, &command).await {
                    Ok(()) => {
                        last_command_at = Some(tokio::time::Instant::now());
                    }
                    Err(err) => {
                        log::error!(
                            "failed to apply command to {}: {err}",
                            device_settings.name
                        );
                        // A rejected command is not a transport problem
                        if !matches!(err, BlissError::SceneOutOfRange { .. }) {
                            client.disconnect().await;
                        }
                    }
                }
            }
            _ = tokio::time::sleep_until(next_poll) => {
                if let Err(err) = client.refresh_status(&adapter).await {
                    log::error!("failed to poll {}: {err}", device_settings.name);
                    client.disconnect().await;
                }
            }
        }

        let state = state_to_mqtt_device(client.state(), &device_settings);
        if let Err(err) = publish_mqtt_device(&mqtt_client, &settings, &state).await {
            log::error!("failed to publish state of {}: {err}", device_settings.name);
        }

        let since_command = last_command_at.map(|at| at.elapsed());
        next_poll =
            tokio::time::Instant::now() + poll_interval(since_command, standard, fast, window);
    }
}

/// Forward a command document to the fixture.
///
/// Power-off wins over everything else in the same document; otherwise scene
/// recall is applied before an explicit brightness, and a bare power-on
/// restores the last known level.
async fn apply_command(
    client: &mut BlissLightClient,
    adapter: &Adapter,
    command: &MqttDevice,
) -> Result<(), BlissError> {
    if command.power == Some(false) {
        return client.set_power(adapter, false).await;
    }

    if let Some(scene) = command.scene {
        client.recall_scene(adapter, scene).await?;
    }

    if let Some(brightness) = command.brightness {
        client.set_brightness(adapter, brightness).await?;
    } else if command.power == Some(true) && command.scene.is_none() {
        client.set_power(adapter, true).await?;
    }

    Ok(())
}

/// Pick the poll interval: fast while inside the post-command window,
/// standard otherwise.
fn poll_interval(
    since_command: Option<Duration>,
    standard: Duration,
    fast: Duration,
    window: Duration,
) -> Duration {
    match since_command {
        Some(elapsed) if elapsed < window => fast,
        _ => standard,
    }
}

pub(crate) fn state_to_mqtt_device(state: &LightState, settings: &DeviceSettings) -> MqttDevice {
    let mut builder = MqttDeviceBuilder::default();
    builder
        .id(settings.id())
        .name(settings.name.clone())
        .available(state.available)
        .capabilities(Capabilities {
            brightness: true,
            scenes: settings.scene_count,
        });

    if let Some(level) = state.raw_level {
        builder.power(level > 0);
        builder.brightness(fraction_for_level(level, settings.brightness_range));
    }

    if let Some(scene) = state.scene {
        builder.scene(scene);
    }

    builder.build().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_settings() -> DeviceSettings {
        DeviceSettings {
            name: "Kitchen".to_string(),
            mac: "AA:BB:CC:DD:EE:FF".to_string(),
            password: "123456".to_string(),
            brightness_range: 1000,
            poll_interval_seconds: 300,
            fast_poll_interval_seconds: 5,
            fast_poll_window_seconds: 30,
            scene_count: 4,
        }
    }

    #[test]
    fn standard_interval_without_recent_command() {
        let interval = poll_interval(
            None,
            Duration::from_secs(300),
            Duration::from_secs(5),
            Duration::from_secs(30),
        );
        assert_eq!(interval, Duration::from_secs(300));
    }

    #[test]
    fn fast_interval_inside_command_window() {
        let interval = poll_interval(
            Some(Duration::from_secs(10)),
            Duration::from_secs(300),
            Duration::from_secs(5),
            Duration::from_secs(30),
        );
        assert_eq!(interval, Duration::from_secs(5));
    }

    #[test]
    fn standard_interval_once_window_expired() {
        let interval = poll_interval(
            Some(Duration::from_secs(30)),
            Duration::from_secs(300),
            Duration::from_secs(5),
            Duration::from_secs(30),
        );
        assert_eq!(interval, Duration::from_secs(300));
    }

    #[test]
    fn state_with_level_reports_power_and_brightness() {
        let state = LightState {
            available: true,
            raw_level: Some(500),
            scene: Some(1),
        };

        let device = state_to_mqtt_device(&state, &device_settings());

        assert_eq!(device.id, "aa:bb:cc:dd:ee:ff");
        assert_eq!(device.available, Some(true));
        assert_eq!(device.power, Some(true));
        assert_eq!(device.brightness, Some(0.5));
        assert_eq!(device.scene, Some(1));
    }

    #[test]
    fn zero_level_reports_power_off() {
        let state = LightState {
            available: true,
            raw_level: Some(0),
            scene: None,
        };

        let device = state_to_mqtt_device(&state, &device_settings());

        assert_eq!(device.power, Some(false));
        assert_eq!(device.brightness, Some(0.0));
    }

    #[test]
    fn unknown_level_leaves_power_unset() {
        let state = LightState {
            available: false,
            raw_level: None,
            scene: None,
        };

        let device = state_to_mqtt_device(&state, &device_settings());

        assert_eq!(device.available, Some(false));
        assert_eq!(device.power, None);
        assert_eq!(device.brightness, None);
    }

    #[test]
    fn capabilities_advertise_scene_count() {
        let device = state_to_mqtt_device(&LightState::default(), &device_settings());

        assert_eq!(
            device.capabilities,
            Some(Capabilities {
                brightness: true,
                scenes: 4
            })
        );
    }
}
