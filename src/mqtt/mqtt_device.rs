use color_eyre::Result;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::{protocols::mqtt::MqttClient, settings::Settings};

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Capabilities {
    /// Dimmable via the device level channel
    pub brightness: bool,

    /// Number of scenes stored on the fixture (0 = unsupported)
    pub scenes: u8,
}

/// The JSON document exchanged over MQTT, both as retained state and as
/// incoming commands. Absent fields mean "unknown" on the state topic and
/// "leave unchanged" on the command topic.
#[derive(Builder, Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[builder(setter(into, strip_option), default)]
#[serde(default)]
pub struct MqttDevice {
    pub id: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

pub async fn publish_mqtt_device(
    mqtt_client: &MqttClient,
    settings: &Settings,
    mqtt_device: &MqttDevice,
) -> Result<()> {
    let topic = settings.mqtt.light_topic.replace("{id}", &mqtt_device.id);

    let json = serde_json::to_string(&mqtt_device)?;

    mqtt_client
        .client
        .publish(topic, rumqttc::QoS::AtLeastOnce, true, json)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_command_document_deserializes() {
        let payload = br#"{"id": "aa:bb:cc:dd:ee:ff", "power": true}"#;
        let device: MqttDevice = serde_json::from_slice(payload).unwrap();

        assert_eq!(device.id, "aa:bb:cc:dd:ee:ff");
        assert_eq!(device.power, Some(true));
        assert_eq!(device.brightness, None);
        assert_eq!(device.scene, None);
    }

    #[test]
    fn brightness_and_scene_round_trip() {
        let payload = br#"{"id": "aa:bb:cc:dd:ee:ff", "brightness": 0.25, "scene": 3}"#;
        let device: MqttDevice = serde_json::from_slice(payload).unwrap();

        assert_eq!(device.brightness, Some(0.25));
        assert_eq!(device.scene, Some(3));
    }

    #[test]
    fn state_document_omits_unknown_fields() {
        let device = MqttDeviceBuilder::default()
            .id("aa:bb:cc:dd:ee:ff")
            .name("Kitchen")
            .available(true)
            .build()
            .unwrap();

        let json = serde_json::to_string(&device).unwrap();

        assert!(json.contains("\"available\":true"));
        assert!(!json.contains("power"));
        assert!(!json.contains("brightness"));
        assert!(!json.contains("scene"));
    }
}
