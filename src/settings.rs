use color_eyre::Result;
use eyre::eyre;
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Clone, Deserialize, Debug)]
pub struct MqttSettings {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub light_topic: String,
    pub light_topic_set: String,
}

#[derive(Clone, Deserialize, Debug)]
pub struct DiscoverySettings {
    pub enabled: bool,

    #[serde(default = "default_scan_seconds")]
    pub scan_seconds: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        DiscoverySettings {
            enabled: false,
            scan_seconds: default_scan_seconds(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct DeviceSettings {
    pub name: String,

    /// Bluetooth address of the fixture, colon-delimited.
    pub mac: String,

    /// Pairing password, sent in the login frame after connecting.
    #[serde(default = "default_password")]
    pub password: String,

    /// Device units at full brightness.
    #[serde(default = "default_brightness_range")]
    pub brightness_range: u16,

    /// Standard poll interval.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// Poll interval used for a while after a command was sent, while the
    /// fixture's reported state is expected to still be moving.
    #[serde(default = "default_fast_poll_interval_seconds")]
    pub fast_poll_interval_seconds: u64,

    /// How long after a command the fast interval stays in effect.
    #[serde(default = "default_fast_poll_window_seconds")]
    pub fast_poll_window_seconds: u64,

    /// Number of scenes stored on the fixture. Zero disables scene support.
    #[serde(default)]
    pub scene_count: u8,
}

impl DeviceSettings {
    /// Device id used in MQTT topics and for routing incoming commands.
    pub fn id(&self) -> String {
        self.mac.to_lowercase()
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct Settings {
    pub mqtt: MqttSettings,

    #[serde(default)]
    pub discovery: DiscoverySettings,

    pub devices: Vec<DeviceSettings>,
}

fn default_scan_seconds() -> u64 {
    10
}

fn default_password() -> String {
    "123456".to_string()
}

fn default_brightness_range() -> u16 {
    1000
}

fn default_poll_interval_seconds() -> u64 {
    300
}

fn default_fast_poll_interval_seconds() -> u64 {
    5
}

fn default_fast_poll_window_seconds() -> u64 {
    30
}

pub fn read_settings() -> Result<Settings> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("Settings"))
        .build()?
        .try_deserialize::<Settings>()?;

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<()> {
    let mut seen_macs = HashSet::new();

    for device in &settings.devices {
        if device.name.is_empty() {
            return Err(eyre!("Device with mac {} has an empty name", device.mac));
        }

        if btleplug::api::BDAddr::from_str_delim(&device.mac).is_err() {
            return Err(eyre!(
                "Device {} has an invalid mac address: {}",
                device.name,
                device.mac
            ));
        }

        // A mac address identifies exactly one paired fixture
        if !seen_macs.insert(device.id()) {
            return Err(eyre!(
                "Device {} has a duplicate mac address: {}",
                device.name,
                device.mac
            ));
        }

        if !(10..=10000).contains(&device.brightness_range) {
            return Err(eyre!(
                "Device {} has brightness_range {} outside 10..=10000",
                device.name,
                device.brightness_range
            ));
        }

        if device.poll_interval_seconds == 0 || device.fast_poll_interval_seconds == 0 {
            return Err(eyre!(
                "Device {} must have nonzero poll intervals",
                device.name
            ));
        }

        if device.fast_poll_interval_seconds > device.poll_interval_seconds {
            return Err(eyre!(
                "Device {} has fast_poll_interval_seconds {} above poll_interval_seconds {}",
                device.name,
                device.fast_poll_interval_seconds,
                device.poll_interval_seconds
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_from_toml(source: &str) -> Settings {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize::<Settings>()
            .unwrap()
    }

    const BASE: &str = r#"
        [mqtt]
        id = "bliss-mqtt"
        host = "localhost"
        port = 1883
        light_topic = "home/lights/{id}"
        light_topic_set = "home/lights/{id}/set"
    "#;

    #[test]
    fn applies_device_defaults() {
        let toml = format!(
            "{BASE}\n[[devices]]\nname = \"Kitchen\"\nmac = \"AA:BB:CC:DD:EE:FF\"\n"
        );
        let settings = settings_from_toml(&toml);

        validate_settings(&settings).unwrap();

        let device = &settings.devices[0];
        assert_eq!(device.password, "123456");
        assert_eq!(device.brightness_range, 1000);
        assert_eq!(device.poll_interval_seconds, 300);
        assert_eq!(device.fast_poll_interval_seconds, 5);
        assert_eq!(device.fast_poll_window_seconds, 30);
        assert_eq!(device.scene_count, 0);
        assert!(!settings.discovery.enabled);
    }

    #[test]
    fn device_id_is_lowercased_mac() {
        let toml = format!(
            "{BASE}\n[[devices]]\nname = \"Kitchen\"\nmac = \"AA:BB:CC:DD:EE:FF\"\n"
        );
        let settings = settings_from_toml(&toml);

        assert_eq!(settings.devices[0].id(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn rejects_duplicate_mac_ignoring_case() {
        let toml = format!(
            "{BASE}\n\
             [[devices]]\nname = \"Kitchen\"\nmac = \"AA:BB:CC:DD:EE:FF\"\n\
             [[devices]]\nname = \"Hallway\"\nmac = \"aa:bb:cc:dd:ee:ff\"\n"
        );
        let settings = settings_from_toml(&toml);

        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn rejects_invalid_mac() {
        let toml = format!("{BASE}\n[[devices]]\nname = \"Kitchen\"\nmac = \"not-a-mac\"\n");
        let settings = settings_from_toml(&toml);

        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn rejects_fast_interval_above_standard() {
        let toml = format!(
            "{BASE}\n[[devices]]\nname = \"Kitchen\"\nmac = \"AA:BB:CC:DD:EE:FF\"\n\
             poll_interval_seconds = 60\nfast_poll_interval_seconds = 120\n"
        );
        let settings = settings_from_toml(&toml);

        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn rejects_brightness_range_out_of_bounds() {
        let toml = format!(
            "{BASE}\n[[devices]]\nname = \"Kitchen\"\nmac = \"AA:BB:CC:DD:EE:FF\"\n\
             brightness_range = 5\n"
        );
        let settings = settings_from_toml(&toml);

        assert!(validate_settings(&settings).is_err());
    }
}
