//! Connection to a single Bliss lighting fixture.
//!
//! Wraps a btleplug peripheral with the Bliss session ritual: connect,
//! resolve services, subscribe to the response characteristic, login, sync
//! the device clock. Commands are written one at a time with a settle pause,
//! matching what the fixtures tolerate.

use std::pin::Pin;
use std::time::Duration;

use btleplug::api::{BDAddr, Characteristic, Peripheral as _, ValueNotification, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use chrono::Local;
use futures::{FutureExt, Stream, StreamExt};
use uuid::Uuid;

use crate::bliss::codec::{self, Notification};
use crate::bliss::error::BlissError;
use crate::protocols::ble;
use crate::settings::DeviceSettings;

/// Pause after every GATT write; the fixtures drop back-to-back commands.
const WRITE_SETTLE: Duration = Duration::from_millis(100);

/// How long to wait for the status notification after a read request.
const STATUS_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to scan for the fixture when (re)connecting.
const FIND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LightState {
    pub available: bool,

    /// Current level in device units, if a report or command established one.
    pub raw_level: Option<u16>,

    /// Active scene index, if known.
    pub scene: Option<u8>,
}

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

struct Connection {
    peripheral: Peripheral,
    command_char: Characteristic,
    response_char: Characteristic,
    notifications: NotificationStream,
}

pub struct BlissLightClient {
    address: BDAddr,
    password: String,
    brightness_range: u16,
    scene_count: u8,
    connection: Option<Connection>,
    state: LightState,
    last_on_level: Option<u16>,
}

impl BlissLightClient {
    pub fn new(settings: &DeviceSettings) -> Result<Self, BlissError> {
        Ok(BlissLightClient {
            address: ble::parse_mac(&settings.mac)?,
            password: settings.password.clone(),
            brightness_range: settings.brightness_range,
            scene_count: settings.scene_count,
            connection: None,
            state: LightState::default(),
            last_on_level: None,
        })
    }

    pub fn state(&self) -> &LightState {
        &self.state
    }

    pub async fn ensure_connected(&mut self, adapter: &Adapter) -> Result<(), BlissError> {
        if let Some(connection) = &self.connection {
            if connection.peripheral.is_connected().await.unwrap_or(false) {
                return Ok(());
            }
        }

        self.connect(adapter).await
    }

    async fn connect(&mut self, adapter: &Adapter) -> Result<(), BlissError> {
        self.connection = None;
        self.state.available = false;

        let peripheral = ble::find_peripheral(adapter, self.address, FIND_TIMEOUT).await?;

        log::debug!("connecting to bliss light {}", self.address);
        peripheral.connect().await?;

        // Resolve services before touching characteristics. BlueZ sometimes
        // reports a successful connection while the characteristic cache is
        // still empty, and the subscribe below would then fail.
        peripheral.discover_services().await?;

        let command_char = find_characteristic(&peripheral, self.address, codec::COMMAND_UUID)?;
        let response_char = find_characteristic(&peripheral, self.address, codec::RESPONSE_UUID)?;

        peripheral.subscribe(&response_char).await?;
        let notifications = peripheral.notifications().await?;

        self.connection = Some(Connection {
            peripheral,
            command_char,
            response_char,
            notifications,
        });

        if let Err(err) = self.login_and_sync_clock().await {
            // A half-initialized session is worse than none; the next poll
            // reconnects from scratch.
            self.disconnect().await;
            return Err(err);
        }

        self.state.available = true;
        Ok(())
    }

    async fn login_and_sync_clock(&mut self) -> Result<(), BlissError> {
        self.write_command(&codec::build_login(&self.password), "login")
            .await?;
        self.write_command(&codec::build_set_clock(Local::now().naive_local()), "set_clock")
            .await
    }

    pub async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            if connection.peripheral.is_connected().await.unwrap_or(false) {
                log::debug!("disconnecting bliss light {}", self.address);

                if let Err(err) = connection.peripheral.unsubscribe(&connection.response_char).await
                {
                    log::debug!("unsubscribe from {} failed: {err}", self.address);
                }
                if let Err(err) = connection.peripheral.disconnect().await {
                    log::debug!("disconnect from {} failed: {err}", self.address);
                }
            }
        }

        self.state.available = false;
    }

    /// Request a fresh status report from the fixture.
    ///
    /// Waits up to [`STATUS_TIMEOUT`] for the reply; on timeout the previous
    /// state is kept, as a slow fixture will still be caught by a later poll.
    pub async fn refresh_status(&mut self, adapter: &Adapter) -> Result<&LightState, BlissError> {
        self.ensure_connected(adapter).await?;

        self.drain_notifications();
        self.write_command(&codec::READ_STATUS, "read_status").await?;

        match self.wait_for_status().await {
            Some(Notification::Status { level, scene }) => self.apply_level(level, Some(scene)),
            _ => log::debug!("timeout waiting for status from {}", self.address),
        }

        Ok(&self.state)
    }

    pub async fn set_power(&mut self, adapter: &Adapter, on: bool) -> Result<(), BlissError> {
        self.ensure_connected(adapter).await?;

        let level = if on {
            self.last_on_level.unwrap_or(self.brightness_range)
        } else {
            0
        };

        self.write_level(level).await
    }

    pub async fn set_brightness(
        &mut self,
        adapter: &Adapter,
        fraction: f32,
    ) -> Result<(), BlissError> {
        self.ensure_connected(adapter).await?;

        let level = level_for_fraction(fraction, self.brightness_range);
        self.write_level(level).await
    }

    pub async fn recall_scene(&mut self, adapter: &Adapter, index: u8) -> Result<(), BlissError> {
        if index >= self.scene_count {
            return Err(BlissError::SceneOutOfRange {
                index,
                count: self.scene_count,
            });
        }

        self.ensure_connected(adapter).await?;
        self.write_command(&codec::build_recall_scene(index), "recall_scene")
            .await?;

        self.state.scene = Some(index);
        // Scene recall turns the fixture on at a level we only learn from the
        // next status report.
        if self.state.raw_level == Some(0) {
            self.state.raw_level = None;
        }

        Ok(())
    }

    async fn write_level(&mut self, level: u16) -> Result<(), BlissError> {
        self.write_command(&codec::build_set_level(level), "set_level")
            .await?;
        self.apply_level(level, None);
        Ok(())
    }

    async fn write_command(&mut self, frame: &[u8], label: &str) -> Result<(), BlissError> {
        let Some(connection) = &self.connection else {
            return Err(BlissError::NotConnected {
                address: self.address,
            });
        };

        log::debug!("→ {} {label}: {}", self.address, codec::hex(frame));
        connection
            .peripheral
            .write(&connection.command_char, frame, WriteType::WithResponse)
            .await?;
        tokio::time::sleep(WRITE_SETTLE).await;

        Ok(())
    }

    /// Toss buffered notifications so the next wait sees a fresh report.
    fn drain_notifications(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };

        while let Some(Some(_)) = connection.notifications.next().now_or_never() {}
    }

    async fn wait_for_status(&mut self) -> Option<Notification> {
        let connection = self.connection.as_mut()?;
        let address = self.address;

        let deadline = tokio::time::Instant::now() + STATUS_TIMEOUT;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }

            match tokio::time::timeout(remaining, connection.notifications.next()).await {
                Ok(Some(notification)) => {
                    if notification.uuid != codec::RESPONSE_UUID {
                        continue;
                    }

                    log::debug!("← notify {address}: {}", codec::hex(&notification.value));

                    match codec::parse_notification(&notification.value) {
                        status @ Some(Notification::Status { .. }) => return status,
                        // Level acks carry the level the status report will
                        // repeat; keep waiting for the report itself.
                        Some(Notification::LevelAck { .. }) | None => {}
                    }
                }
                Ok(None) | Err(_) => return None,
            }
        }
    }

    fn apply_level(&mut self, level: u16, scene: Option<u8>) {
        let level = level.min(self.brightness_range);

        self.state.raw_level = Some(level);
        self.state.available = true;

        if level > 0 {
            self.last_on_level = Some(level);
        }
        if let Some(scene) = scene {
            self.state.scene = Some(scene);
        }
    }
}

fn find_characteristic(
    peripheral: &Peripheral,
    address: BDAddr,
    uuid: Uuid,
) -> Result<Characteristic, BlissError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|characteristic| characteristic.uuid == uuid)
        .ok_or(BlissError::CharacteristicNotFound { address, uuid })
}

/// Brightness fraction to device units, clamped to the fixture's range.
pub fn level_for_fraction(fraction: f32, range: u16) -> u16 {
    let fraction = fraction.clamp(0.0, 1.0);
    (f32::from(range) * fraction).round() as u16
}

/// Device units to brightness fraction.
pub fn fraction_for_level(level: u16, range: u16) -> f32 {
    if range == 0 {
        return 0.0;
    }

    (f32::from(level) / f32::from(range)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_maps_to_device_units() {
        assert_eq!(level_for_fraction(0.5, 1000), 500);
        assert_eq!(level_for_fraction(0.0, 1000), 0);
        assert_eq!(level_for_fraction(1.0, 1000), 1000);
    }

    #[test]
    fn fraction_is_clamped_before_scaling() {
        assert_eq!(level_for_fraction(1.5, 1000), 1000);
        assert_eq!(level_for_fraction(-0.2, 1000), 0);
    }

    #[test]
    fn level_maps_back_to_fraction() {
        assert_eq!(fraction_for_level(500, 1000), 0.5);
        assert_eq!(fraction_for_level(0, 1000), 0.0);
        assert_eq!(fraction_for_level(1000, 1000), 1.0);
    }

    #[test]
    fn level_above_range_clamps_to_full() {
        assert_eq!(fraction_for_level(1200, 1000), 1.0);
    }

    #[test]
    fn zero_range_does_not_divide() {
        assert_eq!(fraction_for_level(500, 0), 0.0);
    }
}
