use color_eyre::Result;
use rumqttc::QoS;
use std::collections::HashMap;

use crate::{
    bliss::device::DeviceHandle, mqtt::mqtt_device::MqttDevice, protocols::mqtt::MqttClient,
    settings::Settings,
};

pub async fn handle_incoming_mqtt_event(
    event: rumqttc::Event,
    mqtt_client: &MqttClient,
    settings: &Settings,
) -> Result<()> {
    match event {
        rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
            mqtt_client
                .client
                .subscribe(
                    settings.mqtt.light_topic_set.replace("{id}", "+"),
                    QoS::AtMostOnce,
                )
                .await?;
        }
        rumqttc::Event::Incoming(rumqttc::Packet::Publish(msg)) => {
            let de = &mut serde_json::Deserializer::from_slice(&msg.payload);
            let mut device: MqttDevice = serde_path_to_error::deserialize(de)?;

            // Device ids are lowercased mac addresses; be forgiving about
            // hand-written command payloads.
            device.id = device.id.to_lowercase();

            // Push device update to the unhandled messages queue, removing
            // any existing unhandled messages for the same device.
            let mut unhandled_messages = mqtt_client.unhandled_messages.write().await;
            unhandled_messages.retain(|d: &MqttDevice| d.id != device.id);
            unhandled_messages.push_back(device);

            // Notify the routing task that there are new messages
            mqtt_client.notify.notify_one();
        }
        _ => {}
    }

    Ok(())
}

pub fn start_mqtt_events_loop(
    mqtt_client: &MqttClient,
    device_handles: HashMap<String, DeviceHandle>,
) {
    let unhandled_messages = mqtt_client.unhandled_messages.clone();
    let notify = mqtt_client.notify.clone();

    tokio::spawn(async move {
        loop {
            let next_message = {
                let mut unhandled_messages = unhandled_messages.write().await;
                unhandled_messages.pop_front()
            };

            match next_message {
                Some(message) => match device_handles.get(&message.id) {
                    Some(handle) => handle.send(message).await,
                    None => {
                        log::warn!("ignoring command for unknown device id {:?}", message.id);
                    }
                },
                None => {
                    // Wait until we get notified that there are new messages.
                    notify.notified().await;
                }
            }
        }
    });
}
