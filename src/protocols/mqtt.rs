use color_eyre::Result;
use rumqttc::{AsyncClient, MqttOptions};
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::{
    sync::{Notify, RwLock},
    task,
};

use crate::{
    mqtt::events::handle_incoming_mqtt_event, mqtt::mqtt_device::MqttDevice, settings::Settings,
};

#[derive(Clone)]
pub struct MqttClient {
    pub client: AsyncClient,

    /// Incoming command documents waiting for the routing loop, newest per
    /// device id only.
    pub unhandled_messages: Arc<RwLock<VecDeque<MqttDevice>>>,
    pub notify: Arc<Notify>,
}

pub async fn mk_mqtt_client(settings: &Settings) -> Result<MqttClient> {
    let mut options = MqttOptions::new(
        settings.mqtt.id.clone(),
        settings.mqtt.host.clone(),
        settings.mqtt.port,
    );
    options.set_keep_alive(Duration::from_secs(5));
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    let mqtt_client = MqttClient {
        client,
        unhandled_messages: Default::default(),
        notify: Default::default(),
    };

    // The command topic subscription happens in the ConnAck handler, so it
    // also survives broker reconnects.
    let task_client = mqtt_client.clone();
    let settings = settings.clone();

    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(notification) => {
                    if let Err(e) =
                        handle_incoming_mqtt_event(notification, &task_client, &settings).await
                    {
                        log::error!("MQTT error: {:?}", e);
                    }
                }
                Err(e) => {
                    log::error!("MQTT connection error: {:?}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    });

    Ok(mqtt_client)
}
