use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::tuya::ValveUpdate;
use crate::tuya::shadow::ValveState;

pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    config: Config,
}

impl MqttClient {
    pub fn new(config: &Config) -> Self {
        let mut mqttopts = MqttOptions::new(
            &config.mqtt.client_id,
            &config.mqtt.broker_host,
            config.mqtt.broker_port,
        );
        mqttopts.set_keep_alive(std::time::Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
            mqttopts.set_credentials(user, pass);
        }

        // LWT: publish "offline" on disconnect.
        let lwt = rumqttc::LastWill::new(
            config.bridge_status_topic(),
            "offline".as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        );
        mqttopts.set_last_will(lwt);

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Self {
            client,
            eventloop,
            config: config.clone(),
        }
    }

    /// Run the MQTT event loop. Subscribes to the command topic on connect,
    /// forwards incoming publish messages through command_tx, and publishes
    /// valve updates received from update_rx.
    pub async fn run(
        mut self,
        command_tx: mpsc::Sender<MqttMessage>,
        mut update_rx: mpsc::Receiver<ValveUpdate>,
    ) {
        let command_topic = self.config.command_topic();
        let mut published = Published::default();

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("Connected to MQTT broker");
                            for (topic, payload) in replay_messages(&self.config, &published) {
                                publish(&self.client, &topic, &payload).await;
                            }
                            if let Err(e) = self
                                .client
                                .subscribe(&command_topic, QoS::AtLeastOnce)
                                .await
                            {
                                error!("Failed to subscribe to {}: {}", command_topic, e);
                            }
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let payload = String::from_utf8_lossy(&publish.payload).to_string();
                            let msg = MqttMessage {
                                topic: publish.topic.clone(),
                                payload,
                            };
                            if command_tx.send(msg).await.is_err() {
                                warn!("Command channel closed");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT connection error: {}. Reconnecting...", e);
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                    }
                }
                Some(update) = update_rx.recv() => {
                    for (topic, payload) in messages_for(&self.config, update, &mut published) {
                        publish(&self.client, &topic, &payload).await;
                    }
                }
            }
        }
    }
}

async fn publish(client: &AsyncClient, topic: &str, payload: &str) {
    info!("Publishing {}: {}", topic, payload);
    if let Err(e) = client
        .publish(topic, QoS::AtLeastOnce, true, payload.as_bytes().to_vec())
        .await
    {
        warn!("Failed to publish {}: {}", topic, e);
    }
}

/// What has gone out so far; replayed after every reconnect.
#[derive(Debug, Default)]
struct Published {
    state: Option<ValveState>,
    attributes: Option<String>,
}

/// Topic/payload pairs for one valve update. An unchanged state yields nothing.
fn messages_for(
    config: &Config,
    update: ValveUpdate,
    published: &mut Published,
) -> Vec<(String, String)> {
    match update {
        ValveUpdate::Attributes(value) => {
            let json = value.to_string();
            published.attributes = Some(json.clone());
            vec![(config.attributes_topic(), json)]
        }
        ValveUpdate::State(state) => {
            if published.state == Some(state) {
                return Vec::new();
            }
            published.state = Some(state);
            state_messages(config, state)
        }
    }
}

/// Everything a fresh broker session needs: bridge status, then any
/// attributes and state already known.
fn replay_messages(config: &Config, published: &Published) -> Vec<(String, String)> {
    let mut messages = vec![(config.bridge_status_topic(), "online".to_string())];
    if let Some(json) = &published.attributes {
        messages.push((config.attributes_topic(), json.clone()));
    }
    if let Some(state) = published.state {
        messages.extend(state_messages(config, state));
    }
    messages
}

// Availability before state.
fn state_messages(config: &Config, state: ValveState) -> Vec<(String, String)> {
    let availability = if state == ValveState::Unknown {
        "offline"
    } else {
        "online"
    };
    vec![
        (config.availability_topic(), availability.to_string()),
        (config.state_topic(), state.as_str().to_string()),
    ]
}
