mod config;
mod mqtt;
mod tuya;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use tuya::ValveCommand;
use tuya::client::CloudValveClient;
use tuya::worker::ValveWorker;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting tuya-valve-mqtt bridge (mqtt={}:{}, cloud={}, device={}, poll={}s)",
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.tuya.base_url,
        config.tuya.device_id,
        config.tuya.poll_interval_secs,
    );

    let mut client = match CloudValveClient::new(config.credentials(), config.settle_delays()) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create cloud client: {}", e);
            std::process::exit(1);
        }
    };

    if !client.validate().await {
        error!(
            "Could not authenticate with {} or reach device {}; check credentials",
            config.tuya.base_url, config.tuya.device_id
        );
        std::process::exit(1);
    }
    // Metadata is static; fetch it once and hand it to the worker.
    let device_info = match client.device_info().await {
        Ok(info) => info,
        Err(e) => {
            warn!("Could not fetch device metadata: {}", e);
            None
        }
    };
    match device_info.as_ref().and_then(|i| i.name.as_deref()) {
        Some(name) => info!("Credentials validated for '{}'", name),
        None => info!("Credentials validated for device {}", config.tuya.device_id),
    }

    // Channels
    let (mqtt_cmd_tx, mut mqtt_cmd_rx) = mpsc::channel::<mqtt::client::MqttMessage>(100);
    let (update_tx, update_rx) = mpsc::channel::<tuya::ValveUpdate>(50);
    let (valve_cmd_tx, valve_cmd_rx) = mpsc::channel::<ValveCommand>(10);

    // Create MQTT client and spawn event loop (handles both MQTT I/O and state publishing)
    let mqtt_client = mqtt::client::MqttClient::new(&config);
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(mqtt_cmd_tx, update_rx).await;
    });

    let worker = ValveWorker::new(client, config.valve.name.clone(), device_info);
    let poll_interval = config.poll_interval();
    let worker_handle = tokio::spawn(async move {
        worker.run(update_tx, valve_cmd_rx, poll_interval).await;
    });

    let command_topic = config.command_topic();

    // Main loop: route MQTT commands to the valve + handle shutdown
    loop {
        tokio::select! {
            Some(msg) = mqtt_cmd_rx.recv() => {
                match route_command(&msg.topic, &msg.payload, &command_topic) {
                    Some(cmd) => {
                        info!("Received {:?} command", cmd);
                        if valve_cmd_tx.send(cmd).await.is_err() {
                            warn!("Valve command channel closed");
                        }
                    }
                    None => warn!("Ignoring message on {}: {}", msg.topic, msg.payload),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => { sigterm.recv().await; }
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            } => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    // Cleanup
    worker_handle.abort();
    mqtt_handle.abort();
    info!("tuya-valve-mqtt bridge stopped");
}

/// Map an incoming MQTT message to a valve command.
/// Only `{prefix}/{topic_name}/command` is accepted.
fn route_command(topic: &str, payload: &str, command_topic: &str) -> Option<ValveCommand> {
    if topic != command_topic {
        return None;
    }
    ValveCommand::parse(payload)
}
