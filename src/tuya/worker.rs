use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::client::CloudValveClient;
use super::shadow::{DeviceInfo, ValveState};
use super::{ValveCommand, ValveUpdate};

const DEFAULT_MODEL: &str = "Remote Water Valve";

/// Owns the cloud client and serializes every call to it: polls run on a
/// timer, commands run as they arrive, never both at once.
pub struct ValveWorker {
    client: CloudValveClient,
    name: String,
    info: Option<DeviceInfo>,
}

impl ValveWorker {
    /// `info` is the metadata fetched once at startup, if the cloud had any.
    pub fn new(client: CloudValveClient, name: String, info: Option<DeviceInfo>) -> Self {
        Self { client, name, info }
    }

    /// Main valve loop. Publishes attributes once, then state on every poll
    /// tick and after every command.
    pub async fn run(
        mut self,
        update_tx: mpsc::Sender<ValveUpdate>,
        mut cmd_rx: mpsc::Receiver<ValveCommand>,
        poll_interval: Duration,
    ) {
        let attributes = attributes_json(self.client.device_id(), &self.name, self.info.as_ref());
        if update_tx.send(ValveUpdate::Attributes(attributes)).await.is_err() {
            warn!("Valve update channel closed");
            return;
        }

        let mut poll_timer = tokio::time::interval(poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let state = tokio::select! {
                _ = poll_timer.tick() => self.poll().await,
                Some(cmd) = cmd_rx.recv() => {
                    let state = self.execute(cmd).await;
                    // Fresh read-back; no need to poll again right away.
                    poll_timer.reset();
                    state
                }
            };

            if update_tx.send(ValveUpdate::State(state)).await.is_err() {
                warn!("Valve update channel closed");
                return;
            }
        }
    }

    async fn poll(&mut self) -> ValveState {
        match self.client.read_state().await {
            Ok(state) => ValveState::from(state),
            Err(e) => {
                error!("Failed to read state of {}: {}", self.name, e);
                ValveState::Unknown
            }
        }
    }

    async fn execute(&mut self, cmd: ValveCommand) -> ValveState {
        let open = cmd == ValveCommand::Open;
        let result = match cmd {
            ValveCommand::Open => self.client.open().await,
            ValveCommand::Close => self.client.close().await,
        };

        match result {
            Ok(true) => {
                let state = ValveState::from(Some(open));
                info!("{} confirmed {}", self.name, state.as_str());
                state
            }
            Ok(false) => {
                warn!("{} did not confirm {:?}, re-reading state", self.name, cmd);
                self.poll().await
            }
            Err(e) => {
                error!("{:?} command for {} failed: {}", cmd, self.name, e);
                self.poll().await
            }
        }
    }
}

/// Static attributes published once per start. The cloud name wins over the
/// configured one.
fn attributes_json(device_id: &str, fallback_name: &str, info: Option<&DeviceInfo>) -> Value {
    let empty = DeviceInfo::default();
    let info = info.unwrap_or(&empty);
    json!({
        "name": info.name.as_deref().unwrap_or(fallback_name),
        "manufacturer": "Tuya",
        "model": info.display_model().unwrap_or(DEFAULT_MODEL),
        "tuya_device_id": device_id,
        "tuya_mac": info.mac,
        "tuya_sn": info.sn,
        "tuya_category": info.category,
        "tuya_product_name": info.product_name,
        "tuya_product_id": info.product_id,
        "tuya_model": info.model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuya::client::{Credentials, SettleDelays};
    use httpmock::prelude::*;

    const DEVICE: &str = "dev123";
    const OPEN_STATE: &str = "eyJ2YWx2ZV9zdGF0ZV9saXN0Ijp7InZhbHZlc3RhdGVsaXN0IjpbdHJ1ZSxmYWxzZV19fQ==";

    async fn cloud(server: &MockServer) -> httpmock::Mock<'_> {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1.0/token");
                then.status(200).json_body(serde_json::json!({
                    "success": true,
                    "result": { "access_token": "tok", "expire_time": 7200 }
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(format!("/v2.0/cloud/thing/{DEVICE}/shadow/properties/issue"));
                then.status(200)
                    .json_body(serde_json::json!({ "success": true, "result": true }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path(format!("/v2.0/cloud/thing/{DEVICE}/shadow/properties"));
                then.status(200).json_body(serde_json::json!({
                    "success": true,
                    "result": { "properties": [{ "code": "valve_state_list", "value": OPEN_STATE }] }
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("/v1.0/iot-03/devices/{DEVICE}"));
                then.status(200).json_body(serde_json::json!({
                    "success": true,
                    "result": { "name": "Backyard Water Valve" }
                }));
            })
            .await
    }

    fn worker(server: &MockServer, info: Option<DeviceInfo>) -> ValveWorker {
        let client = CloudValveClient::new(
            Credentials {
                base_url: server.base_url(),
                client_id: "cid".into(),
                client_secret: "secret".into(),
                device_id: DEVICE.into(),
            },
            SettleDelays::ZERO,
        )
        .unwrap();
        ValveWorker::new(client, "Tuya Valve".into(), info)
    }

    #[tokio::test]
    async fn test_worker_publishes_attributes_then_state() {
        let server = MockServer::start_async().await;
        let metadata_mock = cloud(&server).await;
        let info = DeviceInfo::from_metadata(&serde_json::json!({
            "name": "Backyard Water Valve",
            "mac": "aa:bb",
            "category": "sfkzq"
        }));
        let (update_tx, mut update_rx) = mpsc::channel(10);
        let (cmd_tx, cmd_rx) = mpsc::channel(10);

        let handle = tokio::spawn(worker(&server, Some(info)).run(
            update_tx,
            cmd_rx,
            Duration::from_secs(3600),
        ));

        let Some(ValveUpdate::Attributes(attrs)) = update_rx.recv().await else {
            panic!("expected attributes first");
        };
        assert_eq!(attrs["name"], "Backyard Water Valve");
        assert_eq!(attrs["tuya_mac"], "aa:bb");
        assert_eq!(attrs["tuya_device_id"], DEVICE);

        assert_eq!(update_rx.recv().await, Some(ValveUpdate::State(ValveState::Open)));

        // The device keeps reporting open, so a close is not confirmed and
        // the worker falls back to the state it reads.
        cmd_tx.send(ValveCommand::Close).await.unwrap();
        assert_eq!(update_rx.recv().await, Some(ValveUpdate::State(ValveState::Open)));

        cmd_tx.send(ValveCommand::Open).await.unwrap();
        assert_eq!(update_rx.recv().await, Some(ValveUpdate::State(ValveState::Open)));

        // Metadata is handed in at construction, never fetched by the worker.
        metadata_mock.assert_calls_async(0).await;
        handle.abort();
    }

    #[tokio::test]
    async fn test_worker_falls_back_to_configured_name() {
        let server = MockServer::start_async().await;
        cloud(&server).await;
        let (update_tx, mut update_rx) = mpsc::channel(10);
        let (_cmd_tx, cmd_rx) = mpsc::channel(10);

        let handle = tokio::spawn(worker(&server, None).run(
            update_tx,
            cmd_rx,
            Duration::from_secs(3600),
        ));

        let Some(ValveUpdate::Attributes(attrs)) = update_rx.recv().await else {
            panic!("expected attributes first");
        };
        assert_eq!(attrs["name"], "Tuya Valve");
        assert_eq!(attrs["model"], DEFAULT_MODEL);
        assert!(attrs["tuya_mac"].is_null());

        handle.abort();
    }

    #[test]
    fn test_attributes_prefer_cloud_model() {
        let info = DeviceInfo {
            model: Some("SWV-01".into()),
            sn: Some("SN42".into()),
            ..Default::default()
        };
        let attrs = attributes_json(DEVICE, "Garden", Some(&info));
        assert_eq!(attrs["name"], "Garden");
        assert_eq!(attrs["model"], "SWV-01");
        assert_eq!(attrs["tuya_sn"], "SN42");
        assert_eq!(attrs["tuya_model"], "SWV-01");
        assert_eq!(attrs["manufacturer"], "Tuya");
    }

    #[test]
    fn test_raw_model_stays_empty_when_only_product_name_known() {
        let info = DeviceInfo::from_metadata(&serde_json::json!({
            "product_name": "Remote Water Valve Pro"
        }));
        let attrs = attributes_json(DEVICE, "Garden", Some(&info));
        assert_eq!(attrs["model"], "Remote Water Valve Pro");
        assert_eq!(attrs["tuya_product_name"], "Remote Water Valve Pro");
        assert!(attrs["tuya_model"].is_null());
    }
}
