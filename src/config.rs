use std::env;
use std::time::Duration;

use crate::tuya::client::{Credentials, SettleDelays};

pub const DEFAULT_BASE_URL: &str = "https://openapi.tuyaus.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub tuya: TuyaConfig,
    pub valve: ValveConfig,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
}

#[derive(Clone)]
pub struct TuyaConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub device_id: String,
    pub poll_interval_secs: u64,
    pub state_settle_ms: u64,
    pub command_settle_ms: u64,
}

// Hand-written so the secret never reaches the logs.
impl std::fmt::Debug for TuyaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TuyaConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("device_id", &self.device_id)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("state_settle_ms", &self.state_settle_ms)
            .field("command_settle_ms", &self.command_settle_ms)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ValveConfig {
    pub name: String,
    /// Sanitized name for use in MQTT topics (lowercase, spaces to underscores)
    pub topic_name: String,
}

struct Source<F: Fn(&str) -> Option<String>>(F);

impl<F: Fn(&str) -> Option<String>> Source<F> {
    fn required(&self, key: &str) -> Result<String, String> {
        self.optional(key)
            .ok_or_else(|| format!("{key} environment variable is required"))
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn or_default<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.optional(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_source(|key| env::var(key).ok())
    }

    fn from_source(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let src = Source(lookup);

        let name = src.or_default("VALVE_NAME", "Tuya Valve".to_string());
        let topic_name = sanitize_topic_name(&name);

        let config = Self {
            mqtt: MqttConfig {
                broker_host: src.required("MQTT_BROKER_HOST")?,
                broker_port: src.or_default("MQTT_BROKER_PORT", 1883),
                username: src.optional("MQTT_USERNAME"),
                password: src.optional("MQTT_PASSWORD"),
                topic_prefix: src.or_default("MQTT_TOPIC_PREFIX", "tuya".to_string()),
                client_id: src.or_default("MQTT_CLIENT_ID", "tuya-valve-mqtt".to_string()),
            },
            tuya: TuyaConfig {
                base_url: src.or_default("TUYA_BASE_URL", DEFAULT_BASE_URL.to_string()),
                client_id: src.required("TUYA_CLIENT_ID")?,
                client_secret: src.required("TUYA_CLIENT_SECRET")?,
                device_id: src.required("TUYA_DEVICE_ID")?,
                poll_interval_secs: src.or_default("TUYA_POLL_INTERVAL_SECS", 30),
                state_settle_ms: src.or_default("TUYA_STATE_SETTLE_MS", 800),
                command_settle_ms: src.or_default("TUYA_COMMAND_SETTLE_MS", 800),
            },
            valve: ValveConfig { name, topic_name },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.tuya.poll_interval_secs == 0 {
            return Err("TUYA_POLL_INTERVAL_SECS must be > 0".into());
        }
        if !self.tuya.base_url.starts_with("http://") && !self.tuya.base_url.starts_with("https://") {
            return Err(format!(
                "TUYA_BASE_URL must be an http(s) URL, got {}",
                self.tuya.base_url
            ));
        }
        if self.valve.topic_name.is_empty() {
            return Err("VALVE_NAME must contain at least one letter or digit".into());
        }
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            base_url: self.tuya.base_url.clone(),
            client_id: self.tuya.client_id.clone(),
            client_secret: self.tuya.client_secret.clone(),
            device_id: self.tuya.device_id.clone(),
        }
    }

    pub fn settle_delays(&self) -> SettleDelays {
        SettleDelays {
            state: Duration::from_millis(self.tuya.state_settle_ms),
            command: Duration::from_millis(self.tuya.command_settle_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.tuya.poll_interval_secs)
    }

    fn topic(&self, leaf: &str) -> String {
        format!("{}/{}/{}", self.mqtt.topic_prefix, self.valve.topic_name, leaf)
    }

    pub fn bridge_status_topic(&self) -> String {
        self.topic("bridge_status")
    }

    pub fn availability_topic(&self) -> String {
        self.topic("availability")
    }

    pub fn state_topic(&self) -> String {
        self.topic("state")
    }

    pub fn attributes_topic(&self) -> String {
        self.topic("attributes")
    }

    pub fn command_topic(&self) -> String {
        self.topic("command")
    }
}

/// Convert a valve name into a safe MQTT topic segment.
/// "Backyard Water Valve" → "backyard_water_valve"
fn sanitize_topic_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_source(|key| map.get(key).cloned())
    }

    const MINIMAL: &[(&str, &str)] = &[
        ("MQTT_BROKER_HOST", "broker.local"),
        ("TUYA_CLIENT_ID", "cid"),
        ("TUYA_CLIENT_SECRET", "hunter2"),
        ("TUYA_DEVICE_ID", "dev123"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(MINIMAL).unwrap();
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.mqtt.client_id, "tuya-valve-mqtt");
        assert_eq!(config.tuya.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.settle_delays(), SettleDelays::default());
        assert_eq!(config.valve.topic_name, "tuya_valve");
        assert_eq!(config.state_topic(), "tuya/tuya_valve/state");
        assert_eq!(config.command_topic(), "tuya/tuya_valve/command");
    }

    #[test]
    fn test_missing_secret_is_reported() {
        let vars: Vec<_> = MINIMAL
            .iter()
            .copied()
            .filter(|(k, _)| *k != "TUYA_CLIENT_SECRET")
            .collect();
        let err = load(&vars).unwrap_err();
        assert!(err.contains("TUYA_CLIENT_SECRET"), "{err}");
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut vars = MINIMAL.to_vec();
        vars.push(("TUYA_POLL_INTERVAL_SECS", "0"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let mut vars = MINIMAL.to_vec();
        vars.push(("TUYA_BASE_URL", "openapi.tuyaeu.com"));
        assert!(load(&vars).unwrap_err().contains("TUYA_BASE_URL"));
    }

    #[test]
    fn test_settle_overrides() {
        let mut vars = MINIMAL.to_vec();
        vars.push(("TUYA_STATE_SETTLE_MS", "800"));
        vars.push(("TUYA_COMMAND_SETTLE_MS", "1000"));
        let delays = load(&vars).unwrap().settle_delays();
        assert_eq!(delays.state, Duration::from_millis(800));
        assert_eq!(delays.command, Duration::from_secs(1));
    }

    #[test]
    fn test_valve_name_becomes_topic() {
        let mut vars = MINIMAL.to_vec();
        vars.push(("VALVE_NAME", "Backyard Water Valve!"));
        vars.push(("MQTT_TOPIC_PREFIX", "home"));
        let config = load(&vars).unwrap();
        assert_eq!(config.valve.name, "Backyard Water Valve!");
        assert_eq!(config.attributes_topic(), "home/backyard_water_valve/attributes");
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let config = load(MINIMAL).unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
