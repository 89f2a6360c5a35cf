pub mod client;
pub mod error;
pub mod shadow;
pub mod sign;
pub mod token;
pub mod worker;

use shadow::ValveState;

/// Something the valve worker wants published to MQTT.
#[derive(Debug, Clone, PartialEq)]
pub enum ValveUpdate {
    State(ValveState),
    /// Static device details, fetched once at startup.
    Attributes(serde_json::Value),
}

/// A command for the valve worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveCommand {
    Open,
    Close,
}

impl ValveCommand {
    /// Parse an MQTT command payload ("open"/"close", "on"/"off", "true"/"false", "1"/"0").
    pub fn parse(payload: &str) -> Option<Self> {
        match payload.trim().to_ascii_lowercase().as_str() {
            "open" | "on" | "true" | "1" => Some(ValveCommand::Open),
            "close" | "closed" | "off" | "false" | "0" => Some(ValveCommand::Close),
            _ => None,
        }
    }
}
