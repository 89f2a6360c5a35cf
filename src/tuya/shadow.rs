//! Thing-shadow property codes and the raw (Base64 JSON) payload format the
//! valve uses for them.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::{Value, json};

/// rw, raw: `{"totalswitch": bool}`
pub const PROP_MAIN_SWITCH: &str = "main_switch";
/// wr, bool: asks the device to publish its total state
pub const PROP_GET_STATE_TOTAL: &str = "get_valve_state_total";
/// ro, raw: `{"valve_state_list": {"valvestatelist": [bool, ...]}}`
pub const PROP_STATE_LIST: &str = "valve_state_list";

/// Why a `valve_state_list` reply could not be turned into a state.
#[derive(Debug, PartialEq, Eq)]
pub enum MalformedState {
    NoProperties,
    MissingValue,
    Base64(String),
    Json(String),
    MissingPath,
    NotBoolean,
}

impl fmt::Display for MalformedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedState::NoProperties => write!(f, "no properties in reply"),
            MalformedState::MissingValue => write!(f, "property has no string value"),
            MalformedState::Base64(e) => write!(f, "value is not base64: {e}"),
            MalformedState::Json(e) => write!(f, "decoded value is not JSON: {e}"),
            MalformedState::MissingPath => {
                write!(f, "missing valve_state_list.valvestatelist[0]")
            }
            MalformedState::NotBoolean => write!(f, "valvestatelist[0] is not a boolean"),
        }
    }
}

/// Tri-state view of the valve as published to MQTT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveState {
    Open,
    Closed,
    Unknown,
}

impl ValveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValveState::Open => "open",
            ValveState::Closed => "closed",
            ValveState::Unknown => "unknown",
        }
    }
}

impl From<Option<bool>> for ValveState {
    fn from(open: Option<bool>) -> Self {
        match open {
            Some(true) => ValveState::Open,
            Some(false) => ValveState::Closed,
            None => ValveState::Unknown,
        }
    }
}

/// Encode a value as Base64 of its minified JSON.
pub fn encode_raw<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(STANDARD.encode(serde_json::to_string(value)?))
}

pub fn decode_raw(encoded: &str) -> Result<Value, MalformedState> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| MalformedState::Base64(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| MalformedState::Json(e.to_string()))
}

/// `main_switch` payload for the requested position.
pub fn main_switch_value(open: bool) -> Result<String, serde_json::Error> {
    encode_raw(&json!({ "totalswitch": open }))
}

/// Pull the open/closed flag out of a shadow query reply.
///
/// Reads `result.properties[0].value`, Base64-decodes it and returns
/// `valve_state_list.valvestatelist[0]`.
pub fn parse_state_reply(reply: &Value) -> Result<bool, MalformedState> {
    let prop = reply
        .get("result")
        .and_then(|r| r.get("properties"))
        .and_then(Value::as_array)
        .and_then(|props| props.first())
        .ok_or(MalformedState::NoProperties)?;

    let encoded = prop
        .get("value")
        .and_then(Value::as_str)
        .ok_or(MalformedState::MissingValue)?;

    let decoded = decode_raw(encoded)?;
    let first = decoded
        .get("valve_state_list")
        .and_then(|l| l.get("valvestatelist"))
        .and_then(Value::as_array)
        .and_then(|l| l.first())
        .ok_or(MalformedState::MissingPath)?;

    first.as_bool().ok_or(MalformedState::NotBoolean)
}

/// Static device details from `/v1.0/iot-03/devices/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub name: Option<String>,
    pub mac: Option<String>,
    pub sn: Option<String>,
    pub model: Option<String>,
    pub category: Option<String>,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
}

impl DeviceInfo {
    pub fn from_metadata(meta: &Value) -> Self {
        let field = |key: &str| {
            meta.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        Self {
            name: field("name"),
            mac: field("mac"),
            sn: field("sn"),
            model: field("model"),
            category: field("category"),
            product_id: field("product_id"),
            product_name: field("product_name"),
        }
    }

    /// Model for display: the reported `model`, else the product name.
    pub fn display_model(&self) -> Option<&str> {
        self.model.as_deref().or(self.product_name.as_deref())
    }
}
