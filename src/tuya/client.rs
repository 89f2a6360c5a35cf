use std::fmt;
use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::error::CloudError;
use super::shadow::{self, DeviceInfo, PROP_GET_STATE_TOTAL, PROP_MAIN_SWITCH, PROP_STATE_LIST};
use super::sign;
use super::token::{DEFAULT_TTL_SECS, TokenCache};

const TOKEN_PATH: &str = "/v1.0/token?grant_type=1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
/// Vendor error code for an expired or revoked access token.
const TOKEN_INVALID_CODE: i64 = 1010;

/// Cloud project credentials plus the valve they control.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub device_id: String,
}

/// Waits between a shadow write and the read that depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    /// After the "publish total state" trigger, before querying the state list.
    pub state: Duration,
    /// After a main-switch write, before reading the state back.
    pub command: Duration,
}

impl SettleDelays {
    pub const ZERO: Self = Self {
        state: Duration::ZERO,
        command: Duration::ZERO,
    };
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            state: Duration::from_millis(800),
            command: Duration::from_millis(800),
        }
    }
}

/// Outcome of a signed request that reached (or tried to reach) the cloud.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiReply {
    Json(Value),
    NonJson { status: u16, text: String },
    Transport { message: String },
}

impl ApiReply {
    /// True only for a JSON body carrying `"success": true`.
    pub fn is_success(&self) -> bool {
        self.json()
            .and_then(|v| v.get("success"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn json(&self) -> Option<&Value> {
        match self {
            ApiReply::Json(v) => Some(v),
            _ => None,
        }
    }

    /// `result` object of a successful reply.
    pub fn result(&self) -> Option<&Value> {
        if !self.is_success() {
            return None;
        }
        self.json()?.get("result").filter(|r| r.is_object())
    }

    fn code(&self) -> Option<i64> {
        self.json()?.get("code")?.as_i64()
    }
}

impl fmt::Display for ApiReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiReply::Json(v) => {
                let code = v.get("code").map(Value::to_string).unwrap_or_default();
                let msg = v.get("msg").and_then(Value::as_str).unwrap_or("");
                write!(f, "success={} code={} msg={}", self.is_success(), code, msg)
            }
            ApiReply::NonJson { status, text } => write!(f, "HTTP {status}: {text}"),
            ApiReply::Transport { message } => write!(f, "transport error: {message}"),
        }
    }
}

/// Signed client for one cloud-connected valve.
///
/// Every call takes `&mut self`: the token cache is refreshed lazily and is
/// not meant to be shared between concurrent callers.
pub struct CloudValveClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    device_id: String,
    token: TokenCache,
    settle: SettleDelays,
}

impl CloudValveClient {
    pub fn new(credentials: Credentials, settle: SettleDelays) -> Result<Self, CloudError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("tuya-valve-mqtt/{}", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: credentials.base_url.trim_end_matches('/').to_string(),
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            device_id: credentials.device_id,
            token: TokenCache::new(),
            settle,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Cached access token, or a fresh one from the token endpoint.
    pub async fn get_access_token(&mut self) -> Result<String, CloudError> {
        let now = Instant::now();
        if let Some(token) = self.token.valid_at(now) {
            return Ok(token.to_string());
        }

        debug!("Requesting new access token");
        let reply = self.send(Method::GET, TOKEN_PATH, None, None).await?;
        if let ApiReply::Transport { message } = &reply {
            return Err(CloudError::Transport(message.clone()));
        }
        let Some(result) = reply.result() else {
            return Err(CloudError::Auth(reply.to_string()));
        };
        let access_token = result
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| CloudError::Auth("reply has no result.access_token".into()))?
            .to_string();
        let ttl = result
            .get("expire_time")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TTL_SECS);

        info!("Obtained access token (expires in {}s)", ttl);
        self.token.store(access_token.clone(), ttl, now);
        Ok(access_token)
    }

    /// Perform a signed request.
    ///
    /// Network failures and non-JSON bodies come back as [`ApiReply`] variants;
    /// only token acquisition and request construction errors are raised.
    pub async fn signed_request(
        &mut self,
        method: Method,
        path_with_query: &str,
        body: Option<&Value>,
        requires_token: bool,
    ) -> Result<ApiReply, CloudError> {
        let token = if requires_token {
            Some(self.get_access_token().await?)
        } else {
            None
        };

        let reply = self
            .send(method, path_with_query, body, token.as_deref())
            .await?;

        if token.is_some() && reply.code() == Some(TOKEN_INVALID_CODE) {
            warn!("Access token rejected by cloud, will refresh on next request");
            self.token.invalidate();
        }
        Ok(reply)
    }

    async fn send(
        &self,
        method: Method,
        path_with_query: &str,
        body: Option<&Value>,
        access_token: Option<&str>,
    ) -> Result<ApiReply, CloudError> {
        let body = match body {
            Some(b) => serde_json::to_string(b)?,
            None => String::new(),
        };
        let t = sign::timestamp_ms();
        let nonce = sign::nonce();
        let string_to_sign = sign::string_to_sign(method.as_str(), &body, path_with_query);
        let signature = sign::sign(
            &self.client_secret,
            &self.client_id,
            access_token,
            &t,
            &nonce,
            &string_to_sign,
        )?;

        let mut headers = HeaderMap::new();
        headers.insert("client_id", header_value("client_id", &self.client_id)?);
        headers.insert("t", header_value("t", &t)?);
        headers.insert("nonce", header_value("nonce", &nonce)?);
        headers.insert("sign_headers", HeaderValue::from_static(""));
        headers.insert("sign_method", HeaderValue::from_static(sign::SIGN_METHOD));
        if let Some(token) = access_token {
            headers.insert("access_token", header_value("access_token", token)?);
        }
        headers.insert("sign", header_value("sign", &signature)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        debug!("{} {}", method, path_with_query);
        let url = format!("{}{}", self.base_url, path_with_query);
        let response = match self
            .http
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Request to {} failed: {}", path_with_query, e);
                return Ok(ApiReply::Transport {
                    message: e.to_string(),
                });
            }
        };

        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                warn!("Reading response from {} failed: {}", path_with_query, e);
                return Ok(ApiReply::Transport {
                    message: e.to_string(),
                });
            }
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(v) => Ok(ApiReply::Json(v)),
            Err(_) => {
                warn!("Non-JSON reply from {} (HTTP {})", path_with_query, status);
                Ok(ApiReply::NonJson { status, text })
            }
        }
    }

    /// Raw device metadata (`name`, `mac`, `sn`, product info...).
    pub async fn device_metadata(&mut self) -> Result<Option<Value>, CloudError> {
        let path = format!("/v1.0/iot-03/devices/{}", self.device_id);
        let reply = self.signed_request(Method::GET, &path, None, true).await?;
        if let Some(result) = reply.result() {
            return Ok(Some(result.clone()));
        }
        debug!("Device metadata unavailable: {}", reply);
        Ok(None)
    }

    pub async fn device_info(&mut self) -> Result<Option<DeviceInfo>, CloudError> {
        Ok(self
            .device_metadata()
            .await?
            .map(|meta| DeviceInfo::from_metadata(&meta)))
    }

    async fn issue_properties(&mut self, properties: &Value) -> Result<ApiReply, CloudError> {
        let path = format!(
            "/v2.0/cloud/thing/{}/shadow/properties/issue",
            self.device_id
        );
        let body = json!({ "properties": serde_json::to_string(properties)? });
        let reply = self
            .signed_request(Method::POST, &path, Some(&body), true)
            .await?;
        if !reply.is_success() {
            warn!("Property write not accepted: {}", reply);
        }
        Ok(reply)
    }

    async fn query_properties(&mut self, codes: &[&str]) -> Result<ApiReply, CloudError> {
        let path = format!(
            "/v2.0/cloud/thing/{}/shadow/properties?codes={}",
            self.device_id,
            codes.join(",")
        );
        self.signed_request(Method::GET, &path, None, true).await
    }

    /// `Some(true)` = open, `Some(false)` = closed, `None` = unknown.
    pub async fn read_state(&mut self) -> Result<Option<bool>, CloudError> {
        self.issue_properties(&json!({ PROP_GET_STATE_TOTAL: true }))
            .await?;
        tokio::time::sleep(self.settle.state).await;

        let reply = self.query_properties(&[PROP_STATE_LIST]).await?;
        let Some(body) = reply.json() else {
            debug!("State query gave no JSON: {}", reply);
            return Ok(None);
        };
        match shadow::parse_state_reply(body) {
            Ok(open) => Ok(Some(open)),
            Err(e) => {
                debug!("Valve state unknown: {}", e);
                Ok(None)
            }
        }
    }

    /// Open the valve; true only if the read-back confirms it.
    pub async fn open(&mut self) -> Result<bool, CloudError> {
        self.set_main_switch(true).await
    }

    /// Close the valve; true only if the read-back confirms it.
    pub async fn close(&mut self) -> Result<bool, CloudError> {
        self.set_main_switch(false).await
    }

    async fn set_main_switch(&mut self, open: bool) -> Result<bool, CloudError> {
        info!("{} valve {}", if open { "Opening" } else { "Closing" }, self.device_id);
        let value = shadow::main_switch_value(open)?;
        self.issue_properties(&json!({ PROP_MAIN_SWITCH: value }))
            .await?;
        tokio::time::sleep(self.settle.command).await;
        Ok(self.read_state().await? == Some(open))
    }

    /// Credential and connectivity check: token plus one state read.
    pub async fn validate(&mut self) -> bool {
        if let Err(e) = self.get_access_token().await {
            warn!("Credential check failed: {}", e);
            return false;
        }
        match self.read_state().await {
            Ok(state) => {
                debug!("Credential check read state {:?}", state);
                true
            }
            Err(e) => {
                warn!("Credential check failed: {}", e);
                false
            }
        }
    }
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, CloudError> {
    HeaderValue::from_str(value).map_err(|source| CloudError::InvalidHeader { name, source })
}
