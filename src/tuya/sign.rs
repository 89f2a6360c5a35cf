//! Tuya cloud request signing (v2 canonical form).
//!
//! The string to sign is `METHOD\nSHA256(body)\n\nPATH?QUERY`. It is prefixed
//! with `client_id [+ access_token] + t + nonce` and MACed with the client
//! secret; the result goes out as uppercase hex in the `sign` header.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::error::CloudError;

pub const SIGN_METHOD: &str = "HMAC-SHA256";

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex SHA-256 of the request body ("" for bodiless requests).
pub fn sha256_hex(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

pub fn string_to_sign(method: &str, body: &str, path_with_query: &str) -> String {
    format!("{method}\n{}\n\n{path_with_query}", sha256_hex(body))
}

/// Compute the `sign` header. Token requests pass `access_token = None`.
pub fn sign(
    client_secret: &str,
    client_id: &str,
    access_token: Option<&str>,
    t: &str,
    nonce: &str,
    string_to_sign: &str,
) -> Result<String, CloudError> {
    let mut mac = HmacSha256::new_from_slice(client_secret.as_bytes())
        .map_err(|e| CloudError::Signing(e.to_string()))?;
    mac.update(client_id.as_bytes());
    if let Some(token) = access_token {
        mac.update(token.as_bytes());
    }
    mac.update(t.as_bytes());
    mac.update(nonce.as_bytes());
    mac.update(string_to_sign.as_bytes());
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}

/// Milliseconds since the epoch, as the `t` header expects it.
pub fn timestamp_ms() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .to_string()
}

/// 128 random bits as 32 lowercase hex chars.
pub fn nonce() -> String {
    format!("{:032x}", rand::random::<u128>())
}
