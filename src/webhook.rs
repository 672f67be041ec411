//! Push-path verification and notification parsing.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const SUBSCRIBE_MODE: &str = "subscribe";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("missing signature header")]
    MissingSignature,
    #[error("invalid signature")]
    InvalidSignature,
}

/// Hex HMAC-SHA256 of `body`, prefixed the way the signature header carries it.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Check the `sha256=<hex>` signature of a raw payload.
pub fn verify_signature(
    body: &[u8],
    signature: Option<&str>,
    secret: &str,
) -> Result<(), VerifyError> {
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(VerifyError::MissingSignature)?;
    let hex_part = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(provided) = hex::decode(hex_part) else {
        return Err(VerifyError::InvalidSignature);
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return Err(VerifyError::InvalidSignature);
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    if bool::from(computed.as_slice().ct_eq(&provided)) {
        Ok(())
    } else {
        Err(VerifyError::InvalidSignature)
    }
}

/// Subscription handshake: returns the challenge to echo back, or `None` to reject.
pub fn verify_handshake<'a>(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&'a str>,
    expected_token: &str,
) -> Option<&'a str> {
    if mode != Some(SUBSCRIBE_MODE) {
        return None;
    }
    let token = token?;
    if !bool::from(token.as_bytes().ct_eq(expected_token.as_bytes())) {
        return None;
    }
    challenge
}

#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<NotificationEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub changes: Vec<Change>,
}

/// One change entry. Unknown or malformed entries parse as empty and are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Change {
    pub fn media_id(&self) -> Option<&str> {
        self.value.get("media_id").and_then(serde_json::Value::as_str)
    }

    pub fn verb(&self) -> Option<&str> {
        self.value.get("verb").and_then(serde_json::Value::as_str)
    }

    fn is_new_media(&self) -> bool {
        self.field == "media" && self.verb() == Some("add")
    }
}

impl Notification {
    /// Media ids of every "new media added" change, in payload order.
    pub fn new_media_ids(&self) -> Vec<String> {
        self.entry
            .iter()
            .flat_map(|e| e.changes.iter())
            .filter(|c| c.is_new_media())
            .filter_map(|c| c.media_id().map(str::to_string))
            .collect()
    }
}
