//! Wire envelope and header shapes.
//!
//! The transport delivers either `{"Header": {...}, "Body": ...}` or, for
//! some producers, a bare object that is itself the body. Every header field
//! is optional at parse time; requiredness is enforced by the code path that
//! consumes the field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::infra::{EventError, Result};

/// Optional outer header carrying signature and encryption metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    #[serde(rename = "MessageType", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,

    #[serde(rename = "MessageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(rename = "TimeStamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    #[serde(rename = "Version", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(rename = "SigningCertURL", skip_serializing_if = "Option::is_none")]
    pub signing_cert_url: Option<String>,

    /// Base64-encoded signature over the canonical signing string.
    #[serde(rename = "Signature", skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Body transfer encoding; only `base64` is supported.
    #[serde(rename = "Encoding", skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,

    /// Payload cipher; defaults to the one supported cipher when absent.
    #[serde(rename = "Algorithm", skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,

    #[serde(rename = "KeyURL", skip_serializing_if = "Option::is_none")]
    pub key_url: Option<String>,

    #[serde(rename = "KeyId", skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    /// Base64-encoded initialization vector.
    #[serde(rename = "IV", skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
}

impl Header {
    /// True when no field is set. An absent or empty header means the
    /// message is unsigned and unencrypted, which is legal.
    pub fn is_empty(&self) -> bool {
        self.message_type.is_none()
            && self.message_id.is_none()
            && self.timestamp.is_none()
            && self.version.is_none()
            && self.signing_cert_url.is_none()
            && self.signature.is_none()
            && self.encoding.is_none()
            && self.algorithm.is_none()
            && self.key_url.is_none()
            && self.key_id.is_none()
            && self.iv.is_none()
    }
}

/// One inbound message: header plus body, both transient.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub header: Header,
    pub body: Value,
}

impl Envelope {
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| EventError::MalformedPayload(format!("invalid message json: {e}")))?;
        Self::from_value(value)
    }

    /// Split a decoded message into header and body. A message without a
    /// `Header` key is header-less and is itself the body.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(ref map) if map.contains_key("Header") => {
                let header = match map.get("Header") {
                    None | Some(Value::Null) => Header::default(),
                    Some(h) => serde_json::from_value(h.clone()).map_err(|e| {
                        EventError::MalformedPayload(format!("invalid header: {e}"))
                    })?,
                };
                let body = map.get("Body").cloned().unwrap_or(Value::Null);
                Ok(Self { header, body })
            }
            other => Ok(Self {
                header: Header::default(),
                body: other,
            }),
        }
    }

    /// The body as raw text, when it is textual.
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_str()
    }
}
