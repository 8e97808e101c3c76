//! Payload extraction: encoding gates, key resolution and decryption.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::crypto::{self, CIPHER_NAME};
use crate::domain::{Envelope, Header};
use crate::infra::{EventError, KeyService, ResolvedKey, Result};

/// Salvage a JSON object from possibly cruft-surrounded text: the substring
/// from the first `{` through the last `}`. Text without both braces, or
/// that still fails to parse after salvage, yields an empty object so
/// downstream handlers see "no events" rather than an error.
pub fn salvage_json(text: &str) -> Value {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return json!({});
    };
    if end < start {
        return json!({});
    }
    match serde_json::from_str(&text[start..=end]) {
        Ok(value) => value,
        Err(err) => {
            error!(%err, "payload unparseable after salvage");
            json!({})
        }
    }
}

/// Structural sanity check used before trusting the cached current key:
/// does the text look like a JSON object end to end.
fn looks_like_json_object(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.len() > 2 && trimmed.starts_with('{') && trimmed.ends_with('}')
}

/// Turns an envelope body into a decoded JSON payload, resolving and
/// applying the decryption key when the header declares an encoding.
pub struct PayloadExtractor {
    keys: Arc<dyn KeyService>,
}

impl PayloadExtractor {
    pub fn new(keys: Arc<dyn KeyService>) -> Self {
        Self { keys }
    }

    pub async fn extract(&self, envelope: &Envelope) -> Result<Value> {
        let header = &envelope.header;

        // No declared encoding: the body is already plaintext.
        let Some(encoding) = header.encoding.as_deref() else {
            return match &envelope.body {
                Value::String(text) => Ok(salvage_json(text)),
                Value::Object(_) => Ok(envelope.body.clone()),
                _ => Err(EventError::NoBodyEncoding),
            };
        };

        if !encoding.eq_ignore_ascii_case("base64") {
            return Err(EventError::UnsupportedEncoding(encoding.to_string()));
        }

        let algorithm = header.algorithm.as_deref().unwrap_or(CIPHER_NAME);
        if !algorithm.eq_ignore_ascii_case(CIPHER_NAME) {
            return Err(EventError::UnsupportedAlgorithm(algorithm.to_string()));
        }

        let body_text = envelope.body_text().ok_or_else(|| {
            EventError::MalformedPayload("encoded body must be a string".to_string())
        })?;

        let key = self.resolve_key(header, body_text).await?;

        let iv_b64 = header
            .iv
            .as_deref()
            .ok_or(EventError::MissingHeaderField("IV"))?;
        let iv = BASE64
            .decode(iv_b64)
            .map_err(|_| EventError::InvalidBase64 { field: "IV" })?;
        let ciphertext = BASE64
            .decode(body_text.trim())
            .map_err(|_| EventError::InvalidBase64 { field: "Body" })?;

        let plaintext = crypto::decrypt(&key.material, &iv, &ciphertext)?;
        let text = String::from_utf8_lossy(&plaintext);
        Ok(salvage_json(&text))
    }

    /// Key acquisition, in priority order: explicit `KeyURL`, explicit
    /// `KeyId`, then the current key for the message type.
    ///
    /// The current-key path may be served from a stale cache. When the
    /// lookup fails, or the body fails the structural pre-check under the
    /// cached key, the cache entry is invalidated and the lookup retried
    /// exactly once; a second failure rejects the message.
    async fn resolve_key(&self, header: &Header, body_text: &str) -> Result<ResolvedKey> {
        if let Some(url) = header.key_url.as_deref() {
            return self.keys.key_by_url(url).await;
        }
        if let Some(key_id) = header.key_id.as_deref() {
            return self.keys.key_by_id(key_id).await;
        }

        let message_type = header
            .message_type
            .as_deref()
            .ok_or(EventError::MissingHeaderField("MessageType"))?;

        if let Ok(key) = self.keys.current_key(message_type).await {
            if looks_like_json_object(body_text) {
                return Ok(key);
            }
        }

        warn!(message_type, "current key suspect; invalidating and retrying once");
        self.keys.invalidate_current_key(message_type).await;
        self.keys
            .current_key(message_type)
            .await
            .map_err(|err| EventError::KeyResolution(format!("retry for {message_type}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Header;
    use crate::infra::{InMemoryKeyService, MockKeyService};
    use mockall::predicate::eq;

    fn encrypted_envelope(header_overrides: Header, key: &[u8], iv: &[u8], payload: &str) -> Envelope {
        let ciphertext = crypto::encrypt(key, iv, payload.as_bytes()).unwrap();
        Envelope {
            header: Header {
                message_type: Some("gws".to_string()),
                encoding: Some("base64".to_string()),
                iv: Some(BASE64.encode(iv)),
                ..header_overrides
            },
            body: json!(BASE64.encode(ciphertext)),
        }
    }

    fn test_key() -> ResolvedKey {
        ResolvedKey {
            material: vec![7u8; 16],
            source_id: "key-1".to_string(),
        }
    }

    #[test]
    fn salvage_strips_cruft() {
        assert_eq!(salvage_json("garbage{\"a\":1}trailer"), json!({"a": 1}));
    }

    #[test]
    fn salvage_without_braces_is_empty_object() {
        assert_eq!(salvage_json("no json here"), json!({}));
    }

    #[test]
    fn salvage_of_broken_interior_is_empty_object() {
        assert_eq!(salvage_json("xx{not json}yy"), json!({}));
    }

    #[test]
    fn salvage_is_greedy_to_last_brace() {
        assert_eq!(
            salvage_json("{\"a\":{\"b\":2}}\u{0}"),
            json!({"a": {"b": 2}})
        );
    }

    #[tokio::test]
    async fn plaintext_string_body_is_salvaged() {
        let extractor = PayloadExtractor::new(Arc::new(InMemoryKeyService::new()));
        let envelope = Envelope {
            header: Header::default(),
            body: json!("noise{\"action\":\"no-action\"}\u{3}"),
        };
        let payload = extractor.extract(&envelope).await.unwrap();
        assert_eq!(payload["action"], "no-action");
    }

    #[tokio::test]
    async fn structured_body_passes_through() {
        let extractor = PayloadExtractor::new(Arc::new(InMemoryKeyService::new()));
        let envelope = Envelope {
            header: Header::default(),
            body: json!({"action": "no-action"}),
        };
        assert_eq!(
            extractor.extract(&envelope).await.unwrap(),
            json!({"action": "no-action"})
        );
    }

    #[tokio::test]
    async fn numeric_body_without_encoding_is_rejected() {
        let extractor = PayloadExtractor::new(Arc::new(InMemoryKeyService::new()));
        let envelope = Envelope {
            header: Header::default(),
            body: json!(42),
        };
        assert!(matches!(
            extractor.extract(&envelope).await,
            Err(EventError::NoBodyEncoding)
        ));
    }

    #[tokio::test]
    async fn unsupported_encoding_is_rejected() {
        let extractor = PayloadExtractor::new(Arc::new(InMemoryKeyService::new()));
        let envelope = Envelope {
            header: Header {
                encoding: Some("base32".to_string()),
                ..Header::default()
            },
            body: json!("xxxx"),
        };
        assert!(matches!(
            extractor.extract(&envelope).await,
            Err(EventError::UnsupportedEncoding(_))
        ));
    }

    #[tokio::test]
    async fn unsupported_algorithm_is_rejected() {
        let extractor = PayloadExtractor::new(Arc::new(InMemoryKeyService::new()));
        let envelope = Envelope {
            header: Header {
                encoding: Some("base64".to_string()),
                algorithm: Some("aes256gcm".to_string()),
                ..Header::default()
            },
            body: json!("xxxx"),
        };
        assert!(matches!(
            extractor.extract(&envelope).await,
            Err(EventError::UnsupportedAlgorithm(_))
        ));
    }

    #[tokio::test]
    async fn algorithm_name_is_case_insensitive() {
        let keys = InMemoryKeyService::new();
        keys.add_key_by_id("key-1", test_key());
        let extractor = PayloadExtractor::new(Arc::new(keys));

        let iv = [9u8; 16];
        let envelope = encrypted_envelope(
            Header {
                algorithm: Some("AES128CBC".to_string()),
                key_id: Some("key-1".to_string()),
                ..Header::default()
            },
            &test_key().material,
            &iv,
            "{\"action\":\"no-action\"}",
        );

        let payload = extractor.extract(&envelope).await.unwrap();
        assert_eq!(payload["action"], "no-action");
    }

    #[tokio::test]
    async fn key_url_takes_priority_over_key_id() {
        let keys = InMemoryKeyService::new();
        keys.add_key_by_url("https://keys.example.edu/k1", test_key());
        // A decoy under the key id that would fail decryption.
        keys.add_key_by_id(
            "key-1",
            ResolvedKey {
                material: vec![1u8; 16],
                source_id: "decoy".to_string(),
            },
        );
        let extractor = PayloadExtractor::new(Arc::new(keys));

        let iv = [9u8; 16];
        let envelope = encrypted_envelope(
            Header {
                key_url: Some("https://keys.example.edu/k1".to_string()),
                key_id: Some("key-1".to_string()),
                ..Header::default()
            },
            &test_key().material,
            &iv,
            "{\"a\":1}",
        );

        assert_eq!(extractor.extract(&envelope).await.unwrap(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn current_key_invalidates_and_retries_exactly_once() {
        let mut keys = MockKeyService::new();
        // Ciphertext bodies never look like JSON, so the first lookup's
        // result is distrusted, the cache dropped, and the lookup repeated.
        keys.expect_current_key()
            .with(eq("gws"))
            .times(2)
            .returning(|_| {
                Ok(ResolvedKey {
                    material: vec![7u8; 16],
                    source_id: "key-1".to_string(),
                })
            });
        keys.expect_invalidate_current_key()
            .with(eq("gws"))
            .times(1)
            .return_const(());

        let extractor = PayloadExtractor::new(Arc::new(keys));
        let iv = [9u8; 16];
        let envelope = encrypted_envelope(
            Header::default(),
            &[7u8; 16],
            &iv,
            "{\"action\":\"no-action\"}",
        );

        let payload = extractor.extract(&envelope).await.unwrap();
        assert_eq!(payload["action"], "no-action");
    }

    #[tokio::test]
    async fn second_current_key_failure_is_key_resolution_error() {
        let mut keys = MockKeyService::new();
        keys.expect_current_key()
            .times(2)
            .returning(|mt| Err(EventError::KeyResolution(format!("no key for {mt}"))));
        keys.expect_invalidate_current_key().times(1).return_const(());

        let extractor = PayloadExtractor::new(Arc::new(keys));
        let iv = [9u8; 16];
        let envelope = encrypted_envelope(Header::default(), &[7u8; 16], &iv, "{}");

        assert!(matches!(
            extractor.extract(&envelope).await,
            Err(EventError::KeyResolution(_))
        ));
    }

    #[tokio::test]
    async fn missing_iv_is_rejected() {
        let keys = InMemoryKeyService::new();
        keys.add_key_by_id("key-1", test_key());
        let extractor = PayloadExtractor::new(Arc::new(keys));

        let envelope = Envelope {
            header: Header {
                message_type: Some("gws".to_string()),
                encoding: Some("base64".to_string()),
                key_id: Some("key-1".to_string()),
                ..Header::default()
            },
            body: json!(BASE64.encode([0u8; 16])),
        };
        assert!(matches!(
            extractor.extract(&envelope).await,
            Err(EventError::MissingHeaderField("IV"))
        ));
    }

    #[tokio::test]
    async fn wrong_key_is_a_decryption_failure() {
        let keys = InMemoryKeyService::new();
        keys.add_key_by_id(
            "key-1",
            ResolvedKey {
                material: vec![1u8; 16],
                source_id: "wrong".to_string(),
            },
        );
        let extractor = PayloadExtractor::new(Arc::new(keys));

        let iv = [9u8; 16];
        let envelope = encrypted_envelope(
            Header {
                key_id: Some("key-1".to_string()),
                ..Header::default()
            },
            &[7u8; 16],
            &iv,
            "{\"action\":\"no-action\",\"padding\":\"roughly two blocks of text\"}",
        );

        // Wrong-key CBC output is garbage; it either fails padding or
        // salvages to an empty object. Both are tolerable, a panic is not.
        match extractor.extract(&envelope).await {
            Ok(value) => assert_eq!(value, json!({})),
            Err(err) => assert!(matches!(err, EventError::Decryption(_))),
        }
    }
}
