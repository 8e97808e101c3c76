//! Envelope authentication.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::crypto::canonical_signing_string;
use crate::domain::Envelope;
use crate::infra::{CertificateService, EventError, Result};

/// Validates an envelope's outer signature against the certificate its
/// header references. Constructed per event family with the message type
/// and protocol version that family expects.
pub struct EnvelopeAuthenticator {
    certificates: Arc<dyn CertificateService>,
    expected_message_type: String,
    expected_version: String,
}

impl EnvelopeAuthenticator {
    pub fn new(
        certificates: Arc<dyn CertificateService>,
        expected_message_type: impl Into<String>,
        expected_version: impl Into<String>,
    ) -> Self {
        Self {
            certificates,
            expected_message_type: expected_message_type.into(),
            expected_version: expected_version.into(),
        }
    }

    /// Reject envelopes declaring a message type this handler does not
    /// expect. An absent message type passes; requiredness is enforced by
    /// the paths that consume it.
    pub fn check_message_type(&self, envelope: &Envelope) -> Result<()> {
        if let Some(message_type) = &envelope.header.message_type {
            if *message_type != self.expected_message_type {
                return Err(EventError::UnknownMessageType {
                    expected: self.expected_message_type.clone(),
                    got: message_type.clone(),
                });
            }
        }
        Ok(())
    }

    /// Verify the envelope signature.
    ///
    /// An entirely absent header means the message is unsigned, which is
    /// tolerated. A partial header is not: any missing required field is an
    /// authentication failure, and a version mismatch is rejected before
    /// the signature is checked.
    pub async fn validate(&self, envelope: &Envelope) -> Result<()> {
        let header = &envelope.header;
        if header.is_empty() {
            return Ok(());
        }

        let version = header
            .version
            .as_deref()
            .ok_or(EventError::MissingSignatureField("Version"))?;
        if version != self.expected_version {
            return Err(EventError::UnknownVersion {
                expected: self.expected_version.clone(),
                got: version.to_string(),
            });
        }

        let message_type = header
            .message_type
            .as_deref()
            .ok_or(EventError::MissingSignatureField("MessageType"))?;
        let message_id = header
            .message_id
            .as_deref()
            .ok_or(EventError::MissingSignatureField("MessageId"))?;
        let timestamp = header
            .timestamp
            .as_deref()
            .ok_or(EventError::MissingSignatureField("TimeStamp"))?;
        let cert_url = header
            .signing_cert_url
            .as_deref()
            .ok_or(EventError::MissingSignatureField("SigningCertURL"))?;
        let signature_b64 = header
            .signature
            .as_deref()
            .ok_or(EventError::MissingSignatureField("Signature"))?;

        // The signature covers the raw body text as delivered, before any
        // decoding or decryption.
        let body = envelope.body_text().ok_or_else(|| {
            EventError::MalformedPayload("signed envelope body must be a string".to_string())
        })?;

        let signature = BASE64
            .decode(signature_b64)
            .map_err(|_| EventError::InvalidBase64 { field: "Signature" })?;

        let canonical = canonical_signing_string(message_type, message_id, timestamp, body);
        let verifying_key = self.certificates.verifying_key(cert_url).await?;
        verifying_key.verify(canonical.as_bytes(), &signature)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EventSigningKey;
    use crate::domain::Header;
    use crate::infra::StaticCertificateService;
    use serde_json::json;

    const CERT_URL: &str = "https://certs.example.edu/signing.pem";

    fn signed_envelope(key: &EventSigningKey, body: &str) -> Envelope {
        let canonical = canonical_signing_string("gws", "msg-1", "2024-01-01T00:00:00Z", body);
        let signature = BASE64.encode(key.sign(canonical.as_bytes()));
        Envelope {
            header: Header {
                message_type: Some("gws".to_string()),
                message_id: Some("msg-1".to_string()),
                timestamp: Some("2024-01-01T00:00:00Z".to_string()),
                version: Some("UWIT-1".to_string()),
                signing_cert_url: Some(CERT_URL.to_string()),
                signature: Some(signature),
                ..Header::default()
            },
            body: json!(body),
        }
    }

    fn authenticator(key: &EventSigningKey) -> EnvelopeAuthenticator {
        let certs = StaticCertificateService::new();
        certs.add_certificate(CERT_URL, key.verifying_key());
        EnvelopeAuthenticator::new(Arc::new(certs), "gws", "UWIT-1")
    }

    #[tokio::test]
    async fn valid_signature_passes() {
        let key = EventSigningKey::generate();
        let envelope = signed_envelope(&key, "{\"action\":\"no-action\"}");
        assert!(authenticator(&key).validate(&envelope).await.is_ok());
    }

    #[tokio::test]
    async fn tampered_body_fails() {
        let key = EventSigningKey::generate();
        let mut envelope = signed_envelope(&key, "{\"action\":\"no-action\"}");
        envelope.body = json!("{\"action\":\"delete-group\"}");
        assert!(matches!(
            authenticator(&key).validate(&envelope).await,
            Err(EventError::SignatureInvalid(_))
        ));
    }

    #[tokio::test]
    async fn headerless_envelope_is_tolerated() {
        let key = EventSigningKey::generate();
        let envelope = Envelope {
            header: Header::default(),
            body: json!({"action": "no-action"}),
        };
        assert!(authenticator(&key).validate(&envelope).await.is_ok());
    }

    #[tokio::test]
    async fn partial_header_is_rejected() {
        let key = EventSigningKey::generate();
        let envelope = Envelope {
            header: Header {
                version: Some("UWIT-1".to_string()),
                ..Header::default()
            },
            body: json!("{}"),
        };
        assert!(matches!(
            authenticator(&key).validate(&envelope).await,
            Err(EventError::MissingSignatureField("MessageType"))
        ));
    }

    #[tokio::test]
    async fn version_mismatch_is_rejected_before_signature() {
        let key = EventSigningKey::generate();
        let mut envelope = signed_envelope(&key, "{}");
        envelope.header.version = Some("UWIT-2".to_string());
        assert!(matches!(
            authenticator(&key).validate(&envelope).await,
            Err(EventError::UnknownVersion { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_certificate_propagates_upstream_failure() {
        let key = EventSigningKey::generate();
        let mut envelope = signed_envelope(&key, "{}");
        envelope.header.signing_cert_url = Some("https://certs.example.edu/other.pem".into());
        assert!(matches!(
            authenticator(&key).validate(&envelope).await,
            Err(EventError::Upstream { .. })
        ));
    }

    #[test]
    fn foreign_message_type_is_rejected() {
        let key = EventSigningKey::generate();
        let auth = authenticator(&key);
        let envelope = Envelope {
            header: Header {
                message_type: Some("uw-student-registration-v2".to_string()),
                ..Header::default()
            },
            body: json!("{}"),
        };
        assert!(matches!(
            auth.check_message_type(&envelope),
            Err(EventError::UnknownMessageType { .. })
        ));
    }
}
