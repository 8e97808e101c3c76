//! Envelope signature operations.
//!
//! Envelopes carry an Ed25519 signature, out of band from the payload
//! cipher, computed over a canonical string of selected header fields and
//! the raw body. The verifying key is resolved from the certificate
//! referenced by the envelope's `SigningCertURL`.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Ed25519 public key length in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Error type for signing operations.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("invalid signature format")]
    InvalidSignatureFormat,

    #[error("invalid public key format")]
    InvalidPublicKeyFormat,

    #[error("signature verification failed")]
    VerificationFailed,
}

/// Build the canonical signing string: `MessageType`, `MessageId`,
/// `TimeStamp` and the raw body, in that order, each newline-terminated.
pub fn canonical_signing_string(
    message_type: &str,
    message_id: &str,
    timestamp: &str,
    body: &str,
) -> String {
    format!("{message_type}\n{message_id}\n{timestamp}\n{body}\n")
}

/// Signing keypair for envelope producers. Production verification only
/// needs [`EventVerifyingKey`]; the signing side exists for tooling and
/// tests.
#[derive(Clone)]
pub struct EventSigningKey {
    signing_key: SigningKey,
}

impl EventSigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn verifying_key(&self) -> EventVerifyingKey {
        EventVerifyingKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Sign a canonical string, returning the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for EventSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSigningKey")
            .field(
                "public_key",
                &hex::encode(self.signing_key.verifying_key().to_bytes()),
            )
            .finish_non_exhaustive()
    }
}

/// Public key extracted from a signing certificate.
#[derive(Clone)]
pub struct EventVerifyingKey {
    verifying_key: VerifyingKey,
}

impl EventVerifyingKey {
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<Self, SigningError> {
        let verifying_key =
            VerifyingKey::from_bytes(bytes).map_err(|_| SigningError::InvalidPublicKeyFormat)?;
        Ok(Self { verifying_key })
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.verifying_key.to_bytes()
    }

    /// Verify a signature over a message. The signature is the raw byte
    /// form, already base64-decoded by the caller.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), SigningError> {
        let signature: [u8; SIGNATURE_SIZE] = signature
            .try_into()
            .map_err(|_| SigningError::InvalidSignatureFormat)?;
        self.verifying_key
            .verify(message, &Signature::from_bytes(&signature))
            .map_err(|_| SigningError::VerificationFailed)
    }
}

impl std::fmt::Debug for EventVerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventVerifyingKey")
            .field("public_key", &hex::encode(self.to_bytes()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_layout() {
        let s = canonical_signing_string("gws", "msg-1", "2024-01-01T00:00:00Z", "body");
        assert_eq!(s, "gws\nmsg-1\n2024-01-01T00:00:00Z\nbody\n");
    }

    #[test]
    fn sign_and_verify() {
        let key = EventSigningKey::generate();
        let canonical = canonical_signing_string("gws", "m", "t", "b");
        let signature = key.sign(canonical.as_bytes());

        assert!(key
            .verifying_key()
            .verify(canonical.as_bytes(), &signature)
            .is_ok());
    }

    #[test]
    fn mutated_signature_fails() {
        let key = EventSigningKey::generate();
        let canonical = canonical_signing_string("gws", "m", "t", "b");
        let mut signature = key.sign(canonical.as_bytes());
        signature[0] ^= 0x01;

        assert!(matches!(
            key.verifying_key()
                .verify(canonical.as_bytes(), &signature),
            Err(SigningError::VerificationFailed)
        ));
    }

    #[test]
    fn mutated_message_fails() {
        let key = EventSigningKey::generate();
        let canonical = canonical_signing_string("gws", "m", "t", "b");
        let signature = key.sign(canonical.as_bytes());
        let tampered = canonical_signing_string("gws", "m", "t", "B");

        assert!(key
            .verifying_key()
            .verify(tampered.as_bytes(), &signature)
            .is_err());
    }

    #[test]
    fn wrong_length_signature_fails() {
        let key = EventSigningKey::generate();
        assert!(matches!(
            key.verifying_key().verify(b"msg", &[0u8; 12]),
            Err(SigningError::InvalidSignatureFormat)
        ));
    }

    #[test]
    fn key_roundtrip_through_bytes() {
        let key = EventSigningKey::generate();
        let public = key.verifying_key().to_bytes();
        let restored = EventVerifyingKey::from_bytes(&public).unwrap();

        let signature = key.sign(b"payload");
        assert!(restored.verify(b"payload", &signature).is_ok());
    }
}
