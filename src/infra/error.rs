//! Error types for event processing.

use thiserror::Error;

use crate::crypto::{CryptoError, SigningError};

/// Errors that can occur while authenticating, decoding or reconciling an
/// inbound event. Every variant is fatal to the single message being
/// processed; redelivery is the transport layer's decision.
#[derive(Error, Debug)]
pub enum EventError {
    /// Header declared a message type the handler does not expect
    #[error("unknown message type: {got} (expected {expected})")]
    UnknownMessageType { expected: String, got: String },

    /// Header declared a protocol version the handler does not expect
    #[error("unknown message version: {got} (expected {expected})")]
    UnknownVersion { expected: String, got: String },

    /// A partial header is present but a field the signature needs is not
    #[error("invalid signature header: missing {0}")]
    MissingSignatureField(&'static str),

    /// Signature did not verify against the referenced certificate
    #[error("invalid signature: {0}")]
    SignatureInvalid(#[from] SigningError),

    /// Body is neither textual nor structured and no encoding was declared
    #[error("no body encoding")]
    NoBodyEncoding,

    /// Encoding other than base64
    #[error("unknown encoding: {0}")]
    UnsupportedEncoding(String),

    /// Algorithm other than the supported cipher
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A header field required by the decryption path is absent
    #[error("missing header field: {0}")]
    MissingHeaderField(&'static str),

    /// A base64 field failed to decode
    #[error("invalid base64 in {field}")]
    InvalidBase64 { field: &'static str },

    /// Key lookup failed, including the post-invalidation retry
    #[error("key resolution failed: {0}")]
    KeyResolution(String),

    /// Cipher failure while decrypting the body
    #[error("cannot decrypt: {0}")]
    Decryption(#[from] CryptoError),

    /// Transport failure fetching a key, certificate or enrollment record
    #[error("request failure for {url}: {message} ({status})")]
    Upstream {
        url: String,
        message: String,
        status: u16,
    },

    /// Nested-group resolution failed for a reason that is fatal here
    #[error("group resolution failed for {group_id}: {message}")]
    GroupResolution { group_id: String, message: String },

    /// Payload decoded but a required event shape could not be read
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store failure outside the database driver
    #[error("store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for event processing operations.
pub type Result<T> = std::result::Result<T, EventError>;
