//! Envelope pipeline: authentication, then payload extraction.

mod authenticator;
mod extractor;

pub use authenticator::EnvelopeAuthenticator;
pub use extractor::{salvage_json, PayloadExtractor};
