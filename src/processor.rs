//! End-to-end processing of one inbound envelope.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ProcessorConfig;
use crate::domain::Envelope;
use crate::infra::{
    CertificateService, KeyService, Result, SuccessRecorder, GROUP_LOG,
};
use crate::pipeline::{EnvelopeAuthenticator, PayloadExtractor};
use crate::reconcile::GroupEventDispatcher;

/// Processes raw group-event envelopes: authenticate, extract, dispatch,
/// and record the success count. One envelope is handled start to finish;
/// every fatal error aborts just that message and bubbles to the transport
/// boundary for its redelivery decision.
pub struct EventProcessor {
    config: ProcessorConfig,
    authenticator: EnvelopeAuthenticator,
    extractor: PayloadExtractor,
    dispatcher: GroupEventDispatcher,
    success: SuccessRecorder,
}

impl EventProcessor {
    pub fn new(
        config: ProcessorConfig,
        certificates: Arc<dyn CertificateService>,
        keys: Arc<dyn KeyService>,
        dispatcher: GroupEventDispatcher,
        success: SuccessRecorder,
    ) -> Self {
        let authenticator = EnvelopeAuthenticator::new(
            certificates,
            config.group_message_type.clone(),
            config.group_message_version.clone(),
        );
        Self {
            config,
            authenticator,
            extractor: PayloadExtractor::new(keys),
            dispatcher,
            success,
        }
    }

    /// Process one raw message. Returns the number of units of work the
    /// selected handler performed; soft-ignored inputs return zero.
    pub async fn process(&self, raw: &str) -> Result<u32> {
        let envelope = Envelope::parse(raw)?;
        self.authenticator.check_message_type(&envelope)?;

        if self.config.validate_signatures {
            self.authenticator.validate(&envelope).await?;
        }

        let payload = self.extractor.extract(&envelope).await?;
        let count = self.dispatcher.dispatch(payload).await?;

        if count > 0 {
            info!(count, "group event processed");
            // Counter upkeep never fails the already-applied event.
            if let Err(err) = self.success.record(GROUP_LOG, count).await {
                warn!(%err, "success log update failed");
            }
        }
        Ok(count)
    }
}
