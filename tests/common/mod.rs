//! Common test fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

use roster_sync::config::{ProcessorConfig, GROUP_MESSAGE_TYPE, GROUP_MESSAGE_VERSION};
use roster_sync::crypto::{self, canonical_signing_string, EventSigningKey};
use roster_sync::infra::{
    InMemoryKeyService, InMemoryMembershipStore, InMemorySuccessLog, ResolvedKey,
    StaticCertificateService, StaticEnrollmentService, StaticGroupResolver,
    StaticIdentityService, SuccessRecorder,
};
use roster_sync::reconcile::{
    CourseGroupDispatch, DefaultDispatch, GroupDispatch, GroupEventDispatcher,
    GroupReconciler, ImportGroupDispatch,
};
use roster_sync::EventProcessor;

pub const CERT_URL: &str = "https://certs.example.edu/signing.pem";
pub const KEY_ID: &str = "key-1";
pub const ENVELOPE_KEY: [u8; 16] = [7u8; 16];
pub const ENVELOPE_IV: [u8; 16] = [9u8; 16];
pub const MESSAGE_ID: &str = "msg-0001";
pub const TIMESTAMP: &str = "2024-01-01T00:00:00Z";

/// A fully wired processor over in-memory collaborators, with every handle
/// exposed for seeding and assertions.
pub struct TestHarness {
    pub store: Arc<InMemoryMembershipStore>,
    pub resolver: Arc<StaticGroupResolver>,
    pub identity: Arc<StaticIdentityService>,
    pub sis: Arc<StaticEnrollmentService>,
    pub keys: Arc<InMemoryKeyService>,
    pub certs: Arc<StaticCertificateService>,
    pub success_log: Arc<InMemorySuccessLog>,
    pub signing_key: EventSigningKey,
    pub processor: EventProcessor,
}

pub fn harness() -> TestHarness {
    harness_with_config(ProcessorConfig::default())
}

pub fn harness_with_config(config: ProcessorConfig) -> TestHarness {
    let store = Arc::new(InMemoryMembershipStore::new());
    let resolver = Arc::new(StaticGroupResolver::new());
    let identity = Arc::new(StaticIdentityService::new());
    let sis = Arc::new(StaticEnrollmentService::new());
    let keys = Arc::new(InMemoryKeyService::new());
    let certs = Arc::new(StaticCertificateService::new());
    let success_log = Arc::new(InMemorySuccessLog::new());

    let signing_key = EventSigningKey::generate();
    certs.add_certificate(CERT_URL, signing_key.verifying_key());
    keys.add_key_by_id(
        KEY_ID,
        ResolvedKey {
            material: ENVELOPE_KEY.to_vec(),
            source_id: KEY_ID.to_string(),
        },
    );

    let reconciler = Arc::new(GroupReconciler::new(
        store.clone(),
        store.clone(),
        store.clone(),
        resolver.clone(),
        identity.clone(),
        sis.clone(),
        config.max_group_depth,
    ));
    let dispatcher = GroupEventDispatcher::new(vec![
        Arc::new(ImportGroupDispatch::new(config.import_groups.clone()))
            as Arc<dyn GroupDispatch>,
        Arc::new(CourseGroupDispatch),
        reconciler,
        Arc::new(DefaultDispatch),
    ]);
    let success = SuccessRecorder::new(success_log.clone(), config.prune_after_days);

    let processor = EventProcessor::new(config, certs.clone(), keys.clone(), dispatcher, success);

    TestHarness {
        store,
        resolver,
        identity,
        sis,
        keys,
        certs,
        success_log,
        signing_key,
        processor,
    }
}

impl TestHarness {
    /// A signed, encrypted envelope resolving its key by explicit id.
    pub fn encrypted_envelope(&self, payload: &Value) -> Value {
        self.build_envelope(payload, Some(KEY_ID))
    }

    /// A signed, encrypted envelope with no key reference, forcing the
    /// current-key path.
    pub fn current_key_envelope(&self, payload: &Value) -> Value {
        self.build_envelope(payload, None)
    }

    fn build_envelope(&self, payload: &Value, key_id: Option<&str>) -> Value {
        let plaintext = payload.to_string();
        let ciphertext =
            crypto::encrypt(&ENVELOPE_KEY, &ENVELOPE_IV, plaintext.as_bytes()).unwrap();
        let body = BASE64.encode(ciphertext);

        let canonical =
            canonical_signing_string(GROUP_MESSAGE_TYPE, MESSAGE_ID, TIMESTAMP, &body);
        let signature = BASE64.encode(self.signing_key.sign(canonical.as_bytes()));

        let mut header = json!({
            "MessageType": GROUP_MESSAGE_TYPE,
            "MessageId": MESSAGE_ID,
            "TimeStamp": TIMESTAMP,
            "Version": GROUP_MESSAGE_VERSION,
            "SigningCertURL": CERT_URL,
            "Signature": signature,
            "Encoding": "base64",
            "Algorithm": "aes128cbc",
            "IV": BASE64.encode(ENVELOPE_IV),
        });
        if let Some(key_id) = key_id {
            header["KeyId"] = json!(key_id);
        }

        json!({"Header": header, "Body": body})
    }
}

/// A header-less message: the payload object is the whole envelope.
pub fn plain_envelope(payload: &Value) -> String {
    payload.to_string()
}

pub fn update_members_payload(group_id: &str, add: &[&str], delete: &[&str]) -> Value {
    let members = |names: &[&str]| names.iter().map(|n| json!({"name": n})).collect::<Vec<_>>();
    json!({
        "action": "update-members",
        "group": group_id,
        "addMembers": members(add),
        "deleteMembers": members(delete),
    })
}
