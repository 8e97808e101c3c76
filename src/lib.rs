//! roster-sync
//!
//! Ingests signed, optionally encrypted event envelopes from a pub/sub
//! transport, authenticates and decrypts them, and reconciles the resulting
//! group membership events against a persistent membership store with
//! idempotent, priority-aware updates.
//!
//! ## Modules
//!
//! - [`domain`] - Wire shapes and durable record types
//! - [`crypto`] - Payload cipher and envelope signatures
//! - [`pipeline`] - Envelope authentication and payload extraction
//! - [`reconcile`] - Action dispatch and the membership engine
//! - [`infra`] - Errors, collaborator seams, store implementations
//! - [`config`] - Processor configuration
//! - [`telemetry`] - Logging setup
//! - [`processor`] - Per-envelope orchestration

pub mod config;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod pipeline;
pub mod processor;
pub mod reconcile;
pub mod telemetry;

// Re-export commonly used types
pub use config::ProcessorConfig;
pub use domain::{
    CourseMemberRecord, Envelope, GroupAction, GroupEvent, GroupMemberGroup, GroupMessage,
    GroupRecord, GroupRename, Header, Member, MemberType, Priority, UserRecord,
};
pub use infra::{EventError, Result, SuccessRecorder};
pub use processor::EventProcessor;
pub use reconcile::{GroupEventDispatcher, GroupReconciler};
