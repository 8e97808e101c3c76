//! Trait definitions for collaborators and stores.
//!
//! All external services and persistence are reached through these seams so
//! the core stays testable and deployments can swap implementations.
//! Implementations own their transports and per-call timeouts; any failed
//! call is fatal to the single message being processed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

use crate::crypto::EventVerifyingKey;
use crate::domain::{
    CourseMemberRecord, GroupMemberGroup, GroupRecord, Member, MemberType, Priority, UserRecord,
};

use super::Result;

/// Key material resolved from the key service. Fetched per message, never
/// persisted by the core.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    /// Raw key bytes, already decoded from the service's encoding.
    pub material: Vec<u8>,
    /// Identifier of the key the service resolved, for logging.
    pub source_id: String,
}

/// Decryption key resolution, with rotation. "Current key" lookups may be
/// served from a cache and can therefore go stale; `invalidate_current_key`
/// drops the cached entry so the next lookup is authoritative.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyService: Send + Sync {
    /// The currently active key for a message type.
    async fn current_key(&self, message_type: &str) -> Result<ResolvedKey>;

    /// Lookup by explicit key id.
    async fn key_by_id(&self, key_id: &str) -> Result<ResolvedKey>;

    /// Fetch raw key material by URL.
    async fn key_by_url(&self, url: &str) -> Result<ResolvedKey>;

    /// Drop the cached current key for a message type.
    async fn invalidate_current_key(&self, message_type: &str);
}

/// Resolves the signing certificate referenced by an envelope header.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertificateService: Send + Sync {
    async fn verifying_key(&self, url: &str) -> Result<EventVerifyingKey>;
}

/// Effective flattened membership of a group, as resolved by the group
/// service for a given actor.
#[derive(Debug, Clone, Default)]
pub struct EffectiveMembership {
    /// Members the acting identity may see and that passed policy.
    pub valid: Vec<Member>,
    /// Members rejected by policy; reported but not applied.
    pub invalid: Vec<Member>,
    /// Every group id discovered transitively while flattening.
    pub member_groups: Vec<String>,
}

/// Failure modes of nested-group resolution. `NotFound`, `Unauthorized` and
/// `PolicyViolation` have dedicated handling in the engine; `Upstream` is
/// fatal to the message.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GroupResolutionError {
    #[error("group not found")]
    NotFound,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("upstream failure: {0}")]
    Upstream(String),
}

/// Group service collaborator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GroupResolutionService: Send + Sync {
    /// Flatten a group's membership, acting as the given identity.
    async fn effective_members(
        &self,
        group_id: &str,
        act_as: &str,
    ) -> std::result::Result<EffectiveMembership, GroupResolutionError>;

    /// Whether the named identity is currently an effective member of the
    /// group, acting as the given identity.
    async fn is_member(&self, group_id: &str, member_name: &str, act_as: &str) -> Result<bool>;
}

/// Violation of an identity policy (malformed or disallowed name).
#[derive(Debug, Clone, thiserror::Error)]
#[error("user policy violation: {0}")]
pub struct PolicyError(pub String);

/// Identity validation collaborator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Validate a login id for well-formedness and policy.
    async fn validate_login_id(&self, name: &str) -> std::result::Result<(), PolicyError>;

    /// Validate an external scoped id and return its canonical form.
    async fn normalize_external_id(&self, name: &str)
        -> std::result::Result<String, PolicyError>;
}

/// Live institutional enrollment lookup. A missing enrollment surfaces as
/// `EventError::Upstream` with status 404, which callers treat as "not
/// enrolled"; any other failure propagates.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EnrollmentService: Send + Sync {
    async fn active_course_enrollments(&self, reg_id: &str, course_id: &str) -> Result<u32>;
}

/// Group records and nested-membership edges.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// All rows for a group id, deleted or not.
    async fn groups_by_id(&self, group_id: &str) -> Result<Vec<GroupRecord>>;

    /// Rows for a group id that are not deleted.
    async fn active_groups_by_id(&self, group_id: &str) -> Result<Vec<GroupRecord>>;

    /// Mark active rows for a group deleted with provenance, elevating them
    /// to immediate priority. Returns the number of rows changed.
    async fn mark_groups_deleted(
        &self,
        group_id: &str,
        deleted_by: &str,
        deleted_date: DateTime<Utc>,
    ) -> Result<u64>;

    /// Set the priority of active rows for a group.
    async fn set_group_priority(&self, group_id: &str, priority: Priority) -> Result<u64>;

    /// Rename a group id across its rows.
    async fn rename_group(&self, old_id: &str, new_id: &str) -> Result<u64>;

    /// Edges whose nested (child) side is the given group, deleted or not.
    async fn edges_for_child(&self, group_id: &str) -> Result<Vec<GroupMemberGroup>>;

    /// Edges whose nested side is the given group and that are not deleted.
    async fn active_edges_for_child(&self, group_id: &str) -> Result<Vec<GroupMemberGroup>>;

    /// Insert or update the unique `(child, root)` edge, setting its
    /// deleted flag.
    async fn upsert_edge(
        &self,
        child_group_id: &str,
        root_group_id: &str,
        is_deleted: bool,
    ) -> Result<GroupMemberGroup>;

    /// Mark every active edge with the given nested side deleted.
    async fn mark_edges_deleted_for_child(&self, group_id: &str) -> Result<u64>;

    /// Rename a group id wherever edges reference it, as child or root.
    async fn rename_edges(&self, old_id: &str, new_id: &str) -> Result<u64>;

    /// Count of live edges into a root group.
    async fn active_edge_count_for_root(&self, root_group_id: &str) -> Result<u64>;
}

/// Flat course membership records.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CourseMemberStore: Send + Sync {
    /// Rows matching the unique key. More than one row should not occur
    /// under the store's uniqueness constraint but must be tolerated.
    async fn find_course_members(
        &self,
        user_id: &str,
        member_type: MemberType,
        course_id: &str,
        role: &str,
    ) -> Result<Vec<CourseMemberRecord>>;

    async fn delete_course_member(&self, id: Uuid) -> Result<()>;

    /// Atomic insert-or-update by the unique key.
    async fn upsert_course_member(&self, record: &CourseMemberRecord) -> Result<()>;
}

/// Provisioned users and locally-known enrollments.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    async fn user_by_login(&self, login_id: &str) -> Result<Option<UserRecord>>;

    /// Whether the user has an active enrollment in any section whose
    /// course id starts with the given prefix.
    async fn has_active_enrollment(&self, reg_id: &str, course_id_prefix: &str) -> Result<bool>;
}

/// Minute-bucketed success counters.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SuccessLogStore: Send + Sync {
    /// Add to a bucket and return the bucket's running total.
    async fn increment(&self, kind: &str, minute: i64, count: u32) -> Result<u32>;

    /// Delete buckets older than the given minute. Returns rows removed.
    async fn prune_older_than(&self, kind: &str, minute: i64) -> Result<u64>;
}
