//! In-memory collaborators and stores for development and testing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::crypto::EventVerifyingKey;
use crate::domain::{
    CourseMemberRecord, GroupMemberGroup, GroupRecord, Priority, MemberType, UserRecord,
};
use crate::infra::{
    CertificateService, CourseMemberStore, EffectiveMembership, EnrollmentService,
    EnrollmentStore, EventError, GroupResolutionError, GroupResolutionService, GroupStore,
    IdentityService, KeyService, PolicyError, ResolvedKey, Result, SuccessLogStore,
};

// ============================================================================
// Key and certificate services
// ============================================================================

/// Key service backed by maps, with a rotation queue per message type. The
/// front of the queue plays the role of the cached current key; invalidation
/// pops it so the next lookup sees the rotated key.
#[derive(Default)]
pub struct InMemoryKeyService {
    current: std::sync::RwLock<HashMap<String, VecDeque<ResolvedKey>>>,
    by_id: std::sync::RwLock<HashMap<String, ResolvedKey>>,
    by_url: std::sync::RwLock<HashMap<String, ResolvedKey>>,
    invalidations: AtomicU64,
    current_lookups: AtomicU64,
}

impl InMemoryKeyService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a current key for a message type; earlier entries rotate out
    /// on invalidation.
    pub fn push_current_key(&self, message_type: &str, key: ResolvedKey) {
        self.current
            .write()
            .unwrap()
            .entry(message_type.to_string())
            .or_default()
            .push_back(key);
    }

    pub fn add_key_by_id(&self, key_id: &str, key: ResolvedKey) {
        self.by_id.write().unwrap().insert(key_id.to_string(), key);
    }

    pub fn add_key_by_url(&self, url: &str, key: ResolvedKey) {
        self.by_url.write().unwrap().insert(url.to_string(), key);
    }

    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    pub fn current_lookup_count(&self) -> u64 {
        self.current_lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl KeyService for InMemoryKeyService {
    async fn current_key(&self, message_type: &str) -> Result<ResolvedKey> {
        self.current_lookups.fetch_add(1, Ordering::Relaxed);
        self.current
            .read()
            .unwrap()
            .get(message_type)
            .and_then(|queue| queue.front().cloned())
            .ok_or_else(|| {
                EventError::KeyResolution(format!("no current key for {message_type}"))
            })
    }

    async fn key_by_id(&self, key_id: &str) -> Result<ResolvedKey> {
        self.by_id
            .read()
            .unwrap()
            .get(key_id)
            .cloned()
            .ok_or_else(|| EventError::KeyResolution(format!("no key with id {key_id}")))
    }

    async fn key_by_url(&self, url: &str) -> Result<ResolvedKey> {
        self.by_url
            .read()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| EventError::Upstream {
                url: url.to_string(),
                message: "key not found".to_string(),
                status: 404,
            })
    }

    async fn invalidate_current_key(&self, message_type: &str) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        if let Some(queue) = self.current.write().unwrap().get_mut(message_type) {
            queue.pop_front();
        }
    }
}

/// Certificate service serving verifying keys from a fixed map.
#[derive(Default)]
pub struct StaticCertificateService {
    keys: std::sync::RwLock<HashMap<String, EventVerifyingKey>>,
}

impl StaticCertificateService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_certificate(&self, url: &str, key: EventVerifyingKey) {
        self.keys.write().unwrap().insert(url.to_string(), key);
    }
}

#[async_trait]
impl CertificateService for StaticCertificateService {
    async fn verifying_key(&self, url: &str) -> Result<EventVerifyingKey> {
        self.keys
            .read()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| EventError::Upstream {
                url: url.to_string(),
                message: "certificate not found".to_string(),
                status: 404,
            })
    }
}

// ============================================================================
// Group resolution, identity and enrollment collaborators
// ============================================================================

/// Group resolution service answering from fixed membership tables.
#[derive(Default)]
pub struct StaticGroupResolver {
    memberships: std::sync::RwLock<HashMap<String, EffectiveMembership>>,
    not_found: std::sync::RwLock<HashSet<String>>,
    unauthorized: std::sync::RwLock<HashSet<String>>,
    members_of: std::sync::RwLock<HashSet<(String, String)>>,
}

impl StaticGroupResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_membership(&self, group_id: &str, membership: EffectiveMembership) {
        self.memberships
            .write()
            .unwrap()
            .insert(group_id.to_string(), membership);
    }

    pub fn set_not_found(&self, group_id: &str) {
        self.not_found.write().unwrap().insert(group_id.to_string());
    }

    pub fn set_unauthorized(&self, group_id: &str) {
        self.unauthorized
            .write()
            .unwrap()
            .insert(group_id.to_string());
    }

    pub fn set_is_member(&self, group_id: &str, member_name: &str) {
        self.members_of
            .write()
            .unwrap()
            .insert((group_id.to_string(), member_name.to_string()));
    }
}

#[async_trait]
impl GroupResolutionService for StaticGroupResolver {
    async fn effective_members(
        &self,
        group_id: &str,
        _act_as: &str,
    ) -> std::result::Result<EffectiveMembership, GroupResolutionError> {
        if self.not_found.read().unwrap().contains(group_id) {
            return Err(GroupResolutionError::NotFound);
        }
        if self.unauthorized.read().unwrap().contains(group_id) {
            return Err(GroupResolutionError::Unauthorized(group_id.to_string()));
        }
        self.memberships
            .read()
            .unwrap()
            .get(group_id)
            .cloned()
            .ok_or(GroupResolutionError::NotFound)
    }

    async fn is_member(&self, group_id: &str, member_name: &str, _act_as: &str) -> Result<bool> {
        Ok(self
            .members_of
            .read()
            .unwrap()
            .contains(&(group_id.to_string(), member_name.to_string())))
    }
}

/// Identity service that accepts everything not explicitly denied.
/// External scoped ids normalize to lowercase.
#[derive(Default)]
pub struct StaticIdentityService {
    denied: std::sync::RwLock<HashSet<String>>,
}

impl StaticIdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self, name: &str) {
        self.denied.write().unwrap().insert(name.to_string());
    }
}

#[async_trait]
impl IdentityService for StaticIdentityService {
    async fn validate_login_id(&self, name: &str) -> std::result::Result<(), PolicyError> {
        if self.denied.read().unwrap().contains(name) {
            return Err(PolicyError(format!("invalid login id: {name}")));
        }
        Ok(())
    }

    async fn normalize_external_id(
        &self,
        name: &str,
    ) -> std::result::Result<String, PolicyError> {
        if self.denied.read().unwrap().contains(name) {
            return Err(PolicyError(format!("invalid external id: {name}")));
        }
        Ok(name.trim().to_lowercase())
    }
}

/// Enrollment lookup answering from a fixed table. Unknown
/// `(reg_id, course_id)` pairs report upstream 404, matching the live
/// service's behavior for users with no enrollment resource.
#[derive(Default)]
pub struct StaticEnrollmentService {
    enrollments: std::sync::RwLock<HashMap<(String, String), u32>>,
    failures: std::sync::RwLock<HashMap<(String, String), u16>>,
}

impl StaticEnrollmentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enrollments(&self, reg_id: &str, course_id: &str, count: u32) {
        self.enrollments
            .write()
            .unwrap()
            .insert((reg_id.to_string(), course_id.to_string()), count);
    }

    pub fn set_failure(&self, reg_id: &str, course_id: &str, status: u16) {
        self.failures
            .write()
            .unwrap()
            .insert((reg_id.to_string(), course_id.to_string()), status);
    }
}

#[async_trait]
impl EnrollmentService for StaticEnrollmentService {
    async fn active_course_enrollments(&self, reg_id: &str, course_id: &str) -> Result<u32> {
        let key = (reg_id.to_string(), course_id.to_string());
        if let Some(status) = self.failures.read().unwrap().get(&key) {
            return Err(EventError::Upstream {
                url: format!("enrollments/{course_id}/{reg_id}"),
                message: "enrollment lookup failed".to_string(),
                status: *status,
            });
        }
        match self.enrollments.read().unwrap().get(&key) {
            Some(count) => Ok(*count),
            None => Err(EventError::Upstream {
                url: format!("enrollments/{course_id}/{reg_id}"),
                message: "no enrollment".to_string(),
                status: 404,
            }),
        }
    }
}

// ============================================================================
// Membership store
// ============================================================================

struct EnrollmentRow {
    reg_id: String,
    course_id: String,
    status: String,
}

/// In-memory membership store implementing every store trait the engine
/// needs. Used by unit and integration tests and by local development.
#[derive(Default)]
pub struct InMemoryMembershipStore {
    groups: RwLock<Vec<GroupRecord>>,
    edges: RwLock<Vec<GroupMemberGroup>>,
    members: RwLock<Vec<CourseMemberRecord>>,
    users: RwLock<HashMap<String, UserRecord>>,
    enrollments: RwLock<Vec<EnrollmentRow>>,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_group(&self, record: GroupRecord) {
        self.groups.write().await.push(record);
    }

    pub async fn insert_edge(&self, edge: GroupMemberGroup) {
        self.edges.write().await.push(edge);
    }

    pub async fn insert_course_member(&self, record: CourseMemberRecord) {
        self.members.write().await.push(record);
    }

    pub async fn insert_user(&self, user: UserRecord) {
        self.users.write().await.insert(user.login_id.clone(), user);
    }

    pub async fn insert_enrollment(&self, reg_id: &str, course_id: &str, status: &str) {
        self.enrollments.write().await.push(EnrollmentRow {
            reg_id: reg_id.to_string(),
            course_id: course_id.to_string(),
            status: status.to_string(),
        });
    }

    pub async fn all_groups(&self) -> Vec<GroupRecord> {
        self.groups.read().await.clone()
    }

    pub async fn all_edges(&self) -> Vec<GroupMemberGroup> {
        self.edges.read().await.clone()
    }

    pub async fn all_course_members(&self) -> Vec<CourseMemberRecord> {
        self.members.read().await.clone()
    }
}

#[async_trait]
impl GroupStore for InMemoryMembershipStore {
    async fn groups_by_id(&self, group_id: &str) -> Result<Vec<GroupRecord>> {
        Ok(self
            .groups
            .read()
            .await
            .iter()
            .filter(|g| g.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn active_groups_by_id(&self, group_id: &str) -> Result<Vec<GroupRecord>> {
        Ok(self
            .groups
            .read()
            .await
            .iter()
            .filter(|g| g.group_id == group_id && !g.is_deleted)
            .cloned()
            .collect())
    }

    async fn mark_groups_deleted(
        &self,
        group_id: &str,
        deleted_by: &str,
        deleted_date: DateTime<Utc>,
    ) -> Result<u64> {
        let mut groups = self.groups.write().await;
        let mut changed = 0;
        for group in groups.iter_mut() {
            if group.group_id == group_id && !group.is_deleted {
                group.is_deleted = true;
                group.deleted_date = Some(deleted_date);
                group.deleted_by = Some(deleted_by.to_string());
                group.priority = Priority::Immediate;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn set_group_priority(&self, group_id: &str, priority: Priority) -> Result<u64> {
        let mut groups = self.groups.write().await;
        let mut changed = 0;
        for group in groups.iter_mut() {
            if group.group_id == group_id && !group.is_deleted {
                group.priority = priority;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn rename_group(&self, old_id: &str, new_id: &str) -> Result<u64> {
        let mut groups = self.groups.write().await;
        let mut changed = 0;
        for group in groups.iter_mut() {
            if group.group_id == old_id {
                group.group_id = new_id.to_string();
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn edges_for_child(&self, group_id: &str) -> Result<Vec<GroupMemberGroup>> {
        Ok(self
            .edges
            .read()
            .await
            .iter()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn active_edges_for_child(&self, group_id: &str) -> Result<Vec<GroupMemberGroup>> {
        Ok(self
            .edges
            .read()
            .await
            .iter()
            .filter(|e| e.group_id == group_id && !e.is_deleted)
            .cloned()
            .collect())
    }

    async fn upsert_edge(
        &self,
        child_group_id: &str,
        root_group_id: &str,
        is_deleted: bool,
    ) -> Result<GroupMemberGroup> {
        let mut edges = self.edges.write().await;
        if let Some(edge) = edges
            .iter_mut()
            .find(|e| e.group_id == child_group_id && e.root_group_id == root_group_id)
        {
            edge.is_deleted = is_deleted;
            return Ok(edge.clone());
        }
        let mut edge = GroupMemberGroup::new(child_group_id, root_group_id);
        edge.is_deleted = is_deleted;
        edges.push(edge.clone());
        Ok(edge)
    }

    async fn mark_edges_deleted_for_child(&self, group_id: &str) -> Result<u64> {
        let mut edges = self.edges.write().await;
        let mut changed = 0;
        for edge in edges.iter_mut() {
            if edge.group_id == group_id && !edge.is_deleted {
                edge.is_deleted = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn rename_edges(&self, old_id: &str, new_id: &str) -> Result<u64> {
        let mut edges = self.edges.write().await;
        let mut changed = 0;
        for edge in edges.iter_mut() {
            let mut touched = false;
            if edge.group_id == old_id {
                edge.group_id = new_id.to_string();
                touched = true;
            }
            if edge.root_group_id == old_id {
                edge.root_group_id = new_id.to_string();
                touched = true;
            }
            if touched {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn active_edge_count_for_root(&self, root_group_id: &str) -> Result<u64> {
        Ok(self
            .edges
            .read()
            .await
            .iter()
            .filter(|e| e.root_group_id == root_group_id && !e.is_deleted)
            .count() as u64)
    }
}

#[async_trait]
impl CourseMemberStore for InMemoryMembershipStore {
    async fn find_course_members(
        &self,
        user_id: &str,
        member_type: MemberType,
        course_id: &str,
        role: &str,
    ) -> Result<Vec<CourseMemberRecord>> {
        Ok(self
            .members
            .read()
            .await
            .iter()
            .filter(|m| {
                m.user_id == user_id
                    && m.member_type == member_type
                    && m.course_id == course_id
                    && m.role == role
            })
            .cloned()
            .collect())
    }

    async fn delete_course_member(&self, id: Uuid) -> Result<()> {
        self.members.write().await.retain(|m| m.id != id);
        Ok(())
    }

    async fn upsert_course_member(&self, record: &CourseMemberRecord) -> Result<()> {
        let mut members = self.members.write().await;
        if let Some(existing) = members.iter_mut().find(|m| m.id == record.id) {
            *existing = record.clone();
            return Ok(());
        }
        if let Some(existing) = members.iter_mut().find(|m| {
            m.user_id == record.user_id
                && m.member_type == record.member_type
                && m.course_id == record.course_id
                && m.role == record.role
        }) {
            *existing = record.clone();
            return Ok(());
        }
        members.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl EnrollmentStore for InMemoryMembershipStore {
    async fn user_by_login(&self, login_id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(login_id).cloned())
    }

    async fn has_active_enrollment(&self, reg_id: &str, course_id_prefix: &str) -> Result<bool> {
        Ok(self.enrollments.read().await.iter().any(|e| {
            e.reg_id == reg_id && e.course_id.starts_with(course_id_prefix) && e.status == "active"
        }))
    }
}

// ============================================================================
// Success log
// ============================================================================

/// Minute-bucketed counter store backed by a map.
#[derive(Default)]
pub struct InMemorySuccessLog {
    buckets: RwLock<HashMap<(String, i64), u32>>,
}

impl InMemorySuccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bucket_total(&self, kind: &str, minute: i64) -> Option<u32> {
        self.buckets
            .read()
            .await
            .get(&(kind.to_string(), minute))
            .copied()
    }

    pub async fn bucket_count(&self) -> usize {
        self.buckets.read().await.len()
    }
}

#[async_trait]
impl SuccessLogStore for InMemorySuccessLog {
    async fn increment(&self, kind: &str, minute: i64, count: u32) -> Result<u32> {
        let mut buckets = self.buckets.write().await;
        let total = buckets.entry((kind.to_string(), minute)).or_insert(0);
        *total += count;
        Ok(*total)
    }

    async fn prune_older_than(&self, kind: &str, minute: i64) -> Result<u64> {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|(k, m), _| k != kind || *m >= minute);
        Ok((before - buckets.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn key_rotation_on_invalidate() {
        let keys = InMemoryKeyService::new();
        keys.push_current_key(
            "gws",
            ResolvedKey {
                material: vec![1; 16],
                source_id: "stale".to_string(),
            },
        );
        keys.push_current_key(
            "gws",
            ResolvedKey {
                material: vec![2; 16],
                source_id: "fresh".to_string(),
            },
        );

        assert_eq!(keys.current_key("gws").await.unwrap().source_id, "stale");
        keys.invalidate_current_key("gws").await;
        assert_eq!(keys.current_key("gws").await.unwrap().source_id, "fresh");
        assert_eq!(keys.invalidation_count(), 1);
    }

    #[tokio::test]
    async fn edge_upsert_is_unique_per_pair() {
        let store = InMemoryMembershipStore::new();
        store.upsert_edge("u_child", "u_root", false).await.unwrap();
        store.upsert_edge("u_child", "u_root", true).await.unwrap();

        let edges = store.all_edges().await;
        assert_eq!(edges.len(), 1);
        assert!(edges[0].is_deleted);
    }

    #[tokio::test]
    async fn prefix_enrollment_match() {
        let store = InMemoryMembershipStore::new();
        store
            .insert_enrollment("REG1", "2024-autumn-MATH-124-A", "active")
            .await;

        assert!(store
            .has_active_enrollment("REG1", "2024-autumn-MATH-124")
            .await
            .unwrap());
        assert!(!store
            .has_active_enrollment("REG1", "2024-autumn-PHYS-121")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn success_log_prunes_by_kind() {
        let log = InMemorySuccessLog::new();
        log.increment("group", 100, 3).await.unwrap();
        log.increment("group", 200, 2).await.unwrap();
        log.increment("person", 100, 1).await.unwrap();

        let removed = log.prune_older_than("group", 150).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(log.bucket_total("group", 200).await, Some(2));
        assert_eq!(log.bucket_total("person", 100).await, Some(1));
    }
}
