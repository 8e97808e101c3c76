//! Durable records owned by the membership store.
//!
//! The store is the system of record; these types only describe the rows the
//! reconciliation engine reads and conditionally mutates.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::MemberType;

/// Processing priority hint for downstream provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    None,
    Default,
    High,
    Immediate,
}

impl Priority {
    pub fn as_i16(&self) -> i16 {
        match self {
            Priority::None => 0,
            Priority::Default => 1,
            Priority::High => 2,
            Priority::Immediate => 3,
        }
    }

    pub fn from_i16(value: i16) -> Self {
        match value {
            0 => Priority::None,
            2 => Priority::High,
            3 => Priority::Immediate,
            _ => Priority::Default,
        }
    }
}

/// A group attached to a course section with a role.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRecord {
    pub id: Uuid,
    pub group_id: String,
    pub course_id: String,
    pub role: String,
    /// Actor the group was attached by; nested-group resolution acts as
    /// this identity.
    pub added_by: String,
    pub is_deleted: bool,
    pub deleted_date: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub priority: Priority,
}

impl GroupRecord {
    pub fn new(
        group_id: impl Into<String>,
        course_id: impl Into<String>,
        role: impl Into<String>,
        added_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id: group_id.into(),
            course_id: course_id.into(),
            role: role.into(),
            added_by: added_by.into(),
            is_deleted: false,
            deleted_date: None,
            deleted_by: None,
            priority: Priority::Default,
        }
    }
}

/// Transitive group-in-group membership edge. Records that `group_id` is,
/// directly or through nesting, a member group of `root_group_id`; used to
/// re-derive which root groups a nested change affects.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMemberGroup {
    pub id: Uuid,
    pub group_id: String,
    pub root_group_id: String,
    pub is_deleted: bool,
}

impl GroupMemberGroup {
    pub fn new(group_id: impl Into<String>, root_group_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id: group_id.into(),
            root_group_id: root_group_id.into(),
            is_deleted: false,
        }
    }
}

/// Flat, group-sourced course membership, unique per
/// `(user_id, member_type, course_id, role)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseMemberRecord {
    pub id: Uuid,
    pub user_id: String,
    pub member_type: MemberType,
    pub course_id: String,
    pub role: String,
    pub is_deleted: bool,
    pub priority: Priority,
    /// Set while the record is queued for provisioning; a pending queue id
    /// on an incoming update signals rework and elevates priority.
    pub queue_id: Option<Uuid>,
}

impl CourseMemberRecord {
    pub fn new(
        user_id: impl Into<String>,
        member_type: MemberType,
        course_id: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            member_type,
            course_id: course_id.into(),
            role: role.into(),
            is_deleted: false,
            priority: Priority::Default,
            queue_id: None,
        }
    }
}

/// Provisioned user row, for resolving a login id to a registrar id.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub login_id: String,
    pub reg_id: String,
}
