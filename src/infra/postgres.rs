//! PostgreSQL store implementations.
//!
//! Uniqueness is enforced by the schema (`course_members` unique on the
//! membership key, `group_member_groups` unique per edge) and writes go
//! through single-statement upserts, so concurrent workers reconciling
//! overlapping groups do not race through read-modify-write gaps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{
    CourseMemberRecord, GroupMemberGroup, GroupRecord, MemberType, Priority, UserRecord,
};
use crate::infra::{
    CourseMemberStore, EnrollmentStore, EventError, GroupStore, Result, SuccessLogStore,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/postgres");

/// Apply embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| EventError::Store(e.to_string()))
}

/// PostgreSQL-backed membership store.
pub struct PgMembershipStore {
    pool: PgPool,
}

impl PgMembershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn from_url(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct GroupRow {
    id: Uuid,
    group_id: String,
    course_id: String,
    role: String,
    added_by: String,
    is_deleted: bool,
    deleted_date: Option<DateTime<Utc>>,
    deleted_by: Option<String>,
    priority: i16,
}

impl From<GroupRow> for GroupRecord {
    fn from(row: GroupRow) -> Self {
        GroupRecord {
            id: row.id,
            group_id: row.group_id,
            course_id: row.course_id,
            role: row.role,
            added_by: row.added_by,
            is_deleted: row.is_deleted,
            deleted_date: row.deleted_date,
            deleted_by: row.deleted_by,
            priority: Priority::from_i16(row.priority),
        }
    }
}

#[derive(FromRow)]
struct EdgeRow {
    id: Uuid,
    group_id: String,
    root_group_id: String,
    is_deleted: bool,
}

impl From<EdgeRow> for GroupMemberGroup {
    fn from(row: EdgeRow) -> Self {
        GroupMemberGroup {
            id: row.id,
            group_id: row.group_id,
            root_group_id: row.root_group_id,
            is_deleted: row.is_deleted,
        }
    }
}

#[derive(FromRow)]
struct CourseMemberRow {
    id: Uuid,
    user_id: String,
    member_type: String,
    course_id: String,
    role: String,
    is_deleted: bool,
    priority: i16,
    queue_id: Option<Uuid>,
}

impl From<CourseMemberRow> for CourseMemberRecord {
    fn from(row: CourseMemberRow) -> Self {
        CourseMemberRecord {
            id: row.id,
            user_id: row.user_id,
            member_type: MemberType::from_wire(&row.member_type),
            course_id: row.course_id,
            role: row.role,
            is_deleted: row.is_deleted,
            priority: Priority::from_i16(row.priority),
            queue_id: row.queue_id,
        }
    }
}

#[async_trait]
impl GroupStore for PgMembershipStore {
    async fn groups_by_id(&self, group_id: &str) -> Result<Vec<GroupRecord>> {
        let rows = sqlx::query_as::<_, GroupRow>(
            "SELECT id, group_id, course_id, role, added_by, is_deleted, deleted_date,
                    deleted_by, priority
             FROM groups WHERE group_id = $1",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(GroupRecord::from).collect())
    }

    async fn active_groups_by_id(&self, group_id: &str) -> Result<Vec<GroupRecord>> {
        let rows = sqlx::query_as::<_, GroupRow>(
            "SELECT id, group_id, course_id, role, added_by, is_deleted, deleted_date,
                    deleted_by, priority
             FROM groups WHERE group_id = $1 AND is_deleted = FALSE",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(GroupRecord::from).collect())
    }

    async fn mark_groups_deleted(
        &self,
        group_id: &str,
        deleted_by: &str,
        deleted_date: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE groups
             SET is_deleted = TRUE, deleted_date = $2, deleted_by = $3, priority = $4
             WHERE group_id = $1 AND is_deleted = FALSE",
        )
        .bind(group_id)
        .bind(deleted_date)
        .bind(deleted_by)
        .bind(Priority::Immediate.as_i16())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_group_priority(&self, group_id: &str, priority: Priority) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE groups SET priority = $2 WHERE group_id = $1 AND is_deleted = FALSE",
        )
        .bind(group_id)
        .bind(priority.as_i16())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn rename_group(&self, old_id: &str, new_id: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE groups SET group_id = $2 WHERE group_id = $1")
            .bind(old_id)
            .bind(new_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn edges_for_child(&self, group_id: &str) -> Result<Vec<GroupMemberGroup>> {
        let rows = sqlx::query_as::<_, EdgeRow>(
            "SELECT id, group_id, root_group_id, is_deleted
             FROM group_member_groups WHERE group_id = $1",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(GroupMemberGroup::from).collect())
    }

    async fn active_edges_for_child(&self, group_id: &str) -> Result<Vec<GroupMemberGroup>> {
        let rows = sqlx::query_as::<_, EdgeRow>(
            "SELECT id, group_id, root_group_id, is_deleted
             FROM group_member_groups WHERE group_id = $1 AND is_deleted = FALSE",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(GroupMemberGroup::from).collect())
    }

    async fn upsert_edge(
        &self,
        child_group_id: &str,
        root_group_id: &str,
        is_deleted: bool,
    ) -> Result<GroupMemberGroup> {
        let row = sqlx::query_as::<_, EdgeRow>(
            "INSERT INTO group_member_groups (id, group_id, root_group_id, is_deleted)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (group_id, root_group_id)
             DO UPDATE SET is_deleted = EXCLUDED.is_deleted
             RETURNING id, group_id, root_group_id, is_deleted",
        )
        .bind(Uuid::new_v4())
        .bind(child_group_id)
        .bind(root_group_id)
        .bind(is_deleted)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn mark_edges_deleted_for_child(&self, group_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE group_member_groups SET is_deleted = TRUE
             WHERE group_id = $1 AND is_deleted = FALSE",
        )
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn rename_edges(&self, old_id: &str, new_id: &str) -> Result<u64> {
        let children = sqlx::query(
            "UPDATE group_member_groups SET group_id = $2 WHERE group_id = $1",
        )
        .bind(old_id)
        .bind(new_id)
        .execute(&self.pool)
        .await?;
        let roots = sqlx::query(
            "UPDATE group_member_groups SET root_group_id = $2 WHERE root_group_id = $1",
        )
        .bind(old_id)
        .bind(new_id)
        .execute(&self.pool)
        .await?;
        Ok(children.rows_affected() + roots.rows_affected())
    }

    async fn active_edge_count_for_root(&self, root_group_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM group_member_groups
             WHERE root_group_id = $1 AND is_deleted = FALSE",
        )
        .bind(root_group_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl CourseMemberStore for PgMembershipStore {
    async fn find_course_members(
        &self,
        user_id: &str,
        member_type: MemberType,
        course_id: &str,
        role: &str,
    ) -> Result<Vec<CourseMemberRecord>> {
        let rows = sqlx::query_as::<_, CourseMemberRow>(
            "SELECT id, user_id, member_type, course_id, role, is_deleted, priority, queue_id
             FROM course_members
             WHERE user_id = $1 AND member_type = $2 AND course_id = $3 AND role = $4
             ORDER BY id",
        )
        .bind(user_id)
        .bind(member_type.as_str())
        .bind(course_id)
        .bind(role)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CourseMemberRecord::from).collect())
    }

    async fn delete_course_member(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM course_members WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_course_member(&self, record: &CourseMemberRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO course_members
                 (id, user_id, member_type, course_id, role, is_deleted, priority, queue_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (user_id, member_type, course_id, role)
             DO UPDATE SET is_deleted = EXCLUDED.is_deleted, priority = EXCLUDED.priority",
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(record.member_type.as_str())
        .bind(&record.course_id)
        .bind(&record.role)
        .bind(record.is_deleted)
        .bind(record.priority.as_i16())
        .bind(record.queue_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EnrollmentStore for PgMembershipStore {
    async fn user_by_login(&self, login_id: &str) -> Result<Option<UserRecord>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT login_id, reg_id FROM users WHERE login_id = $1")
                .bind(login_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(login_id, reg_id)| UserRecord { login_id, reg_id }))
    }

    async fn has_active_enrollment(&self, reg_id: &str, course_id_prefix: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM enrollments
                 WHERE reg_id = $1 AND course_id LIKE $2 || '%' AND status = 'active'
             )",
        )
        .bind(reg_id)
        .bind(course_id_prefix)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

/// PostgreSQL-backed success log.
pub struct PgSuccessLogStore {
    pool: PgPool,
}

impl PgSuccessLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SuccessLogStore for PgSuccessLogStore {
    async fn increment(&self, kind: &str, minute: i64, count: u32) -> Result<u32> {
        let total: i32 = sqlx::query_scalar(
            "INSERT INTO event_success_log (log_kind, minute, event_count)
             VALUES ($1, $2, $3)
             ON CONFLICT (log_kind, minute)
             DO UPDATE SET event_count = event_success_log.event_count + EXCLUDED.event_count
             RETURNING event_count",
        )
        .bind(kind)
        .bind(minute)
        .bind(count as i32)
        .fetch_one(&self.pool)
        .await?;
        Ok(total as u32)
    }

    async fn prune_older_than(&self, kind: &str, minute: i64) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM event_success_log WHERE log_kind = $1 AND minute < $2")
                .bind(kind)
                .bind(minute)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
