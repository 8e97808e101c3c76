//! The reconciliation engine for membership-bearing groups.
//!
//! Folds a group event's add/delete member lists into flat course
//! membership records, expanding nested groups through the resolution
//! service and writing idempotent, priority-hinted rows. Tolerates
//! at-least-once delivery: replaying an event converges on the same state.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::{
    CourseMemberRecord, GroupEvent, GroupMessage, GroupRecord, GroupRename, Member, MemberType,
    Priority,
};
use crate::infra::{
    CourseMemberStore, EnrollmentService, EnrollmentStore, EventError, GroupResolutionError,
    GroupResolutionService, GroupStore, IdentityService, Result,
};

use super::course::is_academic_course_id;
use super::dispatch::GroupDispatch;

/// Provenance marker for records deleted by a group event.
const DELETED_BY_EVENT: &str = "gws-event";

/// State scoped to a single event: identities validated so far, and nested
/// groups already expanded per root. The visited set is what bounds
/// expansion over cyclic group graphs.
#[derive(Default)]
struct RunState {
    validated: HashSet<String>,
    visited: HashSet<(String, String)>,
}

/// Reconciles group membership deltas against the membership store.
pub struct GroupReconciler {
    groups: Arc<dyn GroupStore>,
    members: Arc<dyn CourseMemberStore>,
    enrollments: Arc<dyn EnrollmentStore>,
    resolver: Arc<dyn GroupResolutionService>,
    identity: Arc<dyn IdentityService>,
    sis: Arc<dyn EnrollmentService>,
    max_group_depth: usize,
}

impl GroupReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        groups: Arc<dyn GroupStore>,
        members: Arc<dyn CourseMemberStore>,
        enrollments: Arc<dyn EnrollmentStore>,
        resolver: Arc<dyn GroupResolutionService>,
        identity: Arc<dyn IdentityService>,
        sis: Arc<dyn EnrollmentService>,
        max_group_depth: usize,
    ) -> Self {
        Self {
            groups,
            members,
            enrollments,
            resolver,
            identity,
            sis,
            max_group_depth,
        }
    }

    async fn apply_member(
        &self,
        group: &GroupRecord,
        member: &Member,
        is_deleted: bool,
        run: &mut RunState,
    ) -> Result<()> {
        if member.is_group() {
            return self
                .expand_member_group(group, &member.name, is_deleted, 0, run)
                .await;
        }

        if member.is_uwnetid() || member.is_eppn() {
            if !run.validated.contains(&member.name) {
                let checked = if member.is_uwnetid() {
                    self.identity.validate_login_id(&member.name).await
                } else {
                    self.identity
                        .normalize_external_id(&member.name)
                        .await
                        .map(|_| ())
                };
                if let Err(err) = checked {
                    info!(member = %member.name, %err, "GROUP: ignore invalid user");
                    return Ok(());
                }
                run.validated.insert(member.name.clone());
            }
            return self.apply_course_member(group, member, is_deleted).await;
        }

        info!(
            member = %member.name,
            member_type = %member.member_type,
            "GROUP: ignore member type"
        );
        Ok(())
    }

    /// Expand a nested group and apply the flag to its effective members,
    /// then record a membership edge for the nested group and every group
    /// discovered transitively, each pointed at the current root.
    fn expand_member_group<'a>(
        &'a self,
        group: &'a GroupRecord,
        member_group: &'a str,
        is_deleted: bool,
        depth: usize,
        run: &'a mut RunState,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let key = (group.group_id.clone(), member_group.to_string());
            if !run.visited.insert(key) {
                return Ok(());
            }
            if depth >= self.max_group_depth {
                warn!(member_group, depth, "GROUP: nested expansion too deep; pruning");
                return Ok(());
            }

            let membership = match self
                .resolver
                .effective_members(member_group, &group.added_by)
                .await
            {
                Ok(membership) => membership,
                Err(GroupResolutionError::NotFound) => {
                    // The nested group no longer exists; prune it from this
                    // root's provenance.
                    self.groups.mark_edges_deleted_for_child(member_group).await?;
                    info!(
                        member_group,
                        root = %group.group_id,
                        "GROUP: removed member group not found"
                    );
                    return Ok(());
                }
                Err(GroupResolutionError::Unauthorized(reason))
                | Err(GroupResolutionError::PolicyViolation(reason)) => {
                    info!(root = %group.group_id, member_group, %reason, "GROUP: ignore member group");
                    return Ok(());
                }
                Err(GroupResolutionError::Upstream(message)) => {
                    return Err(EventError::GroupResolution {
                        group_id: member_group.to_string(),
                        message,
                    });
                }
            };

            for member in &membership.valid {
                if member.is_group() {
                    self.expand_member_group(group, &member.name, is_deleted, depth + 1, run)
                        .await?;
                } else {
                    self.apply_member(group, member, is_deleted, run).await?;
                }
            }

            self.groups
                .upsert_edge(member_group, &group.group_id, is_deleted)
                .await?;
            for transitive in &membership.member_groups {
                self.groups
                    .upsert_edge(transitive, &group.group_id, is_deleted)
                    .await?;
            }
            Ok(())
        })
    }

    async fn apply_course_member(
        &self,
        group: &GroupRecord,
        member: &Member,
        requested_delete: bool,
    ) -> Result<()> {
        let user_id = match member.member_type {
            MemberType::Uwnetid => member.name.clone(),
            MemberType::Eppn => match self.identity.normalize_external_id(&member.name).await {
                Ok(normalized) => normalized,
                Err(err) => {
                    info!(member = %member.name, %err, "GROUP: ignore invalid user");
                    return Ok(());
                }
            },
            _ => return Ok(()),
        };

        let mut rows = self
            .members
            .find_course_members(&user_id, member.member_type, &group.course_id, &group.role)
            .await?;
        let mut record = if rows.is_empty() {
            CourseMemberRecord::new(
                user_id.clone(),
                member.member_type,
                group.course_id.clone(),
                group.role.clone(),
            )
        } else {
            // The unique constraint should make this impossible; repair
            // pre-existing duplicates by keeping the first row.
            if rows.len() > 1 {
                debug!(
                    count = rows.len(),
                    user = %user_id,
                    course = %group.course_id,
                    role = %group.role,
                    "GROUP: repairing duplicate membership rows"
                );
                for extra in rows.split_off(1) {
                    self.members.delete_course_member(extra.id).await?;
                }
            }
            rows.remove(0)
        };

        let mut is_deleted = requested_delete;
        if is_deleted {
            // Union of paths: a member still reachable through another live
            // member group stays active.
            if self.user_in_member_group(group, member).await? {
                is_deleted = false;
            }
        } else if self.user_in_course(group, &user_id).await? {
            // An official enrollment is never overridden by group-sourced
            // membership.
            is_deleted = true;
        }

        record.is_deleted = is_deleted;
        record.priority = if record.queue_id.is_some() {
            Priority::High
        } else {
            Priority::Default
        };
        self.members.upsert_course_member(&record).await?;

        info!(
            state = if is_deleted { "DELETED" } else { "ACTIVE" },
            user = %user_id,
            course = %group.course_id,
            role = %group.role,
            "GROUP: membership updated"
        );
        Ok(())
    }

    async fn user_in_member_group(&self, group: &GroupRecord, member: &Member) -> Result<bool> {
        if self
            .groups
            .active_edge_count_for_root(&group.group_id)
            .await?
            == 0
        {
            return Ok(false);
        }
        self.resolver
            .is_member(&group.group_id, &member.name, &group.added_by)
            .await
    }

    /// Whether the user is independently and officially enrolled in the
    /// course. Checked against the local enrollment table first, then the
    /// live institutional source; 404 from the live source means "not
    /// enrolled", any other failure is fatal to the event.
    async fn user_in_course(&self, group: &GroupRecord, login_id: &str) -> Result<bool> {
        if !is_academic_course_id(&group.course_id) {
            return Ok(false);
        }
        let Some(user) = self.enrollments.user_by_login(login_id).await? else {
            return Ok(false);
        };
        if self
            .enrollments
            .has_active_enrollment(&user.reg_id, &group.course_id)
            .await?
        {
            return Ok(true);
        }
        match self
            .sis
            .active_course_enrollments(&user.reg_id, &group.course_id)
            .await
        {
            Ok(count) => Ok(count > 0),
            Err(EventError::Upstream { status: 404, .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl GroupDispatch for GroupReconciler {
    fn name(&self) -> &'static str {
        "membership"
    }

    async fn claims(&self, group_id: &str) -> Result<bool> {
        Ok(!self.groups.groups_by_id(group_id).await?.is_empty()
            || !self.groups.edges_for_child(group_id).await?.is_empty())
    }

    async fn update_members(&self, message: &GroupMessage) -> Result<u32> {
        let event = GroupEvent::from_payload(&message.payload)?;
        info!(group_id = %event.group_id, "GROUP: update membership");

        let mut run = RunState::default();
        let groups = self.groups.groups_by_id(&message.group_id).await?;
        let edges = self.groups.edges_for_child(&message.group_id).await?;

        let updates = [(&event.add_members, false), (&event.delete_members, true)];
        for (members, is_deleted) in updates {
            for member in members {
                // Groups the event's subject is directly attached to.
                for group in groups.iter().filter(|g| !g.is_deleted) {
                    self.apply_member(group, member, is_deleted, &mut run).await?;
                }
                // Roots the subject reaches as a nested member group.
                for edge in edges.iter().filter(|e| !e.is_deleted) {
                    for root in self.groups.active_groups_by_id(&edge.root_group_id).await? {
                        self.apply_member(&root, member, is_deleted, &mut run).await?;
                    }
                }
            }
        }

        Ok((event.add_members.len() + event.delete_members.len()) as u32)
    }

    async fn delete_group(&self, message: &GroupMessage) -> Result<u32> {
        info!(group_id = %message.group_id, "GROUP: delete");

        // Capture the live edges before marking them; their roots need
        // reprocessing once this group is gone.
        let edges = self.groups.active_edges_for_child(&message.group_id).await?;

        self.groups
            .mark_groups_deleted(&message.group_id, DELETED_BY_EVENT, Utc::now())
            .await?;
        self.groups
            .mark_edges_deleted_for_child(&message.group_id)
            .await?;

        for edge in &edges {
            self.groups
                .set_group_priority(&edge.root_group_id, Priority::Immediate)
                .await?;
        }

        Ok(1)
    }

    async fn change_subject_name(&self, message: &GroupMessage) -> Result<u32> {
        let event = GroupRename::from_payload(&message.payload)?;
        info!(old = %event.old_name, new = %event.new_name, "GROUP: change-subject-name");

        self.groups.rename_group(&event.old_name, &event.new_name).await?;
        self.groups.rename_edges(&event.old_name, &event.new_name).await?;
        Ok(1)
    }
}
