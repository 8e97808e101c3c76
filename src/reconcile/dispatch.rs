//! Action dispatch for group events.
//!
//! A decoded event is routed by its declared action inside a dispatcher,
//! and the dispatcher itself is chosen by probing a fixed chain with the
//! event's group id; the first dispatcher that claims the group runs the
//! event. Unknown actions and unclaimed groups are soft-ignored with a
//! zero count so new producer vocabulary does not break consumers.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::{GroupAction, GroupMessage};
use crate::infra::Result;

use super::course::academic_course_id;

/// Per-action handling for one family of groups. Every handler defaults to
/// a logged no-op returning zero; dispatchers override the actions they
/// actually implement.
#[async_trait]
pub trait GroupDispatch: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this dispatcher handles the given group.
    async fn claims(&self, group_id: &str) -> Result<bool>;

    /// Route by declared action. Returns the number of units of work done.
    async fn run(&self, message: &GroupMessage) -> Result<u32> {
        match &message.action {
            GroupAction::UpdateMembers => self.update_members(message).await,
            GroupAction::PutGroup => self.put_group(message).await,
            GroupAction::DeleteGroup => self.delete_group(message).await,
            GroupAction::PutMembers => self.put_members(message).await,
            GroupAction::ChangeSubjectName => self.change_subject_name(message).await,
            GroupAction::NoAction => Ok(0),
            GroupAction::Unrecognized(action) => {
                info!(action = %action, group_id = %message.group_id, "GROUP: unknown action");
                Ok(0)
            }
        }
    }

    async fn update_members(&self, message: &GroupMessage) -> Result<u32> {
        info!(group_id = %message.group_id, "GROUP: ignore update-members");
        Ok(0)
    }

    async fn put_group(&self, message: &GroupMessage) -> Result<u32> {
        info!(group_id = %message.group_id, "GROUP: ignore put-group");
        Ok(0)
    }

    async fn delete_group(&self, message: &GroupMessage) -> Result<u32> {
        info!(group_id = %message.group_id, "GROUP: ignore delete-group");
        Ok(0)
    }

    async fn put_members(&self, message: &GroupMessage) -> Result<u32> {
        info!(group_id = %message.group_id, "GROUP: ignore put-members");
        Ok(0)
    }

    async fn change_subject_name(&self, message: &GroupMessage) -> Result<u32> {
        info!(group_id = %message.group_id, "GROUP: ignore change-subject-name");
        Ok(0)
    }
}

/// Groups fed by bulk import rather than events.
pub struct ImportGroupDispatch {
    import_groups: HashSet<String>,
}

impl ImportGroupDispatch {
    pub fn new(import_groups: impl IntoIterator<Item = String>) -> Self {
        Self {
            import_groups: import_groups.into_iter().collect(),
        }
    }
}

#[async_trait]
impl GroupDispatch for ImportGroupDispatch {
    fn name(&self) -> &'static str {
        "import"
    }

    async fn claims(&self, group_id: &str) -> Result<bool> {
        Ok(self.import_groups.contains(group_id))
    }

    async fn update_members(&self, message: &GroupMessage) -> Result<u32> {
        info!(group_id = %message.group_id, "GROUP: ignore import group update");
        Ok(0)
    }
}

/// Course groups, identified by their encoded section id. Their membership
/// is derived from the registrar, not from group events.
pub struct CourseGroupDispatch;

#[async_trait]
impl GroupDispatch for CourseGroupDispatch {
    fn name(&self) -> &'static str {
        "course"
    }

    async fn claims(&self, group_id: &str) -> Result<bool> {
        Ok(academic_course_id(group_id).is_some())
    }

    async fn update_members(&self, message: &GroupMessage) -> Result<u32> {
        let course_id = academic_course_id(&message.group_id).unwrap_or_default();
        info!(course_id = %course_id, "GROUP: ignore course group update");
        Ok(0)
    }

    async fn put_group(&self, message: &GroupMessage) -> Result<u32> {
        info!(group_id = %message.group_id, "GROUP: ignore course group put-group");
        Ok(0)
    }
}

/// Fallback dispatcher: claims everything, handles nothing.
pub struct DefaultDispatch;

#[async_trait]
impl GroupDispatch for DefaultDispatch {
    fn name(&self) -> &'static str {
        "default"
    }

    async fn claims(&self, _group_id: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Probe chain over dispatchers; first claim wins.
pub struct GroupEventDispatcher {
    dispatchers: Vec<Arc<dyn GroupDispatch>>,
}

impl GroupEventDispatcher {
    pub fn new(dispatchers: Vec<Arc<dyn GroupDispatch>>) -> Self {
        Self { dispatchers }
    }

    pub async fn dispatch(&self, payload: Value) -> Result<u32> {
        let Some(message) = GroupMessage::from_payload(payload) else {
            info!("GROUP: payload names no action or group; ignoring");
            return Ok(0);
        };

        for dispatcher in &self.dispatchers {
            if dispatcher.claims(&message.group_id).await? {
                debug!(
                    dispatcher = dispatcher.name(),
                    group_id = %message.group_id,
                    action = message.action.as_str(),
                    "dispatching group event"
                );
                return dispatcher.run(&message).await;
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_action_is_soft_ignored() {
        let dispatcher = GroupEventDispatcher::new(vec![Arc::new(DefaultDispatch)]);
        let count = dispatcher
            .dispatch(json!({"action": "merge-group", "group": "u_math_tas"}))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn missing_action_is_soft_ignored() {
        let dispatcher = GroupEventDispatcher::new(vec![Arc::new(DefaultDispatch)]);
        assert_eq!(dispatcher.dispatch(json!({})).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn import_groups_claim_first() {
        let import = ImportGroupDispatch::new(["u_sis_import".to_string()]);
        assert!(import.claims("u_sis_import").await.unwrap());
        assert!(!import.claims("u_math_tas").await.unwrap());
    }

    #[tokio::test]
    async fn course_groups_are_claimed_by_pattern() {
        let course = CourseGroupDispatch;
        assert!(course.claims("course_2024aut-math124a").await.unwrap());
        assert!(!course.claims("u_math_tas").await.unwrap());
    }

    #[tokio::test]
    async fn default_dispatch_no_ops_every_action() {
        let dispatcher = GroupEventDispatcher::new(vec![Arc::new(DefaultDispatch)]);
        for action in [
            "update-members",
            "put-group",
            "delete-group",
            "put-members",
            "change-subject-name",
            "no-action",
        ] {
            let count = dispatcher
                .dispatch(json!({"action": action, "group": "u_x", "oldName": "u_x"}))
                .await
                .unwrap();
            assert_eq!(count, 0, "action {action} should be a no-op");
        }
    }
}
