//! Decoded group event payloads and the action vocabulary.

use serde::Deserialize;
use serde_json::Value;

use super::Member;
use crate::infra::{EventError, Result};

/// Actions a group event can declare. The wire strings are fixed vocabulary
/// and are never translated; anything else is carried as `Unrecognized` so
/// producers can introduce new actions before consumers are updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupAction {
    UpdateMembers,
    PutGroup,
    DeleteGroup,
    PutMembers,
    ChangeSubjectName,
    NoAction,
    Unrecognized(String),
}

impl GroupAction {
    pub fn parse(value: &str) -> Self {
        match value {
            "update-members" => GroupAction::UpdateMembers,
            "put-group" => GroupAction::PutGroup,
            "delete-group" => GroupAction::DeleteGroup,
            "put-members" => GroupAction::PutMembers,
            "change-subject-name" => GroupAction::ChangeSubjectName,
            "no-action" => GroupAction::NoAction,
            other => GroupAction::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            GroupAction::UpdateMembers => "update-members",
            GroupAction::PutGroup => "put-group",
            GroupAction::DeleteGroup => "delete-group",
            GroupAction::PutMembers => "put-members",
            GroupAction::ChangeSubjectName => "change-subject-name",
            GroupAction::NoAction => "no-action",
            GroupAction::Unrecognized(other) => other,
        }
    }
}

/// A decoded group event ready for dispatch: the declared action, the group
/// the event is about, and the full payload for handler-specific extraction.
#[derive(Debug, Clone)]
pub struct GroupMessage {
    pub action: GroupAction,
    pub group_id: String,
    pub payload: Value,
}

impl GroupMessage {
    /// Pull the dispatch key out of a decoded payload. Returns `None` when
    /// the payload does not name an action and a group, which callers treat
    /// as a soft no-op rather than an error.
    pub fn from_payload(payload: Value) -> Option<Self> {
        let action = payload.get("action")?.as_str()?.to_string();
        let group_id = payload
            .get("group")
            .or_else(|| payload.get("oldName"))?
            .as_str()?
            .to_string();
        Some(Self {
            action: GroupAction::parse(&action),
            group_id,
            payload,
        })
    }
}

/// Membership delta carried by an `update-members` event.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupEvent {
    #[serde(rename = "group")]
    pub group_id: String,

    #[serde(default, rename = "regid")]
    pub reg_id: Option<String>,

    #[serde(default, rename = "addMembers")]
    pub add_members: Vec<Member>,

    #[serde(default, rename = "deleteMembers")]
    pub delete_members: Vec<Member>,
}

impl GroupEvent {
    pub fn from_payload(payload: &Value) -> Result<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| EventError::MalformedPayload(format!("invalid group event: {e}")))
    }
}

/// Identifier rename carried by a `change-subject-name` event.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupRename {
    #[serde(rename = "oldName")]
    pub old_name: String,

    #[serde(rename = "newName")]
    pub new_name: String,
}

impl GroupRename {
    pub fn from_payload(payload: &Value) -> Result<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| EventError::MalformedPayload(format!("invalid rename event: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_actions() {
        assert_eq!(GroupAction::parse("delete-group"), GroupAction::DeleteGroup);
        assert_eq!(GroupAction::parse("no-action"), GroupAction::NoAction);
    }

    #[test]
    fn carries_unrecognized_actions() {
        let action = GroupAction::parse("merge-group");
        assert_eq!(action, GroupAction::Unrecognized("merge-group".to_string()));
        assert_eq!(action.as_str(), "merge-group");
    }

    #[test]
    fn message_from_payload() {
        let message = GroupMessage::from_payload(json!({
            "action": "update-members",
            "group": "u_math_tas",
            "addMembers": [{"name": "jdoe"}]
        }))
        .unwrap();
        assert_eq!(message.action, GroupAction::UpdateMembers);
        assert_eq!(message.group_id, "u_math_tas");
    }

    #[test]
    fn rename_payload_uses_old_name_as_group() {
        let message = GroupMessage::from_payload(json!({
            "action": "change-subject-name",
            "oldName": "u_old",
            "newName": "u_new"
        }))
        .unwrap();
        assert_eq!(message.group_id, "u_old");
    }

    #[test]
    fn empty_payload_yields_none() {
        assert!(GroupMessage::from_payload(json!({})).is_none());
    }

    #[test]
    fn group_event_member_lists_default_empty() {
        let event = GroupEvent::from_payload(&json!({"group": "u_math_tas"})).unwrap();
        assert!(event.add_members.is_empty());
        assert!(event.delete_members.is_empty());
    }
}
