//! Processor configuration.
//!
//! An immutable value constructed once and passed through call context.

use crate::infra::{EventError, Result};

/// Expected message type for group events.
pub const GROUP_MESSAGE_TYPE: &str = "gws";

/// Expected protocol version for group events.
pub const GROUP_MESSAGE_VERSION: &str = "UWIT-1";

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Whether to verify envelope signatures before extraction.
    pub validate_signatures: bool,

    /// Message type the group handler admits.
    pub group_message_type: String,

    /// Protocol version the group handler admits.
    pub group_message_version: String,

    /// Groups fed by bulk import; their events are ignored.
    pub import_groups: Vec<String>,

    /// Success-counter retention, in days.
    pub prune_after_days: i64,

    /// Bound on nested-group expansion depth.
    pub max_group_depth: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            validate_signatures: true,
            group_message_type: GROUP_MESSAGE_TYPE.to_string(),
            group_message_version: GROUP_MESSAGE_VERSION.to_string(),
            import_groups: Vec::new(),
            prune_after_days: 7,
            max_group_depth: 8,
        }
    }
}

impl ProcessorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let validate_signatures = match std::env::var("VALIDATE_MSG_SIGNATURE") {
            Ok(raw) => parse_bool("VALIDATE_MSG_SIGNATURE", &raw)?,
            Err(_) => defaults.validate_signatures,
        };

        let import_groups = std::env::var("SIS_IMPORT_GROUPS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let prune_after_days = match std::env::var("EVENT_COUNT_PRUNE_AFTER_DAY") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                EventError::Configuration(format!(
                    "invalid EVENT_COUNT_PRUNE_AFTER_DAY={raw} (expected days)"
                ))
            })?,
            Err(_) => defaults.prune_after_days,
        };

        let max_group_depth = match std::env::var("MAX_GROUP_DEPTH") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                EventError::Configuration(format!(
                    "invalid MAX_GROUP_DEPTH={raw} (expected a count)"
                ))
            })?,
            Err(_) => defaults.max_group_depth,
        };

        Ok(Self {
            validate_signatures,
            group_message_type: std::env::var("GROUP_MESSAGE_TYPE")
                .unwrap_or(defaults.group_message_type),
            group_message_version: std::env::var("GROUP_MESSAGE_VERSION")
                .unwrap_or(defaults.group_message_version),
            import_groups,
            prune_after_days,
            max_group_depth,
        })
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(EventError::Configuration(format!(
            "invalid {name}={other} (expected true|false)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ProcessorConfig::default();
        assert!(config.validate_signatures);
        assert_eq!(config.group_message_type, "gws");
        assert_eq!(config.group_message_version, "UWIT-1");
        assert_eq!(config.prune_after_days, 7);
        assert_eq!(config.max_group_depth, 8);
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(parse_bool("X", " ON ").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(matches!(
            parse_bool("X", "maybe"),
            Err(EventError::Configuration(_))
        ));
    }
}
