//! Member identities and their classification.
//!
//! Members arrive on the wire as bare names, optionally tagged with a
//! producer-declared type. Classification is structural and computed once at
//! construction; a recognized declared type wins over the structural guess.

use std::fmt;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Classification of a group member identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberType {
    /// Institutional login id (lowercase alphanumeric token).
    Uwnetid,
    /// External scoped identity (`local@domain`).
    Eppn,
    /// Nested group id (underscore-delimited stem such as `u_...`).
    Group,
    /// Anything else (dns names, service identities). Skipped by handlers.
    Other,
}

impl MemberType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberType::Uwnetid => "uwnetid",
            MemberType::Eppn => "eppn",
            MemberType::Group => "group",
            MemberType::Other => "other",
        }
    }

    /// Map a producer-declared type string onto a classification.
    /// Unrecognized declared types collapse to `Other`.
    pub fn from_wire(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "uwnetid" => MemberType::Uwnetid,
            "eppn" => MemberType::Eppn,
            "group" => MemberType::Group,
            _ => MemberType::Other,
        }
    }

    /// Structural classification of a bare member name.
    pub fn classify(name: &str) -> Self {
        if name.contains('@') {
            return MemberType::Eppn;
        }
        if name.contains('_') {
            return MemberType::Group;
        }
        if is_login_token(name) {
            return MemberType::Uwnetid;
        }
        MemberType::Other
    }
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_login_token(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    !name.is_empty() && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// A single entry from an add-members or delete-members list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub member_type: MemberType,
}

impl Member {
    /// Construct with structural classification.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let member_type = MemberType::classify(&name);
        Self { name, member_type }
    }

    /// Construct with an explicit classification.
    pub fn with_type(name: impl Into<String>, member_type: MemberType) -> Self {
        Self {
            name: name.into(),
            member_type,
        }
    }

    pub fn is_group(&self) -> bool {
        self.member_type == MemberType::Group
    }

    pub fn is_uwnetid(&self) -> bool {
        self.member_type == MemberType::Uwnetid
    }

    pub fn is_eppn(&self) -> bool {
        self.member_type == MemberType::Eppn
    }
}

#[derive(serde::Deserialize)]
struct MemberWire {
    name: String,
    #[serde(default, rename = "memberType", alias = "type")]
    member_type: Option<String>,
}

impl<'de> Deserialize<'de> for Member {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = MemberWire::deserialize(deserializer)?;
        Ok(match wire.member_type.as_deref() {
            Some(declared) => Member::with_type(wire.name, MemberType::from_wire(declared)),
            None => Member::new(wire.name),
        })
    }
}

impl Serialize for Member {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_struct("Member", 2)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("memberType", self.member_type.as_str())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_eppn_by_at_sign() {
        assert_eq!(MemberType::classify("jdoe@example.edu"), MemberType::Eppn);
    }

    #[test]
    fn classifies_group_by_underscore_stem() {
        assert_eq!(MemberType::classify("u_math_tas"), MemberType::Group);
        assert_eq!(MemberType::classify("course_2024aut-math124a"), MemberType::Group);
    }

    #[test]
    fn classifies_login_token() {
        assert_eq!(MemberType::classify("jdoe12"), MemberType::Uwnetid);
    }

    #[test]
    fn classifies_other() {
        assert_eq!(MemberType::classify("Not A Login"), MemberType::Other);
        assert_eq!(MemberType::classify("9starts-with-digit"), MemberType::Other);
    }

    #[test]
    fn declared_type_wins_over_structure() {
        let member: Member =
            serde_json::from_value(serde_json::json!({"name": "odd name", "type": "uwnetid"}))
                .unwrap();
        assert_eq!(member.member_type, MemberType::Uwnetid);
    }

    #[test]
    fn unrecognized_declared_type_is_other() {
        let member: Member =
            serde_json::from_value(serde_json::json!({"name": "host.example.edu", "type": "dns"}))
                .unwrap();
        assert_eq!(member.member_type, MemberType::Other);
    }

    #[test]
    fn absent_type_falls_back_to_structure() {
        let member: Member =
            serde_json::from_value(serde_json::json!({"name": "u_math_tas"})).unwrap();
        assert!(member.is_group());
    }

    #[test]
    fn serializes_wire_shape() {
        let json = serde_json::to_value(Member::new("jdoe")).unwrap();
        assert_eq!(json, serde_json::json!({"name": "jdoe", "memberType": "uwnetid"}));
    }
}
