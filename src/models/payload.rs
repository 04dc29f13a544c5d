// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Normalized claims of a verified bearer token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Project role granted by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Viewer,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Verified identity reconstructed from a token on every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub user_id: String,
    pub project_id: String,
    pub email: String,
    pub full_name: String,
    pub avatar: Option<String>,
    pub roles: BTreeSet<Role>,
    pub project_title: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub issuer: String,
}

impl Payload {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Parse a `roles` claim that is either a comma-separated string or an array.
///
/// Matching is case-insensitive; duplicates collapse and unknown roles are
/// dropped.
pub fn deserialize_roles<'de, D>(deserializer: D) -> Result<BTreeSet<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawRoles {
        Joined(String),
        List(Vec<String>),
    }

    let raw = match Option::<RawRoles>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(RawRoles::Joined(joined)) => joined.split(',').map(str::to_string).collect(),
        Some(RawRoles::List(list)) => list,
    };

    Ok(raw
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .filter_map(|r| match r.parse::<Role>() {
            Ok(role) => Some(role),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring role claim");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(default, deserialize_with = "deserialize_roles")]
        roles: BTreeSet<Role>,
    }

    fn roles(json: &str) -> BTreeSet<Role> {
        serde_json::from_str::<Wrapper>(json).unwrap().roles
    }

    #[test]
    fn roles_from_comma_string() {
        assert_eq!(
            roles(r#"{"roles":"Admin, viewer,ADMIN"}"#),
            BTreeSet::from([Role::Admin, Role::Viewer])
        );
    }

    #[test]
    fn roles_from_array() {
        assert_eq!(
            roles(r#"{"roles":["editor","Editor","owner"]}"#),
            BTreeSet::from([Role::Editor])
        );
    }

    #[test]
    fn roles_missing_or_null() {
        assert!(roles(r#"{}"#).is_empty());
        assert!(roles(r#"{"roles":null}"#).is_empty());
        assert!(roles(r#"{"roles":""}"#).is_empty());
    }
}
