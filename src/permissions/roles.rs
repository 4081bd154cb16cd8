//! # Roles
//!
//! System-wide roles and per-group roles. Both are ordered: a greater role
//! contains every right of the lower ones.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role of a user across the whole system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemRole {
    User,
    Admin,
}

impl SystemRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemRole::User => "user",
            SystemRole::Admin => "admin",
        }
    }
}

impl fmt::Display for SystemRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a user within a group and, by inheritance, its subtree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Viewer,
    Member,
    Admin,
    Owner,
}

impl GroupRole {
    /// All roles, weakest first
    pub const ASCENDING: [GroupRole; 4] = [
        GroupRole::Viewer,
        GroupRole::Member,
        GroupRole::Admin,
        GroupRole::Owner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupRole::Viewer => "viewer",
            GroupRole::Member => "member",
            GroupRole::Admin => "admin",
            GroupRole::Owner => "owner",
        }
    }

    /// Whether this role includes the rights of `required`
    pub fn satisfies(&self, required: GroupRole) -> bool {
        *self >= required
    }
}

impl fmt::Display for GroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(GroupRole::Viewer),
            "member" => Ok(GroupRole::Member),
            "admin" => Ok(GroupRole::Admin),
            "owner" => Ok(GroupRole::Owner),
            other => Err(format!("unknown group role '{}'", other)),
        }
    }
}
