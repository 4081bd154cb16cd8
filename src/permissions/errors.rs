//! # Permission Errors

use thiserror::Error;

use super::ability::{Action, SubjectType};

/// Label path errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Path is empty")]
    Empty,

    #[error("Path contains an empty label")]
    EmptyLabel,

    #[error("Label is {0} characters long, the maximum is 256")]
    LabelTooLong(usize),

    #[error("Path has {0} labels, the maximum is 65535")]
    TooDeep(usize),

    #[error("Label '{label}' contains invalid character '{character}'")]
    InvalidCharacter { label: String, character: char },

    #[error("Subpath {start}+{len} is out of range for depth {depth}")]
    OutOfRange { start: usize, len: usize, depth: usize },

    #[error("'{prefix}' is not an ancestor of '{path}'")]
    NotAnAncestor { path: String, prefix: String },
}

/// An ability check failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot {action} {subject}{}", .reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
pub struct PermissionError {
    pub action: Action,
    pub subject: SubjectType,
    pub field: Option<String>,
    pub reason: Option<String>,
}

impl PermissionError {
    pub fn status_code(&self) -> u16 {
        403
    }

    pub fn error_code(&self) -> &'static str {
        "FORBIDDEN"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_error_display() {
        let err = PermissionError {
            action: Action::Update,
            subject: SubjectType::User,
            field: Some("system_role".to_string()),
            reason: Some("only administrators can change system roles".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Cannot update User: only administrators can change system roles"
        );
        assert_eq!(err.status_code(), 403);

        let bare = PermissionError {
            action: Action::Delete,
            subject: SubjectType::Group,
            field: None,
            reason: None,
        };
        assert_eq!(bare.to_string(), "Cannot delete Group");
    }
}
