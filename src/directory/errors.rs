//! # Directory Errors
//!
//! Error types for user, group and membership operations.

use thiserror::Error;
use uuid::Uuid;

use crate::permissions::PathError;

/// Result type for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    #[error("Group not found: {0}")]
    GroupNotFound(Uuid),

    #[error("User {user_id} is not a member of group {group_id}")]
    MembershipNotFound { group_id: Uuid, user_id: Uuid },

    #[error("Email already registered: {0}")]
    EmailTaken(String),

    #[error("User {user_id} is already a member of group {group_id}")]
    AlreadyMember { group_id: Uuid, user_id: Uuid },

    #[error("A sibling group is already named '{0}'")]
    GroupNameTaken(String),

    #[error("Invalid group name '{name}': {reason}")]
    InvalidGroupName { name: String, reason: String },

    #[error("Invalid move: {0}")]
    InvalidMove(String),

    #[error("Group {0} must keep at least one owner")]
    LastOwner(Uuid),

    #[error("Administrators cannot change their own system role")]
    OwnSystemRole,

    #[error("Invalid group path: {0}")]
    Path(#[from] PathError),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl DirectoryError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UserNotFound(_) => 404,
            Self::GroupNotFound(_) => 404,
            Self::MembershipNotFound { .. } => 404,
            Self::EmailTaken(_) => 409,
            Self::AlreadyMember { .. } => 409,
            Self::GroupNameTaken(_) => 409,
            Self::InvalidGroupName { .. } => 400,
            Self::InvalidMove(_) => 400,
            Self::LastOwner(_) => 409,
            Self::OwnSystemRole => 400,
            Self::Path(_) => 400,
            Self::Storage(_) => 500,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::GroupNotFound(_) => "GROUP_NOT_FOUND",
            Self::MembershipNotFound { .. } => "MEMBERSHIP_NOT_FOUND",
            Self::EmailTaken(_) => "EMAIL_TAKEN",
            Self::AlreadyMember { .. } => "ALREADY_MEMBER",
            Self::GroupNameTaken(_) => "GROUP_NAME_TAKEN",
            Self::InvalidGroupName { .. } => "INVALID_GROUP_NAME",
            Self::InvalidMove(_) => "INVALID_MOVE",
            Self::LastOwner(_) => "LAST_OWNER",
            Self::OwnSystemRole => "OWN_SYSTEM_ROLE",
            Self::Path(_) => "INVALID_PATH",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub(crate) fn poisoned<T>(_: T) -> Self {
        Self::Storage("lock poisoned".to_string())
    }
}
