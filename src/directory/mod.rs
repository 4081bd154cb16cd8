//! # Directory
//!
//! Users, groups and group memberships.
//!
//! Each entity has a repository trait with an in-memory implementation;
//! [`DirectoryService`] composes them and keeps group paths and cached
//! abilities consistent.

pub mod errors;
pub mod group;
pub mod membership;
pub mod service;
pub mod user;

pub use errors::{DirectoryError, DirectoryResult};
pub use group::{Group, GroupRepository, InMemoryGroupRepository};
pub use membership::{InMemoryMembershipRepository, Membership, MembershipRepository};
pub use service::{DirectoryService, GroupUpdate, MembershipWithGroup, NewGroup};
pub use user::{normalize_email, InMemoryUserRepository, User, UserRepository};
