//! # Permissions
//!
//! Hierarchical group permissions.
//!
//! Groups are addressed by materialized label paths ([`LabelPath`]). A
//! user's memberships are turned into an [`Ability`], a CASL-style rule set
//! where a role held in a group carries down to every group below it.

pub mod ability;
pub mod cache;
pub mod define;
pub mod errors;
pub mod ltree;
pub mod roles;

pub use ability::{Ability, AbilityBuilder, AccessFilter, Action, Condition, Rule, Subject, SubjectType};
pub use cache::{AbilityCache, CacheStats};
pub use define::{define_ability_for, effective_role, GroupGrant, Principal};
pub use errors::{PathError, PermissionError};
pub use ltree::LabelPath;
pub use roles::{GroupRole, SystemRole};
