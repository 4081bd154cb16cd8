//! # Memberships

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{DirectoryError, DirectoryResult};
use super::group::Group;
use crate::permissions::{GroupRole, Subject};

/// A user's direct role in one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub role: GroupRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(group_id: Uuid, user_id: Uuid, role: GroupRole) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            group_id,
            user_id,
            role,
            created_at: now,
            updated_at: now,
        }
    }

    /// Subject for ability checks; `group` must be the membership's group
    pub fn subject(&self, group: &Group) -> Subject {
        Subject::Membership {
            group_id: self.group_id,
            group_path: group.path.clone(),
            user_id: self.user_id,
            role: self.role,
        }
    }
}

// ==================
// Membership Repository
// ==================

pub trait MembershipRepository: Send + Sync {
    fn find(&self, group_id: Uuid, user_id: Uuid) -> DirectoryResult<Option<Membership>>;

    fn find_by_user(&self, user_id: Uuid) -> DirectoryResult<Vec<Membership>>;

    fn find_by_group(&self, group_id: Uuid) -> DirectoryResult<Vec<Membership>>;

    /// Fails with `AlreadyMember` on a duplicate `(group_id, user_id)`
    fn create(&self, membership: &Membership) -> DirectoryResult<()>;

    fn update(&self, membership: &Membership) -> DirectoryResult<()>;

    /// Returns the removed membership, if there was one
    fn delete(&self, group_id: Uuid, user_id: Uuid) -> DirectoryResult<Option<Membership>>;

    /// Remove every membership of the given groups and return them
    fn delete_by_groups(&self, group_ids: &[Uuid]) -> DirectoryResult<Vec<Membership>>;

    /// `update` that fails with `LastOwner` instead of demoting the group's
    /// only owner, checked atomically with the write
    fn update_keeping_owner(&self, membership: &Membership) -> DirectoryResult<()>;

    /// `delete` that fails with `LastOwner` instead of removing the group's
    /// only owner, checked atomically with the write
    fn delete_keeping_owner(&self, group_id: Uuid, user_id: Uuid) -> DirectoryResult<Option<Membership>>;
}

/// Whether replacing `current` by `replacement` would leave the group without an owner
fn strips_last_owner(
    memberships: &HashMap<(Uuid, Uuid), Membership>,
    current: &Membership,
    replacement: Option<GroupRole>,
) -> bool {
    if current.role != GroupRole::Owner || replacement == Some(GroupRole::Owner) {
        return false;
    }
    let owners = memberships
        .values()
        .filter(|m| m.group_id == current.group_id && m.role == GroupRole::Owner)
        .count();
    owners <= 1
}

/// In-memory membership repository, keyed by `(group_id, user_id)`
#[derive(Debug, Default)]
pub struct InMemoryMembershipRepository {
    memberships: RwLock<HashMap<(Uuid, Uuid), Membership>>,
}

impl InMemoryMembershipRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect(&self, keep: impl Fn(&Membership) -> bool) -> DirectoryResult<Vec<Membership>> {
        let memberships = self.memberships.read().map_err(DirectoryError::poisoned)?;
        let mut found: Vec<Membership> = memberships.values().filter(|m| keep(m)).cloned().collect();
        found.sort_by_key(|m| m.created_at);
        Ok(found)
    }
}

impl MembershipRepository for InMemoryMembershipRepository {
    fn find(&self, group_id: Uuid, user_id: Uuid) -> DirectoryResult<Option<Membership>> {
        let memberships = self.memberships.read().map_err(DirectoryError::poisoned)?;
        Ok(memberships.get(&(group_id, user_id)).cloned())
    }

    fn find_by_user(&self, user_id: Uuid) -> DirectoryResult<Vec<Membership>> {
        self.collect(|m| m.user_id == user_id)
    }

    fn find_by_group(&self, group_id: Uuid) -> DirectoryResult<Vec<Membership>> {
        self.collect(|m| m.group_id == group_id)
    }

    fn create(&self, membership: &Membership) -> DirectoryResult<()> {
        let mut memberships = self.memberships.write().map_err(DirectoryError::poisoned)?;
        let key = (membership.group_id, membership.user_id);
        if memberships.contains_key(&key) {
            return Err(DirectoryError::AlreadyMember {
                group_id: membership.group_id,
                user_id: membership.user_id,
            });
        }
        memberships.insert(key, membership.clone());
        Ok(())
    }

    fn update(&self, membership: &Membership) -> DirectoryResult<()> {
        let mut memberships = self.memberships.write().map_err(DirectoryError::poisoned)?;
        let key = (membership.group_id, membership.user_id);
        match memberships.get_mut(&key) {
            Some(existing) => {
                *existing = membership.clone();
                Ok(())
            }
            None => Err(DirectoryError::MembershipNotFound {
                group_id: membership.group_id,
                user_id: membership.user_id,
            }),
        }
    }

    fn delete(&self, group_id: Uuid, user_id: Uuid) -> DirectoryResult<Option<Membership>> {
        let mut memberships = self.memberships.write().map_err(DirectoryError::poisoned)?;
        Ok(memberships.remove(&(group_id, user_id)))
    }

    fn delete_by_groups(&self, group_ids: &[Uuid]) -> DirectoryResult<Vec<Membership>> {
        let mut memberships = self.memberships.write().map_err(DirectoryError::poisoned)?;
        let keys: Vec<(Uuid, Uuid)> = memberships
            .keys()
            .filter(|(group_id, _)| group_ids.contains(group_id))
            .copied()
            .collect();
        Ok(keys.iter().filter_map(|k| memberships.remove(k)).collect())
    }

    fn update_keeping_owner(&self, membership: &Membership) -> DirectoryResult<()> {
        let mut memberships = self.memberships.write().map_err(DirectoryError::poisoned)?;
        let key = (membership.group_id, membership.user_id);
        let Some(current) = memberships.get(&key) else {
            return Err(DirectoryError::MembershipNotFound {
                group_id: membership.group_id,
                user_id: membership.user_id,
            });
        };
        if strips_last_owner(&memberships, current, Some(membership.role)) {
            return Err(DirectoryError::LastOwner(membership.group_id));
        }
        memberships.insert(key, membership.clone());
        Ok(())
    }

    fn delete_keeping_owner(&self, group_id: Uuid, user_id: Uuid) -> DirectoryResult<Option<Membership>> {
        let mut memberships = self.memberships.write().map_err(DirectoryError::poisoned)?;
        let key = (group_id, user_id);
        let Some(current) = memberships.get(&key) else {
            return Ok(None);
        };
        if strips_last_owner(&memberships, current, None) {
            return Err(DirectoryError::LastOwner(group_id));
        }
        Ok(memberships.remove(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_membership_rejected() {
        let repo = InMemoryMembershipRepository::new();
        let m = Membership::new(Uuid::new_v4(), Uuid::new_v4(), GroupRole::Member);
        repo.create(&m).unwrap();

        let dup = Membership::new(m.group_id, m.user_id, GroupRole::Owner);
        assert!(matches!(repo.create(&dup), Err(DirectoryError::AlreadyMember { .. })));
    }

    #[test]
    fn test_update_and_delete() {
        let repo = InMemoryMembershipRepository::new();
        let mut m = Membership::new(Uuid::new_v4(), Uuid::new_v4(), GroupRole::Member);
        repo.create(&m).unwrap();

        m.role = GroupRole::Admin;
        repo.update(&m).unwrap();
        assert_eq!(repo.find(m.group_id, m.user_id).unwrap().unwrap().role, GroupRole::Admin);

        assert_eq!(repo.delete(m.group_id, m.user_id).unwrap(), Some(m.clone()));
        assert!(repo.delete(m.group_id, m.user_id).unwrap().is_none());
        assert!(matches!(repo.update(&m), Err(DirectoryError::MembershipNotFound { .. })));
    }

    #[test]
    fn test_only_owner_cannot_be_removed_or_demoted() {
        let repo = InMemoryMembershipRepository::new();
        let group = Uuid::new_v4();
        let owner = Membership::new(group, Uuid::new_v4(), GroupRole::Owner);
        let member = Membership::new(group, Uuid::new_v4(), GroupRole::Member);
        repo.create(&owner).unwrap();
        repo.create(&member).unwrap();

        let mut demoted = owner.clone();
        demoted.role = GroupRole::Admin;
        assert!(matches!(repo.update_keeping_owner(&demoted), Err(DirectoryError::LastOwner(_))));
        assert!(matches!(
            repo.delete_keeping_owner(group, owner.user_id),
            Err(DirectoryError::LastOwner(_))
        ));
        assert_eq!(repo.find(group, owner.user_id).unwrap().unwrap().role, GroupRole::Owner);

        // Other members are unaffected
        assert!(repo.delete_keeping_owner(group, member.user_id).unwrap().is_some());

        let second = Membership::new(group, Uuid::new_v4(), GroupRole::Owner);
        repo.create(&second).unwrap();
        repo.update_keeping_owner(&demoted).unwrap();
        assert!(matches!(
            repo.delete_keeping_owner(group, second.user_id),
            Err(DirectoryError::LastOwner(_))
        ));
    }

    #[test]
    fn test_delete_by_groups() {
        let repo = InMemoryMembershipRepository::new();
        let g1 = Uuid::new_v4();
        let g2 = Uuid::new_v4();
        let user = Uuid::new_v4();
        repo.create(&Membership::new(g1, user, GroupRole::Member)).unwrap();
        repo.create(&Membership::new(g2, user, GroupRole::Member)).unwrap();
        repo.create(&Membership::new(g1, Uuid::new_v4(), GroupRole::Owner)).unwrap();

        let removed = repo.delete_by_groups(&[g1]).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(repo.find_by_user(user).unwrap().len(), 1);
    }
}
