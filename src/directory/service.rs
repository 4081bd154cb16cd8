//! # Directory Service
//!
//! Operations over users, groups and memberships that keep the group paths
//! consistent and drop cached abilities that a change makes stale.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::errors::{DirectoryError, DirectoryResult};
use super::group::{Group, GroupRepository, InMemoryGroupRepository};
use super::membership::{InMemoryMembershipRepository, Membership, MembershipRepository};
use super::user::{InMemoryUserRepository, User, UserRepository};
use crate::permissions::{
    define_ability_for, effective_role, Ability, AbilityCache, GroupGrant, GroupRole, LabelPath, SystemRole,
};

/// Longest allowed group name, in characters
pub const MAX_GROUP_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A membership together with its group
#[derive(Debug, Clone)]
pub struct MembershipWithGroup {
    pub membership: Membership,
    pub group: Group,
}

pub struct DirectoryService {
    users: Arc<dyn UserRepository>,
    groups: Arc<dyn GroupRepository>,
    memberships: Arc<dyn MembershipRepository>,
    cache: Arc<AbilityCache>,
}

impl DirectoryService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        groups: Arc<dyn GroupRepository>,
        memberships: Arc<dyn MembershipRepository>,
        cache: Arc<AbilityCache>,
    ) -> Self {
        Self {
            users,
            groups,
            memberships,
            cache,
        }
    }

    /// Service over fresh in-memory repositories
    pub fn in_memory(cache: Arc<AbilityCache>) -> Self {
        Self::new(
            Arc::new(InMemoryUserRepository::new()),
            Arc::new(InMemoryGroupRepository::new()),
            Arc::new(InMemoryMembershipRepository::new()),
            cache,
        )
    }

    pub fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }

    pub fn cache(&self) -> &Arc<AbilityCache> {
        &self.cache
    }

    // ==================
    // Users
    // ==================

    pub fn get_user(&self, id: Uuid) -> DirectoryResult<User> {
        self.users.find_by_id(id)?.ok_or(DirectoryError::UserNotFound(id))
    }

    pub fn list_users(&self) -> DirectoryResult<Vec<User>> {
        self.users.list()
    }

    pub fn update_display_name(&self, id: Uuid, display_name: &str) -> DirectoryResult<User> {
        let mut user = self.get_user(id)?;
        user.display_name = display_name.trim().to_string();
        user.updated_at = Utc::now();
        self.users.update(&user)?;
        Ok(user)
    }

    pub fn set_system_role(&self, id: Uuid, role: SystemRole) -> DirectoryResult<User> {
        let mut user = self.get_user(id)?;
        if user.system_role != role {
            user.system_role = role;
            user.updated_at = Utc::now();
            self.users.update(&user)?;
            self.cache.invalidate_user(id);
        }
        Ok(user)
    }

    /// Rejects `actor_id` changing their own system role
    pub fn ensure_role_change_allowed(&self, actor_id: Uuid, id: Uuid, role: SystemRole) -> DirectoryResult<()> {
        if actor_id == id && self.get_user(id)?.system_role != role {
            return Err(DirectoryError::OwnSystemRole);
        }
        Ok(())
    }

    /// [`Self::set_system_role`] on behalf of `actor_id`
    pub fn change_system_role(&self, actor_id: Uuid, id: Uuid, role: SystemRole) -> DirectoryResult<User> {
        self.ensure_role_change_allowed(actor_id, id, role)?;
        self.set_system_role(id, role)
    }

    // ==================
    // Groups
    // ==================

    pub fn get_group(&self, id: Uuid) -> DirectoryResult<Group> {
        self.groups.find_by_id(id)?.ok_or(DirectoryError::GroupNotFound(id))
    }

    pub fn list_groups(&self) -> DirectoryResult<Vec<Group>> {
        self.groups.list()
    }

    /// The group and everything below it, shallowest first
    pub fn subtree(&self, id: Uuid) -> DirectoryResult<Vec<Group>> {
        let group = self.get_group(id)?;
        self.groups.find_subtree(&group.path)
    }

    /// Path a new group would get under `parent_id`
    pub fn path_for_new_group(&self, id: Uuid, parent_id: Option<Uuid>) -> DirectoryResult<LabelPath> {
        match parent_id {
            Some(parent_id) => Ok(self.get_group(parent_id)?.path.child_uuid(id)?),
            None => Ok(LabelPath::from_uuid(id)),
        }
    }

    /// Create a group; `id` is chosen by the caller so its path can be
    /// authorized before the group exists
    pub fn create_group(&self, id: Uuid, new: NewGroup) -> DirectoryResult<Group> {
        let name = validate_group_name(&new.name)?;
        let path = self.path_for_new_group(id, new.parent_id)?;
        self.ensure_sibling_name_free(new.parent_id, &name, None)?;

        let now = Utc::now();
        let group = Group {
            id,
            name,
            description: new.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
            parent_id: new.parent_id,
            path,
            created_at: now,
            updated_at: now,
        };
        self.groups.create(&group)?;
        Ok(group)
    }

    /// Create a group with `owner_id` as its direct owner
    ///
    /// The group is removed again if the owner membership cannot be stored.
    pub fn create_group_owned_by(&self, id: Uuid, new: NewGroup, owner_id: Uuid) -> DirectoryResult<Group> {
        let group = self.create_group(id, new)?;
        if let Err(e) = self.add_member(group.id, owner_id, GroupRole::Owner) {
            self.groups.delete_many(&[group.id])?;
            return Err(e);
        }
        Ok(group)
    }

    pub fn update_group(&self, id: Uuid, update: GroupUpdate) -> DirectoryResult<Group> {
        let mut group = self.get_group(id)?;
        if let Some(name) = update.name {
            let name = validate_group_name(&name)?;
            self.ensure_sibling_name_free(group.parent_id, &name, Some(group.id))?;
            group.name = name;
        }
        if let Some(description) = update.description {
            let description = description.trim().to_string();
            group.description = if description.is_empty() { None } else { Some(description) };
        }
        group.updated_at = Utc::now();
        self.groups.update_many(std::slice::from_ref(&group))?;
        Ok(group)
    }

    /// Re-parent a group, rewriting the path of its whole subtree
    pub fn move_group(&self, id: Uuid, new_parent_id: Option<Uuid>) -> DirectoryResult<Group> {
        let group = self.get_group(id)?;
        if group.parent_id == new_parent_id {
            return Ok(group);
        }

        let new_path = match new_parent_id {
            Some(parent_id) => {
                let parent = self.get_group(parent_id)?;
                if parent.path.is_descendant_of(&group.path) {
                    return Err(DirectoryError::InvalidMove(
                        "a group cannot be moved below itself".to_string(),
                    ));
                }
                parent.path.child_uuid(group.id)?
            }
            None => LabelPath::from_uuid(group.id),
        };
        self.ensure_sibling_name_free(new_parent_id, &group.name, Some(group.id))?;

        let now = Utc::now();
        let mut moved = Vec::new();
        for mut member in self.groups.find_subtree(&group.path)? {
            member.path = member.path.rebase(&group.path, &new_path)?;
            if member.id == group.id {
                member.parent_id = new_parent_id;
            }
            member.updated_at = now;
            moved.push(member);
        }
        self.groups.update_many(&moved)?;
        self.cache.invalidate_all();

        self.get_group(id)
    }

    /// Delete a group, its subtree and all their memberships
    pub fn delete_group(&self, id: Uuid) -> DirectoryResult<usize> {
        let group = self.get_group(id)?;
        let ids: Vec<Uuid> = self
            .groups
            .find_subtree(&group.path)?
            .iter()
            .map(|g| g.id)
            .collect();

        self.memberships.delete_by_groups(&ids)?;
        let removed = self.groups.delete_many(&ids)?;
        self.cache.invalidate_all();
        Ok(removed)
    }

    fn ensure_sibling_name_free(
        &self,
        parent_id: Option<Uuid>,
        name: &str,
        except: Option<Uuid>,
    ) -> DirectoryResult<()> {
        let taken = self
            .groups
            .find_children(parent_id)?
            .iter()
            .any(|g| Some(g.id) != except && g.name.eq_ignore_ascii_case(name));
        if taken {
            return Err(DirectoryError::GroupNameTaken(name.to_string()));
        }
        Ok(())
    }

    // ==================
    // Memberships
    // ==================

    pub fn get_membership(&self, group_id: Uuid, user_id: Uuid) -> DirectoryResult<Membership> {
        self.memberships
            .find(group_id, user_id)?
            .ok_or(DirectoryError::MembershipNotFound { group_id, user_id })
    }

    pub fn list_members(&self, group_id: Uuid) -> DirectoryResult<Vec<Membership>> {
        self.get_group(group_id)?;
        self.memberships.find_by_group(group_id)
    }

    pub fn add_member(&self, group_id: Uuid, user_id: Uuid, role: GroupRole) -> DirectoryResult<Membership> {
        self.get_group(group_id)?;
        self.get_user(user_id)?;

        let membership = Membership::new(group_id, user_id, role);
        self.memberships.create(&membership)?;
        self.cache.invalidate_user(user_id);
        Ok(membership)
    }

    pub fn update_member_role(&self, group_id: Uuid, user_id: Uuid, role: GroupRole) -> DirectoryResult<Membership> {
        let mut membership = self.get_membership(group_id, user_id)?;
        if membership.role == role {
            return Ok(membership);
        }

        membership.role = role;
        membership.updated_at = Utc::now();
        if self.is_root(group_id)? {
            self.memberships.update_keeping_owner(&membership)?;
        } else {
            self.memberships.update(&membership)?;
        }
        self.cache.invalidate_user(user_id);
        Ok(membership)
    }

    pub fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> DirectoryResult<Membership> {
        let removed = if self.is_root(group_id)? {
            self.memberships.delete_keeping_owner(group_id, user_id)?
        } else {
            self.memberships.delete(group_id, user_id)?
        };
        let membership = removed.ok_or(DirectoryError::MembershipNotFound { group_id, user_id })?;
        self.cache.invalidate_user(user_id);
        Ok(membership)
    }

    /// Root groups have nobody above them, so they must keep a direct owner
    fn is_root(&self, group_id: Uuid) -> DirectoryResult<bool> {
        Ok(self.get_group(group_id)?.parent_id.is_none())
    }

    /// Direct memberships of a user with their groups
    pub fn memberships_for_user(&self, user_id: Uuid) -> DirectoryResult<Vec<MembershipWithGroup>> {
        let mut result = Vec::new();
        for membership in self.memberships.find_by_user(user_id)? {
            // A membership can outlive its group only mid-deletion
            if let Some(group) = self.groups.find_by_id(membership.group_id)? {
                result.push(MembershipWithGroup { membership, group });
            }
        }
        Ok(result)
    }

    pub fn grants_for(&self, user_id: Uuid) -> DirectoryResult<Vec<GroupGrant>> {
        Ok(self
            .memberships_for_user(user_id)?
            .into_iter()
            .map(|m| GroupGrant {
                group_id: m.group.id,
                path: m.group.path,
                role: m.membership.role,
            })
            .collect())
    }

    /// Build a user's ability from the current store state, bypassing the cache
    pub fn build_ability(&self, user: &User) -> DirectoryResult<Ability> {
        let grants = self.grants_for(user.id)?;
        Ok(define_ability_for(user.principal(), &grants))
    }

    /// Cached ability for `user`
    pub fn ability_for(&self, user: &User) -> DirectoryResult<Arc<Ability>> {
        self.cache.get_or_try_build(user.id, || self.build_ability(user))
    }

    /// Strongest role the user holds on the group or any ancestor
    pub fn effective_role(&self, user_id: Uuid, group: &Group) -> DirectoryResult<Option<GroupRole>> {
        let grants = self.grants_for(user_id)?;
        Ok(effective_role(&grants, &group.path))
    }
}

fn validate_group_name(raw: &str) -> DirectoryResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DirectoryError::InvalidGroupName {
            name: raw.to_string(),
            reason: "Name cannot be empty".to_string(),
        });
    }
    if name.chars().count() > MAX_GROUP_NAME_LEN {
        return Err(DirectoryError::InvalidGroupName {
            name: raw.to_string(),
            reason: format!("Name must be at most {} characters", MAX_GROUP_NAME_LEN),
        });
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{Action, Subject, SubjectType};
    use std::time::Duration;

    fn service() -> DirectoryService {
        DirectoryService::in_memory(Arc::new(AbilityCache::new(Duration::from_secs(60))))
    }

    fn new_group(name: &str, parent_id: Option<Uuid>) -> NewGroup {
        NewGroup {
            name: name.to_string(),
            description: None,
            parent_id,
        }
    }

    fn create(svc: &DirectoryService, name: &str, parent: Option<&Group>) -> Group {
        svc.create_group(Uuid::new_v4(), new_group(name, parent.map(|p| p.id)))
            .unwrap()
    }

    fn user(svc: &DirectoryService, email: &str) -> User {
        let user = User::new(email, email, None);
        svc.users().create(&user).unwrap();
        user
    }

    #[test]
    fn test_child_paths_extend_parent() {
        let svc = service();
        let root = create(&svc, "Engineering", None);
        let team = create(&svc, "Platform", Some(&root));

        assert!(root.path.is_root());
        assert_eq!(team.path.parent(), Some(root.path.clone()));
        assert_eq!(team.parent_id, Some(root.id));
    }

    #[test]
    fn test_group_name_rules() {
        let svc = service();
        let root = create(&svc, "Engineering", None);

        let blank = svc.create_group(Uuid::new_v4(), new_group("   ", None));
        assert!(matches!(blank, Err(DirectoryError::InvalidGroupName { .. })));

        let long = "x".repeat(MAX_GROUP_NAME_LEN + 1);
        assert!(svc.create_group(Uuid::new_v4(), new_group(&long, None)).is_err());

        let dup = svc.create_group(Uuid::new_v4(), new_group("engineering", None));
        assert!(matches!(dup, Err(DirectoryError::GroupNameTaken(_))));

        // Same name under a different parent is fine
        create(&svc, "Engineering", Some(&root));
    }

    #[test]
    fn test_owned_group_is_rolled_back_without_owner() {
        let svc = service();
        let owner = user(&svc, "owner@example.com");
        let group = svc
            .create_group_owned_by(Uuid::new_v4(), new_group("Engineering", None), owner.id)
            .unwrap();
        let members = svc.list_members(group.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, GroupRole::Owner);

        let orphan = svc.create_group_owned_by(Uuid::new_v4(), new_group("Sales", None), Uuid::new_v4());
        assert!(matches!(orphan, Err(DirectoryError::UserNotFound(_))));
        assert_eq!(svc.list_groups().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_parent() {
        let svc = service();
        let result = svc.create_group(Uuid::new_v4(), new_group("x", Some(Uuid::new_v4())));
        assert!(matches!(result, Err(DirectoryError::GroupNotFound(_))));
    }

    #[test]
    fn test_move_rewrites_subtree() {
        let svc = service();
        let a = create(&svc, "a", None);
        let b = create(&svc, "b", Some(&a));
        let c = create(&svc, "c", Some(&b));
        let z = create(&svc, "z", None);

        let moved = svc.move_group(b.id, Some(z.id)).unwrap();
        assert_eq!(moved.parent_id, Some(z.id));
        assert!(moved.path.is_strict_descendant_of(&z.path));

        let c_after = svc.get_group(c.id).unwrap();
        assert_eq!(c_after.path.parent(), Some(moved.path.clone()));
        assert!(!c_after.path.is_descendant_of(&a.path));

        // Back to the top level
        let root_again = svc.move_group(b.id, None).unwrap();
        assert!(root_again.path.is_root());
        assert_eq!(svc.get_group(c.id).unwrap().path.depth(), 2);
    }

    #[test]
    fn test_move_below_itself_rejected() {
        let svc = service();
        let a = create(&svc, "a", None);
        let b = create(&svc, "b", Some(&a));

        assert!(matches!(svc.move_group(a.id, Some(b.id)), Err(DirectoryError::InvalidMove(_))));
        assert!(matches!(svc.move_group(a.id, Some(a.id)), Err(DirectoryError::InvalidMove(_))));
    }

    #[test]
    fn test_delete_removes_subtree_and_memberships() {
        let svc = service();
        let a = create(&svc, "a", None);
        let b = create(&svc, "b", Some(&a));
        let other = create(&svc, "other", None);
        let u = user(&svc, "u@example.com");
        svc.add_member(b.id, u.id, GroupRole::Member).unwrap();
        svc.add_member(other.id, u.id, GroupRole::Member).unwrap();

        assert_eq!(svc.delete_group(a.id).unwrap(), 2);
        assert!(svc.get_group(b.id).is_err());
        let remaining = svc.memberships_for_user(u.id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].group.id, other.id);
    }

    #[test]
    fn test_last_owner_of_root_is_protected() {
        let svc = service();
        let root = create(&svc, "root", None);
        let child = create(&svc, "child", Some(&root));
        let owner = user(&svc, "owner@example.com");
        let second = user(&svc, "second@example.com");
        svc.add_member(root.id, owner.id, GroupRole::Owner).unwrap();
        svc.add_member(child.id, owner.id, GroupRole::Owner).unwrap();

        assert!(matches!(
            svc.remove_member(root.id, owner.id),
            Err(DirectoryError::LastOwner(_))
        ));
        assert!(matches!(
            svc.update_member_role(root.id, owner.id, GroupRole::Admin),
            Err(DirectoryError::LastOwner(_))
        ));

        // Child groups inherit owners from above
        svc.remove_member(child.id, owner.id).unwrap();

        svc.add_member(root.id, second.id, GroupRole::Owner).unwrap();
        svc.remove_member(root.id, owner.id).unwrap();
    }

    #[test]
    fn test_owners_removing_each_other_keep_one() {
        for _ in 0..50 {
            let svc = Arc::new(service());
            let root = create(&svc, "root", None);
            let a = user(&svc, "a@example.com");
            let b = user(&svc, "b@example.com");
            svc.add_member(root.id, a.id, GroupRole::Owner).unwrap();
            svc.add_member(root.id, b.id, GroupRole::Owner).unwrap();

            let handles: Vec<_> = [a.id, b.id]
                .into_iter()
                .map(|target| {
                    let svc = svc.clone();
                    std::thread::spawn(move || svc.remove_member(root.id, target))
                })
                .collect();
            let removed = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(Result::is_ok)
                .count();

            assert_eq!(removed, 1);
            assert_eq!(svc.list_members(root.id).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_effective_role_is_inherited() {
        let svc = service();
        let root = create(&svc, "root", None);
        let team = create(&svc, "team", Some(&root));
        let u = user(&svc, "u@example.com");
        svc.add_member(root.id, u.id, GroupRole::Admin).unwrap();

        assert_eq!(svc.effective_role(u.id, &team).unwrap(), Some(GroupRole::Admin));
        let unrelated = create(&svc, "unrelated", None);
        assert_eq!(svc.effective_role(u.id, &unrelated).unwrap(), None);
    }

    #[test]
    fn test_membership_change_invalidates_cached_ability() {
        let svc = service();
        let root = create(&svc, "root", None);
        let u = user(&svc, "u@example.com");

        let before = svc.ability_for(&u).unwrap();
        assert!(!before.can(Action::Read, &root.subject()));

        svc.add_member(root.id, u.id, GroupRole::Member).unwrap();
        let after = svc.ability_for(&u).unwrap();
        assert!(after.can(Action::Read, &root.subject()));
    }

    #[test]
    fn test_move_invalidates_cached_paths() {
        let svc = service();
        let a = create(&svc, "a", None);
        let b = create(&svc, "b", None);
        let c = create(&svc, "c", Some(&b));
        let u = user(&svc, "u@example.com");
        svc.add_member(a.id, u.id, GroupRole::Member).unwrap();

        let read = Action::Read;
        assert!(!svc.ability_for(&u).unwrap().can(read, &svc.get_group(c.id).unwrap().subject()));

        svc.move_group(b.id, Some(a.id)).unwrap();
        assert!(svc.ability_for(&u).unwrap().can(read, &svc.get_group(c.id).unwrap().subject()));
    }

    #[test]
    fn test_actor_cannot_change_own_role() {
        let svc = service();
        let admin = svc.set_system_role(user(&svc, "root@example.com").id, SystemRole::Admin).unwrap();
        let other = user(&svc, "u@example.com");

        assert!(matches!(
            svc.change_system_role(admin.id, admin.id, SystemRole::User),
            Err(DirectoryError::OwnSystemRole)
        ));
        assert!(svc.get_user(admin.id).unwrap().is_admin());
        // Restating the current role is a no-op, not a change
        svc.change_system_role(admin.id, admin.id, SystemRole::Admin).unwrap();

        let promoted = svc.change_system_role(admin.id, other.id, SystemRole::Admin).unwrap();
        assert!(promoted.is_admin());
    }

    #[test]
    fn test_system_role_change() {
        let svc = service();
        let u = user(&svc, "u@example.com");
        let promoted = svc.set_system_role(u.id, SystemRole::Admin).unwrap();
        assert!(promoted.is_admin());
        let ability = svc.ability_for(&promoted).unwrap();
        assert!(ability.can(Action::Manage, &Subject::Type(SubjectType::All)));
    }
}
