//! # Ability Definition
//!
//! Turns a user and their group memberships into an [`Ability`].
//!
//! Group permissions inherit downward: a role held in a group applies to
//! every group below it. Rules are emitted weakest role first so the
//! strongest grant covering a subtree has the highest priority, and the
//! system administrator grant comes last of all.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ability::{Ability, AbilityBuilder, Action, Condition, SubjectType};
use super::ltree::LabelPath;
use super::roles::{GroupRole, SystemRole};

/// User fields a user may change on their own record
pub const SELF_EDITABLE_FIELDS: &[&str] = &["display_name", "password"];

/// The parts of a user the ability depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub system_role: SystemRole,
}

/// A direct membership, with the group's current path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupGrant {
    pub group_id: Uuid,
    pub path: LabelPath,
    pub role: GroupRole,
}

/// Build the ability for a user
pub fn define_ability_for(principal: Principal, grants: &[GroupGrant]) -> Ability {
    let mut builder = AbilityBuilder::new();
    let me = principal.user_id;

    builder
        .can(Action::Read, SubjectType::User)
        .when(Condition::IdEquals(me));
    builder
        .can(Action::Update, SubjectType::User)
        .fields(SELF_EDITABLE_FIELDS)
        .when(Condition::IdEquals(me));
    builder
        .cannot(Action::Update, SubjectType::User)
        .fields(&["system_role"])
        .because("only administrators can change system roles");

    builder
        .can(Action::Delete, SubjectType::Membership)
        .when(Condition::UserEquals(me));

    let mut ordered: Vec<&GroupGrant> = grants.iter().collect();
    ordered.sort_by_key(|g| g.role);

    for grant in ordered {
        define_group_rules(&mut builder, grant);
    }

    if principal.system_role == SystemRole::Admin {
        builder.can(Action::Manage, SubjectType::All);
    }

    builder.build()
}

fn define_group_rules(builder: &mut AbilityBuilder, grant: &GroupGrant) {
    let within = || Condition::PathWithin(grant.path.clone());
    let below = || Condition::PathBelow(grant.path.clone());

    match grant.role {
        GroupRole::Viewer => {
            builder
                .can(Action::Read, SubjectType::Group)
                .when(Condition::GroupEquals(grant.group_id));
            builder
                .can(Action::Read, SubjectType::Membership)
                .when(Condition::GroupEquals(grant.group_id));
        }
        GroupRole::Member => {
            define_member_rules(builder, within);
        }
        GroupRole::Admin => {
            define_member_rules(builder, within);
            builder.can(Action::Update, SubjectType::Group).when(within());
            builder.can(Action::Create, SubjectType::Group).when(below());
            builder.can(Action::Delete, SubjectType::Group).when(below());
            for action in [Action::Create, Action::Update, Action::Delete] {
                builder
                    .can(action, SubjectType::Membership)
                    .when(within())
                    .when(Condition::RoleAtMost(GroupRole::Admin));
            }
        }
        GroupRole::Owner => {
            builder.can(Action::Manage, SubjectType::Group).when(within());
            builder.can(Action::Manage, SubjectType::Membership).when(within());
        }
    }
}

fn define_member_rules(builder: &mut AbilityBuilder, within: impl Fn() -> Condition) {
    builder.can(Action::Read, SubjectType::Group).when(within());
    builder.can(Action::Read, SubjectType::Membership).when(within());
}

/// Strongest role held on `path` or any of its ancestors
pub fn effective_role(grants: &[GroupGrant], path: &LabelPath) -> Option<GroupRole> {
    grants
        .iter()
        .filter(|g| g.path.is_ancestor_of(path))
        .map(|g| g.role)
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::ability::Subject;

    fn path(s: &str) -> LabelPath {
        LabelPath::parse(s).unwrap()
    }

    fn user(role: SystemRole) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            system_role: role,
        }
    }

    fn grant(p: &str, role: GroupRole) -> GroupGrant {
        GroupGrant {
            group_id: Uuid::new_v4(),
            path: path(p),
            role,
        }
    }

    fn group(p: &str) -> Subject {
        Subject::Group {
            id: Uuid::new_v4(),
            path: path(p),
        }
    }

    fn membership(p: &str, role: GroupRole) -> Subject {
        Subject::Membership {
            group_id: Uuid::new_v4(),
            group_path: path(p),
            user_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn test_self_rules() {
        let me = user(SystemRole::User);
        let ability = define_ability_for(me, &[]);
        let own = Subject::User { id: me.user_id };
        let other = Subject::User { id: Uuid::new_v4() };

        assert!(ability.can(Action::Read, &own));
        assert!(!ability.can(Action::Read, &other));
        assert!(ability.can_field(Action::Update, &own, "display_name"));
        assert!(!ability.can_field(Action::Update, &own, "system_role"));
        assert!(!ability.can(Action::Delete, &own));
    }

    #[test]
    fn test_viewer_sees_only_its_group() {
        let g = grant("a", GroupRole::Viewer);
        let ability = define_ability_for(user(SystemRole::User), &[g.clone()]);

        let exact = Subject::Group {
            id: g.group_id,
            path: g.path.clone(),
        };
        assert!(ability.can(Action::Read, &exact));
        assert!(!ability.can(Action::Read, &group("a.child")));
        assert!(!ability.can(Action::Update, &exact));
    }

    #[test]
    fn test_member_reads_subtree() {
        let ability = define_ability_for(user(SystemRole::User), &[grant("a.b", GroupRole::Member)]);

        assert!(ability.can(Action::Read, &group("a.b")));
        assert!(ability.can(Action::Read, &group("a.b.c.d")));
        assert!(!ability.can(Action::Read, &group("a")));
        assert!(!ability.can(Action::Read, &group("a.bc")));
        assert!(ability.can(Action::Read, &membership("a.b.c", GroupRole::Owner)));
        assert!(!ability.can(Action::Update, &group("a.b")));
    }

    #[test]
    fn test_admin_rights() {
        let ability = define_ability_for(user(SystemRole::User), &[grant("a", GroupRole::Admin)]);

        assert!(ability.can(Action::Update, &group("a")));
        assert!(ability.can(Action::Create, &group("a.new")));
        assert!(!ability.can(Action::Create, &group("a")));
        assert!(ability.can(Action::Delete, &group("a.b")));
        assert!(!ability.can(Action::Delete, &group("a")));

        assert!(ability.can(Action::Create, &membership("a.b", GroupRole::Admin)));
        assert!(!ability.can(Action::Create, &membership("a.b", GroupRole::Owner)));
        assert!(!ability.can(Action::Delete, &membership("a", GroupRole::Owner)));
    }

    #[test]
    fn test_owner_manages_subtree() {
        let ability = define_ability_for(user(SystemRole::User), &[grant("a", GroupRole::Owner)]);

        assert!(ability.can(Action::Delete, &group("a")));
        assert!(ability.can(Action::Delete, &membership("a.b", GroupRole::Owner)));
        assert!(ability.can(Action::Create, &group("a.b.c")));
        assert!(!ability.can(Action::Read, &group("b")));
    }

    #[test]
    fn test_strongest_grant_wins_on_overlap() {
        // Viewer at the root, owner deeper: the owner grant must not be shadowed
        let grants = [grant("a.b", GroupRole::Owner), grant("a", GroupRole::Viewer)];
        let ability = define_ability_for(user(SystemRole::User), &grants);

        assert!(ability.can(Action::Delete, &group("a.b.c")));
        assert!(!ability.can(Action::Read, &group("a.x")));
    }

    #[test]
    fn test_user_may_leave_groups() {
        let me = user(SystemRole::User);
        let ability = define_ability_for(me, &[]);
        let own = Subject::Membership {
            group_id: Uuid::new_v4(),
            group_path: path("z"),
            user_id: me.user_id,
            role: GroupRole::Owner,
        };
        assert!(ability.can(Action::Delete, &own));
        assert!(!ability.can(Action::Delete, &membership("z", GroupRole::Viewer)));
    }

    #[test]
    fn test_system_admin_overrides_everything() {
        let ability = define_ability_for(user(SystemRole::Admin), &[]);
        let other = Subject::User { id: Uuid::new_v4() };

        assert!(ability.can(Action::Delete, &group("anything")));
        assert!(ability.can_field(Action::Update, &other, "system_role"));
        assert!(ability.can(Action::Create, &Subject::Type(SubjectType::Group)));
    }

    #[test]
    fn test_effective_role_inherits_downward() {
        let grants = [grant("a", GroupRole::Member), grant("a.b", GroupRole::Admin)];

        assert_eq!(effective_role(&grants, &path("a")), Some(GroupRole::Member));
        assert_eq!(effective_role(&grants, &path("a.b.c")), Some(GroupRole::Admin));
        assert_eq!(effective_role(&grants, &path("a.x")), Some(GroupRole::Member));
        assert_eq!(effective_role(&grants, &path("b")), None);
    }
}
