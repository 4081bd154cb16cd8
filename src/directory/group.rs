//! # Groups
//!
//! Groups form a forest. Each group stores its materialized path so subtree
//! and ancestor lookups are path comparisons rather than recursive walks.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{DirectoryError, DirectoryResult};
use crate::permissions::{LabelPath, Subject};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub path: LabelPath,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn subject(&self) -> Subject {
        Subject::Group {
            id: self.id,
            path: self.path.clone(),
        }
    }

    pub fn depth(&self) -> usize {
        self.path.depth()
    }
}

// ==================
// Group Repository
// ==================

pub trait GroupRepository: Send + Sync {
    fn find_by_id(&self, id: Uuid) -> DirectoryResult<Option<Group>>;

    /// Direct children of `parent_id`, or the roots for `None`
    fn find_children(&self, parent_id: Option<Uuid>) -> DirectoryResult<Vec<Group>>;

    /// Groups whose path is `path` or below it (`path <@ ...`), shallowest first
    fn find_subtree(&self, path: &LabelPath) -> DirectoryResult<Vec<Group>>;

    /// Groups whose path is `path` or above it (`path @> ...`), root first
    fn find_ancestors(&self, path: &LabelPath) -> DirectoryResult<Vec<Group>>;

    fn create(&self, group: &Group) -> DirectoryResult<()>;

    /// Replace several groups in one step
    fn update_many(&self, groups: &[Group]) -> DirectoryResult<()>;

    fn delete_many(&self, ids: &[Uuid]) -> DirectoryResult<usize>;

    fn list(&self) -> DirectoryResult<Vec<Group>>;
}

/// In-memory group repository
#[derive(Debug, Default)]
pub struct InMemoryGroupRepository {
    groups: RwLock<HashMap<Uuid, Group>>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect_sorted(&self, keep: impl Fn(&Group) -> bool) -> DirectoryResult<Vec<Group>> {
        let groups = self.groups.read().map_err(DirectoryError::poisoned)?;
        let mut found: Vec<Group> = groups.values().filter(|g| keep(g)).cloned().collect();
        found.sort_by(|a, b| a.path.depth().cmp(&b.path.depth()).then(a.name.cmp(&b.name)));
        Ok(found)
    }
}

impl GroupRepository for InMemoryGroupRepository {
    fn find_by_id(&self, id: Uuid) -> DirectoryResult<Option<Group>> {
        let groups = self.groups.read().map_err(DirectoryError::poisoned)?;
        Ok(groups.get(&id).cloned())
    }

    fn find_children(&self, parent_id: Option<Uuid>) -> DirectoryResult<Vec<Group>> {
        self.collect_sorted(|g| g.parent_id == parent_id)
    }

    fn find_subtree(&self, path: &LabelPath) -> DirectoryResult<Vec<Group>> {
        self.collect_sorted(|g| g.path.is_descendant_of(path))
    }

    fn find_ancestors(&self, path: &LabelPath) -> DirectoryResult<Vec<Group>> {
        self.collect_sorted(|g| g.path.is_ancestor_of(path))
    }

    fn create(&self, group: &Group) -> DirectoryResult<()> {
        let mut groups = self.groups.write().map_err(DirectoryError::poisoned)?;
        groups.insert(group.id, group.clone());
        Ok(())
    }

    fn update_many(&self, updated: &[Group]) -> DirectoryResult<()> {
        let mut groups = self.groups.write().map_err(DirectoryError::poisoned)?;
        if let Some(missing) = updated.iter().find(|g| !groups.contains_key(&g.id)) {
            return Err(DirectoryError::GroupNotFound(missing.id));
        }
        for group in updated {
            groups.insert(group.id, group.clone());
        }
        Ok(())
    }

    fn delete_many(&self, ids: &[Uuid]) -> DirectoryResult<usize> {
        let mut groups = self.groups.write().map_err(DirectoryError::poisoned)?;
        Ok(ids.iter().filter(|id| groups.remove(*id).is_some()).count())
    }

    fn list(&self) -> DirectoryResult<Vec<Group>> {
        self.collect_sorted(|_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, parent: Option<&Group>) -> Group {
        let id = Uuid::new_v4();
        let path = match parent {
            Some(p) => p.path.child_uuid(id).unwrap(),
            None => LabelPath::from_uuid(id),
        };
        Group {
            id,
            name: name.to_string(),
            description: None,
            parent_id: parent.map(|p| p.id),
            path,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_subtree_and_ancestors() {
        let repo = InMemoryGroupRepository::new();
        let root = group("root", None);
        let team = group("team", Some(&root));
        let squad = group("squad", Some(&team));
        let other = group("other", None);
        for g in [&root, &team, &squad, &other] {
            repo.create(g).unwrap();
        }

        let subtree = repo.find_subtree(&team.path).unwrap();
        let ids: Vec<Uuid> = subtree.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![team.id, squad.id]);

        let ancestors = repo.find_ancestors(&squad.path).unwrap();
        let ids: Vec<Uuid> = ancestors.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![root.id, team.id, squad.id]);

        let roots = repo.find_children(None).unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(repo.find_children(Some(root.id)).unwrap()[0].id, team.id);
    }

    #[test]
    fn test_update_many_is_all_or_nothing() {
        let repo = InMemoryGroupRepository::new();
        let mut root = group("root", None);
        repo.create(&root).unwrap();
        let ghost = group("ghost", None);

        root.name = "renamed".to_string();
        let result = repo.update_many(&[root.clone(), ghost.clone()]);
        assert_eq!(result, Err(DirectoryError::GroupNotFound(ghost.id)));
        assert_eq!(repo.find_by_id(root.id).unwrap().unwrap().name, "root");
    }

    #[test]
    fn test_delete_many_counts_removed() {
        let repo = InMemoryGroupRepository::new();
        let root = group("root", None);
        repo.create(&root).unwrap();
        assert_eq!(repo.delete_many(&[root.id, Uuid::new_v4()]).unwrap(), 1);
        assert!(repo.list().unwrap().is_empty());
    }
}
