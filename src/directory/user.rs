//! # Users

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{DirectoryError, DirectoryResult};
use crate::permissions::{Principal, Subject, SystemRole};

/// A registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    /// Argon2 PHC string; `None` for users who only sign in with OAuth
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub system_role: SystemRole,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// New user with the `user` system role
    pub fn new(email: &str, display_name: impl Into<String>, password_hash: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            display_name: display_name.into(),
            password_hash,
            system_role: SystemRole::User,
            email_verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn principal(&self) -> Principal {
        Principal {
            user_id: self.id,
            system_role: self.system_role,
        }
    }

    pub fn subject(&self) -> Subject {
        Subject::User { id: self.id }
    }

    pub fn is_admin(&self) -> bool {
        self.system_role == SystemRole::Admin
    }
}

/// Trim and lowercase an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ==================
// User Repository
// ==================

pub trait UserRepository: Send + Sync {
    fn find_by_id(&self, id: Uuid) -> DirectoryResult<Option<User>>;

    /// Lookup by email; the argument is normalized first
    fn find_by_email(&self, email: &str) -> DirectoryResult<Option<User>>;

    /// Fails with `EmailTaken` if the email is already registered
    fn create(&self, user: &User) -> DirectoryResult<()>;

    fn update(&self, user: &User) -> DirectoryResult<()>;

    fn list(&self) -> DirectoryResult<Vec<User>>;
}

/// In-memory user repository
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<Uuid, User>>,
    emails: RwLock<HashMap<String, Uuid>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserRepository for InMemoryUserRepository {
    fn find_by_id(&self, id: Uuid) -> DirectoryResult<Option<User>> {
        let users = self.users.read().map_err(DirectoryError::poisoned)?;
        Ok(users.get(&id).cloned())
    }

    fn find_by_email(&self, email: &str) -> DirectoryResult<Option<User>> {
        let id = {
            let emails = self.emails.read().map_err(DirectoryError::poisoned)?;
            emails.get(&normalize_email(email)).copied()
        };
        match id {
            Some(id) => self.find_by_id(id),
            None => Ok(None),
        }
    }

    fn create(&self, user: &User) -> DirectoryResult<()> {
        let email = normalize_email(&user.email);
        let mut emails = self.emails.write().map_err(DirectoryError::poisoned)?;
        if emails.contains_key(&email) {
            return Err(DirectoryError::EmailTaken(email));
        }
        let mut users = self.users.write().map_err(DirectoryError::poisoned)?;

        emails.insert(email, user.id);
        users.insert(user.id, user.clone());
        Ok(())
    }

    fn update(&self, user: &User) -> DirectoryResult<()> {
        let mut emails = self.emails.write().map_err(DirectoryError::poisoned)?;
        let mut users = self.users.write().map_err(DirectoryError::poisoned)?;

        let existing = users
            .get(&user.id)
            .ok_or(DirectoryError::UserNotFound(user.id))?;

        let new_email = normalize_email(&user.email);
        if existing.email != new_email {
            if emails.contains_key(&new_email) {
                return Err(DirectoryError::EmailTaken(new_email));
            }
            emails.remove(&existing.email);
            emails.insert(new_email, user.id);
        }

        users.insert(user.id, user.clone());
        Ok(())
    }

    fn list(&self) -> DirectoryResult<Vec<User>> {
        let users = self.users.read().map_err(DirectoryError::poisoned)?;
        let mut all: Vec<User> = users.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_is_normalized_and_unique() {
        let repo = InMemoryUserRepository::new();
        let user = User::new("  Alice@Example.COM ", "Alice", None);
        assert_eq!(user.email, "alice@example.com");
        repo.create(&user).unwrap();

        let found = repo.find_by_email("ALICE@example.com").unwrap().unwrap();
        assert_eq!(found.id, user.id);

        let dup = User::new("alice@example.com", "Other", None);
        assert_eq!(
            repo.create(&dup),
            Err(DirectoryError::EmailTaken("alice@example.com".to_string()))
        );
    }

    #[test]
    fn test_update_reindexes_email() {
        let repo = InMemoryUserRepository::new();
        let mut user = User::new("a@example.com", "A", None);
        repo.create(&user).unwrap();
        repo.create(&User::new("taken@example.com", "T", None)).unwrap();

        user.email = "taken@example.com".to_string();
        assert!(matches!(repo.update(&user), Err(DirectoryError::EmailTaken(_))));

        user.email = "b@example.com".to_string();
        repo.update(&user).unwrap();
        assert!(repo.find_by_email("a@example.com").unwrap().is_none());
        assert!(repo.find_by_email("b@example.com").unwrap().is_some());
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = User::new("a@example.com", "A", Some("$argon2id$secret".to_string()));
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["system_role"], "user");
    }
}
