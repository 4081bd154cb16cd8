//! # Sessions
//!
//! Opaque server-side sessions. The client holds a random token; the store
//! only ever sees `sha256(token)`, which doubles as the session id. A
//! session that is past half its lifetime is extended on use and flagged
//! so the caller can re-issue the cookie.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::crypto::{generate_token, hash_token};
use super::errors::{AuthError, AuthResult};

pub const DEFAULT_COOKIE_NAME: &str = "groupgate_session";
pub const DEFAULT_LIFETIME_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Hex SHA-256 of the client token
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Result of a successful validation
#[derive(Debug, Clone)]
pub struct SessionValidation {
    pub session: Session,
    /// Expiry was extended; the cookie should be sent again
    pub fresh: bool,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub lifetime: Duration,
    pub cookie_name: String,
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime: Duration::days(DEFAULT_LIFETIME_DAYS),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            secure_cookie: true,
        }
    }
}

// ==================
// Session Store
// ==================

pub trait SessionStore: Send + Sync {
    fn get(&self, id: &str) -> AuthResult<Option<Session>>;

    /// Insert or replace
    fn put(&self, session: &Session) -> AuthResult<()>;

    fn delete(&self, id: &str) -> AuthResult<()>;

    /// Returns how many sessions were removed
    fn delete_by_user(&self, user_id: Uuid) -> AuthResult<usize>;

    fn delete_expired(&self, now: DateTime<Utc>) -> AuthResult<usize>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> AuthError {
    AuthError::Internal("session store lock poisoned".to_string())
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &str) -> AuthResult<Option<Session>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.get(id).cloned())
    }

    fn put(&self, session: &Session) -> AuthResult<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> AuthResult<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.remove(id);
        Ok(())
    }

    fn delete_by_user(&self, user_id: Uuid) -> AuthResult<usize> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id != user_id);
        Ok(before - sessions.len())
    }

    fn delete_expired(&self, now: DateTime<Utc>) -> AuthResult<usize> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok(before - sessions.len())
    }
}

// ==================
// Session Manager
// ==================

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    pub fn in_memory(config: SessionConfig) -> Self {
        Self::new(Arc::new(InMemorySessionStore::new()), config)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a session; the returned token is the only copy
    pub fn create(&self, user_id: Uuid) -> AuthResult<(String, Session)> {
        let token = generate_token();
        let now = Utc::now();
        let session = Session {
            id: hash_token(&token),
            user_id,
            expires_at: now + self.config.lifetime,
            created_at: now,
        };
        self.store.put(&session)?;
        Ok((token, session))
    }

    pub fn validate(&self, token: &str) -> AuthResult<Option<SessionValidation>> {
        let id = hash_token(token);
        let Some(mut session) = self.store.get(&id)? else {
            return Ok(None);
        };

        let now = Utc::now();
        if session.is_expired(now) {
            self.store.delete(&id)?;
            return Ok(None);
        }

        let mut fresh = false;
        if session.expires_at - now < self.config.lifetime / 2 {
            session.expires_at = now + self.config.lifetime;
            self.store.put(&session)?;
            fresh = true;
        }

        Ok(Some(SessionValidation { session, fresh }))
    }

    pub fn invalidate(&self, session_id: &str) -> AuthResult<()> {
        self.store.delete(session_id)
    }

    pub fn invalidate_user_sessions(&self, user_id: Uuid) -> AuthResult<usize> {
        self.store.delete_by_user(user_id)
    }

    pub fn delete_expired(&self) -> AuthResult<usize> {
        self.store.delete_expired(Utc::now())
    }

    // ==================
    // Cookies
    // ==================

    /// `Set-Cookie` value carrying `token` until the session expires
    pub fn session_cookie(&self, token: &str, session: &Session) -> String {
        let max_age = (session.expires_at - Utc::now()).num_seconds().max(0);
        self.cookie(token, max_age)
    }

    /// `Set-Cookie` value that clears the session cookie
    pub fn blank_cookie(&self) -> String {
        self.cookie("", 0)
    }

    fn cookie(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.config.cookie_name, value, max_age
        );
        if self.config.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Find this manager's cookie in a `Cookie` header value
    pub fn token_from_cookie_header(&self, header: &str) -> Option<String> {
        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.config.cookie_name)
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty())
    }
}
