//! # Auth Service
//!
//! Email/password registration and sign-in on top of the directory and
//! the session manager.

use std::sync::{Arc, OnceLock};

use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use uuid::Uuid;

use super::errors::{AuthError, AuthResult};
use super::password::{hash_password, validate_password, verify_dummy, verify_password};
use super::session::{Session, SessionManager, SessionValidation};
use crate::directory::{normalize_email, DirectoryService, User};
use crate::permissions::SystemRole;

pub const MAX_DISPLAY_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// A signed-in user with the token for their new session
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub user: User,
    pub token: String,
    pub session: Session,
}

pub struct AuthService {
    directory: Arc<DirectoryService>,
    sessions: Arc<SessionManager>,
    bootstrap_admin_email: Option<String>,
}

impl AuthService {
    pub fn new(
        directory: Arc<DirectoryService>,
        sessions: Arc<SessionManager>,
        bootstrap_admin_email: Option<String>,
    ) -> Self {
        Self {
            directory,
            sessions,
            bootstrap_admin_email: bootstrap_admin_email.map(|e| normalize_email(&e)),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn register(&self, registration: &Registration) -> AuthResult<SignedIn> {
        let email = normalize_email(&registration.email);
        validate_email(&email)?;
        validate_password(&registration.password)?;
        let display_name = match registration.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => validate_display_name(name)?,
            _ => email.split('@').next().unwrap_or_default().to_string(),
        };

        let users = self.directory.users();
        if users.find_by_email(&email)?.is_some() {
            return Err(AuthError::AccountConflict(email));
        }

        let mut user = User::new(&email, display_name, Some(hash_password(&registration.password)?));
        if self.bootstrap_admin_email.as_deref() == Some(email.as_str()) {
            user.system_role = SystemRole::Admin;
            tracing::warn!(user_id = %user.id, "bootstrap admin registered");
        }
        users.create(&user)?;

        tracing::info!(user_id = %user.id, "user registered");
        self.start_session(user)
    }

    pub fn login(&self, credentials: &Credentials) -> AuthResult<SignedIn> {
        let email = normalize_email(&credentials.email);
        let user = self.directory.users().find_by_email(&email)?;

        let verified = match user.as_ref().and_then(|u| u.password_hash.as_deref()) {
            Some(hash) => verify_password(&credentials.password, hash),
            None => {
                verify_dummy(&credentials.password);
                false
            }
        };

        match user {
            Some(user) if verified => self.start_session(user),
            _ => {
                tracing::info!("failed login attempt");
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// Open a session for an already authenticated user
    pub fn start_session(&self, user: User) -> AuthResult<SignedIn> {
        let (token, session) = self.sessions.create(user.id)?;
        Ok(SignedIn { user, token, session })
    }

    /// Resolve a session token to its user
    ///
    /// A session whose user no longer exists is removed.
    pub fn authenticate(&self, token: &str) -> AuthResult<Option<(User, SessionValidation)>> {
        let Some(validation) = self.sessions.validate(token)? else {
            return Ok(None);
        };
        match self.directory.users().find_by_id(validation.session.user_id)? {
            Some(user) => Ok(Some((user, validation))),
            None => {
                self.sessions.invalidate(&validation.session.id)?;
                Ok(None)
            }
        }
    }

    pub fn logout(&self, session_id: &str) -> AuthResult<()> {
        self.sessions.invalidate(session_id)
    }

    pub fn logout_all(&self, user_id: Uuid) -> AuthResult<usize> {
        self.sessions.invalidate_user_sessions(user_id)
    }

    /// Set a new password and end every session of the user
    pub fn change_password(&self, user_id: Uuid, new_password: &str) -> AuthResult<User> {
        validate_password(new_password)?;
        let mut user = self.directory.get_user(user_id)?;
        user.password_hash = Some(hash_password(new_password)?);
        user.updated_at = Utc::now();
        self.directory.users().update(&user)?;

        let ended = self.sessions.invalidate_user_sessions(user_id)?;
        tracing::info!(user_id = %user_id, sessions = ended, "password changed");
        Ok(user)
    }
}

fn email_pattern() -> AuthResult<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let pattern = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")
        .map_err(|e| AuthError::Internal(format!("Invalid email pattern: {}", e)))?;
    Ok(PATTERN.get_or_init(|| pattern))
}

pub fn validate_email(email: &str) -> AuthResult<()> {
    if email.len() > 254 || !email_pattern()?.is_match(email) {
        return Err(AuthError::ValidationError("Invalid email format".to_string()));
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> AuthResult<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(AuthError::ValidationError(format!(
            "Display name must be 1 to {} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    Ok(name.to_string())
}
