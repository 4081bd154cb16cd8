//! # OAuth Sign-In
//!
//! Authorization code flow with PKCE against Google and Microsoft Entra ID.
//! State and verifier live server-side for ten minutes and are single use.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::crypto::{generate_token, sha256_base64url};
use super::errors::{AuthError, AuthResult};
use crate::directory::{normalize_email, DirectoryService, User};
use crate::permissions::SystemRole;

/// How long an authorization request may take, in seconds
pub const STATE_MAX_AGE_SECS: i64 = 600;

// ==================
// OAuth Provider Configuration
// ==================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Microsoft,
}

impl std::fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OAuthProvider::Google => write!(f, "google"),
            OAuthProvider::Microsoft => write!(f, "microsoft"),
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(OAuthProvider::Google),
            "microsoft" => Ok(OAuthProvider::Microsoft),
            other => Err(AuthError::ProviderNotConfigured(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub provider: OAuthProvider,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Entra ID tenant; ignored for Google
    pub tenant: String,
}

impl OAuthProviderConfig {
    pub fn google(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            provider: OAuthProvider::Google,
            client_id,
            client_secret,
            redirect_uri,
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
            tenant: String::new(),
        }
    }

    pub fn microsoft(client_id: String, client_secret: String, redirect_uri: String, tenant: String) -> Self {
        Self {
            provider: OAuthProvider::Microsoft,
            client_id,
            client_secret,
            redirect_uri,
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
                "User.Read".to_string(),
            ],
            tenant,
        }
    }

    pub fn auth_url(&self) -> String {
        match self.provider {
            OAuthProvider::Google => "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            OAuthProvider::Microsoft => format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/authorize",
                self.tenant
            ),
        }
    }

    pub fn token_url(&self) -> String {
        match self.provider {
            OAuthProvider::Google => "https://oauth2.googleapis.com/token".to_string(),
            OAuthProvider::Microsoft => format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                self.tenant
            ),
        }
    }

    pub fn userinfo_url(&self) -> &'static str {
        match self.provider {
            OAuthProvider::Google => "https://openidconnect.googleapis.com/v1/userinfo",
            OAuthProvider::Microsoft => "https://graph.microsoft.com/oidc/userinfo",
        }
    }
}

// ==================
// OAuth State Management
// ==================

/// A pending authorization request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthState {
    pub state: String,
    pub provider: OAuthProvider,
    pub code_verifier: String,
    pub redirect_to: String,
    pub created_at: DateTime<Utc>,
}

impl OAuthState {
    pub fn new(provider: OAuthProvider, redirect_to: Option<&str>) -> Self {
        Self {
            state: generate_token(),
            provider,
            code_verifier: generate_token(),
            redirect_to: sanitize_redirect(redirect_to),
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, max_age_seconds: i64) -> bool {
        let age = Utc::now().signed_duration_since(self.created_at);
        age.num_seconds() > max_age_seconds
    }

    pub fn code_challenge(&self) -> String {
        sha256_base64url(&self.code_verifier)
    }
}

/// Keep only same-site relative paths
pub fn sanitize_redirect(redirect_to: Option<&str>) -> String {
    match redirect_to {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

// ==================
// OAuth User Info
// ==================

/// Provider profile normalized across providers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthUserInfo {
    pub provider: OAuthProvider,
    pub provider_user_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MicrosoftUserInfo {
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

impl OAuthUserInfo {
    pub fn from_google(data: serde_json::Value) -> AuthResult<Self> {
        let info: GoogleUserInfo = serde_json::from_value(data)
            .map_err(|e| AuthError::OAuthError(format!("Failed to parse Google user info: {}", e)))?;

        Ok(Self {
            provider: OAuthProvider::Google,
            provider_user_id: info.sub,
            email: info.email,
            email_verified: info.email_verified.unwrap_or(false),
            name: info.name,
        })
    }

    /// Entra ID lets tenants set arbitrary unverified addresses, so the
    /// email is never trusted for linking
    pub fn from_microsoft(data: serde_json::Value) -> AuthResult<Self> {
        let info: MicrosoftUserInfo = serde_json::from_value(data)
            .map_err(|e| AuthError::OAuthError(format!("Failed to parse Microsoft user info: {}", e)))?;

        Ok(Self {
            provider: OAuthProvider::Microsoft,
            provider_user_id: info.sub,
            email: info.email,
            email_verified: false,
            name: info.name,
        })
    }

    pub fn parse(provider: OAuthProvider, data: serde_json::Value) -> AuthResult<Self> {
        match provider {
            OAuthProvider::Google => Self::from_google(data),
            OAuthProvider::Microsoft => Self::from_microsoft(data),
        }
    }
}

// ==================
// OAuth Token Response
// ==================

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

// ==================
// Transport
// ==================

/// Outbound calls to the provider
#[async_trait]
pub trait OAuthTransport: Send + Sync {
    async fn exchange_code(
        &self,
        config: &OAuthProviderConfig,
        code: &str,
        code_verifier: &str,
    ) -> AuthResult<OAuthTokenResponse>;

    async fn fetch_userinfo(
        &self,
        config: &OAuthProviderConfig,
        access_token: &str,
    ) -> AuthResult<serde_json::Value>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OAuthTransport for ReqwestTransport {
    async fn exchange_code(
        &self,
        config: &OAuthProviderConfig,
        code: &str,
        code_verifier: &str,
    ) -> AuthResult<OAuthTokenResponse> {
        let params = [
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .client
            .post(config.token_url())
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::OAuthError(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AuthError::OAuthError(format!(
                "Token endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<OAuthTokenResponse>()
            .await
            .map_err(|e| AuthError::OAuthError(format!("Invalid token response: {}", e)))
    }

    async fn fetch_userinfo(
        &self,
        config: &OAuthProviderConfig,
        access_token: &str,
    ) -> AuthResult<serde_json::Value> {
        let response = self
            .client
            .get(config.userinfo_url())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::OAuthError(format!("User info request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AuthError::OAuthError(format!(
                "User info endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| AuthError::OAuthError(format!("Invalid user info response: {}", e)))
    }
}

// ==================
// Linked Accounts
// ==================

/// A provider identity linked to a local user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthAccount {
    pub provider: OAuthProvider,
    pub provider_user_id: String,
    pub user_id: Uuid,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OAuthAccount {
    pub fn new(user_id: Uuid, info: &OAuthUserInfo) -> Self {
        Self {
            provider: info.provider,
            provider_user_id: info.provider_user_id.clone(),
            user_id,
            email: info.email.clone(),
            created_at: Utc::now(),
        }
    }
}

pub trait OAuthAccountRepository: Send + Sync {
    fn find(&self, provider: OAuthProvider, provider_user_id: &str) -> AuthResult<Option<OAuthAccount>>;

    fn find_by_user(&self, user_id: Uuid) -> AuthResult<Vec<OAuthAccount>>;

    fn create(&self, account: &OAuthAccount) -> AuthResult<()>;
}

#[derive(Default)]
pub struct InMemoryOAuthAccountRepository {
    accounts: RwLock<HashMap<(OAuthProvider, String), OAuthAccount>>,
}

impl InMemoryOAuthAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> AuthError {
    AuthError::Internal("oauth store lock poisoned".to_string())
}

impl OAuthAccountRepository for InMemoryOAuthAccountRepository {
    fn find(&self, provider: OAuthProvider, provider_user_id: &str) -> AuthResult<Option<OAuthAccount>> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        Ok(accounts.get(&(provider, provider_user_id.to_string())).cloned())
    }

    fn find_by_user(&self, user_id: Uuid) -> AuthResult<Vec<OAuthAccount>> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        Ok(accounts.values().filter(|a| a.user_id == user_id).cloned().collect())
    }

    fn create(&self, account: &OAuthAccount) -> AuthResult<()> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        let key = (account.provider, account.provider_user_id.clone());
        if accounts.contains_key(&key) {
            return Err(AuthError::AccountConflict(format!(
                "{} account is already linked",
                account.provider
            )));
        }
        accounts.insert(key, account.clone());
        Ok(())
    }
}

// ==================
// OAuth Service
// ==================

/// Outcome of a completed sign-in
#[derive(Debug, Clone)]
pub struct OAuthLogin {
    pub user: User,
    pub is_new: bool,
    pub redirect_to: String,
}

pub struct OAuthService {
    providers: HashMap<OAuthProvider, OAuthProviderConfig>,
    directory: Arc<DirectoryService>,
    accounts: Arc<dyn OAuthAccountRepository>,
    transport: Arc<dyn OAuthTransport>,
    states: RwLock<HashMap<String, OAuthState>>,
    state_max_age_seconds: i64,
    bootstrap_admin_email: Option<String>,
}

impl OAuthService {
    pub fn new(
        directory: Arc<DirectoryService>,
        accounts: Arc<dyn OAuthAccountRepository>,
        transport: Arc<dyn OAuthTransport>,
    ) -> Self {
        Self {
            providers: HashMap::new(),
            directory,
            accounts,
            transport,
            states: RwLock::new(HashMap::new()),
            state_max_age_seconds: STATE_MAX_AGE_SECS,
            bootstrap_admin_email: None,
        }
    }

    pub fn register_provider(&mut self, config: OAuthProviderConfig) {
        self.providers.insert(config.provider, config);
    }

    /// Accounts created for this (verified) email become system admins
    pub fn with_bootstrap_admin(mut self, email: Option<String>) -> Self {
        self.bootstrap_admin_email = email.map(|e| normalize_email(&e));
        self
    }

    pub fn is_configured(&self, provider: OAuthProvider) -> bool {
        self.providers.contains_key(&provider)
    }

    pub fn provider_config(&self, provider: OAuthProvider) -> AuthResult<&OAuthProviderConfig> {
        self.providers
            .get(&provider)
            .ok_or_else(|| AuthError::ProviderNotConfigured(provider.to_string()))
    }

    /// Start a sign-in; returns the provider URL and the state value
    pub fn authorization_url(
        &self,
        provider: OAuthProvider,
        redirect_to: Option<&str>,
    ) -> AuthResult<(String, String)> {
        let config = self.provider_config(provider)?;

        let state = OAuthState::new(provider, redirect_to);
        let state_value = state.state.clone();
        let challenge = state.code_challenge();
        let scope = config.scopes.join(" ");

        {
            let mut states = self.states.write().map_err(poisoned)?;
            states.insert(state_value.clone(), state);
        }

        let params = [
            ("response_type", "code"),
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("scope", scope.as_str()),
            ("state", state_value.as_str()),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", "S256"),
        ];

        let url = format!(
            "{}?{}",
            config.auth_url(),
            params
                .iter()
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&")
        );

        Ok((url, state_value))
    }

    /// Consume a pending state
    pub fn take_state(&self, state: &str) -> AuthResult<OAuthState> {
        let mut states = self.states.write().map_err(poisoned)?;

        let oauth_state = states
            .remove(state)
            .ok_or_else(|| AuthError::OAuthError("Invalid or expired state".to_string()))?;

        if oauth_state.is_expired(self.state_max_age_seconds) {
            return Err(AuthError::OAuthError("State expired".to_string()));
        }

        Ok(oauth_state)
    }

    pub fn purge_expired_states(&self) -> AuthResult<usize> {
        let mut states = self.states.write().map_err(poisoned)?;
        let before = states.len();
        let max_age = self.state_max_age_seconds;
        states.retain(|_, s| !s.is_expired(max_age));
        Ok(before - states.len())
    }

    /// Finish a sign-in from the provider callback
    pub async fn complete(&self, provider: OAuthProvider, code: &str, state: &str) -> AuthResult<OAuthLogin> {
        let pending = self.take_state(state)?;
        if pending.provider != provider {
            return Err(AuthError::OAuthError("State was issued for another provider".to_string()));
        }
        let config = self.provider_config(provider)?;

        let tokens = self
            .transport
            .exchange_code(config, code, &pending.code_verifier)
            .await?;
        let profile = self.transport.fetch_userinfo(config, &tokens.access_token).await?;
        let info = OAuthUserInfo::parse(provider, profile)?;

        let (user, is_new) = self.resolve_user(&info)?;
        Ok(OAuthLogin {
            user,
            is_new,
            redirect_to: pending.redirect_to,
        })
    }

    /// Find, link or create the local user for a provider profile
    pub fn resolve_user(&self, info: &OAuthUserInfo) -> AuthResult<(User, bool)> {
        if let Some(account) = self.accounts.find(info.provider, &info.provider_user_id)? {
            let user = self.directory.get_user(account.user_id)?;
            return Ok((user, false));
        }

        let email = info
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AuthError::OAuthError("Email is required from OAuth provider".to_string()))?;

        let users = self.directory.users();
        let (user, is_new) = match users.find_by_email(&email)? {
            Some(mut existing) => {
                if !info.email_verified {
                    return Err(AuthError::AccountConflict(email));
                }
                if !existing.email_verified {
                    existing.email_verified = true;
                    existing.updated_at = Utc::now();
                    users.update(&existing)?;
                }
                (existing, false)
            }
            None => {
                let display_name = info
                    .name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
                let mut user = User::new(&email, display_name, None);
                user.email_verified = info.email_verified;
                if info.email_verified && self.bootstrap_admin_email.as_deref() == Some(email.as_str()) {
                    user.system_role = SystemRole::Admin;
                }
                users.create(&user)?;
                (user, true)
            }
        };

        self.accounts.create(&OAuthAccount::new(user.id, info))?;
        Ok((user, is_new))
    }

    pub fn linked_accounts(&self, user_id: Uuid) -> AuthResult<Vec<OAuthAccount>> {
        self.accounts.find_by_user(user_id)
    }
}

// ==================
// Tests
// ==================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::AbilityCache;
    use std::sync::Mutex;

    /// Canned provider responses
    struct StubTransport {
        profile: serde_json::Value,
        verifiers: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OAuthTransport for StubTransport {
        async fn exchange_code(
            &self,
            _config: &OAuthProviderConfig,
            code: &str,
            code_verifier: &str,
        ) -> AuthResult<OAuthTokenResponse> {
            if code != "good-code" {
                return Err(AuthError::OAuthError("bad code".to_string()));
            }
            self.verifiers.lock().unwrap().push(code_verifier.to_string());
            Ok(OAuthTokenResponse {
                access_token: "access".to_string(),
                token_type: "Bearer".to_string(),
                expires_in: Some(3600),
                refresh_token: None,
                scope: None,
                id_token: None,
            })
        }

        async fn fetch_userinfo(
            &self,
            _config: &OAuthProviderConfig,
            _access_token: &str,
        ) -> AuthResult<serde_json::Value> {
            Ok(self.profile.clone())
        }
    }

    fn directory() -> Arc<DirectoryService> {
        Arc::new(DirectoryService::in_memory(Arc::new(AbilityCache::disabled())))
    }

    fn service_with(directory: Arc<DirectoryService>, profile: serde_json::Value) -> OAuthService {
        let transport = Arc::new(StubTransport {
            profile,
            verifiers: Mutex::new(Vec::new()),
        });
        let mut service = OAuthService::new(
            directory,
            Arc::new(InMemoryOAuthAccountRepository::new()),
            transport,
        );
        service.register_provider(OAuthProviderConfig::google(
            "google-client-id".to_string(),
            "google-secret".to_string(),
            "http://localhost/auth/oauth/google/callback".to_string(),
        ));
        service.register_provider(OAuthProviderConfig::microsoft(
            "ms-client-id".to_string(),
            "ms-secret".to_string(),
            "http://localhost/auth/oauth/microsoft/callback".to_string(),
            "common".to_string(),
        ));
        service
    }

    fn google_profile(email: &str, verified: bool) -> serde_json::Value {
        serde_json::json!({
            "sub": "google-123",
            "email": email,
            "email_verified": verified,
            "name": "Test User",
        })
    }

    #[test]
    fn test_microsoft_tenant_urls() {
        let config = OAuthProviderConfig::microsoft(
            "id".to_string(),
            "secret".to_string(),
            "http://localhost/cb".to_string(),
            "contoso".to_string(),
        );
        assert_eq!(
            config.auth_url(),
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/authorize"
        );
        assert!(config.token_url().contains("/contoso/"));
    }

    #[test]
    fn test_authorization_url_carries_pkce() {
        let service = service_with(directory(), google_profile("a@b.c", true));

        let (url, state) = service
            .authorization_url(OAuthProvider::Google, Some("/groups"))
            .unwrap();

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=google-client-id"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains(&format!("state={}", state)));

        let pending = service.take_state(&state).unwrap();
        assert!(url.contains(&format!("code_challenge={}", pending.code_challenge())));
        assert_eq!(pending.redirect_to, "/groups");
    }

    #[test]
    fn test_state_is_single_use() {
        let service = service_with(directory(), google_profile("a@b.c", true));
        let (_, state) = service.authorization_url(OAuthProvider::Microsoft, None).unwrap();

        assert_eq!(service.take_state(&state).unwrap().provider, OAuthProvider::Microsoft);
        assert!(service.take_state(&state).is_err());
    }

    #[test]
    fn test_unconfigured_provider() {
        let service = OAuthService::new(
            directory(),
            Arc::new(InMemoryOAuthAccountRepository::new()),
            Arc::new(StubTransport {
                profile: serde_json::Value::Null,
                verifiers: Mutex::new(Vec::new()),
            }),
        );
        let err = service.authorization_url(OAuthProvider::Google, None).unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!("github".parse::<OAuthProvider>().is_err());
    }

    #[test]
    fn test_state_expiry() {
        let mut state = OAuthState::new(OAuthProvider::Google, None);
        assert!(!state.is_expired(STATE_MAX_AGE_SECS));
        state.created_at = Utc::now() - chrono::Duration::seconds(700);
        assert!(state.is_expired(STATE_MAX_AGE_SECS));
    }

    #[test]
    fn test_sanitize_redirect() {
        assert_eq!(sanitize_redirect(Some("/groups/1")), "/groups/1");
        assert_eq!(sanitize_redirect(Some("//evil.example")), "/");
        assert_eq!(sanitize_redirect(Some("https://evil.example")), "/");
        assert_eq!(sanitize_redirect(Some("/\\evil.example")), "/");
        assert_eq!(sanitize_redirect(None), "/");
    }

    #[test]
    fn test_microsoft_email_is_unverified() {
        let info = OAuthUserInfo::from_microsoft(serde_json::json!({
            "sub": "ms-1",
            "email": "user@contoso.com",
            "name": "Contoso User",
        }))
        .unwrap();
        assert_eq!(info.provider_user_id, "ms-1");
        assert!(!info.email_verified);
    }

    #[tokio::test]
    async fn test_complete_creates_user_and_reuses_link() {
        let dir = directory();
        let service = service_with(dir.clone(), google_profile("New@Example.com", true));

        let (_, state) = service.authorization_url(OAuthProvider::Google, Some("/home")).unwrap();
        let login = service.complete(OAuthProvider::Google, "good-code", &state).await.unwrap();
        assert!(login.is_new);
        assert_eq!(login.redirect_to, "/home");
        assert_eq!(login.user.email, "new@example.com");
        assert!(login.user.password_hash.is_none());
        assert!(login.user.email_verified);

        let (_, state) = service.authorization_url(OAuthProvider::Google, None).unwrap();
        let again = service.complete(OAuthProvider::Google, "good-code", &state).await.unwrap();
        assert!(!again.is_new);
        assert_eq!(again.user.id, login.user.id);
        assert_eq!(service.linked_accounts(login.user.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_rejects_provider_mismatch() {
        let service = service_with(directory(), google_profile("a@b.c", true));
        let (_, state) = service.authorization_url(OAuthProvider::Google, None).unwrap();
        let result = service.complete(OAuthProvider::Microsoft, "good-code", &state).await;
        assert!(matches!(result, Err(AuthError::OAuthError(_))));
    }

    #[test]
    fn test_verified_email_links_existing_user() {
        let dir = directory();
        let existing = User::new("user@example.com", "User", Some("hash".to_string()));
        dir.users().create(&existing).unwrap();

        let service = service_with(dir.clone(), serde_json::Value::Null);
        let info = OAuthUserInfo::from_google(google_profile("user@example.com", true)).unwrap();
        let (user, is_new) = service.resolve_user(&info).unwrap();

        assert!(!is_new);
        assert_eq!(user.id, existing.id);
        assert!(dir.get_user(existing.id).unwrap().email_verified);
    }

    #[test]
    fn test_unverified_email_does_not_link() {
        let dir = directory();
        dir.users()
            .create(&User::new("user@example.com", "User", Some("hash".to_string())))
            .unwrap();

        let service = service_with(dir, serde_json::Value::Null);
        let info = OAuthUserInfo::from_google(google_profile("user@example.com", false)).unwrap();
        assert!(matches!(service.resolve_user(&info), Err(AuthError::AccountConflict(_))));
    }

    #[test]
    fn test_bootstrap_admin_requires_verified_email() {
        let service = service_with(directory(), serde_json::Value::Null)
            .with_bootstrap_admin(Some("Boss@Example.com".to_string()));

        let info = OAuthUserInfo::from_google(google_profile("boss@example.com", true)).unwrap();
        let (user, _) = service.resolve_user(&info).unwrap();
        assert!(user.is_admin());
    }
}
