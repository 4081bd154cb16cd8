//! Shared state handed to every handler and guard.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    AuthResult, AuthService, InMemoryOAuthAccountRepository, OAuthService, OAuthTransport, RateLimiter,
    ReqwestTransport, SecurityConfig, SessionManager,
};
use crate::config::{AppConfig, RateLimitSettings};
use crate::directory::DirectoryService;
use crate::observability::{AuditEntry, AuditLog, AuditLogConfig};
use crate::permissions::AbilityCache;

#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<DirectoryService>,
    pub auth: Arc<AuthService>,
    pub oauth: Arc<OAuthService>,
    pub limiter: Arc<RateLimiter>,
    pub audit: Arc<AuditLog>,
    pub security: Arc<SecurityConfig>,
    pub rate_limits: Arc<RateLimitSettings>,
    pub trust_proxy: bool,
}

impl AppState {
    /// In-memory stores with the production OAuth transport
    pub fn from_config(config: &AppConfig) -> AuthResult<Self> {
        Ok(Self::with_transport(config, Arc::new(ReqwestTransport::new()?)))
    }

    pub fn with_transport(config: &AppConfig, transport: Arc<dyn OAuthTransport>) -> Self {
        let cache = Arc::new(AbilityCache::new(Duration::from_secs(
            config.security.ability_cache_ttl_secs,
        )));
        let directory = Arc::new(DirectoryService::in_memory(cache));
        let sessions = Arc::new(SessionManager::in_memory(config.session_config()));
        let auth = Arc::new(AuthService::new(
            directory.clone(),
            sessions,
            config.security.bootstrap_admin_email.clone(),
        ));

        let mut oauth = OAuthService::new(
            directory.clone(),
            Arc::new(InMemoryOAuthAccountRepository::new()),
            transport,
        )
        .with_bootstrap_admin(config.security.bootstrap_admin_email.clone());
        for provider in config.oauth_providers() {
            oauth.register_provider(provider);
        }

        let audit = Arc::new(AuditLog::new(AuditLogConfig {
            enabled: config.security.audit_decisions,
            max_entries: config.security.audit_max_entries,
        }));

        Self {
            directory,
            auth,
            oauth: Arc::new(oauth),
            limiter: Arc::new(RateLimiter::new()),
            audit,
            security: Arc::new(config.security.clone()),
            rate_limits: Arc::new(config.rate_limit.clone()),
            trust_proxy: config.server.trust_proxy,
        }
    }

    pub fn record(&self, entry: AuditEntry) {
        self.audit.log(entry);
    }

    /// Drop expired sessions, OAuth states, rate windows and cache entries
    pub fn purge_expired(&self) {
        let sessions = self.auth.sessions().delete_expired().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "session purge failed");
            0
        });
        let states = self.oauth.purge_expired_states().unwrap_or(0);
        let longest = self
            .rate_limits
            .global
            .window()
            .max(self.rate_limits.auth.window());
        let windows = self.limiter.purge_expired(longest);
        let abilities = self.directory.cache().purge_expired();

        tracing::debug!(sessions, states, windows, abilities, "purged expired entries");
    }
}
