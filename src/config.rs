//! # Configuration
//!
//! TOML configuration with a default for every field, overridable from
//! `GROUPGATE_*` environment variables.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::session::{DEFAULT_COOKIE_NAME, DEFAULT_LIFETIME_DAYS};
use crate::auth::{OAuthProviderConfig, RateLimitRule, SecurityConfig, SessionConfig};
use crate::config_validator::{format_validation_errors, ConfigResult, ConfigValidator};

pub const ENV_PREFIX: &str = "GROUPGATE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {message}")]
    Read { path: String, message: String },

    #[error("Invalid config TOML: {0}")]
    Parse(String),

    #[error("Invalid environment override {key}={value}")]
    Env { key: String, value: String },

    #[error("Invalid configuration:\n{0}")]
    Invalid(String),
}

// ==================
// Sections
// ==================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Take the client address from `X-Forwarded-For`
    pub trust_proxy: bool,
    /// Allowed CORS origins; empty allows any origin without credentials
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            trust_proxy: false,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub cookie_name: String,
    pub secure_cookie: bool,
    pub lifetime_days: i64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            secure_cookie: true,
            lifetime_days: DEFAULT_LIFETIME_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub global: RateLimitRule,
    /// Applied to login and registration
    pub auth: RateLimitRule,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            global: RateLimitRule::new("global", 100, 60),
            auth: RateLimitRule::new("auth", 5, 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClientSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub tenant: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub google: Option<OAuthClientSettings>,
    pub microsoft: Option<OAuthClientSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: "info".to_string(),
        }
    }
}

// ==================
// App Config
// ==================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionSettings,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitSettings,
    pub oauth: OAuthSettings,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Read, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config
            .validate()
            .map_err(|errors| ConfigError::Invalid(format_validation_errors(&errors)))?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config
            .validate()
            .map_err(|errors| ConfigError::Invalid(format_validation_errors(&errors)))?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Override fields from `GROUPGATE_*` variables found by `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, v)) = get("HOST") {
            self.server.host = v;
        }
        if let Some((k, v)) = get("PORT") {
            self.server.port = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = get("TRUST_PROXY") {
            self.server.trust_proxy = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = get("SECURE_COOKIE") {
            self.session.secure_cookie = parse_env(&k, &v)?;
        }
        if let Some((k, v)) = get("FAIL_CLOSED_MODE") {
            self.security.fail_closed_mode = parse_env(&k, &v)?;
        }
        if let Some((_, v)) = get("BOOTSTRAP_ADMIN_EMAIL") {
            self.security.bootstrap_admin_email = Some(v).filter(|e| !e.trim().is_empty());
        }
        if let Some((k, v)) = get("LOG_JSON") {
            self.logging.json = parse_env(&k, &v)?;
        }
        if let Some((_, v)) = get("GOOGLE_CLIENT_SECRET") {
            if let Some(google) = self.oauth.google.as_mut() {
                google.client_secret = v;
            }
        }
        if let Some((_, v)) = get("MICROSOFT_CLIENT_SECRET") {
            if let Some(microsoft) = self.oauth.microsoft.as_mut() {
                microsoft.client_secret = v;
            }
        }
        Ok(())
    }

    /// Every problem at once, not just the first
    pub fn validate(&self) -> ConfigResult<()> {
        let mut v = ConfigValidator::new();
        v.validate_port("server.port", self.server.port)
            .validate_non_empty("server.host", &self.server.host)
            .validate_cookie_name("session.cookie_name", &self.session.cookie_name)
            .validate_range("session.lifetime_days", self.session.lifetime_days, 1, 365)
            .validate_positive("security.audit_max_entries", self.security.audit_max_entries as i64)
            .validate_rule("rate_limit.global", &self.rate_limit.global)
            .validate_rule("rate_limit.auth", &self.rate_limit.auth);

        for origin in &self.server.cors_origins {
            v.validate_url("server.cors_origins", origin);
        }
        if let Some(email) = &self.security.bootstrap_admin_email {
            v.validate_non_empty("security.bootstrap_admin_email", email);
        }
        for (name, client) in [("google", &self.oauth.google), ("microsoft", &self.oauth.microsoft)] {
            if let Some(client) = client {
                v.validate_oauth_client(&format!("oauth.{}", name), client);
            }
        }
        v.finish()
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            lifetime: chrono::Duration::days(self.session.lifetime_days),
            cookie_name: self.session.cookie_name.clone(),
            secure_cookie: self.session.secure_cookie,
        }
    }

    /// Configured OAuth providers
    pub fn oauth_providers(&self) -> Vec<OAuthProviderConfig> {
        let mut providers = Vec::new();
        if let Some(google) = &self.oauth.google {
            providers.push(OAuthProviderConfig::google(
                google.client_id.clone(),
                google.client_secret.clone(),
                google.redirect_uri.clone(),
            ));
        }
        if let Some(microsoft) = &self.oauth.microsoft {
            providers.push(OAuthProviderConfig::microsoft(
                microsoft.client_id.clone(),
                microsoft.client_secret.clone(),
                microsoft.redirect_uri.clone(),
                microsoft.tenant.clone().unwrap_or_else(|| "common".to_string()),
            ));
        }
        providers
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.session.cookie_name, "groupgate_session");
        assert_eq!(config.rate_limit.auth.max_requests, 5);
        assert!(config.security.fail_closed_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::from_toml_str(
            r#"
            [server]
            port = 8080

            [rate_limit.auth]
            name = "auth"
            max_requests = 10
            window_secs = 30

            [oauth.microsoft]
            client_id = "ms"
            client_secret = "secret"
            redirect_uri = "https://app.example.com/auth/oauth/microsoft/callback"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.rate_limit.auth.window_secs, 30);
        assert_eq!(config.rate_limit.global.max_requests, 100);

        let providers = config.oauth_providers();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].tenant, "common");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GROUPGATE_PORT", "9000"),
            ("GROUPGATE_TRUST_PROXY", "true"),
            ("GROUPGATE_BOOTSTRAP_ADMIN_EMAIL", "root@example.com"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert!(config.server.trust_proxy);
        assert_eq!(config.security.bootstrap_admin_email.as_deref(), Some("root@example.com"));
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = AppConfig::default();
        let result = config.apply_env_overrides(|k| (k == "GROUPGATE_PORT").then(|| "http".to_string()));
        assert!(matches!(result, Err(ConfigError::Env { .. })));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        config.session.cookie_name = "bad name".to_string();
        config.rate_limit.auth.max_requests = 0;
        config.oauth.google = Some(OAuthClientSettings {
            client_id: "id".to_string(),
            client_secret: " ".to_string(),
            redirect_uri: "not-a-url".to_string(),
            tenant: None,
        });

        let errors = config.validate().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"server.port"));
        assert!(fields.contains(&"session.cookie_name"));
        assert!(fields.contains(&"rate_limit.auth.max_requests"));
        assert!(fields.contains(&"oauth.google.client_secret"));
        assert!(fields.contains(&"oauth.google.redirect_uri"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\njson = true").unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 0").unwrap();
        assert!(matches!(AppConfig::load(file.path()), Err(ConfigError::Invalid(_))));

        let missing = AppConfig::load(Path::new("/nonexistent/groupgate.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
