//! Configuration Validation
//!
//! Validates all configuration at startup and reports every invalid value
//! with an explicit message, not just the first.

use crate::auth::RateLimitRule;
use crate::config::OAuthClientSettings;

/// Configuration validation errors
#[derive(Debug)]
pub struct ConfigValidationError {
    pub field: String,
    pub value: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid configuration for '{}': {} (value: {})",
            self.field, self.message, self.value
        )
    }
}

impl std::error::Error for ConfigValidationError {}

impl ConfigValidationError {
    pub fn status_code(&self) -> u16 {
        500
    }

    pub fn error_code(&self) -> &'static str {
        "INVALID_CONFIG"
    }
}

/// Result of config validation
pub type ConfigResult<T> = Result<T, Vec<ConfigValidationError>>;

/// Configuration validator
pub struct ConfigValidator {
    errors: Vec<ConfigValidationError>,
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Add an error
    fn error(&mut self, field: &str, value: impl std::fmt::Display, message: &str) {
        self.errors.push(ConfigValidationError {
            field: field.to_string(),
            value: value.to_string(),
            message: message.to_string(),
        });
    }

    /// Validate port number (1-65535)
    pub fn validate_port(&mut self, field: &str, port: u16) -> &mut Self {
        if port == 0 {
            self.error(field, port, "Port must be between 1 and 65535");
        }
        self
    }

    /// Validate positive integer
    pub fn validate_positive(&mut self, field: &str, value: i64) -> &mut Self {
        if value <= 0 {
            self.error(field, value, "Value must be positive");
        }
        self
    }

    /// Validate range (inclusive)
    pub fn validate_range(&mut self, field: &str, value: i64, min: i64, max: i64) -> &mut Self {
        if value < min || value > max {
            self.error(field, value, &format!("Value must be between {} and {}", min, max));
        }
        self
    }

    /// Validate non-empty string
    pub fn validate_non_empty(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.error(field, value, "Value cannot be empty");
        }
        self
    }

    /// Validate URL format
    pub fn validate_url(&mut self, field: &str, value: &str) -> &mut Self {
        if !value.starts_with("http://") && !value.starts_with("https://") {
            self.error(field, value, "URL must start with http:// or https://");
        }
        self
    }

    /// Cookie names are RFC 6265 tokens
    pub fn validate_cookie_name(&mut self, field: &str, value: &str) -> &mut Self {
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c));
        if !valid {
            self.error(field, value, "Cookie name must be a non-empty token");
        }
        self
    }

    pub fn validate_rule(&mut self, field: &str, rule: &RateLimitRule) -> &mut Self {
        self.validate_non_empty(&format!("{}.name", field), &rule.name)
            .validate_positive(&format!("{}.max_requests", field), rule.max_requests as i64)
            .validate_positive(&format!("{}.window_secs", field), rule.window_secs as i64)
    }

    /// An enabled provider needs complete credentials
    pub fn validate_oauth_client(&mut self, field: &str, client: &OAuthClientSettings) -> &mut Self {
        self.validate_non_empty(&format!("{}.client_id", field), &client.client_id)
            .validate_non_empty(&format!("{}.client_secret", field), &client.client_secret)
            .validate_url(&format!("{}.redirect_uri", field), &client.redirect_uri);
        if let Some(tenant) = &client.tenant {
            self.validate_non_empty(&format!("{}.tenant", field), tenant);
        }
        self
    }

    /// Finish validation and return result
    pub fn finish(self) -> ConfigResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    /// Check if any errors occurred
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Get current errors
    pub fn errors(&self) -> &[ConfigValidationError] {
        &self.errors
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Format validation errors for display
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}
