//! Security Hardening Configuration
//!
//! - Fail-closed enforcement: deny access when abilities cannot be built
//! - Audit logging for authorization decisions

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Whether to enable fail-closed mode
    ///
    /// If true, a failure to build a user's ability answers 503. If false,
    /// the last cached ability is used when there is one.
    ///
    /// Default: true
    pub fail_closed_mode: bool,

    /// Record every guard decision in the audit log
    pub audit_decisions: bool,

    /// Ability cache lifetime; 0 disables caching
    pub ability_cache_ttl_secs: u64,

    pub audit_max_entries: usize,

    /// Registering with this email yields a system admin
    pub bootstrap_admin_email: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            fail_closed_mode: true,
            audit_decisions: true,
            ability_cache_ttl_secs: 60,
            audit_max_entries: 10_000,
            bootstrap_admin_email: None,
        }
    }
}

/// Helper to check if we should fail closed
pub fn should_fail_closed(config: &SecurityConfig) -> bool {
    config.fail_closed_mode
}
