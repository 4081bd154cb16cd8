//! # Audit Log
//!
//! Append-only, bounded, in-memory record of authorization decisions.
//! The oldest entries are evicted first once the buffer is full.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
        }
    }
}

/// A single guard or ability decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub decision: Decision,
    /// Guard or check that decided, e.g. `require_group_role`
    pub guard: String,
    pub user_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    /// What was attempted, e.g. `update group`
    pub action: Option<String>,
    pub reason: Option<String>,
}

impl AuditEntry {
    pub fn builder(decision: Decision, guard: impl Into<String>) -> AuditEntryBuilder {
        AuditEntryBuilder {
            decision,
            guard: guard.into(),
            user_id: None,
            group_id: None,
            action: None,
            reason: None,
        }
    }
}

pub struct AuditEntryBuilder {
    decision: Decision,
    guard: String,
    user_id: Option<Uuid>,
    group_id: Option<Uuid>,
    action: Option<String>,
    reason: Option<String>,
}

impl AuditEntryBuilder {
    pub fn user_id(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn group_id(mut self, group_id: Uuid) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn build(self) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            decision: self.decision,
            guard: self.guard,
            user_id: self.user_id,
            group_id: self.group_id,
            action: self.action,
            reason: self.reason,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditLogConfig {
    pub enabled: bool,
    /// Maximum entries kept in memory
    pub max_entries: usize,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug)]
pub struct AuditLog {
    config: AuditLogConfig,
    entries: RwLock<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new(config: AuditLogConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(AuditLogConfig {
            enabled: false,
            ..Default::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn log(&self, entry: AuditEntry) {
        if !self.config.enabled || self.config.max_entries == 0 {
            return;
        }

        if let Ok(mut entries) = self.entries.write() {
            while entries.len() >= self.config.max_entries {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .read()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The newest `limit` entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.entries
            .read()
            .map(|e| e.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn denials(&self) -> Vec<AuditEntry> {
        self.entries
            .read()
            .map(|e| e.iter().filter(|d| d.decision == Decision::Deny).cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

pub type SharedAuditLog = Arc<AuditLog>;
