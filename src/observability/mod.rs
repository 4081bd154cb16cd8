//! # Observability
//!
//! Tracing setup and the authorization audit log.

pub mod audit_log;
pub mod logging;

pub use audit_log::{AuditEntry, AuditLog, AuditLogConfig, Decision, SharedAuditLog};
pub use logging::init_tracing;
