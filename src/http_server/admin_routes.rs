//! Read-only administration endpoints.

use axum::extract::{Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::guards::{require_auth, require_role};
use super::state::AppState;
use crate::observability::{AuditEntry, Decision};
use crate::permissions::{CacheStats, SystemRole};

const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub decision: Option<Decision>,
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub enabled: bool,
    /// Entries currently held, before filtering
    pub total: usize,
    pub cache: CacheStats,
    pub entries: Vec<AuditEntry>,
}

/// GET /admin/audit
async fn audit_log(State(state): State<AppState>, Query(query): Query<AuditQuery>) -> Json<AuditResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).min(MAX_AUDIT_LIMIT);
    let entries = match query.decision {
        Some(decision) => state
            .audit
            .entries()
            .into_iter()
            .rev()
            .filter(|e| e.decision == decision)
            .take(limit)
            .collect(),
        None => state.audit.recent(limit),
    };

    Json(AuditResponse {
        enabled: state.audit.is_enabled(),
        total: state.audit.count(),
        cache: state.directory.cache().stats(),
        entries,
    })
}

pub fn admin_routes(state: AppState) -> Router {
    Router::new()
        .route("/admin/audit", get(audit_log))
        .route_layer(from_fn_with_state((state.clone(), SystemRole::Admin), require_role))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
