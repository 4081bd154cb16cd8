//! # Guards
//!
//! Authorization middleware, composed per route with `route_layer`. Layers
//! added later run first, so a route reads bottom-up:
//!
//! ```text
//! .route_layer(from_fn_with_state((state.clone(), GroupRole::Admin), require_group_role))
//! .route_layer(from_fn_with_state(state.clone(), require_group_from_params))
//! .route_layer(from_fn_with_state(state.clone(), require_auth))
//! ```
//!
//! Guards leave their results in request extensions: [`AuthContext`] after
//! `require_auth`, [`GroupContext`] after either group guard.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequestParts, RawPathParams, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use super::errors::{ApiError, ApiResult};
use super::state::AppState;
use crate::auth::security::should_fail_closed;
use crate::auth::{AuthError, SessionManager};
use crate::directory::{Group, User};
use crate::observability::audit_log::AuditEntryBuilder;
use crate::observability::{AuditEntry, Decision};
use crate::permissions::{Ability, Action, GroupRole, Subject, SystemRole};

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    /// Hashed session id, never the client token
    pub session_id: String,
    pub ability: Arc<Ability>,
}

/// The group addressed by the request and the caller's standing in it
#[derive(Debug, Clone)]
pub struct GroupContext {
    pub group: Group,
    /// Strongest role held on the group or an ancestor; `None` for system
    /// admins without a membership
    pub effective_role: Option<GroupRole>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(ApiError::Auth(AuthError::AuthRequired))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for GroupContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<GroupContext>()
            .cloned()
            .ok_or_else(|| ApiError::Internal("group guard missing on this route".to_string()))
    }
}

// ==================
// Audit
// ==================

fn audit(state: &AppState, entry: AuditEntryBuilder) {
    let entry = entry.build();
    if entry.decision == Decision::Deny {
        tracing::warn!(
            guard = %entry.guard,
            user_id = ?entry.user_id,
            group_id = ?entry.group_id,
            action = ?entry.action,
            reason = ?entry.reason,
            "access denied"
        );
    }
    state.record(entry);
}

/// Check an ability against a concrete subject, recording the decision
pub fn ensure(state: &AppState, auth: &AuthContext, action: Action, subject: &Subject) -> ApiResult<()> {
    check(state, auth, action, subject, None)
}

/// Field-level variant of [`ensure`]
pub fn ensure_field(
    state: &AppState,
    auth: &AuthContext,
    action: Action,
    subject: &Subject,
    field: &str,
) -> ApiResult<()> {
    check(state, auth, action, subject, Some(field))
}

fn check(
    state: &AppState,
    auth: &AuthContext,
    action: Action,
    subject: &Subject,
    field: Option<&str>,
) -> ApiResult<()> {
    let result = match field {
        Some(field) => auth.ability.ensure_field(action, subject, field),
        None => auth.ability.ensure(action, subject),
    };

    let mut what = format!("{} {}", action, subject.subject_type());
    if let Some(field) = field {
        what = format!("{}.{}", what, field);
    }
    let decision = if result.is_ok() { Decision::Allow } else { Decision::Deny };
    let mut entry = AuditEntry::builder(decision, "ability")
        .user_id(auth.user.id)
        .action(what);
    if let Some(group_id) = subject_group(subject) {
        entry = entry.group_id(group_id);
    }
    if let Err(err) = &result {
        entry = entry.reason(err.to_string());
    }
    audit(state, entry);

    result.map_err(ApiError::from)
}

fn subject_group(subject: &Subject) -> Option<Uuid> {
    match subject {
        Subject::Group { id, .. } => Some(*id),
        Subject::Membership { group_id, .. } => Some(*group_id),
        _ => None,
    }
}

// ==================
// require_auth
// ==================

/// Session token from `Authorization: Bearer` or the session cookie
pub fn session_token(headers: &HeaderMap, sessions: &SessionManager) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|h| sessions.token_from_cookie_header(h))
}

/// Cached ability, falling back to a stale one only when failing open
fn resolve_ability(state: &AppState, user: &User) -> ApiResult<Arc<Ability>> {
    match state.directory.ability_for(user) {
        Ok(ability) => Ok(ability),
        Err(err) => {
            if should_fail_closed(&state.security) {
                tracing::error!(user_id = %user.id, error = %err, "ability build failed, failing closed");
                return Err(ApiError::Unavailable);
            }
            match state.directory.cache().stale(user.id) {
                Some(ability) => {
                    tracing::warn!(user_id = %user.id, error = %err, "ability build failed, using stale ability");
                    Ok(ability)
                }
                None => {
                    tracing::error!(user_id = %user.id, error = %err, "ability build failed, nothing cached");
                    Err(ApiError::Unavailable)
                }
            }
        }
    }
}

pub async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> ApiResult<Response> {
    let sessions = state.auth.sessions().clone();

    let authenticated = match session_token(request.headers(), &sessions) {
        Some(token) => state
            .auth
            .authenticate(&token)?
            .map(|(user, validation)| (user, validation, token)),
        None => None,
    };
    let Some((user, validation, token)) = authenticated else {
        audit(
            &state,
            AuditEntry::builder(Decision::Deny, "require_auth").reason("no valid session"),
        );
        return Err(AuthError::AuthRequired.into());
    };

    let ability = resolve_ability(&state, &user)?;
    audit(&state, AuditEntry::builder(Decision::Allow, "require_auth").user_id(user.id));

    let reissue = validation
        .fresh
        .then(|| sessions.session_cookie(&token, &validation.session));
    request.extensions_mut().insert(AuthContext {
        user,
        session_id: validation.session.id,
        ability,
    });

    let mut response = next.run(request).await;
    if let Some(cookie) = reissue {
        // Handlers that set their own cookie (logout) win
        if !response.headers().contains_key(header::SET_COOKIE) {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
        }
    }
    Ok(response)
}

// ==================
// require_role
// ==================

pub async fn require_role(
    State((state, required)): State<(AppState, SystemRole)>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let (user_id, role) = match request.extensions().get::<AuthContext>() {
        Some(auth) => (auth.user.id, auth.user.system_role),
        None => return Err(AuthError::AuthRequired.into()),
    };

    if role < required {
        let reason = format!("requires system role {}", required);
        audit(
            &state,
            AuditEntry::builder(Decision::Deny, "require_role")
                .user_id(user_id)
                .reason(reason.clone()),
        );
        return Err(ApiError::Forbidden(reason));
    }

    audit(&state, AuditEntry::builder(Decision::Allow, "require_role").user_id(user_id));
    Ok(next.run(request).await)
}

// ==================
// Group guards
// ==================

fn authorize_group(state: &AppState, guard: &str, user: &User, group_id: Uuid) -> ApiResult<GroupContext> {
    let group = state.directory.get_group(group_id)?;
    let effective_role = state.directory.effective_role(user.id, &group)?;

    if effective_role.is_none() && !user.is_admin() {
        audit(
            state,
            AuditEntry::builder(Decision::Deny, guard)
                .user_id(user.id)
                .group_id(group_id)
                .reason("not a member of this group"),
        );
        return Err(ApiError::Forbidden("Not a member of this group".to_string()));
    }

    audit(
        state,
        AuditEntry::builder(Decision::Allow, guard)
            .user_id(user.id)
            .group_id(group_id),
    );
    Ok(GroupContext { group, effective_role })
}

async fn run_group_guard(
    state: &AppState,
    guard: &str,
    group_id: Uuid,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let context = match request.extensions().get::<AuthContext>() {
        Some(auth) => authorize_group(state, guard, &auth.user, group_id)?,
        None => return Err(AuthError::AuthRequired.into()),
    };
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// Membership check for a group fixed when the router is built
pub async fn require_group_membership(
    State((state, group_id)): State<(AppState, Uuid)>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    run_group_guard(&state, "require_group_membership", group_id, request, next).await
}

/// Membership check for the group named by the `group_id` path parameter
pub async fn require_group_from_params(
    State(state): State<AppState>,
    params: RawPathParams,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let raw = params
        .iter()
        .find(|(name, _)| *name == "group_id")
        .map(|(_, value)| value.to_string())
        .ok_or_else(|| ApiError::Internal("route has no group_id parameter".to_string()))?;
    let group_id = Uuid::parse_str(&raw).map_err(|_| ApiError::BadRequest(format!("Invalid group id: {}", raw)))?;

    run_group_guard(&state, "require_group_from_params", group_id, request, next).await
}

pub async fn require_group_role(
    State((state, required)): State<(AppState, GroupRole)>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let (user, group_id, effective_role) = match (
        request.extensions().get::<AuthContext>(),
        request.extensions().get::<GroupContext>(),
    ) {
        (Some(auth), Some(group)) => (auth.user.clone(), group.group.id, group.effective_role),
        (None, _) => return Err(AuthError::AuthRequired.into()),
        (Some(_), None) => {
            return Err(ApiError::Internal(
                "require_group_role needs a group guard before it".to_string(),
            ))
        }
    };

    let satisfied = effective_role.map(|r| r.satisfies(required)).unwrap_or(false);
    if !satisfied && !user.is_admin() {
        let reason = format!("requires group role {}", required);
        audit(
            &state,
            AuditEntry::builder(Decision::Deny, "require_group_role")
                .user_id(user.id)
                .group_id(group_id)
                .reason(reason.clone()),
        );
        return Err(ApiError::Forbidden(reason));
    }

    audit(
        &state,
        AuditEntry::builder(Decision::Allow, "require_group_role")
            .user_id(user.id)
            .group_id(group_id),
    );
    Ok(next.run(request).await)
}
