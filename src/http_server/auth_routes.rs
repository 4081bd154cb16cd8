//! # Auth Routes
//!
//! Registration, sign-in, sessions and the OAuth redirect flow.

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{ApiError, ApiResult};
use super::guards::{require_auth, AuthContext};
use super::rate_limit::auth_rate_limit;
use super::run_blocking;
use super::state::AppState;
use crate::auth::{AuthError, Credentials, OAuthProvider, Registration, SignedIn};
use crate::directory::User;
use crate::permissions::{GroupRole, LabelPath, Rule};

// ==================
// Request/Response Types
// ==================

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: User,
    /// Usable as `Authorization: Bearer <token>` by clients without cookies
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MembershipView {
    pub group_id: Uuid,
    pub group_name: String,
    pub path: LabelPath,
    pub role: GroupRole,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub memberships: Vec<MembershipView>,
    pub linked_providers: Vec<OAuthProvider>,
}

#[derive(Debug, Serialize)]
pub struct AbilitiesResponse {
    pub rules: Vec<Rule>,
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub revoked: usize,
}

#[derive(Debug, Deserialize)]
pub struct OAuthStartQuery {
    #[serde(default)]
    pub redirect_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

fn session_cookie(state: &AppState, signed_in: &SignedIn) -> String {
    state
        .auth
        .sessions()
        .session_cookie(&signed_in.token, &signed_in.session)
}

fn signed_in_response(state: &AppState, status: StatusCode, signed_in: SignedIn) -> Response {
    let cookie = session_cookie(state, &signed_in);
    let body = SessionResponse {
        expires_at: signed_in.session.expires_at,
        user: signed_in.user,
        token: signed_in.token,
    };
    (status, [(header::SET_COOKIE, cookie)], Json(body)).into_response()
}

// ==================
// Route Handlers
// ==================

/// POST /auth/register
async fn register(State(state): State<AppState>, Json(request): Json<Registration>) -> ApiResult<Response> {
    let service = state.auth.clone();
    let signed_in = run_blocking(move || service.register(&request)).await?;
    Ok(signed_in_response(&state, StatusCode::CREATED, signed_in))
}

/// POST /auth/login
async fn login(State(state): State<AppState>, Json(request): Json<Credentials>) -> ApiResult<Response> {
    let service = state.auth.clone();
    let signed_in = run_blocking(move || service.login(&request)).await?;
    tracing::info!(user_id = %signed_in.user.id, "user signed in");
    Ok(signed_in_response(&state, StatusCode::OK, signed_in))
}

/// POST /auth/logout
async fn logout(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Response> {
    state.auth.logout(&auth.session_id)?;
    let cookie = state.auth.sessions().blank_cookie();
    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)]).into_response())
}

/// POST /auth/logout-all
async fn logout_all(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Response> {
    let revoked = state.auth.logout_all(auth.user.id)?;
    let cookie = state.auth.sessions().blank_cookie();
    Ok(([(header::SET_COOKIE, cookie)], Json(LogoutAllResponse { revoked })).into_response())
}

/// GET /auth/me
async fn me(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<MeResponse>> {
    let memberships = state
        .directory
        .memberships_for_user(auth.user.id)?
        .into_iter()
        .map(|m| MembershipView {
            group_id: m.group.id,
            group_name: m.group.name,
            path: m.group.path,
            role: m.membership.role,
        })
        .collect();
    let linked_providers = state
        .oauth
        .linked_accounts(auth.user.id)?
        .into_iter()
        .map(|a| a.provider)
        .collect();

    Ok(Json(MeResponse {
        user: auth.user,
        memberships,
        linked_providers,
    }))
}

/// GET /auth/me/abilities
async fn abilities(auth: AuthContext) -> Json<AbilitiesResponse> {
    Json(AbilitiesResponse {
        rules: auth.ability.rules().to_vec(),
    })
}

/// GET /auth/oauth/:provider
async fn oauth_start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthStartQuery>,
) -> ApiResult<Response> {
    let provider = OAuthProvider::from_str(&provider)?;
    let (url, _) = state.oauth.authorization_url(provider, query.redirect_to.as_deref())?;
    Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
}

/// GET /auth/oauth/:provider/callback
async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
) -> ApiResult<Response> {
    let provider = OAuthProvider::from_str(&provider)?;
    if let Some(error) = query.error {
        let detail = query.error_description.unwrap_or(error);
        tracing::info!(provider = %provider, error = %detail, "provider refused sign-in");
        return Err(AuthError::OAuthError(detail).into());
    }
    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        return Err(ApiError::BadRequest("Missing code or state".to_string()));
    };

    let login = state.oauth.complete(provider, &code, &oauth_state).await?;
    tracing::info!(
        provider = %provider,
        user_id = %login.user.id,
        is_new = login.is_new,
        "oauth sign-in completed"
    );

    let redirect_to = login.redirect_to;
    let signed_in = state.auth.start_session(login.user)?;
    let cookie = session_cookie(&state, &signed_in);
    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, redirect_to), (header::SET_COOKIE, cookie)],
    )
        .into_response())
}

// ==================
// Router
// ==================

pub fn auth_routes(state: AppState) -> Router {
    let credentials = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route_layer(from_fn_with_state(state.clone(), auth_rate_limit));

    let session = Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        .route("/auth/me", get(me))
        .route("/auth/me/abilities", get(abilities))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let oauth = Router::new()
        .route("/auth/oauth/:provider", get(oauth_start))
        .route("/auth/oauth/:provider/callback", get(oauth_callback));

    credentials.merge(session).merge(oauth).with_state(state)
}
