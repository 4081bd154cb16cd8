//! # User Routes

use axum::extract::{Path, State};
use axum::http::header;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{ApiError, ApiResult};
use super::guards::{ensure, ensure_field, require_auth, require_role, AuthContext};
use super::run_blocking;
use super::state::AppState;
use crate::auth::password::validate_password;
use crate::auth::service::validate_display_name;
use crate::directory::User;
use crate::permissions::{Action, Subject, SystemRole};

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub system_role: Option<SystemRole>,
}

impl UpdateUserRequest {
    fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.display_name.is_some() {
            fields.push("display_name");
        }
        if self.password.is_some() {
            fields.push("password");
        }
        if self.system_role.is_some() {
            fields.push("system_role");
        }
        fields
    }
}

#[derive(Debug, Serialize)]
pub struct UpdateUserResponse {
    pub user: User,
    /// Replacement token when callers change their own password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: SystemRole,
}

/// GET /users
async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.directory.list_users()?))
}

/// GET /users/:user_id
async fn get_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<User>> {
    // Checked before the lookup so strangers cannot discover ids
    ensure(&state, &auth, Action::Read, &Subject::User { id: user_id })?;
    Ok(Json(state.directory.get_user(user_id)?))
}

/// PATCH /users/:user_id
async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> ApiResult<Response> {
    let fields = request.fields();
    if fields.is_empty() {
        return Err(ApiError::BadRequest("Nothing to update".to_string()));
    }
    let subject = Subject::User { id: user_id };
    for field in fields {
        ensure_field(&state, &auth, Action::Update, &subject, field)?;
    }

    // Every field is validated before anything is written
    let display_name = request.display_name.as_deref().map(validate_display_name).transpose()?;
    if let Some(password) = &request.password {
        validate_password(password)?;
    }
    if let Some(role) = request.system_role {
        state.directory.ensure_role_change_allowed(auth.user.id, user_id, role)?;
    }
    let mut user = state.directory.get_user(user_id)?;

    // Hashing can still fail, so it goes first
    let mut reissued = None;
    if let Some(password) = request.password {
        let service = state.auth.clone();
        user = run_blocking(move || service.change_password(user_id, &password)).await?;
        if user_id == auth.user.id {
            reissued = Some(state.auth.start_session(user.clone())?);
        }
    }
    if let Some(name) = display_name {
        user = state.directory.update_display_name(user_id, &name)?;
    }
    if let Some(role) = request.system_role {
        user = state.directory.change_system_role(auth.user.id, user_id, role)?;
    }

    match reissued {
        Some(signed_in) => {
            let cookie = state
                .auth
                .sessions()
                .session_cookie(&signed_in.token, &signed_in.session);
            let body = UpdateUserResponse {
                user,
                token: Some(signed_in.token),
            };
            Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
        }
        None => Ok(Json(UpdateUserResponse { user, token: None }).into_response()),
    }
}

/// PUT /users/:user_id/role
async fn set_role(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(request): Json<SetRoleRequest>,
) -> ApiResult<Json<User>> {
    let user = state.directory.change_system_role(auth.user.id, user_id, request.role)?;
    tracing::info!(
        actor = %auth.user.id,
        user_id = %user_id,
        role = %request.role,
        "system role changed"
    );
    Ok(Json(user))
}

pub fn user_routes(state: AppState) -> Router {
    let admin = Router::new()
        .route("/users", get(list_users))
        .route("/users/:user_id/role", put(set_role))
        .route_layer(from_fn_with_state((state.clone(), SystemRole::Admin), require_role));

    let own = Router::new().route("/users/:user_id", get(get_user).patch(update_user));

    admin
        .merge(own)
        .route_layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
