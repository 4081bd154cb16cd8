//! # Group Routes
//!
//! Group tree and membership management. Routes under `/groups/:group_id`
//! run behind `require_group_from_params`; handlers still check the ability
//! on the concrete group or membership they touch.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::ApiResult;
use super::guards::{ensure, require_auth, require_group_from_params, require_group_role, AuthContext, GroupContext};
use super::state::AppState;
use crate::directory::{Group, GroupUpdate, Membership, NewGroup};
use crate::permissions::{Action, GroupRole, Subject, SubjectType};

#[derive(Debug, Deserialize)]
pub struct MoveGroupRequest {
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
    pub role: GroupRole,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRequest {
    pub role: GroupRole,
}

#[derive(Debug, Serialize)]
pub struct DeleteGroupResponse {
    pub deleted: usize,
}

fn readable(auth: &AuthContext, groups: Vec<Group>) -> Vec<Group> {
    let filter = auth.ability.accessible_filter(Action::Read, SubjectType::Group);
    if filter.is_unrestricted() {
        return groups;
    }
    groups.into_iter().filter(|g| filter.matches(&g.subject())).collect()
}

fn membership_subject(group: &Group, user_id: Uuid, role: GroupRole) -> Subject {
    Subject::Membership {
        group_id: group.id,
        group_path: group.path.clone(),
        user_id,
        role,
    }
}

// ==================
// Groups
// ==================

/// POST /groups
async fn create_group(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<NewGroup>,
) -> ApiResult<impl IntoResponse> {
    let id = Uuid::new_v4();
    let path = state.directory.path_for_new_group(id, request.parent_id)?;
    ensure(&state, &auth, Action::Create, &Subject::Group { id, path })?;

    // Root groups have nobody above them to manage them. Subgroup creators
    // already hold Admin or better on the parent and inherit it.
    let group = match request.parent_id {
        None => state.directory.create_group_owned_by(id, request, auth.user.id)?,
        Some(_) => state.directory.create_group(id, request)?,
    };

    tracing::info!(group_id = %group.id, actor = %auth.user.id, path = %group.path, "group created");
    Ok((StatusCode::CREATED, Json(group)))
}

/// GET /groups
async fn list_groups(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<Vec<Group>>> {
    let groups = state.directory.list_groups()?;
    Ok(Json(readable(&auth, groups)))
}

/// GET /groups/:group_id
async fn get_group(State(state): State<AppState>, auth: AuthContext, group: GroupContext) -> ApiResult<Json<Group>> {
    ensure(&state, &auth, Action::Read, &group.group.subject())?;
    Ok(Json(group.group))
}

/// GET /groups/:group_id/subtree
async fn get_subtree(
    State(state): State<AppState>,
    auth: AuthContext,
    group: GroupContext,
) -> ApiResult<Json<Vec<Group>>> {
    ensure(&state, &auth, Action::Read, &group.group.subject())?;
    let subtree = state.directory.subtree(group.group.id)?;
    Ok(Json(readable(&auth, subtree)))
}

/// PATCH /groups/:group_id
async fn update_group(
    State(state): State<AppState>,
    auth: AuthContext,
    group: GroupContext,
    Json(request): Json<GroupUpdate>,
) -> ApiResult<Json<Group>> {
    ensure(&state, &auth, Action::Update, &group.group.subject())?;
    Ok(Json(state.directory.update_group(group.group.id, request)?))
}

/// DELETE /groups/:group_id
async fn delete_group(
    State(state): State<AppState>,
    auth: AuthContext,
    group: GroupContext,
) -> ApiResult<Json<DeleteGroupResponse>> {
    ensure(&state, &auth, Action::Delete, &group.group.subject())?;
    let deleted = state.directory.delete_group(group.group.id)?;
    tracing::info!(group_id = %group.group.id, actor = %auth.user.id, deleted, "group deleted");
    Ok(Json(DeleteGroupResponse { deleted }))
}

/// POST /groups/:group_id/move
async fn move_group(
    State(state): State<AppState>,
    auth: AuthContext,
    group: GroupContext,
    Json(request): Json<MoveGroupRequest>,
) -> ApiResult<Json<Group>> {
    let id = group.group.id;
    let target = state.directory.path_for_new_group(id, request.parent_id)?;
    ensure(&state, &auth, Action::Create, &Subject::Group { id, path: target })?;

    let moved = state.directory.move_group(id, request.parent_id)?;
    tracing::info!(
        group_id = %id,
        actor = %auth.user.id,
        from = %group.group.path,
        to = %moved.path,
        "group moved"
    );
    Ok(Json(moved))
}

// ==================
// Members
// ==================

/// GET /groups/:group_id/members
async fn list_members(
    State(state): State<AppState>,
    auth: AuthContext,
    group: GroupContext,
) -> ApiResult<Json<Vec<Membership>>> {
    ensure(&state, &auth, Action::Read, &group.group.subject())?;
    let members = state.directory.list_members(group.group.id)?;
    let filter = auth.ability.accessible_filter(Action::Read, SubjectType::Membership);
    Ok(Json(
        members
            .into_iter()
            .filter(|m| filter.matches(&m.subject(&group.group)))
            .collect(),
    ))
}

/// POST /groups/:group_id/members
async fn add_member(
    State(state): State<AppState>,
    auth: AuthContext,
    group: GroupContext,
    Json(request): Json<AddMemberRequest>,
) -> ApiResult<impl IntoResponse> {
    let subject = membership_subject(&group.group, request.user_id, request.role);
    ensure(&state, &auth, Action::Create, &subject)?;

    let membership = state
        .directory
        .add_member(group.group.id, request.user_id, request.role)?;
    Ok((StatusCode::CREATED, Json(membership)))
}

/// PATCH /groups/:group_id/members/:user_id
async fn update_member(
    State(state): State<AppState>,
    auth: AuthContext,
    group: GroupContext,
    Path((_, user_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateMemberRequest>,
) -> ApiResult<Json<Membership>> {
    let current = state.directory.get_membership(group.group.id, user_id)?;
    // Both the role being taken away and the one being granted must be in reach
    ensure(&state, &auth, Action::Update, &current.subject(&group.group))?;
    ensure(
        &state,
        &auth,
        Action::Update,
        &membership_subject(&group.group, user_id, request.role),
    )?;

    let membership = state
        .directory
        .update_member_role(group.group.id, user_id, request.role)?;
    Ok(Json(membership))
}

/// DELETE /groups/:group_id/members/:user_id
async fn remove_member(
    State(state): State<AppState>,
    auth: AuthContext,
    group: GroupContext,
    Path((_, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let current = state.directory.get_membership(group.group.id, user_id)?;
    ensure(&state, &auth, Action::Delete, &current.subject(&group.group))?;

    state.directory.remove_member(group.group.id, user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ==================
// Router
// ==================

pub fn group_routes(state: AppState) -> Router {
    let role = |required: GroupRole| from_fn_with_state((state.clone(), required), require_group_role);

    let scoped = Router::new()
        .route(
            "/groups/:group_id",
            get(get_group)
                .merge(patch(update_group).route_layer(role(GroupRole::Admin)))
                .merge(delete(delete_group).route_layer(role(GroupRole::Owner))),
        )
        .route("/groups/:group_id/subtree", get(get_subtree))
        .route(
            "/groups/:group_id/move",
            post(move_group).route_layer(role(GroupRole::Owner)),
        )
        .route(
            "/groups/:group_id/members",
            get(list_members)
                .route_layer(role(GroupRole::Member))
                .merge(post(add_member).route_layer(role(GroupRole::Admin))),
        )
        .route(
            "/groups/:group_id/members/:user_id",
            patch(update_member)
                .route_layer(role(GroupRole::Admin))
                .merge(delete(remove_member)),
        )
        .route_layer(from_fn_with_state(state.clone(), require_group_from_params));

    Router::new()
        .route("/groups", get(list_groups).post(create_group))
        .merge(scoped)
        .route_layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
