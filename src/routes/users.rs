use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::routes::page_bounds;
use crate::services::{activity, users};
use crate::state::AppState;
use crate::types::{Page, Role, SyncReport, UpdateUserRequest, UserDto, UserSummary};

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub q: Option<String>,
    pub role: Option<String>,
    pub active: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_users(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<UserListQuery>,
) -> AppResult<Json<Page<UserDto>>> {
    current.require_staff()?;
    let role = match query.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(r) => Some(r.parse::<Role>().map_err(AppError::BadRequest)?),
        None => None,
    };
    let filter = users::UserFilter { q: query.q, role, active: query.active };
    let (limit, offset) = page_bounds(query.limit, query.offset);
    Ok(Json(users::list(&state.db, &filter, limit, offset).await?))
}

pub async fn get_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<UserDto>> {
    current.require_self_or_staff(id)?;
    Ok(Json(users::get(&state.db, id).await?))
}

/// Admin only: changes a user's role or disables the account.
pub async fn update_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Json<UserDto>> {
    current.require_admin()?;
    if id == current.id() && (req.is_active == Some(false) || req.role.is_some_and(|r| r != Role::Admin)) {
        return Err(AppError::Conflict("Administrators cannot demote or disable themselves".to_string()));
    }
    let user = users::update(&state.db, id, req.role, req.is_active).await?;
    tracing::info!(user_id = id, role = %user.role, is_active = user.is_active, by = current.id(), "User updated");
    let details = serde_json::json!({ "role": user.role, "is_active": user.is_active }).to_string();
    activity::record(&state.db, Some(current.id()), "update_user", "user", Some(id), Some(details)).await;
    Ok(Json(user))
}

pub async fn user_summary(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<UserSummary>> {
    current.require_self_or_staff(id)?;
    Ok(Json(users::summary(&state.db, id).await?))
}

/// Admin only: imports every directory account.
pub async fn sync_directory(State(state): State<AppState>, current: CurrentUser) -> AppResult<Json<SyncReport>> {
    current.require_admin()?;
    let accounts = state.directory.list_users().await?;
    let report =
        users::sync_from_directory(&state.db, &accounts, &state.config.directory.role_groups, Utc::now()).await?;
    let details = serde_json::json!({ "created": report.created, "updated": report.updated }).to_string();
    activity::record(&state.db, Some(current.id()), "sync_directory", "user", None, Some(details)).await;
    Ok(Json(report))
}
