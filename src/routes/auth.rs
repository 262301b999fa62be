use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde_json::{json, Value};

use crate::directory::DirectoryError;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::{ip::MaybeRemoteAddr, validation::sanitize_for_logging, CurrentUser};
use crate::services::{activity, users};
use crate::state::AppState;
use crate::types::{LoginRequest, LoginResponse, UserDto};

pub async fn login(
    State(state): State<AppState>,
    remote: MaybeRemoteAddr,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let ip = remote.client_ip(&headers);
    state.rate_limiter.check_endpoint_limit("/auth/login", ip).await?;

    let username = req.username.trim();
    if username.is_empty() || username.len() > 256 || req.password.expose_secret().is_empty() {
        Metrics::inc(&state.metrics.login_failures);
        return Err(AppError::Unauthorized("Invalid username or password".to_string()));
    }

    let dir_user = match state.directory.authenticate(username, req.password.expose_secret()).await {
        Ok(u) => u,
        Err(DirectoryError::InvalidCredentials) => {
            Metrics::inc(&state.metrics.login_failures);
            tracing::warn!(username = %sanitize_for_logging(username), %ip, "Login rejected");
            return Err(DirectoryError::InvalidCredentials.into());
        }
        Err(e) => {
            tracing::error!(%ip, "Directory authentication failed: {}", e);
            return Err(e.into());
        }
    };

    let now = Utc::now();
    let mut conn = state.db.acquire().await?;
    let (user, created) =
        users::upsert_from_directory(&mut conn, &dir_user, &state.config.directory.role_groups, now).await?;
    if !user.is_active {
        Metrics::inc(&state.metrics.login_failures);
        tracing::warn!(user_id = user.id, username = %user.username, "Login refused for disabled account");
        return Err(AppError::Forbidden("This account is disabled".to_string()));
    }
    let (token, expires_at) =
        users::create_session(&mut conn, user.id, state.config.auth.session_ttl_hours, now).await?;
    drop(conn);

    Metrics::inc(&state.metrics.logins);
    tracing::info!(user_id = user.id, username = %user.username, role = %user.role, created, "User logged in");
    activity::record(&state.db, Some(user.id), "login", "user", Some(user.id), None).await;

    let user = users::get(&state.db, user.id).await?;
    Ok(Json(LoginResponse { token, expires_at, user }))
}

pub async fn logout(State(state): State<AppState>, current: CurrentUser) -> AppResult<Json<Value>> {
    users::delete_session(&state.db, &current.token).await?;
    tracing::info!(user_id = current.id(), "User logged out");
    Ok(Json(json!({ "logged_out": true })))
}

pub async fn me(current: CurrentUser) -> Json<UserDto> {
    Json(current.user)
}
