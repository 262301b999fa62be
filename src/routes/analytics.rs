use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::{activity, analytics};
use crate::state::AppState;
use crate::types::{ActivityItem, DashboardStats, MonthlyCount, TopBook};

#[derive(Debug, Deserialize)]
pub struct MonthsQuery {
    pub months: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

pub async fn dashboard(State(state): State<AppState>, current: CurrentUser) -> AppResult<Json<DashboardStats>> {
    current.require_staff()?;
    Ok(Json(analytics::dashboard(&state.db, Utc::now()).await?))
}

pub async fn monthly_loans(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<MonthsQuery>,
) -> AppResult<Json<Vec<MonthlyCount>>> {
    current.require_staff()?;
    let months = query.months.unwrap_or(12).clamp(1, 24);
    Ok(Json(analytics::monthly_loans(&state.db, months, Utc::now()).await?))
}

pub async fn top_books(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<Vec<TopBook>>> {
    current.require_staff()?;
    let limit = query.limit.unwrap_or(10).clamp(1, 50);
    Ok(Json(analytics::top_books(&state.db, limit).await?))
}

pub async fn activity(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<Vec<ActivityItem>>> {
    current.require_staff()?;
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    Ok(Json(activity::recent(&state.db, limit, Utc::now()).await?))
}
