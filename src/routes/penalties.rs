use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::error::{validation, AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::CurrentUser;
use crate::routes::{page_bounds, MAX_PAGE_SIZE};
use crate::services::{activity, loans, penalties, users};
use crate::state::AppState;
use crate::types::{CreatePenaltyRequest, PenaltyDto, PenaltyKind, PenaltyList, PenaltyStatus, WaivePenaltyRequest};

#[derive(Debug, Deserialize)]
pub struct PenaltyListQuery {
    pub user_id: Option<i64>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn parse_status(raw: Option<&str>) -> AppResult<Option<PenaltyStatus>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s.parse::<PenaltyStatus>().map(Some).map_err(AppError::BadRequest),
        None => Ok(None),
    }
}

pub async fn list_penalties(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<PenaltyListQuery>,
) -> AppResult<Json<Vec<PenaltyDto>>> {
    current.require_staff()?;
    let filter = penalties::PenaltyFilter { user_id: query.user_id, status: parse_status(query.status.as_deref())? };
    let (limit, offset) = page_bounds(query.limit, query.offset);
    Ok(Json(penalties::list(&state.db, &filter, limit, offset).await?))
}

/// The caller's penalties, with the amount still owed.
pub async fn my_penalties(State(state): State<AppState>, current: CurrentUser) -> AppResult<Json<PenaltyList>> {
    let filter = penalties::PenaltyFilter { user_id: Some(current.id()), status: None };
    let (limit, offset) = page_bounds(Some(MAX_PAGE_SIZE), None);
    let items = penalties::list(&state.db, &filter, limit, offset).await?;
    let mut conn = state.db.acquire().await?;
    let unpaid_total = penalties::unpaid_total(&mut conn, current.id()).await?;
    Ok(Json(PenaltyList { items, unpaid_total, currency: state.config.penalties.currency.clone() }))
}

/// Manual penalty, `damaged` unless another kind is given.
pub async fn create_penalty(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<CreatePenaltyRequest>,
) -> AppResult<(StatusCode, Json<PenaltyDto>)> {
    current.require_staff()?;
    validation::validate_positive_number(Some(req.amount), "amount")?;
    users::get(&state.db, req.user_id).await?;
    if let Some(loan_id) = req.loan_id {
        let loan = loans::get(&state.db, loan_id).await?;
        if loan.user_id != req.user_id {
            return Err(AppError::ValidationError {
                field: "loan_id".to_string(),
                message: "Loan belongs to another user".to_string(),
            });
        }
    }
    let description = req.description.as_deref().map(str::trim).filter(|d| !d.is_empty()).map(|d| {
        d.chars().take(500).collect::<String>()
    });
    let kind = req.kind.unwrap_or(PenaltyKind::Damaged);

    let mut conn = state.db.acquire().await?;
    let penalty =
        penalties::insert(&mut conn, req.user_id, req.loan_id, kind, req.amount, description, Utc::now()).await?;
    drop(conn);

    Metrics::inc(&state.metrics.penalties_issued);
    let details = serde_json::json!({ "kind": penalty.kind, "amount": penalty.amount });
    activity::record(&state.db, Some(current.id()), "penalty", "penalty", Some(penalty.id), Some(details.to_string()))
        .await;
    Ok((StatusCode::CREATED, Json(penalty)))
}

pub async fn pay_penalty(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<PenaltyDto>> {
    current.require_staff()?;
    let penalty = penalties::pay(&state.db, id, Utc::now()).await?;
    tracing::info!(penalty_id = id, user_id = penalty.user_id, amount = penalty.amount, "Penalty paid");
    activity::record(&state.db, Some(current.id()), "pay_penalty", "penalty", Some(id), None).await;
    Ok(Json(penalty))
}

pub async fn waive_penalty(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<WaivePenaltyRequest>,
) -> AppResult<Json<PenaltyDto>> {
    current.require_staff()?;
    validation::require_text(&req.reason, "reason", 500)?;
    let penalty = penalties::waive(&state.db, id, req.reason.trim(), Utc::now()).await?;
    tracing::info!(penalty_id = id, user_id = penalty.user_id, "Penalty waived");
    activity::record(&state.db, Some(current.id()), "waive_penalty", "penalty", Some(id), Some(req.reason.trim().to_string()))
        .await;
    Ok(Json(penalty))
}
