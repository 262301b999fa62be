use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::CurrentUser;
use crate::routes::page_bounds;
use crate::services::{activity, loans};
use crate::state::AppState;
use crate::types::{CreateLoanRequest, LoanDto, LoanStatus, Page, ReturnResponse};

#[derive(Debug, Deserialize)]
pub struct LoanListQuery {
    pub user_id: Option<i64>,
    pub book_id: Option<i64>,
    pub status: Option<String>,
    pub overdue_only: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn parse_status(raw: Option<&str>) -> AppResult<Option<LoanStatus>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s.parse::<LoanStatus>().map(Some).map_err(AppError::BadRequest),
        None => Ok(None),
    }
}

pub async fn list_loans(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<LoanListQuery>,
) -> AppResult<Json<Page<LoanDto>>> {
    current.require_staff()?;
    let filter = loans::LoanFilter {
        user_id: query.user_id,
        book_id: query.book_id,
        status: parse_status(query.status.as_deref())?,
        overdue_only: query.overdue_only.unwrap_or(false),
    };
    let (limit, offset) = page_bounds(query.limit, query.offset);
    Ok(Json(loans::list(&state.db, &filter, limit, offset).await?))
}

pub async fn my_loans(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<LoanListQuery>,
) -> AppResult<Json<Page<LoanDto>>> {
    let filter = loans::LoanFilter {
        user_id: Some(current.id()),
        book_id: query.book_id,
        status: parse_status(query.status.as_deref())?,
        overdue_only: query.overdue_only.unwrap_or(false),
    };
    let (limit, offset) = page_bounds(query.limit, query.offset);
    Ok(Json(loans::list(&state.db, &filter, limit, offset).await?))
}

pub async fn get_loan(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<LoanDto>> {
    let loan = loans::get(&state.db, id).await?;
    current.require_self_or_staff(loan.user_id)?;
    Ok(Json(loan))
}

pub async fn create_loan(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<CreateLoanRequest>,
) -> AppResult<(StatusCode, Json<LoanDto>)> {
    current.require_staff()?;
    let loan = loans::create_loan(&state.db, &state.config, req.user_id, req.book_id, Utc::now()).await?;
    Metrics::inc(&state.metrics.loans_created);
    state.catalog_cache.invalidate();
    let details = serde_json::json!({ "user_id": loan.user_id, "book_id": loan.book_id, "due_date": loan.due_date });
    activity::record(&state.db, Some(current.id()), "loan", "loan", Some(loan.id), Some(details.to_string())).await;
    Ok((StatusCode::CREATED, Json(loan)))
}

pub async fn return_loan(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ReturnResponse>> {
    current.require_staff()?;
    let returned = loans::return_loan(&state.db, &state.config, id, Utc::now()).await?;
    Metrics::inc(&state.metrics.loans_returned);
    if returned.penalty.is_some() {
        Metrics::inc(&state.metrics.penalties_issued);
    }
    state.catalog_cache.invalidate();
    let details = serde_json::json!({
        "days_late": returned.days_late,
        "penalty": returned.penalty.as_ref().map(|p| p.amount),
    });
    activity::record(&state.db, Some(current.id()), "return", "loan", Some(id), Some(details.to_string())).await;
    Ok(Json(returned))
}

/// Staff may renew any loan; borrowers only their own.
pub async fn renew_loan(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<LoanDto>> {
    let loan = loans::get(&state.db, id).await?;
    current.require_self_or_staff(loan.user_id)?;
    let loan = loans::renew(&state.db, &state.config, id, Utc::now()).await?;
    Metrics::inc(&state.metrics.loans_renewed);
    activity::record(&state.db, Some(current.id()), "renew", "loan", Some(id), Some(loan.due_date.clone())).await;
    Ok(Json(loan))
}

pub async fn declare_lost(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ReturnResponse>> {
    current.require_staff()?;
    let lost = loans::declare_lost(&state.db, &state.config, id, Utc::now()).await?;
    Metrics::inc(&state.metrics.penalties_issued);
    state.catalog_cache.invalidate();
    activity::record(&state.db, Some(current.id()), "lost", "loan", Some(id), None).await;
    Ok(Json(lost))
}
