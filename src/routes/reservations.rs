use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use crate::error::AppResult;
use crate::metrics::Metrics;
use crate::middleware::CurrentUser;
use crate::services::{activity, reservations};
use crate::state::AppState;
use crate::types::{CreateReservationRequest, ReservationDto};

/// Queues the caller (or, for staff, any user) for a book with no free copy.
pub async fn create_reservation(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<CreateReservationRequest>,
) -> AppResult<(StatusCode, Json<ReservationDto>)> {
    let user_id = req.user_id.unwrap_or(current.id());
    current.require_self_or_staff(user_id)?;
    let reservation =
        reservations::create(&state.db, &state.config.reservations, user_id, req.book_id, Utc::now()).await?;
    Metrics::inc(&state.metrics.reservations_created);
    let details = serde_json::json!({ "book_id": req.book_id, "priority": reservation.priority_order });
    activity::record(
        &state.db,
        Some(current.id()),
        "reserve",
        "reservation",
        Some(reservation.id),
        Some(details.to_string()),
    )
    .await;
    Ok((StatusCode::CREATED, Json(reservation)))
}

pub async fn cancel_reservation(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ReservationDto>> {
    let existing = reservations::get(&state.db, id).await?;
    current.require_self_or_staff(existing.user_id)?;
    let reservation = reservations::cancel(&state.db, &state.config.reservations, id, Utc::now()).await?;
    activity::record(&state.db, Some(current.id()), "cancel_reservation", "reservation", Some(id), None).await;
    Ok(Json(reservation))
}

pub async fn my_reservations(
    State(state): State<AppState>,
    current: CurrentUser,
) -> AppResult<Json<Vec<ReservationDto>>> {
    Ok(Json(reservations::list_for_user(&state.db, current.id()).await?))
}

pub async fn book_queue(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(book_id): Path<i64>,
) -> AppResult<Json<Vec<ReservationDto>>> {
    current.require_staff()?;
    Ok(Json(reservations::queue(&state.db, book_id).await?))
}
