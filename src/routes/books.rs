use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::routes::page_bounds;
use crate::services::{activity, catalog};
use crate::state::AppState;
use crate::types::{BookDto, BookInput, Page};

#[derive(Debug, Deserialize)]
pub struct BookListQuery {
    pub category: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_books(
    State(state): State<AppState>,
    _current: CurrentUser,
    Query(query): Query<BookListQuery>,
) -> AppResult<Json<Page<BookDto>>> {
    let (limit, offset) = page_bounds(query.limit, query.offset);
    Ok(Json(catalog::list_books(&state.db, query.category.as_deref(), limit, offset).await?))
}

pub async fn get_book(
    State(state): State<AppState>,
    _current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<BookDto>> {
    Ok(Json(catalog::get_book(&state.db, id).await?))
}

pub async fn create_book(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(input): Json<BookInput>,
) -> AppResult<(StatusCode, Json<BookDto>)> {
    current.require_staff()?;
    let book = catalog::create_book(&state.db, &input, Utc::now()).await?;
    state.catalog_cache.invalidate();
    activity::record(&state.db, Some(current.id()), "create_book", "book", Some(book.id), Some(book.title.clone()))
        .await;
    Ok((StatusCode::CREATED, Json(book)))
}

pub async fn update_book(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Json(input): Json<BookInput>,
) -> AppResult<Json<BookDto>> {
    current.require_staff()?;
    let book = catalog::update_book(&state.db, state.config.reservations.hold_days, id, &input, Utc::now()).await?;
    state.catalog_cache.invalidate();
    activity::record(&state.db, Some(current.id()), "update_book", "book", Some(id), None).await;
    Ok(Json(book))
}

pub async fn delete_book(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    current.require_staff()?;
    catalog::delete_book(&state.db, id).await?;
    state.catalog_cache.invalidate();
    activity::record(&state.db, Some(current.id()), "delete_book", "book", Some(id), None).await;
    Ok(StatusCode::NO_CONTENT)
}
