use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};

use crate::error::AppResult;
use crate::middleware::ip::MaybeRemoteAddr;
use crate::services::catalog::{self, CategoryCount, SearchParams, SearchQuery};
use crate::state::AppState;
use crate::types::SearchResponse;

/// Public catalog search over books and academic documents.
pub async fn search(
    State(state): State<AppState>,
    remote: MaybeRemoteAddr,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<SearchResponse>> {
    let ip = remote.client_ip(&headers);
    state.rate_limiter.check_endpoint_limit("/catalog/search", ip).await?;

    let params = SearchParams::from_query(&query)?;
    let response = catalog::search(&state.db, &state.catalog_cache, &state.metrics, &params).await?;
    Ok(Json(response))
}

pub async fn categories(State(state): State<AppState>) -> AppResult<Json<Vec<CategoryCount>>> {
    Ok(Json(catalog::categories(&state.db).await?))
}
