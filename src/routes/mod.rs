//! HTTP route handlers.
//!
//! - `health`: liveness, readiness, metrics and version
//! - `auth`, `users`: sessions, accounts and directory sync
//! - `books`, `documents`, `catalog`: cataloguing and search
//! - `loans`, `reservations`, `penalties`: circulation desk
//! - `analytics`, `export`: dashboard figures and data exports

pub mod analytics;
pub mod auth;
pub mod books;
pub mod catalog;
pub mod documents;
pub mod export;
pub mod health;
pub mod loans;
pub mod penalties;
pub mod reservations;
pub mod users;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

/// Clamps list paging parameters to sane bounds.
pub fn page_bounds(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        offset.unwrap_or(0).clamp(0, 100_000),
    )
}

/// Every API route. `upload_limit` is the body limit of the upload route.
pub fn api_routes(upload_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route("/version", get(health::version))
        // Sessions & comptes
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/users", get(users::list_users))
        .route("/users/{id}", get(users::get_user).patch(users::update_user))
        .route("/users/{id}/summary", get(users::user_summary))
        .route("/directory/sync", post(users::sync_directory))
        // Catalogue
        .route("/books", get(books::list_books).post(books::create_book))
        .route("/books/{id}", get(books::get_book).put(books::update_book).delete(books::delete_book))
        .route("/books/{id}/reservations", get(reservations::book_queue))
        .route("/documents", get(documents::list_documents).post(documents::create_document))
        .route(
            "/documents/{id}",
            get(documents::get_document).put(documents::update_document).delete(documents::delete_document),
        )
        .route(
            "/documents/{id}/file",
            get(documents::download_file)
                .post(documents::upload_file)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/catalog/search", get(catalog::search))
        .route("/catalog/categories", get(catalog::categories))
        // Circulation
        .route("/loans", get(loans::list_loans).post(loans::create_loan))
        .route("/loans/{id}", get(loans::get_loan))
        .route("/loans/{id}/return", post(loans::return_loan))
        .route("/loans/{id}/renew", post(loans::renew_loan))
        .route("/loans/{id}/lost", post(loans::declare_lost))
        .route("/me/loans", get(loans::my_loans))
        .route("/reservations", post(reservations::create_reservation))
        .route("/reservations/{id}", axum::routing::delete(reservations::cancel_reservation))
        .route("/me/reservations", get(reservations::my_reservations))
        .route("/penalties", get(penalties::list_penalties).post(penalties::create_penalty))
        .route("/penalties/{id}/pay", post(penalties::pay_penalty))
        .route("/penalties/{id}/waive", post(penalties::waive_penalty))
        .route("/me/penalties", get(penalties::my_penalties))
        // Statistiques
        .route("/analytics/dashboard", get(analytics::dashboard))
        .route("/analytics/loans/monthly", get(analytics::monthly_loans))
        .route("/analytics/top-books", get(analytics::top_books))
        .route("/analytics/activity", get(analytics::activity))
        .route("/analytics/export", get(export::export_dataset))
}
