//! # SIGB Backend Library
//!
//! Système Intégré de Gestion de Bibliothèque: the library management backend
//! of the university. It catalogues books and academic documents (theses,
//! memoirs, internship reports), runs the circulation desk (loans,
//! reservations, penalties), authenticates readers against Active Directory
//! and serves dashboard figures, all over a JSON REST API.
//!
//! ## Architecture
//!
//! The application is built using:
//! - **Axum**: HTTP server and routing
//! - **SQLx**: asynchronous database access with SQLite
//! - **Tokio**: async runtime and background jobs
//! - **ldap3**: Active Directory binds and searches
//!
//! ## Core Components
//!
//! - [`config`]: layered configuration
//! - [`db`]: schema initialisation
//! - [`directory`]: Active Directory and static account backends
//! - [`error`]: centralized error handling and HTTP error responses
//! - [`metrics`]: process counters
//! - [`middleware`]: authentication, rate limiting, validation, security headers
//! - [`routes`]: HTTP handlers
//! - [`services`]: catalog, circulation and analytics logic
//! - [`state`]: shared application state
//! - [`storage`]: file store for uploaded documents
//! - [`types`]: data transfer objects

pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;
pub mod types;
pub mod util;

#[cfg(test)]
mod tests;

use std::path::PathBuf;

use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::middleware::validation::{max_body_size, JSON_BODY_LIMIT};
use crate::state::AppState;

/// Builds the complete HTTP application: API routes, optional static UI and
/// the middleware stack.
pub fn build_router(state: AppState) -> Router {
    let cfg = state.config.clone();
    let upload_limit = max_body_size(&cfg);

    let mut router = routes::api_routes(upload_limit);

    // Interface web statique, si présente
    if let Some(ui_root) = cfg.server.ui_dir.as_deref().map(PathBuf::from) {
        let index = ui_root.join("index.html");
        if ui_root.is_dir() && index.is_file() {
            let ui = ServeDir::new(ui_root).append_index_html_on_directories(true).not_found_service(ServeFile::new(index));
            router = router.fallback_service(ui);
        } else {
            tracing::warn!(ui_dir = %ui_root.display(), "UI directory missing, serving API only");
        }
    }

    let app = router
        .with_state(state)
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .layer(from_fn_with_state(cfg.clone(), middleware::validation::validate_request_middleware))
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(cfg, middleware::security_headers::security_headers_middleware));

    // CORS permissif en debug pour une UI servie à part
    if cfg!(debug_assertions) {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}
