use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::directory::{self, DirectoryService};
use crate::metrics::Metrics;
use crate::middleware::EndpointRateLimiter;
use crate::services::cache::CatalogCache;
use crate::storage::{DocumentStore, LocalStore};

/// Per-endpoint limits as (endpoint, max requests, window seconds).
pub const ENDPOINT_LIMITS: &[(&str, usize, u64)] = &[
    ("/auth/login", 10, 60),
    ("/catalog/search", 600, 60),
    ("/documents/{id}/file", 120, 60),
    ("/analytics/export", 20, 60),
];

/// The shared application state.
///
/// Cloned into every handler; all members are cheap handles.
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Arc<AppConfig>,
    pub metrics: Metrics,
    pub rate_limiter: EndpointRateLimiter,
    /// Active Directory, or the static account list in development.
    pub directory: Arc<dyn DirectoryService>,
    /// Where uploaded academic documents live.
    pub store: Arc<dyn DocumentStore>,
    pub catalog_cache: CatalogCache,
}

impl AppState {
    /// Builds the state with the directory and store selected by `config`.
    pub fn new(db: sqlx::SqlitePool, config: AppConfig) -> Self {
        let directory = directory::from_config(&config.directory);
        let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::new(config.storage.root.clone()));
        let catalog_cache =
            CatalogCache::new(config.cache.capacity, Duration::from_secs(config.cache.ttl_seconds));

        Self {
            db,
            config: Arc::new(config),
            metrics: Metrics::new(),
            rate_limiter: EndpointRateLimiter::new().with_limits(ENDPOINT_LIMITS.to_vec()),
            directory,
            store,
            catalog_cache,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn DirectoryService>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = store;
        self
    }
}
