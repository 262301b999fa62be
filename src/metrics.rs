use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Process-wide counters, exposed on `/metrics` and `/metrics/prometheus`.
#[derive(Clone)]
pub struct Metrics {
    pub logins: Arc<AtomicU64>,
    pub login_failures: Arc<AtomicU64>,
    pub loans_created: Arc<AtomicU64>,
    pub loans_returned: Arc<AtomicU64>,
    pub loans_renewed: Arc<AtomicU64>,
    pub reservations_created: Arc<AtomicU64>,
    pub penalties_issued: Arc<AtomicU64>,
    pub uploads: Arc<AtomicU64>,
    pub downloads: Arc<AtomicU64>,
    pub cache_hits: Arc<AtomicU64>,
    pub cache_misses: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            logins: Arc::new(AtomicU64::new(0)),
            login_failures: Arc::new(AtomicU64::new(0)),
            loans_created: Arc::new(AtomicU64::new(0)),
            loans_returned: Arc::new(AtomicU64::new(0)),
            loans_renewed: Arc::new(AtomicU64::new(0)),
            reservations_created: Arc::new(AtomicU64::new(0)),
            penalties_issued: Arc::new(AtomicU64::new(0)),
            uploads: Arc::new(AtomicU64::new(0)),
            downloads: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicU64::new(0)),
            cache_misses: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            logins: self.logins.load(Ordering::Relaxed),
            login_failures: self.login_failures.load(Ordering::Relaxed),
            loans_created: self.loans_created.load(Ordering::Relaxed),
            loans_returned: self.loans_returned.load(Ordering::Relaxed),
            loans_renewed: self.loans_renewed.load(Ordering::Relaxed),
            reservations_created: self.reservations_created.load(Ordering::Relaxed),
            penalties_issued: self.penalties_issued.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            catalog_cache_hits: self.cache_hits.load(Ordering::Relaxed),
            catalog_cache_misses: self.cache_misses.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub logins: u64,
    pub login_failures: u64,
    pub loans_created: u64,
    pub loans_returned: u64,
    pub loans_renewed: u64,
    pub reservations_created: u64,
    pub penalties_issued: u64,
    pub uploads: u64,
    pub downloads: u64,
    pub catalog_cache_hits: u64,
    pub catalog_cache_misses: u64,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    /// Counter name, help text and value, in exposition order.
    pub fn counters(&self) -> [(&'static str, &'static str, u64); 11] {
        [
            ("logins", "Successful logins", self.logins),
            ("login_failures", "Rejected logins", self.login_failures),
            ("loans_created", "Loans created", self.loans_created),
            ("loans_returned", "Loans returned", self.loans_returned),
            ("loans_renewed", "Loan renewals", self.loans_renewed),
            ("reservations_created", "Reservations created", self.reservations_created),
            ("penalties_issued", "Penalties issued", self.penalties_issued),
            ("uploads", "Document uploads", self.uploads),
            ("downloads", "Document downloads", self.downloads),
            ("catalog_cache_hits", "Catalog search cache hits", self.catalog_cache_hits),
            ("catalog_cache_misses", "Catalog search cache misses", self.catalog_cache_misses),
        ]
    }
}
