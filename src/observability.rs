//! Observability hooks for cache operations.
//!
//! Implement [`CacheMetrics`] to feed cache statistics into your monitoring
//! system and install it with [`Cache::with_metrics`](crate::Cache::with_metrics):
//!
//! ```ignore
//! use cache_through::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hit(&self, key: &str, duration: Duration) {
//!         // counter!("cache_hits").inc();
//!         // histogram!("cache_latency").record(duration);
//!     }
//!     // ... implement other methods
//! }
//!
//! let cache = Cache::new(source, repository)
//!     .with_metrics(Box::new(PrometheusMetrics));
//! ```
//!
//! # Events
//!
//! | Method | Reported when |
//! |--------|---------------|
//! | `record_hit()` | A query was answered from the hit and entity stores |
//! | `record_miss()` | A query reached the source |
//! | `record_invalidation()` | A hit was deleted by the invalidation cascade |
//! | `record_error()` | A store failure was swallowed and the read degraded |
//!
//! Keys are encoded query keys ([`HitId`](crate::HitId) strings).
//!
//! The trait's default methods log through the `log` crate. [`NoOpMetrics`],
//! the engine default, discards everything.

use std::time::Duration;

/// Trait for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Record a query served from the cache.
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", key, duration);
    }

    /// Record a query that had to reach the source.
    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", key, duration);
    }

    /// Record the removal of a cached query result.
    fn record_invalidation(&self, key: &str) {
        debug!("Cache INVALIDATE: {}", key);
    }

    /// Record a swallowed store error.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_invalidation(&self, _key: &str) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        invalidations: AtomicUsize,
    }

    impl CacheMetrics for Counting {
        fn record_invalidation(&self, _key: &str) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_noop_metrics() {
        let metrics = NoOpMetrics;
        metrics.record_hit("key", Duration::from_secs(1));
        metrics.record_miss("key", Duration::from_secs(2));
        metrics.record_invalidation("key");
        metrics.record_error("key", "boom");
    }

    #[test]
    fn test_default_methods_can_be_overridden_selectively() {
        let metrics = Counting::default();
        metrics.record_hit("key", Duration::from_millis(1));
        metrics.record_invalidation("key");
        metrics.record_invalidation("other");
        assert_eq!(metrics.invalidations.load(Ordering::SeqCst), 2);
    }
}
