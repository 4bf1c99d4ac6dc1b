//! Snapshot cache for the service binary.
//!
//! Holds the results of the last successful discovery pass so that HTTP
//! handlers can answer without waiting for a pass.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use clusterscope_core::DiscoveryResults;
use parking_lot::RwLock;

/// A discovery snapshot and when it was taken.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Results of the pass.
    pub results: Arc<DiscoveryResults>,
    /// When the pass finished.
    pub taken_at: DateTime<Utc>,
}

/// Keeps the latest successful snapshot.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    latest: RwLock<Option<Snapshot>>,
}

impl SnapshotCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached snapshot.
    pub fn store(&self, results: DiscoveryResults) {
        *self.latest.write() = Some(Snapshot {
            results: Arc::new(results),
            taken_at: Utc::now(),
        });
    }

    /// Get the latest snapshot, if any pass has succeeded.
    #[must_use]
    pub fn latest(&self) -> Option<Snapshot> {
        self.latest.read().clone()
    }

    /// Age of the latest snapshot.
    #[must_use]
    pub fn age(&self) -> Option<Duration> {
        self.latest
            .read()
            .as_ref()
            .map(|s| Utc::now().signed_duration_since(s.taken_at))
    }

    /// Check if no snapshot has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latest.read().is_none()
    }

    /// Drop the cached snapshot.
    pub fn clear(&self) {
        *self.latest.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results_with_running(count: usize) -> DiscoveryResults {
        DiscoveryResults {
            pods_running_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn empty_until_stored() {
        let cache = SnapshotCache::new();
        assert!(cache.is_empty());
        assert!(cache.latest().is_none());
        assert!(cache.age().is_none());
    }

    #[test]
    fn store_replaces_snapshot() {
        let cache = SnapshotCache::new();
        cache.store(results_with_running(1));
        cache.store(results_with_running(5));

        let snapshot = cache.latest().unwrap();
        assert_eq!(snapshot.results.pods_running_count, 5);
        assert!(cache.age().unwrap() >= Duration::zero());
    }

    #[test]
    fn clear_drops_snapshot() {
        let cache = SnapshotCache::new();
        cache.store(results_with_running(1));
        cache.clear();
        assert!(cache.is_empty());
    }
}
