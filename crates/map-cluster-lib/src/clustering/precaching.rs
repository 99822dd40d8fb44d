//! Per-zoom memoization around any [`Algorithm`]
//!
//! Results are cached by `floor(zoom)` in a small LRU. Every mutation clears
//! the cache while holding the inner write lock, and results are stored while
//! the inner read lock is still held, so a stale result can never be cached
//! after a mutation. After serving a zoom the neighbouring zoom levels are
//! computed in the background.

use super::{Algorithm, CancelToken, ClusterItem, ClusterSet};
use crate::{ClusterError, Result};

use lru::LruCache;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

/// Default number of zoom levels kept in the cache
pub const DEFAULT_CACHE_CAPACITY: usize = 5;

type SharedAlgorithm<T> = Arc<RwLock<Box<dyn Algorithm<T>>>>;
type SharedCache<T> = Arc<Mutex<LruCache<i32, ClusterSet<T>>>>;

/// Caching decorator; see the module docs
pub struct PreCachingAlgorithm<T: ClusterItem> {
    inner: SharedAlgorithm<T>,
    cache: SharedCache<T>,
    precache: bool,
    lock_timeout: Duration,
}

impl<T: ClusterItem> std::fmt::Debug for PreCachingAlgorithm<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreCachingAlgorithm")
            .field("cached_zooms", &self.cache.lock().len())
            .field("precache", &self.precache)
            .finish()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<T: ClusterItem> PreCachingAlgorithm<T> {
    pub fn new(inner: Box<dyn Algorithm<T>>) -> Self {
        Self::with_options(inner, DEFAULT_CACHE_CAPACITY, true, Duration::from_millis(50))
    }

    /// `capacity` is raised to 1 if zero; writes give up with
    /// [`ClusterError::LockTimeout`] after `lock_timeout`.
    pub fn with_options(
        inner: Box<dyn Algorithm<T>>,
        capacity: usize,
        precache: bool,
        lock_timeout: Duration,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(RwLock::new(inner)),
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            precache,
            lock_timeout,
        }
    }

    /// Zoom levels currently cached, most recently used first
    pub fn cached_zooms(&self) -> Vec<i32> {
        self.cache.lock().iter().map(|(zoom, _)| *zoom).collect()
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Box<dyn Algorithm<T>>>> {
        self.inner.try_write_for(self.lock_timeout).ok_or_else(|| {
            tracing::warn!(timeout = ?self.lock_timeout, "timed out waiting to mutate cached algorithm");
            ClusterError::LockTimeout
        })
    }

    /// Apply a mutation and drop every cached result
    fn mutate<R>(&self, f: impl FnOnce(&mut dyn Algorithm<T>) -> Result<R>) -> Result<R> {
        let mut inner = self.write()?;
        let result = f(inner.as_mut());
        self.cache.lock().clear();
        result
    }

    fn compute(
        inner: &SharedAlgorithm<T>,
        cache: &SharedCache<T>,
        zoom: i32,
        cancel: &CancelToken,
    ) -> Option<ClusterSet<T>> {
        let algorithm = inner.read();
        if let Some(hit) = cache.lock().get(&zoom) {
            return Some(hit.clone());
        }
        let clusters = algorithm.get_clusters_cancellable(f64::from(zoom), cancel)?;
        cache.lock().put(zoom, clusters.clone());
        Some(clusters)
    }

    fn precache_around(&self, zoom: i32) {
        if !self.precache {
            return;
        }
        for neighbour in [zoom + 1, zoom - 1] {
            if neighbour < 0 || self.cache.lock().contains(&neighbour) {
                continue;
            }
            let inner = self.inner.clone();
            let cache = self.cache.clone();
            rayon::spawn(move || {
                tracing::trace!(zoom = neighbour, "precaching clusters");
                let _ = Self::compute(&inner, &cache, neighbour, &CancelToken::new());
            });
        }
    }
}

impl<T: ClusterItem> Algorithm<T> for PreCachingAlgorithm<T> {
    fn add_item(&mut self, item: T) -> Result<()> {
        self.mutate(|a| a.add_item(item))
    }

    fn add_items(&mut self, items: Vec<T>) -> Result<()> {
        self.mutate(|a| a.add_items(items))
    }

    fn remove_item(&mut self, item: &T) -> Result<bool> {
        self.mutate(|a| a.remove_item(item))
    }

    fn remove_items(&mut self, items: &[T]) -> Result<usize> {
        self.mutate(|a| a.remove_items(items))
    }

    fn clear_items(&mut self) -> Result<()> {
        self.mutate(|a| a.clear_items())
    }

    fn items(&self) -> Vec<T> {
        self.inner.read().items()
    }

    fn max_distance_px(&self) -> f64 {
        self.inner.read().max_distance_px()
    }

    fn set_max_distance_px(&mut self, max_distance_px: f64) {
        let mut inner = self.inner.write();
        inner.set_max_distance_px(max_distance_px);
        self.cache.lock().clear();
    }

    fn get_clusters_cancellable(&self, zoom: f64, cancel: &CancelToken) -> Option<ClusterSet<T>> {
        let discrete_zoom = zoom.floor() as i32;
        let clusters = Self::compute(&self.inner, &self.cache, discrete_zoom, cancel)?;
        self.precache_around(discrete_zoom);
        Some(clusters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LatLng;
    use crate::clustering::{MapPoint, NonHierarchicalDistanceBasedAlgorithm};

    fn cached(precache: bool) -> PreCachingAlgorithm<MapPoint> {
        PreCachingAlgorithm::with_options(
            Box::new(NonHierarchicalDistanceBasedAlgorithm::default()),
            DEFAULT_CACHE_CAPACITY,
            precache,
            Duration::from_millis(50),
        )
    }

    fn points() -> Vec<MapPoint> {
        (0..100)
            .map(|i| MapPoint::new(i, LatLng::new((i % 10) as f64, (i / 10) as f64)))
            .collect()
    }

    #[test]
    fn test_repeated_query_is_served_from_cache() {
        let mut algorithm = cached(false);
        algorithm.add_items(points()).unwrap();
        let first = algorithm.get_clusters(6.3);
        let second = algorithm.get_clusters(6.9);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(algorithm.cached_zooms(), vec![6]);
    }

    #[test]
    fn test_mutation_invalidates_cache() {
        let mut algorithm = cached(false);
        algorithm.add_items(points()).unwrap();
        let before = algorithm.get_clusters(3.0);
        assert!(algorithm.remove_item(&MapPoint::new(0, LatLng::default())).unwrap());
        assert!(algorithm.cached_zooms().is_empty());

        let after = algorithm.get_clusters(3.0);
        assert!(!Arc::ptr_eq(&before, &after));
        let total: usize = after.iter().map(|c| c.size()).sum();
        assert_eq!(total, 99);
    }

    #[test]
    fn test_same_membership_as_inner_algorithm() {
        let mut plain = NonHierarchicalDistanceBasedAlgorithm::default();
        plain.add_items(points()).unwrap();
        let mut algorithm = cached(true);
        algorithm.add_items(points()).unwrap();
        for zoom in [2.0, 5.0, 8.0] {
            assert_eq!(*algorithm.get_clusters(zoom), *plain.get_clusters(zoom));
        }
    }

    #[test]
    fn test_lru_capacity() {
        let mut algorithm = PreCachingAlgorithm::with_options(
            Box::new(NonHierarchicalDistanceBasedAlgorithm::default()),
            2,
            false,
            Duration::from_millis(50),
        );
        algorithm.add_items(points()).unwrap();
        for zoom in [1.0, 2.0, 3.0] {
            algorithm.get_clusters(zoom);
        }
        assert_eq!(algorithm.cached_zooms(), vec![3, 2]);
    }

    #[test]
    fn test_write_times_out_while_read_locked() {
        let mut algorithm = cached(false);
        let inner = algorithm.inner.clone();
        let guard = inner.read();
        assert!(matches!(
            algorithm.add_item(MapPoint::new(1, LatLng::default())),
            Err(ClusterError::LockTimeout)
        ));
        drop(guard);
        algorithm.add_item(MapPoint::new(1, LatLng::default())).unwrap();
        assert_eq!(algorithm.items().len(), 1);
    }

    #[test]
    fn test_cancelled_query_is_not_cached() {
        let mut algorithm = cached(false);
        algorithm.add_items(points()).unwrap();
        let token = CancelToken::new();
        token.cancel();
        assert!(algorithm.get_clusters_cancellable(4.0, &token).is_none());
        assert!(algorithm.cached_zooms().is_empty());
    }
}
