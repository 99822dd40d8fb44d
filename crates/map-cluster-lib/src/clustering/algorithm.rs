//! The clustering algorithm seam

use super::{ClusterItem, ClusterSet};
use crate::Result;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag shared between a caller and a task
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Settings shared by the distance-based algorithms
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlgorithmConfig {
    /// Items closer than this many screen pixels at the current zoom end up
    /// in the same cluster.
    /// Default: 100
    pub max_distance_px: f64,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            max_distance_px: 100.0,
        }
    }
}

/// Owns an item set and groups it into clusters for a zoom level
pub trait Algorithm<T: ClusterItem>: Send + Sync {
    /// Add an item, replacing the position of an equal item already present
    fn add_item(&mut self, item: T) -> Result<()>;

    fn add_items(&mut self, items: Vec<T>) -> Result<()> {
        for item in items {
            self.add_item(item)?;
        }
        Ok(())
    }

    /// Returns whether the item was present
    fn remove_item(&mut self, item: &T) -> Result<bool>;

    fn remove_items(&mut self, items: &[T]) -> Result<usize> {
        let mut removed = 0;
        for item in items {
            if self.remove_item(item)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn clear_items(&mut self) -> Result<()>;

    /// Current items in insertion order
    fn items(&self) -> Vec<T>;

    fn max_distance_px(&self) -> f64;

    fn set_max_distance_px(&mut self, max_distance_px: f64);

    /// Cluster the items for `zoom`, or `None` if `cancel` fired first
    fn get_clusters_cancellable(&self, zoom: f64, cancel: &CancelToken) -> Option<ClusterSet<T>>;

    fn get_clusters(&self, zoom: f64) -> ClusterSet<T> {
        self.get_clusters_cancellable(zoom, &CancelToken::new())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
