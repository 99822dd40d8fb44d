//! Items and the clusters they are grouped into

use crate::LatLng;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Anything with a fixed position that can be clustered
///
/// Equality and hashing define item identity: caches and the algorithm's
/// item set are keyed by it. The position must not change while the item
/// is held by an algorithm.
pub trait ClusterItem: Clone + Eq + Hash + Send + Sync + 'static {
    fn position(&self) -> LatLng;

    /// Marker title used when the item is drawn on its own
    fn title(&self) -> Option<String> {
        None
    }

    /// Marker snippet used when the item is drawn on its own
    fn snippet(&self) -> Option<String> {
        None
    }
}

/// An immutable group of items around a centre position
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster<T> {
    position: LatLng,
    items: Vec<T>,
}

impl<T> Cluster<T> {
    pub fn new(position: LatLng, items: Vec<T>) -> Self {
        Self { position, items }
    }

    pub fn position(&self) -> LatLng {
        self.position
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }
}

// Positions come from validated items, so they are never NaN
impl<T: Eq> Eq for Cluster<T> {}

impl<T: Hash> Hash for Cluster<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.position.latitude.to_bits().hash(state);
        self.position.longitude.to_bits().hash(state);
        self.items.hash(state);
    }
}

/// Result of one clustering pass, shared between the cache, the manager and
/// the renderer
pub type ClusterSet<T> = Arc<Vec<Arc<Cluster<T>>>>;

/// A plain identified point, handy when no richer item type exists
#[derive(Debug, Clone)]
pub struct MapPoint {
    pub id: u64,
    pub position: LatLng,
    pub title: Option<String>,
}

impl MapPoint {
    pub fn new(id: u64, position: LatLng) -> Self {
        Self {
            id,
            position,
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Identity is the id alone
impl PartialEq for MapPoint {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MapPoint {}

impl Hash for MapPoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl ClusterItem for MapPoint {
    fn position(&self) -> LatLng {
        self.position
    }

    fn title(&self) -> Option<String> {
        self.title.clone()
    }
}
