//! Greedy distance-based clustering
//!
//! Items are projected once onto a unit Mercator world and indexed in a
//! [`PointQuadTree`]. For a zoom level, items are visited in insertion order;
//! every item not yet claimed seeds a cluster at its own position and claims
//! all unclaimed items within `max_distance_px` screen pixels. Claimed items
//! are never reassigned, so the result is deterministic but not minimal.

use super::{Algorithm, AlgorithmConfig, CancelToken, Cluster, ClusterItem, ClusterSet};
use crate::projection::{SphericalMercatorProjection, bounds, bounds_around};
use crate::utils::{clamp, clamp_latitude, wrap};
use crate::{ClusterError, LatLng, PointQuadTree, Result};

use geo::Point;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// How many seeds are processed between two cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 64;

/// Per-item bookkeeping
#[derive(Debug, Clone, Copy)]
struct Placement {
    /// Insertion sequence number, gives the deterministic seed order
    seq: u64,
    point: Point<f64>,
}

/// Distance-based clustering over a quadtree
#[derive(Debug, Clone)]
pub struct NonHierarchicalDistanceBasedAlgorithm<T: ClusterItem> {
    config: AlgorithmConfig,
    projection: SphericalMercatorProjection,
    placements: HashMap<T, Placement>,
    quadtree: PointQuadTree<T>,
    next_seq: u64,
}

impl<T: ClusterItem> Default for NonHierarchicalDistanceBasedAlgorithm<T> {
    fn default() -> Self {
        Self::new(AlgorithmConfig::default())
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<T: ClusterItem> NonHierarchicalDistanceBasedAlgorithm<T> {
    pub fn new(config: AlgorithmConfig) -> Self {
        Self {
            config,
            projection: SphericalMercatorProjection::new(1.0),
            placements: HashMap::new(),
            quadtree: PointQuadTree::new(bounds(0.0, 1.0, 0.0, 1.0)),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    fn project(&self, position: LatLng) -> Result<Point<f64>> {
        if !position.is_finite() {
            return Err(ClusterError::InvalidCoordinate {
                x: position.latitude,
                y: position.longitude,
            });
        }
        let clamped = LatLng::new(
            clamp_latitude(position.latitude),
            wrap(position.longitude, -180.0, 180.0),
        );
        let point = self.projection.to_point(clamped);
        Ok(Point::new(clamp(point.x(), 0.0, 1.0), clamp(point.y(), 0.0, 1.0)))
    }

    /// Half-side of the neighbourhood square in world units for `zoom`
    fn span(&self, zoom: f64) -> f64 {
        let discrete_zoom = zoom.floor() as i32;
        self.config.max_distance_px / 2f64.powi(discrete_zoom) / 256.0
    }

    fn ordered(&self) -> Vec<(&T, &Placement)> {
        let mut ordered: Vec<_> = self.placements.iter().collect();
        ordered.sort_unstable_by_key(|(_, placement)| placement.seq);
        ordered
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<T: ClusterItem> Algorithm<T> for NonHierarchicalDistanceBasedAlgorithm<T> {
    fn add_item(&mut self, item: T) -> Result<()> {
        let point = self.project(item.position())?;
        let seq = match self.placements.get(&item).copied() {
            Some(previous) => {
                self.quadtree.remove(&item, previous.point);
                previous.seq
            }
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.quadtree.insert(item.clone(), point)?;
        self.placements.insert(item, Placement { seq, point });
        Ok(())
    }

    fn remove_item(&mut self, item: &T) -> Result<bool> {
        match self.placements.remove(item) {
            Some(placement) => {
                self.quadtree.remove(item, placement.point);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear_items(&mut self) -> Result<()> {
        self.placements.clear();
        self.quadtree.clear();
        Ok(())
    }

    fn items(&self) -> Vec<T> {
        self.ordered()
            .into_iter()
            .map(|(item, _)| item.clone())
            .collect()
    }

    fn max_distance_px(&self) -> f64 {
        self.config.max_distance_px
    }

    fn set_max_distance_px(&mut self, max_distance_px: f64) {
        self.config.max_distance_px = max_distance_px;
    }

    fn get_clusters_cancellable(&self, zoom: f64, cancel: &CancelToken) -> Option<ClusterSet<T>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("non_hierarchical::get_clusters");

        let span = self.span(zoom);
        let span_squared = span * span;
        let mut visited: HashSet<&T> = HashSet::with_capacity(self.placements.len());
        let mut clusters = Vec::new();
        let mut neighbours = Vec::new();

        for (index, (seed, placement)) in self.ordered().into_iter().enumerate() {
            if index % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                tracing::trace!(zoom, index, "clustering cancelled");
                return None;
            }
            if visited.contains(seed) {
                continue;
            }

            neighbours.clear();
            self.quadtree
                .search_into(bounds_around(placement.point, span), &mut neighbours);

            let mut members: Vec<(&T, u64)> = neighbours
                .iter()
                .copied()
                .filter(|item| !visited.contains(*item))
                .filter_map(|item| {
                    let p = self.placements.get(item)?;
                    let dx = p.point.x() - placement.point.x();
                    let dy = p.point.y() - placement.point.y();
                    (dx * dx + dy * dy <= span_squared).then_some((item, p.seq))
                })
                .collect();
            members.sort_unstable_by_key(|(_, seq)| *seq);

            let mut items = Vec::with_capacity(members.len());
            for (item, _) in members {
                if visited.insert(item) {
                    items.push(item.clone());
                }
            }
            clusters.push(Arc::new(Cluster::new(seed.position(), items)));
        }

        tracing::trace!(zoom, clusters = clusters.len(), items = visited.len(), "clustered");
        Some(Arc::new(clusters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::MapPoint;

    fn point(id: u64, lat: f64, lng: f64) -> MapPoint {
        MapPoint::new(id, LatLng::new(lat, lng))
    }

    fn algorithm(points: &[MapPoint]) -> NonHierarchicalDistanceBasedAlgorithm<MapPoint> {
        let mut algorithm = NonHierarchicalDistanceBasedAlgorithm::default();
        algorithm.add_items(points.to_vec()).unwrap();
        algorithm
    }

    fn cluster_of(clusters: &ClusterSet<MapPoint>, id: u64) -> usize {
        clusters
            .iter()
            .position(|c| c.items().iter().any(|i| i.id == id))
            .unwrap()
    }

    #[test]
    fn test_empty_and_single() {
        let empty = algorithm(&[]);
        assert!(empty.get_clusters(10.0).is_empty());

        let single = algorithm(&[point(1, 10.0, 10.0)]);
        let clusters = single.get_clusters(3.0);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].size(), 1);
        assert_eq!(clusters[0].position(), LatLng::new(10.0, 10.0));
    }

    #[test]
    fn test_nearby_items_cluster_and_far_item_stays_apart() {
        let algorithm = algorithm(&[point(1, 0.0, 0.0), point(2, 0.0, 0.0001), point(3, 50.0, 50.0)]);
        let clusters = algorithm.get_clusters(10.0);
        assert_eq!(clusters.len(), 2);
        assert_eq!(cluster_of(&clusters, 1), cluster_of(&clusters, 2));
        assert_ne!(cluster_of(&clusters, 1), cluster_of(&clusters, 3));
        assert_eq!(clusters[cluster_of(&clusters, 1)].position(), LatLng::new(0.0, 0.0));
    }

    #[test]
    fn test_duplicates_collapse() {
        let points: Vec<_> = (0..200).map(|i| point(i, 12.5, -3.25)).collect();
        let clusters = algorithm(&points).get_clusters(18.0);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].size(), 200);
    }

    #[test]
    fn test_every_item_in_exactly_one_cluster() {
        let mut seed = 7u64;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 11) as f64 / (1u64 << 53) as f64
        };
        let points: Vec<_> = (0..2000)
            .map(|i| point(i, next() * 20.0 + 40.0, next() * 30.0 - 10.0))
            .collect();
        let algorithm = algorithm(&points);
        for zoom in [0.0, 3.0, 6.5, 9.0, 14.0] {
            let clusters = algorithm.get_clusters(zoom);
            let mut seen = HashSet::new();
            for cluster in clusters.iter() {
                assert!(cluster.size() > 0);
                for item in cluster.items() {
                    assert!(seen.insert(item.id), "item {} clustered twice", item.id);
                }
            }
            assert_eq!(seen.len(), points.len(), "zoom {zoom}");
        }
    }

    #[test]
    fn test_threshold_at_zoom() {
        // 100 px at zoom 10 is 100 / 256 / 1024 of the world width
        let span_degrees = 100.0 / 256.0 / 1024.0 * 360.0;
        let close = algorithm(&[point(1, 0.0, 0.0), point(2, 0.0, span_degrees * 0.9)]);
        assert_eq!(close.get_clusters(10.0).len(), 1);

        let apart = algorithm(&[point(1, 0.0, 0.0), point(2, 0.0, span_degrees * 1.1)]);
        assert_eq!(apart.get_clusters(10.0).len(), 2);
        // Fractional zoom uses the floor
        assert_eq!(apart.get_clusters(9.99).len(), 1);
    }

    #[test]
    fn test_corner_of_search_box_is_not_in_range() {
        // Inside the square but outside the circle of radius span
        let span_degrees = 100.0 / 256.0 / 1024.0 * 360.0;
        let d = span_degrees * 0.8;
        let algorithm = algorithm(&[point(1, 0.0, 0.0), point(2, d, d)]);
        assert_eq!(algorithm.get_clusters(10.0).len(), 2);
    }

    #[test]
    fn test_claimed_items_are_not_reassigned() {
        let span_degrees = 100.0 / 256.0 / 1024.0 * 360.0;
        // 1 claims 2; 3 is within range of 2 but not of 1
        let algorithm = algorithm(&[
            point(1, 0.0, 0.0),
            point(2, 0.0, span_degrees * 0.9),
            point(3, 0.0, span_degrees * 1.8),
        ]);
        let clusters = algorithm.get_clusters(10.0);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].items().iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(clusters[1].items()[0].id, 3);
    }

    #[test]
    fn test_readd_replaces_position_and_remove() {
        let mut algorithm = algorithm(&[point(1, 0.0, 0.0), point(2, 0.0, 0.0)]);
        assert_eq!(algorithm.get_clusters(10.0).len(), 1);

        algorithm.add_item(point(2, 45.0, 45.0)).unwrap();
        assert_eq!(algorithm.len(), 2);
        assert_eq!(algorithm.get_clusters(10.0).len(), 2);
        assert_eq!(algorithm.items().iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2]);

        assert!(algorithm.remove_item(&point(2, 0.0, 0.0)).unwrap());
        assert!(!algorithm.remove_item(&point(2, 0.0, 0.0)).unwrap());
        assert_eq!(algorithm.get_clusters(10.0).len(), 1);

        algorithm.clear_items().unwrap();
        assert!(algorithm.is_empty());
        assert!(algorithm.get_clusters(10.0).is_empty());
    }

    #[test]
    fn test_invalid_positions() {
        let mut algorithm = NonHierarchicalDistanceBasedAlgorithm::default();
        assert!(matches!(
            algorithm.add_item(point(1, f64::NAN, 0.0)),
            Err(ClusterError::InvalidCoordinate { .. })
        ));
        // Poles are clamped into the Mercator range
        algorithm.add_item(point(2, 90.0, 0.0)).unwrap();
        assert_eq!(algorithm.get_clusters(1.0).len(), 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let algorithm = algorithm(&[point(1, 0.0, 0.0)]);
        let token = CancelToken::new();
        token.cancel();
        assert!(algorithm.get_clusters_cancellable(5.0, &token).is_none());
    }

    /// Fires a cancel token once positions have been read a set number of
    /// times, i.e. part way through seeding
    #[derive(Clone)]
    struct Tripwire {
        id: u64,
        position: LatLng,
        fuse: Arc<parking_lot::Mutex<Option<(usize, CancelToken)>>>,
    }

    impl PartialEq for Tripwire {
        fn eq(&self, other: &Self) -> bool {
            self.id == other.id
        }
    }

    impl Eq for Tripwire {}

    impl std::hash::Hash for Tripwire {
        fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
            self.id.hash(state);
        }
    }

    impl ClusterItem for Tripwire {
        fn position(&self) -> LatLng {
            if let Some((remaining, token)) = self.fuse.lock().as_mut() {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    token.cancel();
                }
            }
            self.position
        }
    }

    #[test]
    fn test_cancelled_while_seeding() {
        let fuse = Arc::new(parking_lot::Mutex::new(None));
        let items: Vec<_> = (0..200u64)
            .map(|i| Tripwire {
                id: i,
                position: LatLng::new((i % 20) as f64 * 4.0 - 40.0, (i / 20) as f64 * 10.0 - 50.0),
                fuse: fuse.clone(),
            })
            .collect();
        let mut algorithm = NonHierarchicalDistanceBasedAlgorithm::default();
        algorithm.add_items(items).unwrap();

        let token = CancelToken::new();
        *fuse.lock() = Some((10, token.clone()));
        assert!(algorithm.get_clusters_cancellable(10.0, &token).is_none());
        assert!(token.is_cancelled());

        *fuse.lock() = None;
        let clusters = algorithm
            .get_clusters_cancellable(10.0, &CancelToken::new())
            .unwrap();
        assert_eq!(clusters.len(), 200);
    }
}
