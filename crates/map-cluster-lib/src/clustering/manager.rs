//! ClusterManager - owns the items and coordinates asynchronous re-clustering
//!
//! Mutations take the algorithm write lock with a bounded wait; clustering
//! runs on the rayon pool under the read lock. Every [`ClusterManager::cluster`]
//! call starts a new generation and cancels the previous task. A finished
//! task publishes to the renderer through the control thread only while its
//! generation is still the latest, checked before posting and again on the
//! control thread, so a superseded result is never rendered.

use super::renderer::{
    ClusterClickListener, ClusterInfoWindowClickListener, ClusterItemClickListener,
    ClusterItemInfoWindowClickListener, ClusterListeners, ClusterRenderer, DefaultClusterRenderer,
    RendererConfig, RendererContext,
};
use super::{
    Algorithm, AlgorithmConfig, CancelToken, ClusterItem, NonHierarchicalDistanceBasedAlgorithm,
    DEFAULT_CACHE_CAPACITY, PreCachingAlgorithm,
};
use crate::control::ControlHandle;
use crate::map::{CameraPosition, MapViewport, MarkerId};
use crate::marker_manager::MarkerManager;
use crate::{ClusterError, Result};

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Configuration of a [`ClusterManager`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ManagerConfig {
    /// How long a mutation waits for running clustering tasks before giving
    /// up with [`ClusterError::LockTimeout`].
    /// Default: 50ms
    pub lock_timeout: Duration,
    /// Compute neighbouring zoom levels in the background.
    /// Default: true
    pub precache: bool,
    /// Number of zoom levels kept by the cluster cache.
    /// Default: 5
    pub cache_capacity: usize,
    pub algorithm: AlgorithmConfig,
    pub renderer: RendererConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(50),
            precache: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            algorithm: AlgorithmConfig::default(),
            renderer: RendererConfig::default(),
        }
    }
}

/// Counts in-flight clustering work so callers can wait for quiescence
#[derive(Default)]
struct TaskTracker {
    active: Mutex<usize>,
    idle: Condvar,
}

struct TaskGuard(Arc<TaskTracker>);

impl TaskTracker {
    fn begin(self: &Arc<Self>) -> TaskGuard {
        *self.active.lock() += 1;
        TaskGuard(self.clone())
    }

    fn is_idle(&self) -> bool {
        *self.active.lock() == 0
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut active = self.active.lock();
        while *active > 0 {
            if self.idle.wait_until(&mut active, deadline).timed_out() {
                return *active == 0;
            }
        }
        true
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut active = self.0.active.lock();
        *active -= 1;
        if *active == 0 {
            self.0.idle.notify_all();
        }
    }
}

struct ManagerShared<T: ClusterItem> {
    config: ManagerConfig,
    context: RendererContext,
    algorithm: RwLock<PreCachingAlgorithm<T>>,
    renderer: RwLock<Arc<dyn ClusterRenderer<T>>>,
    listeners: Mutex<ClusterListeners<T>>,
    previous_camera: Mutex<Option<CameraPosition>>,
    generation: AtomicU64,
    cancel: Mutex<CancelToken>,
    tasks: Arc<TaskTracker>,
}

/// Entry point for clustering markers on a map
pub struct ClusterManager<T: ClusterItem> {
    shared: Arc<ManagerShared<T>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<T: ClusterItem> ClusterManager<T> {
    /// Create a manager with the distance-based algorithm and the default
    /// renderer. Two marker collections are created in `markers`, one for
    /// item markers and one for cluster markers.
    pub fn new(
        viewport: Arc<dyn MapViewport>,
        markers: Arc<MarkerManager>,
        control: ControlHandle,
        config: ManagerConfig,
    ) -> Self {
        let context = RendererContext {
            viewport,
            item_collection: markers.new_collection(),
            cluster_collection: markers.new_collection(),
            markers,
            control,
        };
        let algorithm = PreCachingAlgorithm::with_options(
            Box::new(NonHierarchicalDistanceBasedAlgorithm::new(config.algorithm.clone())),
            config.cache_capacity,
            config.precache,
            config.lock_timeout,
        );
        let renderer: Arc<dyn ClusterRenderer<T>> =
            Arc::new(DefaultClusterRenderer::new(context.clone(), config.renderer.clone()));
        renderer.on_add();

        Self {
            shared: Arc::new(ManagerShared {
                config,
                context,
                algorithm: RwLock::new(algorithm),
                renderer: RwLock::new(renderer),
                listeners: Mutex::new(ClusterListeners::default()),
                previous_camera: Mutex::new(None),
                generation: AtomicU64::new(0),
                cancel: Mutex::new(CancelToken::new()),
                tasks: Arc::new(TaskTracker::default()),
            }),
        }
    }

    /// Surroundings to build a custom renderer with
    pub fn context(&self) -> &RendererContext {
        &self.shared.context
    }

    pub fn markers(&self) -> &Arc<MarkerManager> {
        &self.shared.context.markers
    }

    pub fn renderer(&self) -> Arc<dyn ClusterRenderer<T>> {
        self.shared.renderer.read().clone()
    }

    /// Number of `cluster()` calls so far
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, PreCachingAlgorithm<T>>> {
        let timeout = self.shared.config.lock_timeout;
        self.shared.algorithm.try_write_for(timeout).ok_or_else(|| {
            tracing::warn!(?timeout, "timed out waiting for clustering to finish, mutation skipped");
            ClusterError::LockTimeout
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, PreCachingAlgorithm<T>>> {
        let timeout = self.shared.config.lock_timeout;
        self.shared.algorithm.try_read_for(timeout).ok_or_else(|| {
            tracing::warn!(?timeout, "timed out waiting for the algorithm");
            ClusterError::LockTimeout
        })
    }

    /// Mutations do not re-cluster; call [`cluster`](Self::cluster) afterwards.
    pub fn add_item(&self, item: T) -> Result<()> {
        self.write()?.add_item(item)
    }

    pub fn add_items(&self, items: Vec<T>) -> Result<()> {
        self.write()?.add_items(items)
    }

    pub fn remove_item(&self, item: &T) -> Result<bool> {
        self.write()?.remove_item(item)
    }

    pub fn remove_items(&self, items: &[T]) -> Result<usize> {
        self.write()?.remove_items(items)
    }

    pub fn clear_items(&self) -> Result<()> {
        self.write()?.clear_items()
    }

    pub fn items(&self) -> Result<Vec<T>> {
        Ok(self.read()?.items())
    }

    pub fn set_max_distance_px(&self, max_distance_px: f64) -> Result<()> {
        self.write()?.set_max_distance_px(max_distance_px);
        Ok(())
    }

    /// Swap the algorithm, moving the current items into it
    pub fn set_algorithm(&self, algorithm: Box<dyn Algorithm<T>>) -> Result<()> {
        {
            let mut current = self.write()?;
            let mut replacement = PreCachingAlgorithm::with_options(
                algorithm,
                self.shared.config.cache_capacity,
                self.shared.config.precache,
                self.shared.config.lock_timeout,
            );
            replacement.add_items(current.items())?;
            *current = replacement;
        }
        self.cluster();
        Ok(())
    }

    /// Swap the renderer: detach and remove the old one, clear the marker
    /// collections, attach the new one and re-cluster
    pub fn set_renderer(&self, renderer: Arc<dyn ClusterRenderer<T>>) {
        let old = std::mem::replace(&mut *self.shared.renderer.write(), renderer.clone());
        old.set_listeners(ClusterListeners::default());
        // Detach first so queued marker work of the old renderer cannot
        // repopulate the collections after they are cleared
        old.on_remove();

        let context = &self.shared.context;
        context.markers.clear(&context.item_collection);
        context.markers.clear(&context.cluster_collection);

        renderer.on_add();
        renderer.set_listeners(self.shared.listeners.lock().clone());
        self.cluster();
    }

    fn update_listeners(&self, update: impl FnOnce(&mut ClusterListeners<T>)) {
        let listeners = {
            let mut listeners = self.shared.listeners.lock();
            update(&mut listeners);
            listeners.clone()
        };
        self.renderer().set_listeners(listeners);
    }

    pub fn set_on_cluster_click_listener(&self, listener: Option<ClusterClickListener<T>>) {
        self.update_listeners(|l| l.on_cluster_click = listener);
    }

    pub fn set_on_cluster_info_window_click_listener(
        &self,
        listener: Option<ClusterInfoWindowClickListener<T>>,
    ) {
        self.update_listeners(|l| l.on_cluster_info_window_click = listener);
    }

    pub fn set_on_cluster_item_click_listener(&self, listener: Option<ClusterItemClickListener<T>>) {
        self.update_listeners(|l| l.on_cluster_item_click = listener);
    }

    pub fn set_on_cluster_item_info_window_click_listener(
        &self,
        listener: Option<ClusterItemInfoWindowClickListener<T>>,
    ) {
        self.update_listeners(|l| l.on_cluster_item_info_window_click = listener);
    }

    /// Marker click from the map widget; `true` when a listener consumed it
    pub fn on_marker_click(&self, marker: MarkerId) -> bool {
        self.markers().on_marker_click(marker)
    }

    pub fn on_info_window_click(&self, marker: MarkerId) {
        self.markers().on_info_window_click(marker);
    }

    /// Camera moved; re-clusters only when the zoom level changed
    pub fn on_camera_change(&self) {
        let position = self.shared.context.viewport.camera_position();
        {
            let mut previous = self.shared.previous_camera.lock();
            if previous.is_some_and(|p| p.zoom == position.zoom) {
                return;
            }
            *previous = Some(position);
        }
        self.cluster();
    }

    /// Start clustering at the current zoom, superseding any running task
    pub fn cluster(&self) {
        let shared = &self.shared;
        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancelToken::new();
        std::mem::replace(&mut *shared.cancel.lock(), cancel.clone()).cancel();

        let zoom = shared.context.viewport.camera_position().zoom;
        tracing::debug!(generation, zoom, "clustering requested");
        let task = shared.tasks.begin();
        let shared = shared.clone();
        rayon::spawn(move || shared.run_clustering(generation, zoom, cancel, task));
    }

    /// No clustering task is running or waiting to publish
    pub fn is_idle(&self) -> bool {
        self.shared.tasks.is_idle()
    }

    /// Block until idle or until `timeout` elapses; returns whether idle
    ///
    /// Publication goes through the control thread, so this must not be
    /// called from it.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.tasks.wait_idle(timeout)
    }
}

impl<T: ClusterItem> ManagerShared<T> {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn run_clustering(self: Arc<Self>, generation: u64, zoom: f64, cancel: CancelToken, task: TaskGuard) {
        #[cfg(feature = "profiling")]
        profiling::scope!("manager::run_clustering");

        let clusters = {
            let Some(algorithm) = self.algorithm.try_read_for(self.config.lock_timeout) else {
                tracing::warn!(generation, "timed out waiting for the algorithm, clustering skipped");
                return;
            };
            if cancel.is_cancelled() {
                return;
            }
            algorithm.get_clusters_cancellable(zoom, &cancel)
        };
        let Some(clusters) = clusters else {
            tracing::trace!(generation, "clustering cancelled");
            return;
        };
        if !self.is_current(generation) {
            tracing::debug!(generation, "discarding stale clusters");
            return;
        }

        let shared = self.clone();
        let posted = self.context.control.post(move || {
            let _task = task;
            if !shared.is_current(generation) {
                tracing::debug!(generation, "discarding stale clusters");
                return;
            }
            tracing::debug!(generation, clusters = clusters.len(), "publishing clusters");
            let renderer = shared.renderer.read().clone();
            renderer.on_clusters_changed(clusters);
        });
        if !posted {
            tracing::warn!(generation, "control loop closed, clusters dropped");
        }
    }
}

impl<T: ClusterItem> Drop for ClusterManager<T> {
    fn drop(&mut self) {
        self.shared.cancel.lock().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::{Cluster, ClusterSet, MapPoint};
    use crate::control::ControlLoop;
    use crate::map::{InMemorySurface, StaticViewport};
    use crate::{LatLng, LatLngBounds};

    #[derive(Default)]
    struct RecordingRenderer {
        published: Mutex<Vec<ClusterSet<MapPoint>>>,
        events: Mutex<Vec<&'static str>>,
    }

    impl ClusterRenderer<MapPoint> for RecordingRenderer {
        fn on_add(&self) {
            self.events.lock().push("add");
        }

        fn on_remove(&self) {
            self.events.lock().push("remove");
        }

        fn on_clusters_changed(&self, clusters: ClusterSet<MapPoint>) {
            self.published.lock().push(clusters);
        }

        fn set_listeners(&self, _listeners: ClusterListeners<MapPoint>) {
            self.events.lock().push("listeners");
        }
    }

    struct Fixture {
        control: ControlLoop,
        viewport: Arc<StaticViewport>,
        surface: InMemorySurface,
        manager: ClusterManager<MapPoint>,
    }

    fn fixture(zoom: f64) -> Fixture {
        let control = ControlLoop::new();
        let viewport = Arc::new(StaticViewport::new(
            CameraPosition::new(LatLng::default(), zoom),
            LatLngBounds::world(),
        ));
        let surface = InMemorySurface::new();
        let markers = Arc::new(MarkerManager::new(surface.clone()));
        let manager = ClusterManager::new(
            viewport.clone(),
            markers,
            control.handle(),
            ManagerConfig {
                precache: false,
                ..Default::default()
            },
        );
        Fixture {
            control,
            viewport,
            surface,
            manager,
        }
    }

    fn points(n: u64) -> Vec<MapPoint> {
        (0..n)
            .map(|i| MapPoint::new(i, LatLng::new((i % 7) as f64 * 5.0, (i / 7) as f64 * 5.0)))
            .collect()
    }

    fn settle(fixture: &Fixture) {
        assert!(
            fixture
                .control
                .run_until(Duration::from_secs(5), || fixture.manager.is_idle())
        );
    }

    #[test]
    fn test_rapid_cluster_calls_publish_once() {
        let fixture = fixture(3.0);
        fixture.manager.add_items(points(40)).unwrap();

        let recorder = Arc::new(RecordingRenderer::default());
        fixture.manager.set_renderer(recorder.clone());
        fixture.manager.cluster();
        fixture.manager.cluster();
        assert_eq!(fixture.manager.generation(), 3);
        settle(&fixture);

        let published = recorder.published.lock();
        assert_eq!(published.len(), 1);
        let total: usize = published[0].iter().map(|c| c.size()).sum();
        assert_eq!(total, 40);
    }

    #[test]
    fn test_publication_reflects_latest_items() {
        let fixture = fixture(3.0);
        let recorder = Arc::new(RecordingRenderer::default());
        fixture.manager.set_renderer(recorder.clone());
        settle(&fixture);
        assert_eq!(recorder.published.lock().len(), 1);

        fixture.manager.add_items(points(10)).unwrap();
        fixture.manager.cluster();
        settle(&fixture);
        let published = recorder.published.lock();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].iter().map(|c| c.size()).sum::<usize>(), 10);
    }

    #[test]
    fn test_camera_change_only_reclusters_on_zoom() {
        let fixture = fixture(3.0);
        fixture.manager.on_camera_change();
        assert_eq!(fixture.manager.generation(), 1);

        fixture
            .viewport
            .set_camera_position(CameraPosition::new(LatLng::new(10.0, 10.0), 3.0));
        fixture.manager.on_camera_change();
        assert_eq!(fixture.manager.generation(), 1);

        fixture
            .viewport
            .set_camera_position(CameraPosition::new(LatLng::new(10.0, 10.0), 4.0));
        fixture.manager.on_camera_change();
        assert_eq!(fixture.manager.generation(), 2);
        settle(&fixture);
    }

    #[test]
    fn test_mutation_times_out_while_clustering_holds_lock() {
        let fixture = fixture(3.0);
        let guard = fixture.manager.shared.algorithm.read();
        assert!(matches!(
            fixture.manager.add_item(MapPoint::new(1, LatLng::default())),
            Err(ClusterError::LockTimeout)
        ));
        drop(guard);
        fixture.manager.add_item(MapPoint::new(1, LatLng::default())).unwrap();
        assert_eq!(fixture.manager.items().unwrap().len(), 1);
    }

    #[test]
    fn test_set_renderer_lifecycle() {
        let fixture = fixture(3.0);
        let first = Arc::new(RecordingRenderer::default());
        let second = Arc::new(RecordingRenderer::default());
        fixture.manager.set_renderer(first.clone());
        fixture.manager.set_renderer(second.clone());
        settle(&fixture);

        assert_eq!(
            *first.events.lock(),
            vec!["add", "listeners", "listeners", "remove"]
        );
        assert_eq!(*second.events.lock(), vec!["add", "listeners"]);
        assert!(first.published.lock().is_empty());
        assert_eq!(second.published.lock().len(), 1);
    }

    #[test]
    fn test_renderer_swap_drops_markers_of_in_flight_pass() {
        let fixture = fixture(5.0);
        let old = Arc::new(DefaultClusterRenderer::new(
            fixture.manager.context().clone(),
            RendererConfig::default(),
        ));
        fixture.manager.set_renderer(old.clone());
        assert!(
            fixture
                .control
                .run_until(Duration::from_secs(5), || fixture.manager.is_idle() && old.is_idle())
        );

        // Marker creations get queued but cannot run until the control loop
        // is drained, which happens only after the swap
        let singles: ClusterSet<MapPoint> = Arc::new(
            (0..3)
                .map(|i| {
                    let item = MapPoint::new(i, LatLng::new(i as f64, 0.0));
                    Arc::new(Cluster::new(item.position, vec![item]))
                })
                .collect(),
        );
        old.on_clusters_changed(singles);

        let new = Arc::new(DefaultClusterRenderer::new(
            fixture.manager.context().clone(),
            RendererConfig::default(),
        ));
        fixture.manager.set_renderer(new.clone());
        assert!(fixture.control.run_until(Duration::from_secs(5), || {
            fixture.manager.is_idle() && old.is_idle() && new.is_idle()
        }));
        fixture.control.run_pending();

        assert!(fixture.surface.is_empty());
        assert!(new.rendered_clusters().is_some_and(|set| set.is_empty()));
    }

    #[test]
    fn test_set_algorithm_keeps_items() {
        let fixture = fixture(3.0);
        fixture.manager.add_items(points(25)).unwrap();
        let replacement = NonHierarchicalDistanceBasedAlgorithm::<MapPoint>::new(AlgorithmConfig {
            max_distance_px: 10.0,
        });
        fixture.manager.set_algorithm(Box::new(replacement)).unwrap();
        assert_eq!(fixture.manager.items().unwrap(), points(25));
        settle(&fixture);
    }

    #[test]
    fn test_end_to_end_with_default_renderer() {
        let fixture = fixture(2.0);
        // A dense group and a lone point far away
        let mut items: Vec<_> = (0..30)
            .map(|i| MapPoint::new(i, LatLng::new(48.85, 2.35 + i as f64 * 1e-4)))
            .collect();
        items.push(MapPoint::new(99, LatLng::new(-33.9, 151.2)));
        fixture.manager.add_items(items).unwrap();

        let renderer = Arc::new(DefaultClusterRenderer::new(
            fixture.manager.context().clone(),
            RendererConfig::default(),
        ));
        fixture.manager.set_renderer(renderer.clone());

        let clicked = Arc::new(Mutex::new(Vec::new()));
        let c = clicked.clone();
        fixture
            .manager
            .set_on_cluster_click_listener(Some(Arc::new(move |cluster: &Cluster<MapPoint>| {
                c.lock().push(cluster.size());
                true
            })));

        fixture.manager.cluster();
        assert!(fixture.control.run_until(Duration::from_secs(5), || {
            fixture.manager.is_idle() && renderer.is_idle() && fixture.surface.len() == 2
        }));

        let markers = fixture.surface.markers();
        let cluster_marker = markers
            .iter()
            .find(|m| matches!(m.options.icon, crate::map::MarkerIcon::Cluster(_)))
            .unwrap();
        assert!(fixture.manager.on_marker_click(cluster_marker.id));
        assert_eq!(*clicked.lock(), vec![30]);

        let lone = MapPoint::new(99, LatLng::new(-33.9, 151.2));
        assert!(renderer.marker_for_item(&lone).is_some());
    }
}
