//! DefaultClusterRenderer - diff-based incremental marker updates
//!
//! Each published cluster set is rendered on a short-lived `cluster-render`
//! thread. A pass compares the new set with the previous one, queues marker
//! creations (reusing markers for items and clusters that are still shown),
//! waits for the control thread to run them, then queues removals of markers
//! that are no longer needed and waits again. When zooming in, new markers
//! slide out of the old cluster they were part of; when zooming out, old
//! markers slide into the new cluster that absorbed them.

use super::icon;
use super::marker_modifier::{MarkerModifier, MarkerTask, MarkerWithPosition, TaskGuard, TaskRunner};
use super::{ClusterListeners, ClusterRenderer, RendererConfig, RendererContext};
use crate::clustering::{Cluster, ClusterItem, ClusterSet};
use crate::map::{AnimationDone, MarkerIcon, MarkerId, MarkerOptions};
use crate::projection::SphericalMercatorProjection;
use crate::{LatLng, LatLngBounds};

use geo::Point;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Adjusts the options of an individually drawn item before its marker is
/// created
pub type ItemDecorator<T> = Arc<dyn Fn(&T, &mut MarkerOptions) + Send + Sync>;

/// Adjusts the options of an aggregate cluster marker before it is created
pub type ClusterDecorator<T> = Arc<dyn Fn(&Cluster<T>, &mut MarkerOptions) + Send + Sync>;

/// Bidirectional key <-> marker map
struct MarkerCache<K> {
    by_key: HashMap<K, MarkerId>,
    by_marker: HashMap<MarkerId, K>,
}

impl<K: Eq + Hash + Clone> MarkerCache<K> {
    fn new() -> Self {
        Self {
            by_key: HashMap::new(),
            by_marker: HashMap::new(),
        }
    }

    fn get(&self, key: &K) -> Option<MarkerId> {
        self.by_key.get(key).copied()
    }

    fn key(&self, marker: MarkerId) -> Option<&K> {
        self.by_marker.get(&marker)
    }

    /// Replaces the stored key too, so a re-added item is kept in its
    /// latest form
    fn put(&mut self, key: K, marker: MarkerId) {
        if let Some(previous) = self.by_key.remove(&key) {
            self.by_marker.remove(&previous);
        }
        self.by_key.insert(key.clone(), marker);
        self.by_marker.insert(marker, key);
    }

    fn remove_marker(&mut self, marker: MarkerId) {
        if let Some(key) = self.by_marker.remove(&marker) {
            self.by_key.remove(&key);
        }
    }

    fn clear(&mut self) {
        self.by_key.clear();
        self.by_marker.clear();
    }
}

struct RenderState<T> {
    markers: HashSet<MarkerWithPosition>,
    clusters: Option<ClusterSet<T>>,
    zoom: f64,
}

impl<T> Default for RenderState<T> {
    fn default() -> Self {
        Self {
            markers: HashSet::new(),
            clusters: None,
            zoom: 0.0,
        }
    }
}

/// Which attach cycle marker work belongs to
#[derive(Debug, Default, Clone, Copy)]
struct Attachment {
    /// Bumped on every attach and detach
    epoch: u64,
    detached: bool,
}

impl Attachment {
    fn admits(&self, epoch: u64) -> bool {
        !self.detached && self.epoch == epoch
    }
}

/// Latest set waiting to be rendered and whether a render thread is alive
struct ViewModifier<T> {
    running: bool,
    pending: Option<ClusterSet<T>>,
}

struct RendererShared<T: ClusterItem> {
    context: RendererContext,
    config: RendererConfig,
    state: Mutex<RenderState<T>>,
    item_markers: Mutex<MarkerCache<T>>,
    cluster_markers: Mutex<MarkerCache<Arc<Cluster<T>>>>,
    listeners: RwLock<ClusterListeners<T>>,
    item_decorator: RwLock<Option<ItemDecorator<T>>>,
    cluster_decorator: RwLock<Option<ClusterDecorator<T>>>,
    view: Mutex<ViewModifier<T>>,
    view_idle: Condvar,
    /// Marker tasks of a pass from another epoch are skipped; admitted tasks
    /// hold the read lock while they run
    attachment: RwLock<Attachment>,
}

/// Renderer drawing small clusters as their items and large ones as a
/// single bucketed glyph
pub struct DefaultClusterRenderer<T: ClusterItem> {
    shared: Arc<RendererShared<T>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<T: ClusterItem> DefaultClusterRenderer<T> {
    pub fn new(context: RendererContext, config: RendererConfig) -> Self {
        Self {
            shared: Arc::new(RendererShared {
                context,
                config,
                state: Mutex::new(RenderState::default()),
                item_markers: Mutex::new(MarkerCache::new()),
                cluster_markers: Mutex::new(MarkerCache::new()),
                listeners: RwLock::new(ClusterListeners::default()),
                item_decorator: RwLock::new(None),
                cluster_decorator: RwLock::new(None),
                view: Mutex::new(ViewModifier {
                    running: false,
                    pending: None,
                }),
                view_idle: Condvar::new(),
                attachment: RwLock::new(Attachment::default()),
            }),
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.shared.config
    }

    pub fn set_item_decorator(&self, decorator: Option<ItemDecorator<T>>) {
        *self.shared.item_decorator.write() = decorator;
    }

    pub fn set_cluster_decorator(&self, decorator: Option<ClusterDecorator<T>>) {
        *self.shared.cluster_decorator.write() = decorator;
    }

    pub fn should_render_as_cluster(&self, cluster: &Cluster<T>) -> bool {
        self.shared.should_render_as_cluster(cluster)
    }

    pub fn marker_for_item(&self, item: &T) -> Option<MarkerId> {
        self.shared.item_markers.lock().get(item)
    }

    pub fn item_for_marker(&self, marker: MarkerId) -> Option<T> {
        self.shared.item_markers.lock().key(marker).cloned()
    }

    pub fn cluster_for_marker(&self, marker: MarkerId) -> Option<Arc<Cluster<T>>> {
        self.shared.cluster_markers.lock().key(marker).cloned()
    }

    /// The last cluster set that was fully rendered
    pub fn rendered_clusters(&self) -> Option<ClusterSet<T>> {
        self.shared.state.lock().clusters.clone()
    }

    /// No render pass is running or pending
    pub fn is_idle(&self) -> bool {
        let view = self.shared.view.lock();
        !view.running && view.pending.is_none()
    }

    /// Block until idle or until `timeout` elapses; returns whether idle
    ///
    /// Render passes need the control thread, so this must not be called
    /// from it.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut view = self.shared.view.lock();
        while view.running || view.pending.is_some() {
            if self.shared.view_idle.wait_until(&mut view, deadline).timed_out() {
                return !view.running && view.pending.is_none();
            }
        }
        true
    }
}

impl<T: ClusterItem> ClusterRenderer<T> for DefaultClusterRenderer<T> {
    fn on_add(&self) {
        let shared = &self.shared;
        {
            let mut attachment = shared.attachment.write();
            attachment.epoch += 1;
            attachment.detached = false;
        }
        *shared.state.lock() = RenderState::default();
        shared.item_markers.lock().clear();
        shared.cluster_markers.lock().clear();

        let markers = &shared.context.markers;
        let item_collection = &shared.context.item_collection;
        let cluster_collection = &shared.context.cluster_collection;

        let weak = Arc::downgrade(shared);
        let on_item_click = Arc::new(move |marker: MarkerId| {
            with_item(&weak, marker, |shared, item| {
                let listener = shared.listeners.read().on_cluster_item_click.clone();
                listener.is_some_and(|listener| listener(item))
            })
            .unwrap_or(false)
        });
        let weak = Arc::downgrade(shared);
        let on_item_info_window_click = Arc::new(move |marker: MarkerId| {
            with_item(&weak, marker, |shared, item| {
                let listener = shared.listeners.read().on_cluster_item_info_window_click.clone();
                if let Some(listener) = listener {
                    listener(item);
                }
            });
        });
        let weak = Arc::downgrade(shared);
        let on_cluster_click = Arc::new(move |marker: MarkerId| {
            with_cluster(&weak, marker, |shared, cluster| {
                let listener = shared.listeners.read().on_cluster_click.clone();
                listener.is_some_and(|listener| listener(cluster))
            })
            .unwrap_or(false)
        });
        let weak = Arc::downgrade(shared);
        let on_cluster_info_window_click = Arc::new(move |marker: MarkerId| {
            with_cluster(&weak, marker, |shared, cluster| {
                let listener = shared.listeners.read().on_cluster_info_window_click.clone();
                if let Some(listener) = listener {
                    listener(cluster);
                }
            });
        });

        let attached = markers
            .set_on_marker_click_listener(item_collection, Some(on_item_click))
            .and_then(|()| {
                markers.set_on_info_window_click_listener(item_collection, Some(on_item_info_window_click))
            })
            .and_then(|()| markers.set_on_marker_click_listener(cluster_collection, Some(on_cluster_click)))
            .and_then(|()| {
                markers.set_on_info_window_click_listener(cluster_collection, Some(on_cluster_info_window_click))
            });
        if let Err(err) = attached {
            tracing::warn!(%err, "could not attach renderer listeners");
        }
    }

    fn on_remove(&self) {
        {
            let mut attachment = self.shared.attachment.write();
            attachment.epoch += 1;
            attachment.detached = true;
        }
        {
            let mut view = self.shared.view.lock();
            if view.pending.take().is_some() {
                tracing::debug!("renderer removed, dropping pending cluster set");
            }
            if !view.running {
                self.shared.view_idle.notify_all();
            }
        }

        let context = &self.shared.context;
        for collection in [&context.item_collection, &context.cluster_collection] {
            let detached = context
                .markers
                .set_on_marker_click_listener(collection, None)
                .and_then(|()| context.markers.set_on_info_window_click_listener(collection, None));
            if let Err(err) = detached {
                tracing::warn!(%err, "could not detach renderer listeners");
            }
        }
    }

    fn on_clusters_changed(&self, clusters: ClusterSet<T>) {
        let mut view = self.shared.view.lock();
        view.pending = Some(clusters);
        if view.running {
            return;
        }
        view.running = true;
        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("cluster-render".into())
            .spawn(move || shared.render_loop());
        if let Err(err) = spawned {
            tracing::error!(%err, "failed to start render thread");
            view.running = false;
            view.pending = None;
            self.shared.view_idle.notify_all();
        }
    }

    fn set_listeners(&self, listeners: ClusterListeners<T>) {
        *self.shared.listeners.write() = listeners;
    }
}

fn with_item<T: ClusterItem, R>(
    weak: &Weak<RendererShared<T>>,
    marker: MarkerId,
    f: impl FnOnce(&RendererShared<T>, &T) -> R,
) -> Option<R> {
    let shared = weak.upgrade()?;
    let item = shared.item_markers.lock().key(marker).cloned()?;
    Some(f(&shared, &item))
}

fn with_cluster<T: ClusterItem, R>(
    weak: &Weak<RendererShared<T>>,
    marker: MarkerId,
    f: impl FnOnce(&RendererShared<T>, &Cluster<T>) -> R,
) -> Option<R> {
    let shared = weak.upgrade()?;
    let cluster = shared.cluster_markers.lock().key(marker).cloned()?;
    Some(f(&shared, &cluster))
}

/// Same clusters regardless of order
fn same_clusters<T: ClusterItem>(a: &ClusterSet<T>, b: &ClusterSet<T>) -> bool {
    if Arc::ptr_eq(a, b) {
        return true;
    }
    if a.len() != b.len() {
        return false;
    }
    let lookup: HashSet<&Arc<Cluster<T>>> = a.iter().collect();
    b.iter().all(|cluster| lookup.contains(cluster))
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<T: ClusterItem> RendererShared<T> {
    fn should_render_as_cluster(&self, cluster: &Cluster<T>) -> bool {
        cluster.size() > self.config.min_cluster_size
    }

    fn render_loop(self: Arc<Self>) {
        tracing::trace!("render thread started");
        loop {
            let clusters = {
                let mut view = self.view.lock();
                match view.pending.take() {
                    Some(clusters) => clusters,
                    None => {
                        view.running = false;
                        self.view_idle.notify_all();
                        tracing::trace!("render thread finished");
                        return;
                    }
                }
            };
            self.render(clusters);
        }
    }

    /// Closest of `points` within the animation cutoff
    fn find_closest(&self, points: &[Point<f64>], point: Point<f64>) -> Option<Point<f64>> {
        let max = self.config.max_animation_distance_px;
        let mut min_distance_squared = max * max;
        let mut closest = None;
        for candidate in points {
            let dx = candidate.x() - point.x();
            let dy = candidate.y() - point.y();
            let distance_squared = dx * dx + dy * dy;
            if distance_squared < min_distance_squared {
                closest = Some(*candidate);
                min_distance_squared = distance_squared;
            }
        }
        closest
    }

    fn render(self: &Arc<Self>, clusters: ClusterSet<T>) {
        #[cfg(feature = "profiling")]
        profiling::scope!("renderer::render");

        let attachment = *self.attachment.read();
        if attachment.detached {
            tracing::trace!("renderer detached, skipping render pass");
            return;
        }
        let epoch = attachment.epoch;
        let (previous_markers, previous_clusters, previous_zoom) = {
            let state = self.state.lock();
            (state.markers.clone(), state.clusters.clone(), state.zoom)
        };
        if previous_clusters
            .as_ref()
            .is_some_and(|previous| same_clusters(previous, &clusters))
        {
            tracing::trace!("cluster set unchanged, skipping render");
            return;
        }

        let zoom = self.context.viewport.camera_position().zoom;
        let visible = self.context.viewport.visible_bounds();
        let zooming_in = zoom > previous_zoom;
        let zoom_delta = zoom - previous_zoom;
        let animate = self.config.animate;
        let projection = SphericalMercatorProjection::for_zoom(zoom.min(previous_zoom));

        let pass = Arc::new(RenderPass {
            shared: self.clone(),
            epoch,
            visible,
            previous: previous_markers.clone(),
            new_markers: Mutex::new(HashSet::new()),
        });
        let modifier = MarkerModifier::new(self.context.control.clone(), pass.clone(), self.config.batch_size);

        // Clusters that were on screen before, to animate out of
        let existing_points: Vec<Point<f64>> = match &previous_clusters {
            Some(previous) if zooming_in && animate => previous
                .iter()
                .filter(|c| self.should_render_as_cluster(c) && visible.contains(c.position()))
                .map(|c| projection.to_point(c.position()))
                .collect(),
            _ => Vec::new(),
        };

        for cluster in clusters.iter() {
            let on_screen = visible.contains(cluster.position());
            if zooming_in && on_screen && animate {
                let animate_from = self
                    .find_closest(&existing_points, projection.to_point(cluster.position()))
                    .map(|p| projection.to_lat_lng(p));
                modifier.add(true, cluster.clone(), animate_from);
            } else {
                modifier.add(on_screen, cluster.clone(), None);
            }
        }
        modifier.wait_until_free();

        let new_markers = std::mem::take(&mut *pass.new_markers.lock());

        // New clusters on screen, to animate old markers into
        let new_cluster_points: Vec<Point<f64>> = if animate {
            clusters
                .iter()
                .filter(|c| self.should_render_as_cluster(c) && visible.contains(c.position()))
                .map(|c| projection.to_point(c.position()))
                .collect()
        } else {
            Vec::new()
        };

        let mut removed = 0usize;
        for marker in previous_markers.difference(&new_markers) {
            removed += 1;
            let on_screen = visible.contains(marker.position);
            if !zooming_in
                && zoom_delta > -self.config.max_zoom_out_animation_delta
                && on_screen
                && animate
            {
                match self.find_closest(&new_cluster_points, projection.to_point(marker.position)) {
                    Some(p) => modifier.animate_then_remove(*marker, marker.position, projection.to_lat_lng(p)),
                    None => modifier.remove(true, marker.marker),
                }
            } else {
                modifier.remove(on_screen, marker.marker);
            }
        }
        modifier.wait_until_free();

        tracing::debug!(
            zoom,
            clusters = clusters.len(),
            markers = new_markers.len(),
            removed,
            "render pass complete"
        );
        let attachment = self.attachment.read();
        if !attachment.admits(epoch) {
            tracing::debug!("renderer detached during render pass, discarding its state");
            return;
        }
        let mut state = self.state.lock();
        state.markers = new_markers;
        state.clusters = Some(clusters);
        state.zoom = zoom;
    }

    fn remove_marker(&self, marker: MarkerId) {
        self.context.markers.remove(marker);
        self.item_markers.lock().remove_marker(marker);
        self.cluster_markers.lock().remove_marker(marker);
    }
}

/// Marker work of one render pass, run on the control thread
struct RenderPass<T: ClusterItem> {
    shared: Arc<RendererShared<T>>,
    epoch: u64,
    visible: LatLngBounds,
    /// Markers drawn by the previous pass with their last positions
    previous: HashSet<MarkerWithPosition>,
    new_markers: Mutex<HashSet<MarkerWithPosition>>,
}

impl<T: ClusterItem> RenderPass<T> {
    fn create(&self, cluster: &Arc<Cluster<T>>, animate_from: Option<LatLng>) {
        let shared = &self.shared;
        let markers = &shared.context.markers;

        if !shared.should_render_as_cluster(cluster) {
            for item in cluster.items() {
                let position = item.position();
                let cached = shared.item_markers.lock().get(item);
                let marker = match cached {
                    Some(marker) => {
                        shared.item_markers.lock().put(item.clone(), marker);
                        self.move_if_changed(marker, position);
                        marker
                    }
                    None => {
                        let mut options = MarkerOptions {
                            position: animate_from.unwrap_or(position),
                            title: item.title(),
                            snippet: item.snippet(),
                            icon: MarkerIcon::Default,
                        };
                        let decorator = shared.item_decorator.read().clone();
                        if let Some(decorate) = decorator {
                            decorate(item, &mut options);
                        }
                        let marker = match markers.add_marker(&shared.context.item_collection, &options) {
                            Ok(marker) => marker,
                            Err(err) => {
                                tracing::warn!(%err, "failed to add item marker");
                                continue;
                            }
                        };
                        shared.item_markers.lock().put(item.clone(), marker);
                        if let Some(from) = animate_from {
                            markers.animate_position(marker, from, position, None);
                        }
                        marker
                    }
                };
                self.new_markers.lock().insert(MarkerWithPosition { marker, position });
            }
            return;
        }

        let position = cluster.position();
        let cached = shared.cluster_markers.lock().get(cluster);
        let marker = match cached {
            Some(marker) => marker,
            None => {
                let mut options = MarkerOptions {
                    position: animate_from.unwrap_or(position),
                    title: None,
                    snippet: None,
                    icon: MarkerIcon::Cluster(icon::cluster_icon(cluster.size())),
                };
                let decorator = shared.cluster_decorator.read().clone();
                if let Some(decorate) = decorator {
                    decorate(cluster, &mut options);
                }
                let marker = match markers.add_marker(&shared.context.cluster_collection, &options) {
                    Ok(marker) => marker,
                    Err(err) => {
                        tracing::warn!(%err, "failed to add cluster marker");
                        return;
                    }
                };
                shared.cluster_markers.lock().put(cluster.clone(), marker);
                if let Some(from) = animate_from {
                    markers.animate_position(marker, from, position, None);
                }
                marker
            }
        };
        self.new_markers.lock().insert(MarkerWithPosition { marker, position });
    }

    /// Reused item markers follow items that were re-added elsewhere
    fn move_if_changed(&self, marker: MarkerId, position: LatLng) {
        let Some(last) = self.previous.get(&MarkerWithPosition { marker, position }) else {
            return;
        };
        if last.position == position {
            return;
        }
        let markers = &self.shared.context.markers;
        if self.shared.config.animate && self.visible.contains(position) {
            markers.animate_position(marker, last.position, position, None);
        } else {
            markers.set_position(marker, position);
        }
    }

    /// Starts the animation; the marker is removed on the control thread once
    /// the surface reports it finished
    fn animate_then_remove(&self, marker: MarkerId, from: LatLng, to: LatLng, guard: TaskGuard<T>) {
        let shared = self.shared.clone();
        let control = self.shared.context.control.clone();
        let on_complete: AnimationDone = Box::new(move || {
            let posted = control.post(move || {
                shared.remove_marker(marker);
                drop(guard);
            });
            if !posted {
                tracing::warn!(?marker, "control loop closed before animated marker was removed");
            }
        });
        self.shared
            .context
            .markers
            .animate_position(marker, from, to, Some(on_complete));
    }
}

impl<T: ClusterItem> TaskRunner<T> for RenderPass<T> {
    fn run(&self, task: MarkerTask<T>, guard: TaskGuard<T>) {
        let attachment = self.shared.attachment.read();
        if !attachment.admits(self.epoch) {
            tracing::trace!("renderer detached, skipping marker task");
            return;
        }
        match task {
            MarkerTask::Create {
                cluster,
                animate_from,
            } => self.create(&cluster, animate_from),
            MarkerTask::Remove(marker) => self.shared.remove_marker(marker),
            MarkerTask::AnimateThenRemove { marker, from, to } => {
                self.animate_then_remove(marker.marker, from, to, guard)
            }
        }
    }
}

/// Position at `fraction` between `from` and `to`, taking the short way
/// round the antimeridian
pub fn interpolate_marker_position(from: LatLng, to: LatLng, fraction: f64) -> LatLng {
    let lat = (to.latitude - from.latitude) * fraction + from.latitude;
    let mut lng_delta = to.longitude - from.longitude;
    if lng_delta.abs() > 180.0 {
        lng_delta -= lng_delta.signum() * 360.0;
    }
    let lng = lng_delta * fraction + from.longitude;
    LatLng::new(lat, lng)
}
