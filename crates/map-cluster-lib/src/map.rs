//! Narrow interfaces to the map widget
//!
//! The clustering core never draws anything itself. It reads the camera
//! through [`MapViewport`] and creates, moves and deletes markers through a
//! [`MarkerSurface`]. In-memory implementations of both are provided for
//! headless use.

use crate::{LatLng, LatLngBounds};
use parking_lot::{Mutex, RwLock};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Camera state of the map
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CameraPosition {
    pub target: LatLng,
    pub zoom: f64,
    pub tilt: f64,
    pub bearing: f64,
}

impl CameraPosition {
    pub fn new(target: LatLng, zoom: f64) -> Self {
        Self {
            target,
            zoom,
            ..Default::default()
        }
    }
}

/// Read access to the current camera and visible region
pub trait MapViewport: Send + Sync {
    fn camera_position(&self) -> CameraPosition;
    fn visible_bounds(&self) -> LatLngBounds;
}

/// A viewport whose state is set explicitly
#[derive(Debug)]
pub struct StaticViewport {
    state: RwLock<(CameraPosition, LatLngBounds)>,
}

impl StaticViewport {
    pub fn new(camera: CameraPosition, visible: LatLngBounds) -> Self {
        Self {
            state: RwLock::new((camera, visible)),
        }
    }

    pub fn set_camera_position(&self, camera: CameraPosition) {
        self.state.write().0 = camera;
    }

    pub fn set_visible_bounds(&self, visible: LatLngBounds) {
        self.state.write().1 = visible;
    }
}

impl Default for StaticViewport {
    fn default() -> Self {
        Self::new(CameraPosition::default(), LatLngBounds::world())
    }
}

impl MapViewport for StaticViewport {
    fn camera_position(&self) -> CameraPosition {
        self.state.read().0
    }

    fn visible_bounds(&self) -> LatLngBounds {
        self.state.read().1
    }
}

/// Opaque handle of a marker on the rendering surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub u64);

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Glyph of an aggregate cluster marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIcon {
    /// Bucketed cluster size the glyph was chosen for
    pub bucket: usize,
    /// Text drawn on the glyph, e.g. `"50+"`
    pub label: String,
    /// Fill colour as `0xAARRGGBB`
    pub color: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MarkerIcon {
    #[default]
    Default,
    Cluster(ClusterIcon),
}

/// Everything needed to create a marker
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarkerOptions {
    pub position: LatLng,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub icon: MarkerIcon,
}

impl MarkerOptions {
    pub fn at(position: LatLng) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

/// Called once a marker animation has reached its final position
pub type AnimationDone = Box<dyn FnOnce() + Send>;

/// Marker mutations offered by the map widget
///
/// Only ever called from the control thread.
pub trait MarkerSurface: Send {
    fn add_marker(&mut self, options: &MarkerOptions) -> MarkerId;
    fn remove_marker(&mut self, marker: MarkerId);
    fn set_position(&mut self, marker: MarkerId, position: LatLng);

    /// Move a marker from `from` to `to`, then call `on_complete`
    ///
    /// Surfaces without animation support jump straight to the final
    /// position. `on_complete` may run before this returns and must not be
    /// dropped unless the marker is gone.
    fn animate_position(
        &mut self,
        marker: MarkerId,
        from: LatLng,
        to: LatLng,
        on_complete: Option<AnimationDone>,
    ) {
        let _ = from;
        self.set_position(marker, to);
        if let Some(done) = on_complete {
            done();
        }
    }
}

/// Snapshot of a marker held by an [`InMemorySurface`]
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceMarker {
    pub id: MarkerId,
    pub options: MarkerOptions,
    pub position: LatLng,
}

#[derive(Debug, Default)]
struct SurfaceState {
    next_id: u64,
    markers: HashMap<MarkerId, SurfaceMarker>,
    added: usize,
    removed: usize,
    animated: usize,
}

/// Headless surface keeping markers in a map
///
/// Clones share the same state, so a test can keep a handle after moving a
/// clone into the marker manager.
#[derive(Debug, Clone, Default)]
pub struct InMemorySurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl InMemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Markers currently on the surface, ordered by id
    pub fn markers(&self) -> Vec<SurfaceMarker> {
        let state = self.state.lock();
        let mut markers: Vec<_> = state.markers.values().cloned().collect();
        markers.sort_by_key(|m| m.id);
        markers
    }

    pub fn marker(&self, id: MarkerId) -> Option<SurfaceMarker> {
        self.state.lock().markers.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lifetime counts of (added, removed, animated) markers
    pub fn stats(&self) -> (usize, usize, usize) {
        let state = self.state.lock();
        (state.added, state.removed, state.animated)
    }
}

impl MarkerSurface for InMemorySurface {
    fn add_marker(&mut self, options: &MarkerOptions) -> MarkerId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = MarkerId(state.next_id);
        state.markers.insert(
            id,
            SurfaceMarker {
                id,
                options: options.clone(),
                position: options.position,
            },
        );
        state.added += 1;
        id
    }

    fn remove_marker(&mut self, marker: MarkerId) {
        let mut state = self.state.lock();
        if state.markers.remove(&marker).is_some() {
            state.removed += 1;
        }
    }

    fn set_position(&mut self, marker: MarkerId, position: LatLng) {
        if let Some(m) = self.state.lock().markers.get_mut(&marker) {
            m.position = position;
        }
    }

    fn animate_position(
        &mut self,
        marker: MarkerId,
        _from: LatLng,
        to: LatLng,
        on_complete: Option<AnimationDone>,
    ) {
        {
            let mut state = self.state.lock();
            if let Some(m) = state.markers.get_mut(&marker) {
                m.position = to;
                state.animated += 1;
            }
        }
        if let Some(done) = on_complete {
            done();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_viewport() {
        let viewport = StaticViewport::default();
        assert_eq!(viewport.camera_position().zoom, 0.0);
        viewport.set_camera_position(CameraPosition::new(LatLng::new(1.0, 2.0), 7.5));
        assert_eq!(viewport.camera_position().zoom, 7.5);
        assert_eq!(viewport.visible_bounds(), LatLngBounds::world());
    }

    #[test]
    fn test_in_memory_surface_shares_state() {
        let surface = InMemorySurface::new();
        let mut handle: Box<dyn MarkerSurface> = Box::new(surface.clone());
        let a = handle.add_marker(&MarkerOptions::at(LatLng::new(1.0, 1.0)));
        let b = handle.add_marker(&MarkerOptions::at(LatLng::new(2.0, 2.0)));
        assert_ne!(a, b);
        assert_eq!(surface.len(), 2);

        let finished = Arc::new(Mutex::new(false));
        let flag = finished.clone();
        handle.animate_position(
            b,
            LatLng::new(2.0, 2.0),
            LatLng::new(3.0, 3.0),
            Some(Box::new(move || *flag.lock() = true)),
        );
        assert_eq!(surface.marker(b).map(|m| m.position), Some(LatLng::new(3.0, 3.0)));
        assert!(*finished.lock());

        handle.remove_marker(a);
        handle.remove_marker(a);
        assert_eq!(surface.stats(), (2, 1, 1));
        assert_eq!(surface.markers().len(), 1);
    }
}
