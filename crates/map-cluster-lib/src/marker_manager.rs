//! MarkerManager - groups markers into collections and multiplexes events
//!
//! The map widget reports clicks, info-window clicks and drags for any
//! marker. Each marker belongs to exactly one collection; events are routed
//! to the listener registered on that collection, if any.

use crate::map::{AnimationDone, MarkerId, MarkerOptions, MarkerSurface};
use crate::{ClusterError, LatLng, Result};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a marker collection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionId {
    Named(String),
    Anonymous(u64),
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::Anonymous(n) => write!(f, "#{n}"),
        }
    }
}

/// Stage of a marker drag gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragPhase {
    Start,
    Drag,
    End,
}

/// Returns whether the click was consumed
pub type MarkerClickListener = Arc<dyn Fn(MarkerId) -> bool + Send + Sync>;
pub type InfoWindowClickListener = Arc<dyn Fn(MarkerId) + Send + Sync>;
pub type MarkerDragListener = Arc<dyn Fn(MarkerId, DragPhase, LatLng) + Send + Sync>;

#[derive(Default)]
struct Collection {
    markers: HashSet<MarkerId>,
    on_click: Option<MarkerClickListener>,
    on_info_window_click: Option<InfoWindowClickListener>,
    on_drag: Option<MarkerDragListener>,
}

/// Owns the marker surface and the marker → collection mapping
pub struct MarkerManager {
    surface: Mutex<Box<dyn MarkerSurface>>,
    collections: DashMap<CollectionId, Collection>,
    owners: DashMap<MarkerId, CollectionId>,
    next_anonymous: AtomicU64,
}

impl fmt::Debug for MarkerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkerManager")
            .field("collections", &self.collections.len())
            .field("markers", &self.owners.len())
            .finish()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl MarkerManager {
    pub fn new(surface: impl MarkerSurface + 'static) -> Self {
        Self::with_boxed_surface(Box::new(surface))
    }

    pub fn with_boxed_surface(surface: Box<dyn MarkerSurface>) -> Self {
        Self {
            surface: Mutex::new(surface),
            collections: DashMap::new(),
            owners: DashMap::new(),
            next_anonymous: AtomicU64::new(0),
        }
    }

    /// Create a collection with a generated id
    pub fn new_collection(&self) -> CollectionId {
        let id = CollectionId::Anonymous(self.next_anonymous.fetch_add(1, Ordering::Relaxed));
        self.collections.insert(id.clone(), Collection::default());
        id
    }

    /// Create a collection under a caller-chosen name
    pub fn new_named_collection(&self, name: impl Into<String>) -> Result<CollectionId> {
        let id = CollectionId::Named(name.into());
        match self.collections.entry(id.clone()) {
            Entry::Occupied(_) => Err(ClusterError::DuplicateCollection(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Collection::default());
                Ok(id)
            }
        }
    }

    /// Look up a named collection
    pub fn collection(&self, name: &str) -> Option<CollectionId> {
        let id = CollectionId::Named(name.to_string());
        self.collections.contains_key(&id).then_some(id)
    }

    pub fn has_collection(&self, id: &CollectionId) -> bool {
        self.collections.contains_key(id)
    }

    /// Add a marker to the surface and register it with `collection`
    pub fn add_marker(&self, collection: &CollectionId, options: &MarkerOptions) -> Result<MarkerId> {
        let mut entry = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| ClusterError::UnknownCollection(collection.to_string()))?;
        let marker = self.surface.lock().add_marker(options);
        entry.markers.insert(marker);
        self.owners.insert(marker, collection.clone());
        Ok(marker)
    }

    /// Remove a marker from the surface; `false` when it is not managed here
    pub fn remove(&self, marker: MarkerId) -> bool {
        let Some((_, owner)) = self.owners.remove(&marker) else {
            return false;
        };
        if let Some(mut collection) = self.collections.get_mut(&owner) {
            collection.markers.remove(&marker);
        }
        self.surface.lock().remove_marker(marker);
        true
    }

    /// Remove every marker of `collection` from the surface
    pub fn clear(&self, collection: &CollectionId) {
        let markers = match self.collections.get_mut(collection) {
            Some(mut entry) => std::mem::take(&mut entry.markers),
            None => return,
        };
        let mut surface = self.surface.lock();
        for marker in markers {
            self.owners.remove(&marker);
            surface.remove_marker(marker);
        }
    }

    /// Markers of `collection`, ordered by id
    pub fn markers(&self, collection: &CollectionId) -> Vec<MarkerId> {
        let mut markers: Vec<_> = self
            .collections
            .get(collection)
            .map(|c| c.markers.iter().copied().collect())
            .unwrap_or_default();
        markers.sort();
        markers
    }

    pub fn owner(&self, marker: MarkerId) -> Option<CollectionId> {
        self.owners.get(&marker).map(|c| c.value().clone())
    }

    pub fn set_position(&self, marker: MarkerId, position: LatLng) {
        self.surface.lock().set_position(marker, position);
    }

    /// `on_complete` may run while the surface is locked, so it must not call
    /// back into this manager directly
    pub fn animate_position(
        &self,
        marker: MarkerId,
        from: LatLng,
        to: LatLng,
        on_complete: Option<AnimationDone>,
    ) {
        self.surface.lock().animate_position(marker, from, to, on_complete);
    }

    pub fn set_on_marker_click_listener(
        &self,
        collection: &CollectionId,
        listener: Option<MarkerClickListener>,
    ) -> Result<()> {
        self.update(collection, |c| c.on_click = listener)
    }

    pub fn set_on_info_window_click_listener(
        &self,
        collection: &CollectionId,
        listener: Option<InfoWindowClickListener>,
    ) -> Result<()> {
        self.update(collection, |c| c.on_info_window_click = listener)
    }

    pub fn set_on_marker_drag_listener(
        &self,
        collection: &CollectionId,
        listener: Option<MarkerDragListener>,
    ) -> Result<()> {
        self.update(collection, |c| c.on_drag = listener)
    }

    fn update(&self, id: &CollectionId, f: impl FnOnce(&mut Collection)) -> Result<()> {
        let mut entry = self
            .collections
            .get_mut(id)
            .ok_or_else(|| ClusterError::UnknownCollection(id.to_string()))?;
        f(&mut entry);
        Ok(())
    }

    /// Clone a listener out of the owning collection so that it is invoked
    /// without any map guard held.
    fn listener<L>(&self, marker: MarkerId, pick: impl FnOnce(&Collection) -> Option<L>) -> Option<L> {
        let owner = self.owner(marker)?;
        let collection = self.collections.get(&owner)?;
        pick(&collection)
    }

    /// Dispatch a marker click; `true` when a listener consumed it
    pub fn on_marker_click(&self, marker: MarkerId) -> bool {
        match self.listener(marker, |c| c.on_click.clone()) {
            Some(listener) => listener(marker),
            None => false,
        }
    }

    pub fn on_info_window_click(&self, marker: MarkerId) {
        if let Some(listener) = self.listener(marker, |c| c.on_info_window_click.clone()) {
            listener(marker);
        }
    }

    pub fn on_marker_drag(&self, marker: MarkerId, phase: DragPhase, position: LatLng) {
        if let Some(listener) = self.listener(marker, |c| c.on_drag.clone()) {
            listener(marker, phase, position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::InMemorySurface;
    use std::sync::atomic::AtomicUsize;

    fn manager() -> (MarkerManager, InMemorySurface) {
        let surface = InMemorySurface::new();
        (MarkerManager::new(surface.clone()), surface)
    }

    #[test]
    fn test_named_collections() {
        let (manager, _) = manager();
        let id = manager.new_named_collection("items").unwrap();
        assert_eq!(manager.collection("items"), Some(id));
        assert!(matches!(
            manager.new_named_collection("items"),
            Err(ClusterError::DuplicateCollection(_))
        ));
        assert_eq!(manager.collection("missing"), None);
    }

    #[test]
    fn test_add_remove_and_clear() {
        let (manager, surface) = manager();
        let a = manager.new_collection();
        let b = manager.new_collection();
        assert_ne!(a, b);

        let m1 = manager.add_marker(&a, &MarkerOptions::default()).unwrap();
        let m2 = manager.add_marker(&a, &MarkerOptions::default()).unwrap();
        let m3 = manager.add_marker(&b, &MarkerOptions::default()).unwrap();
        assert_eq!(manager.markers(&a), vec![m1, m2]);
        assert_eq!(surface.len(), 3);

        assert!(manager.remove(m1));
        assert!(!manager.remove(m1));
        assert_eq!(manager.markers(&a), vec![m2]);

        manager.clear(&a);
        assert!(manager.markers(&a).is_empty());
        assert_eq!(manager.owner(m2), None);
        assert_eq!(manager.owner(m3), Some(b));
        assert_eq!(surface.len(), 1);
    }

    #[test]
    fn test_add_to_unknown_collection() {
        let (manager, surface) = manager();
        let ghost = CollectionId::Named("ghost".into());
        assert!(matches!(
            manager.add_marker(&ghost, &MarkerOptions::default()),
            Err(ClusterError::UnknownCollection(_))
        ));
        assert!(surface.is_empty());
    }

    #[test]
    fn test_click_dispatch_to_owning_collection() {
        let (manager, _) = manager();
        let a = manager.new_collection();
        let b = manager.new_collection();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        manager
            .set_on_marker_click_listener(
                &a,
                Some(Arc::new(move |_: MarkerId| {
                    h.fetch_add(1, Ordering::SeqCst);
                    true
                })),
            )
            .unwrap();

        let in_a = manager.add_marker(&a, &MarkerOptions::default()).unwrap();
        let in_b = manager.add_marker(&b, &MarkerOptions::default()).unwrap();
        assert!(manager.on_marker_click(in_a));
        assert!(!manager.on_marker_click(in_b));
        assert!(!manager.on_marker_click(MarkerId(999)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_info_window_and_drag_dispatch() {
        let (manager, _) = manager();
        let a = manager.new_collection();
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        manager
            .set_on_info_window_click_listener(
                &a,
                Some(Arc::new(move |m: MarkerId| {
                    e.lock().push(format!("info {m}"))
                })),
            )
            .unwrap();
        let e = events.clone();
        manager
            .set_on_marker_drag_listener(
                &a,
                Some(Arc::new(move |m: MarkerId, phase: DragPhase, _: LatLng| {
                    e.lock().push(format!("{phase:?} {m}"))
                })),
            )
            .unwrap();

        let marker = manager.add_marker(&a, &MarkerOptions::default()).unwrap();
        manager.on_info_window_click(marker);
        manager.on_marker_drag(marker, DragPhase::Start, LatLng::default());
        manager.on_marker_drag(marker, DragPhase::End, LatLng::default());
        assert_eq!(
            *events.lock(),
            vec![
                format!("info {marker}"),
                format!("Start {marker}"),
                format!("End {marker}")
            ]
        );
    }

    #[test]
    fn test_listener_may_reenter_manager() {
        let (manager, _) = manager();
        let manager = Arc::new(manager);
        let a = manager.new_collection();
        let weak = Arc::downgrade(&manager);
        manager
            .set_on_marker_click_listener(
                &a,
                Some(Arc::new(move |m: MarkerId| {
                    weak.upgrade().is_some_and(|mm| mm.remove(m))
                })),
            )
            .unwrap();
        let marker = manager.add_marker(&a, &MarkerOptions::default()).unwrap();
        assert!(manager.on_marker_click(marker));
        assert!(manager.markers(&a).is_empty());
    }
}
