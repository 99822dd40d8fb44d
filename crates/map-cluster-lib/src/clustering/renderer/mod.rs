//! Turning published cluster sets into markers
//!
//! # Architecture
//!
//! - **[`ClusterRenderer`]**: the seam the manager publishes to
//! - **[`DefaultClusterRenderer`]**: diffs each new set against the previous
//!   one and schedules marker work through a [`MarkerModifier`]
//! - **[`icon`]**: bucketed glyphs for aggregate markers

mod default;
pub mod icon;
mod marker_modifier;

pub use default::{ClusterDecorator, DefaultClusterRenderer, ItemDecorator, interpolate_marker_position};
pub use marker_modifier::{MarkerModifier, MarkerTask, MarkerWithPosition, TaskGuard, TaskRunner};

use super::{Cluster, ClusterItem, ClusterSet};
use crate::control::ControlHandle;
use crate::map::MapViewport;
use crate::marker_manager::{CollectionId, MarkerManager};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type ClusterClickListener<T> = Arc<dyn Fn(&Cluster<T>) -> bool + Send + Sync>;
pub type ClusterInfoWindowClickListener<T> = Arc<dyn Fn(&Cluster<T>) + Send + Sync>;
pub type ClusterItemClickListener<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
pub type ClusterItemInfoWindowClickListener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// User callbacks a renderer dispatches marker events to
pub struct ClusterListeners<T> {
    pub on_cluster_click: Option<ClusterClickListener<T>>,
    pub on_cluster_info_window_click: Option<ClusterInfoWindowClickListener<T>>,
    pub on_cluster_item_click: Option<ClusterItemClickListener<T>>,
    pub on_cluster_item_info_window_click: Option<ClusterItemInfoWindowClickListener<T>>,
}

impl<T> Default for ClusterListeners<T> {
    fn default() -> Self {
        Self {
            on_cluster_click: None,
            on_cluster_info_window_click: None,
            on_cluster_item_click: None,
            on_cluster_item_info_window_click: None,
        }
    }
}

impl<T> Clone for ClusterListeners<T> {
    fn clone(&self) -> Self {
        Self {
            on_cluster_click: self.on_cluster_click.clone(),
            on_cluster_info_window_click: self.on_cluster_info_window_click.clone(),
            on_cluster_item_click: self.on_cluster_item_click.clone(),
            on_cluster_item_info_window_click: self.on_cluster_item_info_window_click.clone(),
        }
    }
}

/// Everything a renderer needs from its surroundings
#[derive(Clone)]
pub struct RendererContext {
    pub viewport: Arc<dyn MapViewport>,
    pub markers: Arc<MarkerManager>,
    pub control: ControlHandle,
    /// Collection holding markers of individually drawn items
    pub item_collection: CollectionId,
    /// Collection holding aggregate cluster markers
    pub cluster_collection: CollectionId,
}

/// Renderer tuning
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RendererConfig {
    /// Clusters with at most this many items are drawn as individual markers.
    /// Default: 4
    pub min_cluster_size: usize,
    /// Slide markers between old and new cluster positions.
    /// Default: true
    pub animate: bool,
    /// Nearest-centroid matching cutoff in pixels.
    /// Default: 100
    pub max_animation_distance_px: f64,
    /// Marker tasks executed per control-thread tick.
    /// Default: 10
    pub batch_size: usize,
    /// Zooming out by this many levels or more removes markers without
    /// animating them into their new cluster.
    /// Default: 3
    pub max_zoom_out_animation_delta: f64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 4,
            animate: true,
            max_animation_distance_px: 100.0,
            batch_size: 10,
            max_zoom_out_animation_delta: 3.0,
        }
    }
}

/// Receives cluster sets from the manager
///
/// `on_clusters_changed` is always called on the control thread; the
/// lifecycle and listener methods are called from whichever thread drives
/// the manager.
pub trait ClusterRenderer<T: ClusterItem>: Send + Sync {
    /// Start handling events for the manager's marker collections
    fn on_add(&self);

    /// Stop handling events and abandon in-flight marker work; the manager
    /// clears the collections afterwards
    fn on_remove(&self);

    fn on_clusters_changed(&self, clusters: ClusterSet<T>);

    /// Replace the user callbacks; an empty set detaches them
    fn set_listeners(&self, listeners: ClusterListeners<T>);
}
