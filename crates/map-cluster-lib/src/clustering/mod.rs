//! Marker clustering
//!
//! # Architecture
//!
//! - **[`Algorithm`]**: owns the items and groups them per zoom level;
//!   [`NonHierarchicalDistanceBasedAlgorithm`] is the greedy quadtree-backed
//!   implementation
//! - **[`PreCachingAlgorithm`]**: per-zoom LRU in front of any algorithm
//! - **[`ClusterManager`]**: schedules clustering on the rayon pool and
//!   publishes only the latest result to a renderer
//! - **[`renderer`]**: diff-based marker updates on the control thread

mod algorithm;
mod cluster;
mod manager;
mod non_hierarchical;
mod precaching;
pub mod renderer;

pub use algorithm::{Algorithm, AlgorithmConfig, CancelToken};
pub use cluster::{Cluster, ClusterItem, ClusterSet, MapPoint};
pub use manager::{ClusterManager, ManagerConfig};
pub use non_hierarchical::NonHierarchicalDistanceBasedAlgorithm;
pub use precaching::{DEFAULT_CACHE_CAPACITY, PreCachingAlgorithm};
pub use renderer::{
    ClusterListeners, ClusterRenderer, DefaultClusterRenderer, RendererConfig, RendererContext,
};
