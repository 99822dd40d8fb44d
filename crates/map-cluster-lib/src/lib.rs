//! Map Cluster Library - Marker Clustering and Geospatial Primitives
//!
//! This library groups large, changing sets of map markers into zoom-appropriate
//! clusters and keeps a marker surface in sync with them incrementally. Clustering
//! runs on a worker pool while marker mutation is marshalled onto a single control
//! thread, so a UI thread never blocks on clustering work.
//!
//! # Architecture
//!
//! - **[`PointQuadTree`]**: Planar spatial index with fixed root bounds
//! - **[`clustering`]**: Distance-based algorithm, per-zoom caching, the
//!   [`ClusterManager`](clustering::ClusterManager) and the diffing renderer
//! - **[`marker_manager`]**: Multiplexes one marker surface across collections
//! - **[`control`]**: Job queue standing in for the UI thread
//! - **[`heatmap`]**: Convolution-based density tiles
//! - **[`spherical`]**, **[`poly`]**: Geodesic math, polygon tests and polyline
//!   encoding
//!
//! # Performance Characteristics
//!
//! - **Clustering**: O(N log N) per zoom level, memoized for recent zooms
//! - **Quadtree Query**: O(log N + K) where K=results
//! - **Heatmap Tile**: O(K + (T+2R)²·R) where T=tile size, R=kernel radius

pub mod clustering;
pub mod color;
pub mod control;
pub mod heatmap;
mod lat_lng;
pub mod map;
pub mod marker_manager;
pub mod poly;
pub mod projection;
mod quadtree;
pub mod spherical;
pub mod utils;

// Public API exports
pub use lat_lng::{LatLng, LatLngBounds};
pub use quadtree::{MAX_DEPTH, MAX_ELEMENTS, PointQuadTree};

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Invalid coordinate: ({x}, {y})")]
    InvalidCoordinate { x: f64, y: f64 },

    #[error("Point ({x}, {y}) outside the index bounds")]
    OutOfBounds { x: f64, y: f64 },

    #[error("No input points")]
    EmptyData,

    #[error("No input data: supply data or weighted data before building")]
    NoData,

    #[error("Radius {0} not within [10, 50]")]
    InvalidRadius(u32),

    #[error("Opacity {0} not within [0, 1]")]
    InvalidOpacity(f64),

    #[error("Invalid gradient: {0}")]
    InvalidGradient(String),

    #[error("Invalid polyline: {0}")]
    InvalidPolyline(String),

    #[error("Collection already exists: {0}")]
    DuplicateCollection(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Timed out waiting for the clustering lock")]
    LockTimeout,

    #[error("Tile encoding error: {0}")]
    TileEncoding(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
