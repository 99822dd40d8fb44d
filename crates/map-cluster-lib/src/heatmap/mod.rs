//! Heatmap tiles from weighted points
//!
//! Points are projected onto a unit Mercator world and indexed in a
//! [`PointQuadTree`](crate::PointQuadTree). A tile request gathers the points
//! under the tile (padded by the kernel radius, wrapping across the
//! antimeridian), bins them into a grid, blurs the grid with a separable
//! Gaussian kernel and maps the result through a gradient colour table scaled
//! by a per-zoom intensity estimate.

mod gradient;
mod tile_provider;
mod weighted;

pub use gradient::{Gradient, interpolate_color};
pub use tile_provider::{HeatmapTileProvider, HeatmapTileProviderBuilder};
pub use weighted::WeightedLatLng;

/// Convolution radius used when none is configured, in pixels
pub const DEFAULT_RADIUS: u32 = 20;
pub const MIN_RADIUS: u32 = 10;
pub const MAX_RADIUS: u32 = 50;

/// Opacity of the whole overlay used when none is configured
pub const DEFAULT_OPACITY: f64 = 0.7;

/// Width of the projected world, points live in `[0, WORLD_WIDTH]²`
pub const WORLD_WIDTH: f64 = 1.0;

/// Side of a rendered tile in pixels
pub const TILE_DIM: u32 = 512;

/// Screen size assumed when estimating intensities, in pixels
pub const SCREEN_SIZE: u32 = 1280;

/// Zoom levels for which the maximum intensity is estimated; other zooms reuse
/// the nearest estimate
pub const DEFAULT_MIN_ZOOM: u32 = 5;
pub const DEFAULT_MAX_ZOOM: u32 = 11;

/// Number of zoom levels with an intensity estimate
pub const MAX_ZOOM_LEVEL: u32 = 22;

/// An encoded tile image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub width: u32,
    pub height: u32,
    /// PNG bytes
    pub data: Vec<u8>,
}
