//! HeatmapTileProvider - density tiles via binning and Gaussian convolution

use super::{
    DEFAULT_MAX_ZOOM, DEFAULT_MIN_ZOOM, DEFAULT_OPACITY, DEFAULT_RADIUS, Gradient, MAX_RADIUS,
    MAX_ZOOM_LEVEL, MIN_RADIUS, SCREEN_SIZE, TILE_DIM, Tile, WORLD_WIDTH, WeightedLatLng,
};
use crate::projection::{bounds, intersects};
use crate::{ClusterError, LatLng, PointQuadTree, Result, color};

use geo::{Point, Rect};
use image::{ImageFormat, Rgba, RgbaImage};
use rayon::prelude::*;
use std::collections::HashMap;
use std::io::Cursor;

/// A projected data point as stored in the index
#[derive(Debug, Clone, Copy)]
struct HeatPoint {
    point: Point<f64>,
    intensity: f64,
}

/// Validating builder for [`HeatmapTileProvider`]
///
/// Data must be supplied with [`data`](Self::data) or
/// [`weighted_data`](Self::weighted_data) before [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct HeatmapTileProviderBuilder {
    data: Option<Vec<WeightedLatLng>>,
    radius: u32,
    gradient: Gradient,
    opacity: f64,
}

impl Default for HeatmapTileProviderBuilder {
    fn default() -> Self {
        Self {
            data: None,
            radius: DEFAULT_RADIUS,
            gradient: Gradient::default(),
            opacity: DEFAULT_OPACITY,
        }
    }
}

impl HeatmapTileProviderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unweighted points, each with the default intensity
    pub fn data(self, data: impl IntoIterator<Item = LatLng>) -> Result<Self> {
        self.weighted_data(data.into_iter().map(WeightedLatLng::from).collect())
    }

    pub fn weighted_data(mut self, data: Vec<WeightedLatLng>) -> Result<Self> {
        if data.is_empty() {
            return Err(ClusterError::EmptyData);
        }
        self.data = Some(data);
        Ok(self)
    }

    /// Kernel radius in pixels, within `[MIN_RADIUS, MAX_RADIUS]`
    pub fn radius(mut self, radius: u32) -> Result<Self> {
        validate_radius(radius)?;
        self.radius = radius;
        Ok(self)
    }

    pub fn gradient(mut self, gradient: Gradient) -> Self {
        self.gradient = gradient;
        self
    }

    /// Overlay opacity in `[0, 1]`
    pub fn opacity(mut self, opacity: f64) -> Result<Self> {
        validate_opacity(opacity)?;
        self.opacity = opacity;
        Ok(self)
    }

    pub fn build(self) -> Result<HeatmapTileProvider> {
        let data = self.data.ok_or(ClusterError::NoData)?;
        let index = DataIndex::new(&data)?;
        let max_intensity = max_intensities(&index.points, index.bounds, self.radius);
        tracing::debug!(
            points = data.len(),
            radius = self.radius,
            "built heatmap provider"
        );
        Ok(HeatmapTileProvider {
            color_map: self.gradient.generate_color_map(self.opacity),
            kernel: generate_kernel(self.radius, f64::from(self.radius) / 3.0),
            data,
            index,
            radius: self.radius,
            gradient: self.gradient,
            opacity: self.opacity,
            max_intensity,
        })
    }
}

fn validate_radius(radius: u32) -> Result<()> {
    if (MIN_RADIUS..=MAX_RADIUS).contains(&radius) {
        Ok(())
    } else {
        Err(ClusterError::InvalidRadius(radius))
    }
}

fn validate_opacity(opacity: f64) -> Result<()> {
    if (0.0..=1.0).contains(&opacity) {
        Ok(())
    } else {
        Err(ClusterError::InvalidOpacity(opacity))
    }
}

/// Quadtree over the projected points plus their exact bounds
#[derive(Debug, Clone)]
struct DataIndex {
    points: Vec<HeatPoint>,
    tree: PointQuadTree<HeatPoint>,
    bounds: Rect<f64>,
}

impl DataIndex {
    /// The tree is rebuilt from scratch since its root bounds are fixed
    fn new(data: &[WeightedLatLng]) -> Result<Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("heatmap::DataIndex::new");

        let points: Vec<HeatPoint> = data
            .par_iter()
            .map(|w| HeatPoint {
                point: w.point(),
                intensity: w.intensity(),
            })
            .collect();
        if let Some(bad) = points
            .iter()
            .find(|p| !p.point.x().is_finite() || !p.point.y().is_finite())
        {
            return Err(ClusterError::InvalidCoordinate {
                x: bad.point.x(),
                y: bad.point.y(),
            });
        }

        let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
        for p in &points {
            min_x = min_x.min(p.point.x());
            max_x = max_x.max(p.point.x());
            min_y = min_y.min(p.point.y());
            max_y = max_y.max(p.point.y());
        }
        let bounds = bounds(min_x, max_x, min_y, max_y);

        let mut tree = PointQuadTree::new(bounds);
        for p in &points {
            tree.insert(*p, p.point)?;
        }
        Ok(Self {
            points,
            tree,
            bounds,
        })
    }
}

/// Renders heatmap tiles for a fixed data set
#[derive(Debug, Clone)]
pub struct HeatmapTileProvider {
    data: Vec<WeightedLatLng>,
    index: DataIndex,
    radius: u32,
    gradient: Gradient,
    opacity: f64,
    color_map: Vec<u32>,
    kernel: Vec<f64>,
    max_intensity: Vec<f64>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl HeatmapTileProvider {
    pub fn builder() -> HeatmapTileProviderBuilder {
        HeatmapTileProviderBuilder::new()
    }

    pub fn data(&self) -> &[WeightedLatLng] {
        &self.data
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    pub fn gradient(&self) -> &Gradient {
        &self.gradient
    }

    /// Intensity mapped to the top of the colour map at `zoom`
    pub fn max_intensity(&self, zoom: u32) -> f64 {
        let zoom = zoom.min(MAX_ZOOM_LEVEL - 1) as usize;
        self.max_intensity[zoom]
    }

    /// Replace the data set; on error the provider is left unchanged
    pub fn set_weighted_data(&mut self, data: Vec<WeightedLatLng>) -> Result<()> {
        if data.is_empty() {
            return Err(ClusterError::EmptyData);
        }
        let index = DataIndex::new(&data)?;
        self.max_intensity = max_intensities(&index.points, index.bounds, self.radius);
        self.index = index;
        self.data = data;
        Ok(())
    }

    pub fn set_data(&mut self, data: impl IntoIterator<Item = LatLng>) -> Result<()> {
        self.set_weighted_data(data.into_iter().map(WeightedLatLng::from).collect())
    }

    pub fn set_radius(&mut self, radius: u32) -> Result<()> {
        validate_radius(radius)?;
        self.radius = radius;
        self.kernel = generate_kernel(radius, f64::from(radius) / 3.0);
        self.max_intensity = max_intensities(&self.index.points, self.index.bounds, radius);
        Ok(())
    }

    pub fn set_gradient(&mut self, gradient: Gradient) {
        self.color_map = gradient.generate_color_map(self.opacity);
        self.gradient = gradient;
    }

    pub fn set_opacity(&mut self, opacity: f64) -> Result<()> {
        validate_opacity(opacity)?;
        self.opacity = opacity;
        self.color_map = self.gradient.generate_color_map(opacity);
        Ok(())
    }

    /// Render tile `(x, y)` at `zoom`
    ///
    /// Returns `Ok(None)` when no data point influences the tile.
    pub fn get_tile(&self, x: u32, y: u32, zoom: u32) -> Result<Option<Tile>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("heatmap::get_tile");

        let radius = self.radius as usize;
        let tile_width = WORLD_WIDTH / 2f64.powi(zoom as i32);
        let padding = tile_width * self.radius as f64 / f64::from(TILE_DIM);
        let grid_dim = TILE_DIM as usize + 2 * radius;
        let bucket_width = (tile_width + 2.0 * padding) / grid_dim as f64;

        let min_x = f64::from(x) * tile_width - padding;
        let max_x = f64::from(x + 1) * tile_width + padding;
        let min_y = f64::from(y) * tile_width - padding;
        let max_y = f64::from(y + 1) * tile_width + padding;

        // A tile never spans the whole world, so at most one side wraps
        let (wrapped, x_offset) = if min_x < 0.0 {
            let overlap = bounds(min_x + WORLD_WIDTH, WORLD_WIDTH, min_y, max_y);
            (self.index.tree.search(overlap), -WORLD_WIDTH)
        } else if max_x > WORLD_WIDTH {
            let overlap = bounds(0.0, max_x - WORLD_WIDTH, min_y, max_y);
            (self.index.tree.search(overlap), WORLD_WIDTH)
        } else {
            (Vec::new(), 0.0)
        };

        let tile_bounds = bounds(min_x, max_x, min_y, max_y);
        let data = self.index.bounds;
        let padded_data = bounds(
            data.min().x - padding,
            data.max().x + padding,
            data.min().y - padding,
            data.max().y + padding,
        );
        if !intersects(&tile_bounds, &padded_data) && wrapped.is_empty() {
            return Ok(None);
        }

        let points = self.index.tree.search(tile_bounds);
        if points.is_empty() && wrapped.is_empty() {
            return Ok(None);
        }
        tracing::trace!(
            x,
            y,
            zoom,
            points = points.len(),
            wrapped = wrapped.len(),
            "rendering heatmap tile"
        );

        let mut grid = vec![0.0; grid_dim * grid_dim];
        let binned = points
            .iter()
            .map(|p| (p, 0.0))
            .chain(wrapped.iter().map(|p| (p, x_offset)));
        for (p, offset) in binned {
            let col = ((p.point.x() + offset - min_x) / bucket_width) as usize;
            let row = ((p.point.y() - min_y) / bucket_width) as usize;
            if col < grid_dim && row < grid_dim {
                grid[row * grid_dim + col] += p.intensity;
            }
        }

        let convolved = convolve(&grid, grid_dim, &self.kernel);
        let pixels = colorize(&convolved, TILE_DIM as usize, &self.color_map, self.max_intensity(zoom));
        encode_png(&pixels, TILE_DIM).map(Some)
    }
}

/// Gaussian weights for offsets `-radius..=radius`
fn generate_kernel(radius: u32, sd: f64) -> Vec<f64> {
    let radius = radius as i64;
    (-radius..=radius)
        .map(|i| (-((i * i) as f64) / (2.0 * sd * sd)).exp())
        .collect()
}

/// Blur a square row-major grid with a symmetric separable kernel and crop
/// the kernel radius from every side
fn convolve(grid: &[f64], grid_dim: usize, kernel: &[f64]) -> Vec<f64> {
    let radius = kernel.len() / 2;
    let dim = grid_dim - 2 * radius;
    let lower = radius;
    let upper = radius + dim - 1;

    // Horizontal pass; every source cell contributes but only the unpadded
    // columns are accumulated
    let mut intermediate = vec![0.0; grid_dim * grid_dim];
    for row in 0..grid_dim {
        for col in 0..grid_dim {
            let value = grid[row * grid_dim + col];
            if value == 0.0 {
                continue;
            }
            let start = lower.max(col.saturating_sub(radius));
            let end = upper.min(col + radius);
            for target in start..=end {
                intermediate[row * grid_dim + target] += value * kernel[target + radius - col];
            }
        }
    }

    // Vertical pass into the cropped output; padded columns no longer matter
    let mut output = vec![0.0; dim * dim];
    for row in 0..grid_dim {
        for col in lower..=upper {
            let value = intermediate[row * grid_dim + col];
            if value == 0.0 {
                continue;
            }
            let start = lower.max(row.saturating_sub(radius));
            let end = upper.min(row + radius);
            for target in start..=end {
                output[(target - radius) * dim + (col - radius)] += value * kernel[target + radius - row];
            }
        }
    }
    output
}

/// Map intensities to packed colours; zero is transparent and anything at or
/// above `max` gets the last colour
fn colorize(grid: &[f64], dim: usize, color_map: &[u32], max: f64) -> Vec<u32> {
    debug_assert_eq!(grid.len(), dim * dim);
    let last = color_map.len().saturating_sub(1);
    let scale = if max > 0.0 { last as f64 / max } else { 0.0 };
    grid.iter()
        .map(|&value| {
            if value == 0.0 {
                0
            } else {
                color_map.get(((value * scale) as usize).min(last)).copied().unwrap_or(0)
            }
        })
        .collect()
}

fn encode_png(pixels: &[u32], dim: u32) -> Result<Tile> {
    let image = RgbaImage::from_fn(dim, dim, |x, y| {
        Rgba(color::to_rgba(pixels[(y * dim + x) as usize]))
    });
    let mut data = Vec::new();
    image.write_to(&mut Cursor::new(&mut data), ImageFormat::Png)?;
    Ok(Tile {
        width: dim,
        height: dim,
        data,
    })
}

/// Reference maximum for every zoom level
///
/// Estimated for `DEFAULT_MIN_ZOOM..=DEFAULT_MAX_ZOOM`; lower and higher zooms
/// reuse the nearest estimate.
fn max_intensities(points: &[HeatPoint], bounds: Rect<f64>, radius: u32) -> Vec<f64> {
    #[cfg(feature = "profiling")]
    profiling::scope!("heatmap::max_intensities");

    let estimates: Vec<f64> = (DEFAULT_MIN_ZOOM..=DEFAULT_MAX_ZOOM)
        .into_par_iter()
        .map(|zoom| {
            let screen_dim = (f64::from(SCREEN_SIZE) * 2f64.powi(zoom as i32 - 3)) as u64;
            max_value(points, bounds, radius, screen_dim)
        })
        .collect();
    (0..MAX_ZOOM_LEVEL)
        .map(|zoom| estimates[(zoom.clamp(DEFAULT_MIN_ZOOM, DEFAULT_MAX_ZOOM) - DEFAULT_MIN_ZOOM) as usize])
        .collect()
}

/// Largest intensity sum over radius-diameter buckets when the whole data set
/// fills a `screen_dim` pixel screen
fn max_value(points: &[HeatPoint], bounds: Rect<f64>, radius: u32, screen_dim: u64) -> f64 {
    let bounds_dim = bounds.width().max(bounds.height());
    let buckets = (screen_dim / (2 * u64::from(radius))) as f64 + 0.5;
    let scale = if bounds_dim > 0.0 {
        buckets.floor() / bounds_dim
    } else {
        0.0
    };

    let min = bounds.min();
    let mut sums: HashMap<(i64, i64), f64> = HashMap::new();
    let mut max = 0.0f64;
    for p in points {
        let key = (
            ((p.point.x() - min.x) * scale) as i64,
            ((p.point.y() - min.y) * scale) as i64,
        );
        let sum = sums.entry(key).or_insert(0.0);
        *sum += p.intensity;
        max = max.max(*sum);
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_near(lat: f64, lng: f64, n: usize) -> Vec<LatLng> {
        (0..n)
            .map(|i| LatLng::new(lat + (i % 5) as f64 * 0.01, lng + (i / 5) as f64 * 0.01))
            .collect()
    }

    #[test]
    fn test_builder_validation() {
        assert!(matches!(
            HeatmapTileProvider::builder().build(),
            Err(ClusterError::NoData)
        ));
        assert!(matches!(
            HeatmapTileProvider::builder().data(Vec::new()),
            Err(ClusterError::EmptyData)
        ));
        assert!(matches!(
            HeatmapTileProvider::builder().radius(9),
            Err(ClusterError::InvalidRadius(9))
        ));
        assert!(matches!(
            HeatmapTileProvider::builder().radius(51),
            Err(ClusterError::InvalidRadius(51))
        ));
        assert!(HeatmapTileProvider::builder().radius(10).is_ok());
        assert!(HeatmapTileProvider::builder().radius(50).is_ok());
        assert!(matches!(
            HeatmapTileProvider::builder().opacity(1.2),
            Err(ClusterError::InvalidOpacity(_))
        ));
        assert!(matches!(
            HeatmapTileProvider::builder().opacity(f64::NAN),
            Err(ClusterError::InvalidOpacity(_))
        ));
    }

    #[test]
    fn test_pole_is_rejected() {
        let result = HeatmapTileProvider::builder()
            .data(vec![LatLng::new(90.0, 0.0)])
            .unwrap()
            .build();
        assert!(matches!(result, Err(ClusterError::InvalidCoordinate { .. })));
    }

    #[test]
    fn test_kernel() {
        let kernel = generate_kernel(20, 20.0 / 3.0);
        assert_eq!(kernel.len(), 41);
        assert_eq!(kernel[20], 1.0);
        for i in 0..20 {
            assert_eq!(kernel[i], kernel[40 - i]);
            assert!(kernel[i] < kernel[i + 1]);
        }
        assert!((kernel[0] - (-4.5f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_convolution_of_impulse_is_outer_product() {
        let a = 0.5;
        let kernel = [a, 1.0, a];
        let grid_dim = 5;
        let mut grid = vec![0.0; grid_dim * grid_dim];
        grid[2 * grid_dim + 2] = 1.0;

        let out = convolve(&grid, grid_dim, &kernel);
        assert_eq!(out.len(), 9);
        assert_eq!(out[4], 1.0);
        assert_eq!(out[1], a);
        assert_eq!(out[3], a);
        assert_eq!(out[0], a * a);
        assert_eq!(out[8], a * a);
    }

    #[test]
    fn test_convolution_keeps_padding_contributions() {
        // A point in the padding still bleeds into the visible area
        let kernel = [0.5, 1.0, 0.5];
        let mut grid = vec![0.0; 25];
        grid[2 * 5] = 2.0;
        let out = convolve(&grid, 5, &kernel);
        assert_eq!(out[3], 1.0);
        assert_eq!(out[4], 0.0);
    }

    #[test]
    fn test_colorize() {
        let map = [10, 20, 30, 40, 50];
        let pixels = colorize(&[0.0, 0.5, 1.0, 7.0], 2, &map, 1.0);
        assert_eq!(pixels, vec![0, 30, 50, 50]);
        assert_eq!(colorize(&[3.0], 1, &map, 0.0), vec![10]);
    }

    #[test]
    fn test_max_value_buckets() {
        let at = |x: f64, y: f64, intensity: f64| HeatPoint {
            point: Point::new(x, y),
            intensity,
        };
        let points = [at(0.5, 0.5, 2.0), at(0.5, 0.5, 3.0), at(0.55, 0.55, 4.0)];
        let data = bounds(0.5, 0.6, 0.5, 0.6);
        assert_eq!(max_value(&points, data, 20, 1280), 5.0);
        // A single bucket covers everything when the screen is tiny
        assert_eq!(max_value(&points, data, 20, 40), 9.0);
        assert_eq!(max_value(&points[..2], bounds(0.5, 0.5, 0.5, 0.5), 20, 1280), 5.0);
    }

    #[test]
    fn test_max_intensity_is_clamped_outside_estimated_zooms() {
        let provider = HeatmapTileProvider::builder()
            .data(cluster_near(10.0, 10.0, 50))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(provider.max_intensity(0), provider.max_intensity(5));
        assert_eq!(provider.max_intensity(21), provider.max_intensity(11));
        assert_eq!(provider.max_intensity(30), provider.max_intensity(11));
        assert!(provider.max_intensity(11) >= 1.0);
        assert!(provider.max_intensity(5) >= provider.max_intensity(11));
    }

    #[test]
    fn test_tile_outside_data_is_no_tile() {
        let provider = HeatmapTileProvider::builder()
            .data(cluster_near(0.0, 0.0, 20))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(provider.get_tile(0, 0, 10).unwrap(), None);
        assert_eq!(provider.get_tile(1, 1, 3).unwrap(), None);
    }

    #[test]
    fn test_tile_over_data_renders_png() {
        let provider = HeatmapTileProvider::builder()
            .data(cluster_near(-10.0, 10.0, 20))
            .unwrap()
            .build()
            .unwrap();
        let tile = provider.get_tile(1, 1, 1).unwrap().unwrap();
        assert_eq!((tile.width, tile.height), (TILE_DIM, TILE_DIM));

        let image = image::load_from_memory(&tile.data).unwrap().to_rgba8();
        assert_eq!(image.dimensions(), (TILE_DIM, TILE_DIM));
        let painted = image.pixels().filter(|p| p.0[3] > 0).count();
        assert!(painted > 0);
        // Far corner stays transparent
        assert_eq!(image.get_pixel(TILE_DIM - 1, TILE_DIM - 1).0[3], 0);
    }

    #[test]
    fn test_tile_wraps_across_antimeridian() {
        let provider = HeatmapTileProvider::builder()
            .data(vec![LatLng::new(0.0, 179.95)])
            .unwrap()
            .build()
            .unwrap();
        // The westernmost tile's padding reaches over to the data at +180
        let tile = provider.get_tile(0, 4, 3).unwrap();
        assert!(tile.is_some());
        // A tile in the middle of the world does not
        assert_eq!(provider.get_tile(3, 4, 3).unwrap(), None);
    }

    #[test]
    fn test_setters_rederive_state() {
        let mut provider = HeatmapTileProvider::builder()
            .data(cluster_near(10.0, 10.0, 10))
            .unwrap()
            .build()
            .unwrap();
        let before = provider.max_intensity(8);

        provider.set_radius(50).unwrap();
        assert_eq!(provider.kernel.len(), 101);
        assert!(provider.max_intensity(8) >= before);
        assert!(matches!(provider.set_radius(5), Err(ClusterError::InvalidRadius(5))));
        assert_eq!(provider.radius(), 50);

        provider.set_opacity(1.0).unwrap();
        assert_eq!(color::alpha(provider.color_map[999]), 255);
        assert!(provider.set_opacity(-0.1).is_err());

        provider
            .set_weighted_data(vec![WeightedLatLng::new(LatLng::new(1.0, 1.0), 7.0)])
            .unwrap();
        assert_eq!(provider.max_intensity(8), 7.0);
        assert!(matches!(
            provider.set_weighted_data(Vec::new()),
            Err(ClusterError::EmptyData)
        ));
        assert_eq!(provider.data().len(), 1);
    }
}
