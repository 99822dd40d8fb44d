//! Subcommand implementations

use crate::CliError;
use crate::input::{parse_lat_lng, read_records};
use map_cluster_lib::clustering::{
    AlgorithmConfig, ClusterManager, DefaultClusterRenderer, ManagerConfig, MapPoint, RendererConfig,
};
use map_cluster_lib::control::ControlLoop;
use map_cluster_lib::heatmap::HeatmapTileProvider;
use map_cluster_lib::map::{CameraPosition, InMemorySurface, MarkerIcon, StaticViewport};
use map_cluster_lib::marker_manager::MarkerManager;
use map_cluster_lib::{LatLng, LatLngBounds, poly, spherical};

use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// JSON report of a clustering run
#[derive(Debug, Serialize)]
pub struct ClusterReport {
    pub zoom: f64,
    pub items: usize,
    pub clusters: Vec<ClusterEntry>,
    pub markers: Vec<MarkerEntry>,
}

#[derive(Debug, Serialize)]
pub struct ClusterEntry {
    pub position: LatLng,
    pub size: usize,
    pub items: Vec<u64>,
}

/// A marker left on the surface after rendering
#[derive(Debug, Serialize)]
pub struct MarkerEntry {
    pub id: u64,
    pub position: LatLng,
    /// Glyph text for cluster markers, absent for item markers
    pub label: Option<String>,
}

pub struct ClusterArgs {
    pub input: PathBuf,
    pub zoom: f64,
    pub max_distance: f64,
    pub min_cluster_size: usize,
    pub timeout: Duration,
}

/// Run the full manager/renderer pipeline against an in-memory surface
pub fn cluster(args: ClusterArgs) -> Result<ClusterReport, CliError> {
    let records = read_records(&args.input)?;
    let items: Vec<MapPoint> = records
        .iter()
        .enumerate()
        .map(|(i, record)| MapPoint::new(i as u64, record.location))
        .collect();
    let count = items.len();

    let control = ControlLoop::new().spawn()?;
    let viewport = Arc::new(StaticViewport::new(
        CameraPosition::new(LatLng::default(), args.zoom),
        LatLngBounds::world(),
    ));
    let surface = InMemorySurface::new();
    let markers = Arc::new(MarkerManager::new(surface.clone()));
    let config = ManagerConfig {
        precache: false,
        algorithm: AlgorithmConfig {
            max_distance_px: args.max_distance,
        },
        renderer: RendererConfig {
            min_cluster_size: args.min_cluster_size,
            animate: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let manager = ClusterManager::new(viewport, markers, control.handle(), config.clone());
    manager.add_items(items)?;

    let renderer = Arc::new(DefaultClusterRenderer::new(manager.context().clone(), config.renderer));
    manager.set_renderer(renderer.clone());

    if !manager.wait_idle(args.timeout) {
        return Err(CliError::Timeout("clustering"));
    }
    if !renderer.wait_idle(args.timeout) {
        return Err(CliError::Timeout("rendering"));
    }

    let clusters = renderer
        .rendered_clusters()
        .map(|set| {
            set.iter()
                .map(|cluster| ClusterEntry {
                    position: cluster.position(),
                    size: cluster.size(),
                    items: cluster.items().iter().map(|item| item.id).collect(),
                })
                .collect()
        })
        .unwrap_or_default();
    let markers = surface
        .markers()
        .into_iter()
        .map(|marker| MarkerEntry {
            id: marker.id.0,
            position: marker.position,
            label: match marker.options.icon {
                MarkerIcon::Cluster(icon) => Some(icon.label),
                MarkerIcon::Default => None,
            },
        })
        .collect::<Vec<_>>();
    control.shutdown();

    tracing::info!(items = count, markers = markers.len(), zoom = args.zoom, "clustered");
    Ok(ClusterReport {
        zoom: args.zoom,
        items: count,
        clusters,
        markers,
    })
}

pub fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<(), CliError> {
    match output {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, value)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

pub struct HeatmapArgs {
    pub input: PathBuf,
    pub x: u32,
    pub y: u32,
    pub zoom: u32,
    pub radius: u32,
    pub opacity: f64,
    pub output: PathBuf,
}

/// Returns whether a tile was written
pub fn heatmap(args: HeatmapArgs) -> Result<bool, CliError> {
    let records = read_records(&args.input)?;
    let provider = HeatmapTileProvider::builder()
        .weighted_data(records.iter().map(|r| r.weighted()).collect())?
        .radius(args.radius)?
        .opacity(args.opacity)?
        .build()?;

    match provider.get_tile(args.x, args.y, args.zoom)? {
        Some(tile) => {
            std::fs::write(&args.output, &tile.data)?;
            tracing::info!(
                x = args.x,
                y = args.y,
                zoom = args.zoom,
                bytes = tile.data.len(),
                output = %args.output.display(),
                "wrote heatmap tile"
            );
            Ok(true)
        }
        None => {
            tracing::warn!(x = args.x, y = args.y, zoom = args.zoom, "no data near this tile, nothing written");
            Ok(false)
        }
    }
}

pub fn encode(input: &Path) -> Result<String, CliError> {
    let path: Vec<LatLng> = read_records(input)?.iter().map(|r| r.location).collect();
    Ok(poly::encode(&path))
}

pub fn decode(polyline: &str) -> Result<Vec<LatLng>, CliError> {
    Ok(poly::decode(polyline)?)
}

#[derive(Debug, Serialize)]
pub struct DistanceReport {
    pub meters: f64,
    pub heading: f64,
}

pub fn distance(from: &str, to: &str) -> Result<DistanceReport, CliError> {
    let from = parse_lat_lng(from)?;
    let to = parse_lat_lng(to)?;
    Ok(DistanceReport {
        meters: spherical::compute_distance_between(from, to),
        heading: spherical::compute_heading(from, to),
    })
}

#[derive(Debug, Serialize)]
pub struct AreaReport {
    pub square_meters: f64,
    pub perimeter_meters: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<bool>,
}

pub fn area(input: &Path, contains: Option<&str>) -> Result<AreaReport, CliError> {
    let polygon: Vec<LatLng> = read_records(input)?.iter().map(|r| r.location).collect();
    let mut ring = polygon.clone();
    if let Some(&first) = polygon.first() {
        ring.push(first);
    }
    let contains = contains
        .map(parse_lat_lng)
        .transpose()?
        .map(|point| poly::contains_location(point, &polygon, true));
    Ok(AreaReport {
        square_meters: spherical::compute_area(&polygon),
        perimeter_meters: spherical::compute_length(&ring),
        contains,
    })
}
