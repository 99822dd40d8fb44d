//! Spherical Mercator projection into a square "world" plane
//!
//! `x` grows eastwards from 0 at -180° to `world_width` at 180°, `y` grows
//! southwards from the top of the map, matching slippy-map tile coordinates.

use crate::LatLng;
use geo::{Coord, Point, Rect};
use std::f64::consts::PI;

/// Projects between geographic and planar coordinates for a given world width
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalMercatorProjection {
    world_width: f64,
}

impl SphericalMercatorProjection {
    pub fn new(world_width: f64) -> Self {
        Self { world_width }
    }

    /// Projection used for tile-space pixel coordinates at `zoom`
    pub fn for_zoom(zoom: f64) -> Self {
        Self::new(256.0 * 2f64.powf(zoom))
    }

    #[inline]
    pub fn world_width(&self) -> f64 {
        self.world_width
    }

    /// Poles project to infinity; callers must keep `|lat| < 90`.
    #[inline]
    pub fn to_point(&self, lat_lng: LatLng) -> Point<f64> {
        let x = lat_lng.longitude / 360.0 + 0.5;
        let siny = lat_lng.latitude.to_radians().sin();
        let y = 0.5 * ((1.0 + siny) / (1.0 - siny)).ln() / -(2.0 * PI) + 0.5;
        Point::new(x * self.world_width, y * self.world_width)
    }

    #[inline]
    pub fn to_lat_lng(&self, point: Point<f64>) -> LatLng {
        let x = point.x() / self.world_width - 0.5;
        let lng = x * 360.0;
        let y = 0.5 - point.y() / self.world_width;
        let lat = 90.0 - ((-y * 2.0 * PI).exp().atan() * 2.0).to_degrees();
        LatLng::new(lat, lng)
    }
}

/// Build a rectangle from explicit edges
#[inline]
pub fn bounds(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Rect<f64> {
    Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
}

/// Inclusive point-in-rectangle test
#[inline]
pub fn contains_point(rect: &Rect<f64>, x: f64, y: f64) -> bool {
    let min = rect.min();
    let max = rect.max();
    min.x <= x && x <= max.x && min.y <= y && y <= max.y
}

/// Rectangles overlap, touching edges included
#[inline]
pub fn intersects(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    let (amin, amax) = (a.min(), a.max());
    let (bmin, bmax) = (b.min(), b.max());
    !(amax.x < bmin.x || amin.x > bmax.x || amax.y < bmin.y || amin.y > bmax.y)
}

/// Square of half-side `half_span` centred on `point`
#[inline]
pub fn bounds_around(point: Point<f64>, half_span: f64) -> Rect<f64> {
    bounds(
        point.x() - half_span,
        point.x() + half_span,
        point.y() - half_span,
        point.y() + half_span,
    )
}
