//! Great-circle geometry on a sphere of radius [`EARTH_RADIUS`]
//!
//! Inputs and outputs are [`LatLng`] values in degrees; distances are meters
//! and headings are degrees clockwise from north.

use crate::LatLng;
use crate::utils::{EARTH_RADIUS, arc_hav, hav_distance, wrap};
use std::f64::consts::FRAC_PI_2;

/// Initial heading from `from` to `to`, in `[-180, 180)`
pub fn compute_heading(from: LatLng, to: LatLng) -> f64 {
    let from_lat = from.latitude.to_radians();
    let from_lng = from.longitude.to_radians();
    let to_lat = to.latitude.to_radians();
    let to_lng = to.longitude.to_radians();
    let d_lng = to_lng - from_lng;
    let heading = (d_lng.sin() * to_lat.cos())
        .atan2(from_lat.cos() * to_lat.sin() - from_lat.sin() * to_lat.cos() * d_lng.cos());
    wrap(heading.to_degrees(), -180.0, 180.0)
}

/// Point reached by travelling `distance` meters from `from` along `heading`
pub fn compute_offset(from: LatLng, distance: f64, heading: f64) -> LatLng {
    let distance = distance / EARTH_RADIUS;
    let heading = heading.to_radians();
    let from_lat = from.latitude.to_radians();
    let from_lng = from.longitude.to_radians();
    let cos_distance = distance.cos();
    let sin_distance = distance.sin();
    let sin_from_lat = from_lat.sin();
    let cos_from_lat = from_lat.cos();
    let sin_lat = cos_distance * sin_from_lat + sin_distance * cos_from_lat * heading.cos();
    let d_lng = (sin_distance * cos_from_lat * heading.sin())
        .atan2(cos_distance - sin_from_lat * sin_lat);
    LatLng::new(sin_lat.asin().to_degrees(), (from_lng + d_lng).to_degrees())
}

/// Starting point such that travelling `distance` meters along `heading`
/// ends at `to`
///
/// Returns `None` when no such point exists.
pub fn compute_offset_origin(to: LatLng, distance: f64, heading: f64) -> Option<LatLng> {
    let heading = heading.to_radians();
    let distance = distance / EARTH_RADIUS;
    // sin(to.lat) = n1 * sin(from.lat) + n2 * cos(from.lat); solved as a quadratic
    let n1 = distance.cos();
    let n2 = distance.sin() * heading.cos();
    let n3 = distance.sin() * heading.sin();
    let n4 = to.latitude.to_radians().sin();
    let n12 = n1 * n1;
    let discriminant = n2 * n2 * n12 + n12 * n12 - n12 * n4 * n4;
    if discriminant < 0.0 {
        return None;
    }
    let mut b = n2 * n4 + discriminant.sqrt();
    b /= n1 * n1 + n2 * n2;
    let a = (n4 - n2 * b) / n1;
    let mut from_lat = a.atan2(b);
    if !(-FRAC_PI_2..=FRAC_PI_2).contains(&from_lat) {
        b = n2 * n4 - discriminant.sqrt();
        b /= n1 * n1 + n2 * n2;
        from_lat = a.atan2(b);
    }
    if !(-FRAC_PI_2..=FRAC_PI_2).contains(&from_lat) {
        return None;
    }
    let from_lng =
        to.longitude.to_radians() - n3.atan2(n1 * from_lat.cos() - n2 * from_lat.sin());
    Some(LatLng::new(from_lat.to_degrees(), from_lng.to_degrees()))
}

/// Point at `fraction` of the way along the great circle from `from` to `to`
pub fn interpolate(from: LatLng, to: LatLng, fraction: f64) -> LatLng {
    let from_lat = from.latitude.to_radians();
    let from_lng = from.longitude.to_radians();
    let to_lat = to.latitude.to_radians();
    let to_lng = to.longitude.to_radians();
    let cos_from_lat = from_lat.cos();
    let cos_to_lat = to_lat.cos();

    let angle = compute_angle_between(from, to);
    let sin_angle = angle.sin();
    if sin_angle < 1e-6 {
        return from;
    }
    let a = ((1.0 - fraction) * angle).sin() / sin_angle;
    let b = (fraction * angle).sin() / sin_angle;

    let x = a * cos_from_lat * from_lng.cos() + b * cos_to_lat * to_lng.cos();
    let y = a * cos_from_lat * from_lng.sin() + b * cos_to_lat * to_lng.sin();
    let z = a * from_lat.sin() + b * to_lat.sin();

    let lat = z.atan2((x * x + y * y).sqrt());
    let lng = y.atan2(x);
    LatLng::new(lat.to_degrees(), lng.to_degrees())
}

/// Central angle in radians between two points given in radians
fn distance_radians(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    arc_hav(hav_distance(lat1, lat2, lng1 - lng2))
}

/// Central angle in radians between two points
pub fn compute_angle_between(from: LatLng, to: LatLng) -> f64 {
    distance_radians(
        from.latitude.to_radians(),
        from.longitude.to_radians(),
        to.latitude.to_radians(),
        to.longitude.to_radians(),
    )
}

/// Great-circle distance in meters
pub fn compute_distance_between(from: LatLng, to: LatLng) -> f64 {
    compute_angle_between(from, to) * EARTH_RADIUS
}

/// Length of an open path in meters
pub fn compute_length(path: &[LatLng]) -> f64 {
    path.windows(2)
        .map(|pair| compute_angle_between(pair[0], pair[1]))
        .sum::<f64>()
        * EARTH_RADIUS
}

/// Unsigned area of a closed polygon in square meters
pub fn compute_area(path: &[LatLng]) -> f64 {
    compute_signed_area(path).abs()
}

/// Signed area of a closed polygon; counter-clockwise is positive
pub fn compute_signed_area(path: &[LatLng]) -> f64 {
    compute_signed_area_with_radius(path, EARTH_RADIUS)
}

/// Signed area of a closed polygon on a sphere of the given radius
pub fn compute_signed_area_with_radius(path: &[LatLng], radius: f64) -> f64 {
    let Some(prev) = path.last() else {
        return 0.0;
    };
    if path.len() < 3 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut prev_tan_lat = ((FRAC_PI_2 - prev.latitude.to_radians()) / 2.0).tan();
    let mut prev_lng = prev.longitude.to_radians();
    for point in path {
        let tan_lat = ((FRAC_PI_2 - point.latitude.to_radians()) / 2.0).tan();
        let lng = point.longitude.to_radians();
        total += polar_triangle_area(tan_lat, lng, prev_tan_lat, prev_lng);
        prev_tan_lat = tan_lat;
        prev_lng = lng;
    }
    total * (radius * radius)
}

/// Signed area of the triangle (pole, point1, point2), with latitudes given
/// as `tan((pi/2 - lat) / 2)`
fn polar_triangle_area(tan1: f64, lng1: f64, tan2: f64, lng2: f64) -> f64 {
    let delta_lng = lng1 - lng2;
    let t = tan1 * tan2;
    2.0 * (t * delta_lng.sin()).atan2(1.0 + t * delta_lng.cos())
}
