//! Polygon and polyline predicates plus the encoded-polyline codec
//!
//! Edges are great-circle arcs when `geodesic` is true and rhumb lines
//! otherwise. Polygons are implicitly closed.

use crate::utils::{
    EARTH_RADIUS, clamp, hav, hav_distance, hav_from_sin, inverse_mercator, mercator,
    sin_from_hav, sin_sum_from_hav, wrap,
};
use crate::{ClusterError, LatLng, Result};
use std::f64::consts::{FRAC_PI_2, PI};

/// Tolerance in meters used by the `*_default` predicates
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// tan(latitude at `lng3`) on the great circle (lat1, 0) to (lat2, lng2)
fn tan_lat_gc(lat1: f64, lat2: f64, lng2: f64, lng3: f64) -> f64 {
    (lat1.tan() * (lng2 - lng3).sin() + lat2.tan() * lng3.sin()) / lng2.sin()
}

/// mercator(latitude at `lng3`) on the rhumb line (lat1, 0) to (lat2, lng2)
fn mercator_lat_rhumb(lat1: f64, lat2: f64, lng2: f64, lng3: f64) -> f64 {
    (mercator(lat1) * (lng2 - lng3) + mercator(lat2) * lng3) / lng2
}

/// Whether the meridian segment from (lat3, lng3) down to the South Pole
/// crosses the edge (lat1, 0) to (lat2, lng2)
///
/// Longitudes are already offset so that the edge starts at longitude 0.
fn intersects(lat1: f64, lat2: f64, lng2: f64, lat3: f64, lng3: f64, geodesic: bool) -> bool {
    // Both ends on the same side of lng3
    if (lng3 >= 0.0 && lng3 >= lng2) || (lng3 < 0.0 && lng3 < lng2) {
        return false;
    }
    // Point is the South Pole
    if lat3 <= -FRAC_PI_2 {
        return false;
    }
    // Any segment end is a pole
    if lat1 <= -FRAC_PI_2 || lat2 <= -FRAC_PI_2 || lat1 >= FRAC_PI_2 || lat2 >= FRAC_PI_2 {
        return false;
    }
    if lng2 <= -PI {
        return false;
    }
    let linear_lat = (lat1 * (lng2 - lng3) + lat2 * lng3) / lng2;
    // Northern hemisphere and point under the lat-lng line
    if lat1 >= 0.0 && lat2 >= 0.0 && lat3 < linear_lat {
        return false;
    }
    // Southern hemisphere and point above the lat-lng line
    if lat1 <= 0.0 && lat2 <= 0.0 && lat3 >= linear_lat {
        return true;
    }
    // North Pole
    if lat3 >= FRAC_PI_2 {
        return true;
    }
    // Compare through a strictly increasing function of latitude
    if geodesic {
        lat3.tan() >= tan_lat_gc(lat1, lat2, lng2, lng3)
    } else {
        mercator(lat3) >= mercator_lat_rhumb(lat1, lat2, lng2, lng3)
    }
}

/// Whether `point` lies inside `polygon`
///
/// The South Pole is always outside. A point equal to a vertex is inside.
pub fn contains_location(point: LatLng, polygon: &[LatLng], geodesic: bool) -> bool {
    let Some(prev) = polygon.last() else {
        return false;
    };
    let lat3 = point.latitude.to_radians();
    let lng3 = point.longitude.to_radians();
    let mut lat1 = prev.latitude.to_radians();
    let mut lng1 = prev.longitude.to_radians();
    let mut crossings = 0usize;
    for vertex in polygon {
        let d_lng3 = wrap(lng3 - lng1, -PI, PI);
        if lat3 == lat1 && d_lng3 == 0.0 {
            return true;
        }
        let lat2 = vertex.latitude.to_radians();
        let lng2 = vertex.longitude.to_radians();
        if intersects(
            lat1,
            lat2,
            wrap(lng2 - lng1, -PI, PI),
            lat3,
            d_lng3,
            geodesic,
        ) {
            crossings += 1;
        }
        lat1 = lat2;
        lng1 = lng2;
    }
    crossings % 2 == 1
}

/// Whether `point` is within `tolerance` meters of the closed outline of `polygon`
pub fn is_location_on_edge(
    point: LatLng,
    polygon: &[LatLng],
    geodesic: bool,
    tolerance: f64,
) -> bool {
    is_location_on_edge_or_path(point, polygon, true, geodesic, tolerance)
}

/// [`is_location_on_edge`] with [`DEFAULT_TOLERANCE`]
pub fn is_location_on_edge_default(point: LatLng, polygon: &[LatLng], geodesic: bool) -> bool {
    is_location_on_edge(point, polygon, geodesic, DEFAULT_TOLERANCE)
}

/// Whether `point` is within `tolerance` meters of the open polyline
pub fn is_location_on_path(
    point: LatLng,
    polyline: &[LatLng],
    geodesic: bool,
    tolerance: f64,
) -> bool {
    is_location_on_edge_or_path(point, polyline, false, geodesic, tolerance)
}

/// [`is_location_on_path`] with [`DEFAULT_TOLERANCE`]
pub fn is_location_on_path_default(point: LatLng, polyline: &[LatLng], geodesic: bool) -> bool {
    is_location_on_path(point, polyline, geodesic, DEFAULT_TOLERANCE)
}

fn is_location_on_edge_or_path(
    point: LatLng,
    poly: &[LatLng],
    closed: bool,
    geodesic: bool,
    tolerance_earth: f64,
) -> bool {
    let prev = match (poly.first(), poly.last()) {
        (Some(_), Some(last)) if closed => last,
        (Some(first), _) => first,
        _ => return false,
    };
    let tolerance = tolerance_earth / EARTH_RADIUS;
    let hav_tolerance = hav(tolerance);
    let lat3 = point.latitude.to_radians();
    let lng3 = point.longitude.to_radians();
    let mut lat1 = prev.latitude.to_radians();
    let mut lng1 = prev.longitude.to_radians();

    if geodesic {
        for vertex in poly {
            let lat2 = vertex.latitude.to_radians();
            let lng2 = vertex.longitude.to_radians();
            if is_on_segment_gc(lat1, lng1, lat2, lng2, lat3, lng3, hav_tolerance) {
                return true;
            }
            lat1 = lat2;
            lng1 = lng2;
        }
        return false;
    }

    // Rhumb segments are straight in Mercator space; closest-point search
    // there is an approximation that is fine for small tolerances.
    let min_acceptable = lat3 - tolerance;
    let max_acceptable = lat3 + tolerance;
    let mut y1 = mercator(lat1);
    let y3 = mercator(lat3);
    for vertex in poly {
        let lat2 = vertex.latitude.to_radians();
        let y2 = mercator(lat2);
        let lng2 = vertex.longitude.to_radians();
        if lat1.max(lat2) >= min_acceptable && lat1.min(lat2) <= max_acceptable {
            // Longitudes offset by -lng1; the implicit x1 is 0
            let x2 = wrap(lng2 - lng1, -PI, PI);
            let x3_base = wrap(lng3 - lng1, -PI, PI);
            for x3 in [x3_base, x3_base + 2.0 * PI, x3_base - 2.0 * PI] {
                let dy = y2 - y1;
                let len2 = x2 * x2 + dy * dy;
                let t = if len2 <= 0.0 {
                    0.0
                } else {
                    clamp((x3 * x2 + (y3 - y1) * dy) / len2, 0.0, 1.0)
                };
                let x_closest = t * x2;
                let y_closest = y1 + t * dy;
                let lat_closest = inverse_mercator(y_closest);
                let hav_dist = hav_distance(lat3, lat_closest, x3 - x_closest);
                if hav_dist < hav_tolerance {
                    return true;
                }
            }
        }
        lat1 = lat2;
        lng1 = lng2;
        y1 = y2;
    }
    false
}

/// sin(bearing 1→3 minus bearing 1→2)
fn sin_delta_bearing(lat1: f64, lng1: f64, lat2: f64, lng2: f64, lat3: f64, lng3: f64) -> f64 {
    let sin_lat1 = lat1.sin();
    let cos_lat2 = lat2.cos();
    let cos_lat3 = lat3.cos();
    let lat31 = lat3 - lat1;
    let lng31 = lng3 - lng1;
    let lat21 = lat2 - lat1;
    let lng21 = lng2 - lng1;
    let a = lng31.sin() * cos_lat3;
    let c = lng21.sin() * cos_lat2;
    let b = lat31.sin() + 2.0 * sin_lat1 * cos_lat3 * hav(lng31);
    let d = lat21.sin() + 2.0 * sin_lat1 * cos_lat2 * hav(lng21);
    let denom = (a * a + b * b) * (c * c + d * d);
    if denom <= 0.0 {
        1.0
    } else {
        (a * d - b * c) / denom.sqrt()
    }
}

fn is_on_segment_gc(
    lat1: f64,
    lng1: f64,
    lat2: f64,
    lng2: f64,
    lat3: f64,
    lng3: f64,
    hav_tolerance: f64,
) -> bool {
    let hav_dist13 = hav_distance(lat1, lat3, lng1 - lng3);
    if hav_dist13 <= hav_tolerance {
        return true;
    }
    let hav_dist23 = hav_distance(lat2, lat3, lng2 - lng3);
    if hav_dist23 <= hav_tolerance {
        return true;
    }
    let sin_bearing = sin_delta_bearing(lat1, lng1, lat2, lng2, lat3, lng3);
    let sin_dist13 = sin_from_hav(hav_dist13);
    let hav_cross_track = hav_from_sin(sin_dist13 * sin_bearing);
    if hav_cross_track > hav_tolerance {
        return false;
    }
    let hav_dist12 = hav_distance(lat1, lat2, lng1 - lng2);
    let term = hav_dist12 + hav_cross_track * (1.0 - 2.0 * hav_dist12);
    if hav_dist13 > term || hav_dist23 > term {
        return false;
    }
    if hav_dist12 < 0.74 {
        return true;
    }
    let cos_cross_track = 1.0 - 2.0 * hav_cross_track;
    let hav_along_track13 = (hav_dist13 - hav_cross_track) / cos_cross_track;
    let hav_along_track23 = (hav_dist23 - hav_cross_track) / cos_cross_track;
    // Compare with a half circle through the sign of sin()
    sin_sum_from_hav(hav_along_track13, hav_along_track23) > 0.0
}

/// Decode an encoded polyline string
pub fn decode(encoded: &str) -> Result<Vec<LatLng>> {
    let bytes = encoded.as_bytes();
    let mut path = Vec::with_capacity(bytes.len() / 2);
    let mut index = 0;
    let mut lat = 0i64;
    let mut lng = 0i64;
    while index < bytes.len() {
        let start = index;
        let overflow = || ClusterError::InvalidPolyline(format!("coordinate overflow at offset {start}"));
        lat = lat.checked_add(decode_value(bytes, &mut index)?).ok_or_else(overflow)?;
        lng = lng.checked_add(decode_value(bytes, &mut index)?).ok_or_else(overflow)?;
        path.push(LatLng::new(lat as f64 * 1e-5, lng as f64 * 1e-5));
    }
    Ok(path)
}

fn decode_value(bytes: &[u8], index: &mut usize) -> Result<i64> {
    let mut result = 0i64;
    let mut shift = 0u32;
    loop {
        let Some(&byte) = bytes.get(*index) else {
            return Err(ClusterError::InvalidPolyline(format!(
                "truncated value at offset {}",
                *index
            )));
        };
        if !(63..=126).contains(&byte) {
            return Err(ClusterError::InvalidPolyline(format!(
                "unexpected character {:?} at offset {}",
                byte as char, *index
            )));
        }
        if shift > 60 {
            return Err(ClusterError::InvalidPolyline(format!(
                "value too long at offset {}",
                *index
            )));
        }
        *index += 1;
        let chunk = i64::from(byte - 63);
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
    }
    Ok(if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    })
}

/// Encode a path with 5 decimal digits of precision
pub fn encode(path: &[LatLng]) -> String {
    let mut result = String::with_capacity(path.len() * 8);
    let mut last_lat = 0i64;
    let mut last_lng = 0i64;
    for point in path {
        let lat = (point.latitude * 1e5).round() as i64;
        let lng = (point.longitude * 1e5).round() as i64;
        encode_value(lat - last_lat, &mut result);
        encode_value(lng - last_lng, &mut result);
        last_lat = lat;
        last_lng = lng;
    }
    result
}

fn encode_value(value: i64, out: &mut String) {
    let mut v = if value < 0 { !(value << 1) } else { value << 1 };
    while v >= 0x20 {
        out.push(char::from(((0x20 | (v & 0x1f)) + 63) as u8));
        v >>= 5;
    }
    out.push(char::from((v + 63) as u8));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<LatLng> {
        vec![
            LatLng::new(-1.0, -1.0),
            LatLng::new(-1.0, 1.0),
            LatLng::new(1.0, 1.0),
            LatLng::new(1.0, -1.0),
        ]
    }

    #[test]
    fn test_contains_location_square() {
        for geodesic in [true, false] {
            assert!(contains_location(LatLng::new(0.0, 0.0), &square(), geodesic));
            assert!(!contains_location(LatLng::new(5.0, 5.0), &square(), geodesic));
        }
    }

    #[test]
    fn test_contains_location_vertex_is_inside() {
        assert!(contains_location(LatLng::new(1.0, 1.0), &square(), true));
    }

    #[test]
    fn test_contains_location_empty_polygon() {
        assert!(!contains_location(LatLng::new(0.0, 0.0), &[], true));
    }

    #[test]
    fn test_contains_location_across_antimeridian() {
        let polygon = vec![
            LatLng::new(-10.0, 170.0),
            LatLng::new(-10.0, -170.0),
            LatLng::new(10.0, -170.0),
            LatLng::new(10.0, 170.0),
        ];
        assert!(contains_location(LatLng::new(0.0, 179.0), &polygon, true));
        assert!(contains_location(LatLng::new(0.0, -179.0), &polygon, true));
        assert!(!contains_location(LatLng::new(0.0, 0.0), &polygon, true));
    }

    #[test]
    fn test_location_on_edge() {
        let polygon = square();
        // On the closing segment (1,-1) -> (-1,-1)
        assert!(is_location_on_edge_default(
            LatLng::new(0.0, -1.0),
            &polygon,
            false
        ));
        assert!(is_location_on_edge(LatLng::new(-1.0, 0.0), &polygon, true, 1.0));
        assert!(!is_location_on_edge_default(
            LatLng::new(0.0, 0.0),
            &polygon,
            true
        ));
    }

    #[test]
    fn test_location_on_path_is_open() {
        let polygon = square();
        // The closing segment is not part of an open path
        assert!(!is_location_on_path_default(
            LatLng::new(0.0, -1.0),
            &polygon,
            false
        ));
        assert!(is_location_on_path(LatLng::new(-1.0, 0.5), &polygon, true, 1.0));
        assert!(!is_location_on_path(LatLng::new(0.0, 0.0), &[], true, 1.0));
    }

    #[test]
    fn test_encode_reference_path() {
        let path = vec![
            LatLng::new(38.5, -120.2),
            LatLng::new(40.7, -120.95),
            LatLng::new(43.252, -126.453),
        ];
        assert_eq!(encode(&path), "_p~iF~ps|U_ulLnnqC_mqNvxq`@");
    }

    #[test]
    fn test_decode_rejects_coordinate_overflow() {
        let mut encoded = String::new();
        for _ in 0..3 {
            encode_value(4_000_000_000_000_000_000, &mut encoded);
            encode_value(0, &mut encoded);
        }
        assert!(matches!(
            decode(&encoded),
            Err(ClusterError::InvalidPolyline(reason)) if reason.contains("overflow")
        ));
    }

    #[test]
    fn test_decode_reference_path() {
        let path = decode("_p~iF~ps|U_ulLnnqC_mqNvxq`@").unwrap();
        assert_eq!(path.len(), 3);
        assert!((path[2].latitude - 43.252).abs() < 1e-9);
        assert!((path[2].longitude - -126.453).abs() < 1e-9);
    }

    #[test]
    fn test_polyline_roundtrip() {
        let path: Vec<LatLng> = (0..50)
            .map(|i| {
                let t = i as f64;
                LatLng::new(
                    ((t * 1.7).sin() * 80.0 * 1e5).round() / 1e5,
                    ((t * 0.9).cos() * 179.0 * 1e5).round() / 1e5,
                )
            })
            .collect();
        let decoded = decode(&encode(&path)).unwrap();
        assert_eq!(decoded.len(), path.len());
        for (a, b) in path.iter().zip(&decoded) {
            assert!((a.latitude - b.latitude).abs() < 1e-9);
            assert!((a.longitude - b.longitude).abs() < 1e-9);
        }
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        assert!(matches!(
            decode("_p~iF~ps|U_"),
            Err(ClusterError::InvalidPolyline(_))
        ));
        assert!(matches!(decode("ab c"), Err(ClusterError::InvalidPolyline(_))));
        assert!(decode("").unwrap().is_empty());
    }
}
