//! Scalar helpers shared by the spherical, polygon and projection code
//!
//! All angles are in radians unless a function says otherwise.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

/// Mean Earth radius in meters
pub const EARTH_RADIUS: f64 = 6_371_009.0;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Restrict `x` to the range `[low, high]`
#[inline(always)]
pub fn clamp(x: f64, low: f64, high: f64) -> f64 {
    if x < low {
        low
    } else if x > high {
        high
    } else {
        x
    }
}

/// Wrap `n` into the half-open range `[min, max)`
///
/// Values already inside the range are returned untouched so that `max` itself
/// is the only boundary that moves.
#[inline(always)]
pub fn wrap(n: f64, min: f64, max: f64) -> f64 {
    if n >= min && n < max {
        n
    } else {
        modulo(n - min, max - min) + min
    }
}

/// Non-negative remainder of `x / m` for positive `m`
#[inline(always)]
pub fn modulo(x: f64, m: f64) -> f64 {
    ((x % m) + m) % m
}

/// Mercator projection of a latitude, unscaled
#[inline(always)]
pub fn mercator(lat: f64) -> f64 {
    (lat * 0.5 + FRAC_PI_4).tan().ln()
}

/// Inverse of [`mercator`]
#[inline(always)]
pub fn inverse_mercator(y: f64) -> f64 {
    2.0 * y.exp().atan() - FRAC_PI_2
}

/// Haversine: `hav(x) == (1 - cos(x)) / 2 == sin(x / 2)^2`
#[inline(always)]
pub fn hav(x: f64) -> f64 {
    let sin_half = (x * 0.5).sin();
    sin_half * sin_half
}

/// Inverse haversine, for `x` in `[0, 1]`
#[inline(always)]
pub fn arc_hav(x: f64) -> f64 {
    2.0 * x.sqrt().asin()
}

/// Given `h == hav(x)`, returns `sin(abs(x))`
#[inline(always)]
pub fn sin_from_hav(h: f64) -> f64 {
    2.0 * (h * (1.0 - h)).sqrt()
}

/// Returns `hav(asin(x))`
#[inline(always)]
pub fn hav_from_sin(x: f64) -> f64 {
    let x2 = x * x;
    x2 / (1.0 + (1.0 - x2).sqrt()) * 0.5
}

/// Returns `sin(arc_hav(x) + arc_hav(y))`
#[inline(always)]
pub fn sin_sum_from_hav(x: f64, y: f64) -> f64 {
    let a = (x * (1.0 - x)).sqrt();
    let b = (y * (1.0 - y)).sqrt();
    2.0 * (a + b - 2.0 * (a * y + b * x))
}

/// Haversine of the central angle between two points
#[inline(always)]
pub fn hav_distance(lat1: f64, lat2: f64, d_lng: f64) -> f64 {
    hav(lat1 - lat2) + hav(d_lng) * lat1.cos() * lat2.cos()
}

/// Clamp a latitude in degrees to the Web Mercator range
#[inline(always)]
pub fn clamp_latitude(lat: f64) -> f64 {
    lat.clamp(-MAX_LATITUDE, MAX_LATITUDE)
}
