//! Geographic value types

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A latitude/longitude pair in degrees
///
/// Latitude is expected in `[-90, 90]` and longitude in `[-180, 180)`; the
/// range is not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    #[inline]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Both components are finite numbers
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

impl From<(f64, f64)> for LatLng {
    fn from((latitude, longitude): (f64, f64)) -> Self {
        Self::new(latitude, longitude)
    }
}

/// Geographic rectangle defined by its south-west and north-east corners
///
/// When `southwest.longitude > northeast.longitude` the box crosses the
/// antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LatLngBounds {
    pub southwest: LatLng,
    pub northeast: LatLng,
}

impl LatLngBounds {
    pub const fn new(southwest: LatLng, northeast: LatLng) -> Self {
        Self {
            southwest,
            northeast,
        }
    }

    /// Bounds covering the whole globe
    pub const fn world() -> Self {
        Self::new(LatLng::new(-90.0, -180.0), LatLng::new(90.0, 180.0))
    }

    /// Degenerate bounds around a single point
    pub const fn from_point(point: LatLng) -> Self {
        Self::new(point, point)
    }

    pub fn contains(&self, point: LatLng) -> bool {
        self.contains_latitude(point.latitude) && self.contains_longitude(point.longitude)
    }

    fn contains_latitude(&self, lat: f64) -> bool {
        self.southwest.latitude <= lat && lat <= self.northeast.latitude
    }

    fn contains_longitude(&self, lng: f64) -> bool {
        let (west, east) = (self.southwest.longitude, self.northeast.longitude);
        if west <= east {
            west <= lng && lng <= east
        } else {
            west <= lng || lng <= east
        }
    }

    /// Smallest bounds containing `self` and `point`
    ///
    /// Longitude grows towards whichever side adds the least span.
    pub fn including(self, point: LatLng) -> Self {
        let south = self.southwest.latitude.min(point.latitude);
        let north = self.northeast.latitude.max(point.latitude);
        let (mut west, mut east) = (self.southwest.longitude, self.northeast.longitude);
        let lng = point.longitude;
        if !self.contains_longitude(lng) {
            if lng_span_to_west(west, lng) < lng_span_to_east(east, lng) {
                west = lng;
            } else {
                east = lng;
            }
        }
        Self::new(LatLng::new(south, west), LatLng::new(north, east))
    }

    pub fn center(&self) -> LatLng {
        let lat = (self.southwest.latitude + self.northeast.latitude) / 2.0;
        let (west, east) = (self.southwest.longitude, self.northeast.longitude);
        let lng = if west <= east {
            (west + east) / 2.0
        } else {
            crate::utils::wrap((west + east + 360.0) / 2.0, -180.0, 180.0)
        };
        LatLng::new(lat, lng)
    }
}

/// Degrees needed to move the western edge `west` to reach `lng`
fn lng_span_to_west(west: f64, lng: f64) -> f64 {
    crate::utils::modulo(west - lng, 360.0)
}

/// Degrees needed to move the eastern edge `east` to reach `lng`
fn lng_span_to_east(east: f64, lng: f64) -> f64 {
    crate::utils::modulo(lng - east, 360.0)
}
