use super::WORLD_WIDTH;
use crate::LatLng;
use crate::projection::SphericalMercatorProjection;

use geo::Point;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A location with a heat contribution
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "RawWeightedLatLng"))]
pub struct WeightedLatLng {
    location: LatLng,
    intensity: f64,
}

#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawWeightedLatLng {
    location: LatLng,
    #[serde(default = "default_intensity")]
    intensity: f64,
}

#[cfg(feature = "serde")]
fn default_intensity() -> f64 {
    WeightedLatLng::DEFAULT_INTENSITY
}

#[cfg(feature = "serde")]
impl From<RawWeightedLatLng> for WeightedLatLng {
    fn from(raw: RawWeightedLatLng) -> Self {
        Self::new(raw.location, raw.intensity)
    }
}

impl WeightedLatLng {
    pub const DEFAULT_INTENSITY: f64 = 1.0;

    /// Negative (or NaN) intensities fall back to [`Self::DEFAULT_INTENSITY`]
    pub fn new(location: LatLng, intensity: f64) -> Self {
        let intensity = if intensity >= 0.0 {
            intensity
        } else {
            Self::DEFAULT_INTENSITY
        };
        Self {
            location,
            intensity,
        }
    }

    #[inline]
    pub fn location(&self) -> LatLng {
        self.location
    }

    #[inline]
    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    /// Position on the unit world
    #[inline]
    pub fn point(&self) -> Point<f64> {
        SphericalMercatorProjection::new(WORLD_WIDTH).to_point(self.location)
    }
}

impl From<LatLng> for WeightedLatLng {
    fn from(location: LatLng) -> Self {
        Self::new(location, Self::DEFAULT_INTENSITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_intensity_uses_default() {
        let at = LatLng::new(1.0, 2.0);
        assert_eq!(WeightedLatLng::new(at, -3.0).intensity(), 1.0);
        assert_eq!(WeightedLatLng::new(at, f64::NAN).intensity(), 1.0);
        assert_eq!(WeightedLatLng::new(at, 0.0).intensity(), 0.0);
        assert_eq!(WeightedLatLng::new(at, 4.5).intensity(), 4.5);
        assert_eq!(WeightedLatLng::from(at).intensity(), 1.0);
    }

    #[test]
    fn test_point_on_unit_world() {
        let p = WeightedLatLng::from(LatLng::new(0.0, 0.0)).point();
        assert!((p.x() - 0.5).abs() < 1e-12);
        assert!((p.y() - 0.5).abs() < 1e-12);
        let east = WeightedLatLng::from(LatLng::new(0.0, 90.0)).point();
        assert!((east.x() - 0.75).abs() < 1e-12);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_normalizes_intensity() {
        let location = r#"{"latitude":1.0,"longitude":2.0}"#;
        let negative: WeightedLatLng =
            serde_json::from_str(&format!(r#"{{"location":{location},"intensity":-3.0}}"#)).unwrap();
        assert_eq!(negative.intensity(), WeightedLatLng::DEFAULT_INTENSITY);
        let missing: WeightedLatLng = serde_json::from_str(&format!(r#"{{"location":{location}}}"#)).unwrap();
        assert_eq!(missing.intensity(), WeightedLatLng::DEFAULT_INTENSITY);
        let heavy: WeightedLatLng =
            serde_json::from_str(&format!(r#"{{"location":{location},"intensity":4.5}}"#)).unwrap();
        assert_eq!(heavy.intensity(), 4.5);
    }
}
