//! Colour gradients and the lookup tables derived from them

use crate::color;
use crate::{ClusterError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Colours anchored at increasing start points in `[0, 1]`
///
/// Below the first start point the map fades in from a transparent version of
/// the first colour; above the last one it stays at the last colour.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawGradient"))]
pub struct Gradient {
    colors: Vec<u32>,
    start_points: Vec<f64>,
    color_map_size: usize,
}

/// Unchecked wire form of [`Gradient`]
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawGradient {
    colors: Vec<u32>,
    start_points: Vec<f64>,
    #[serde(default = "default_color_map_size")]
    color_map_size: usize,
}

#[cfg(feature = "serde")]
fn default_color_map_size() -> usize {
    Gradient::DEFAULT_COLOR_MAP_SIZE
}

#[cfg(feature = "serde")]
impl TryFrom<RawGradient> for Gradient {
    type Error = ClusterError;

    fn try_from(raw: RawGradient) -> Result<Self> {
        Self::with_color_map_size(raw.colors, raw.start_points, raw.color_map_size)
    }
}

/// A run of the colour map blending between two colours
#[derive(Debug, Clone, Copy)]
struct ColorInterval {
    from: u32,
    to: u32,
    /// Length of the run in colour map entries
    duration: f64,
}

impl Gradient {
    pub const DEFAULT_COLOR_MAP_SIZE: usize = 1000;

    pub fn new(colors: Vec<u32>, start_points: Vec<f64>) -> Result<Self> {
        Self::with_color_map_size(colors, start_points, Self::DEFAULT_COLOR_MAP_SIZE)
    }

    pub fn with_color_map_size(colors: Vec<u32>, start_points: Vec<f64>, color_map_size: usize) -> Result<Self> {
        if colors.len() != start_points.len() {
            return Err(ClusterError::InvalidGradient(format!(
                "{} colors but {} start points",
                colors.len(),
                start_points.len()
            )));
        }
        if colors.is_empty() {
            return Err(ClusterError::InvalidGradient("no colors".into()));
        }
        if color_map_size == 0 {
            return Err(ClusterError::InvalidGradient("empty color map".into()));
        }
        if let Some(bad) = start_points.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(ClusterError::InvalidGradient(format!(
                "start point {bad} outside [0, 1]"
            )));
        }
        if start_points.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(ClusterError::InvalidGradient(
                "start points must be strictly increasing".into(),
            ));
        }
        Ok(Self {
            colors,
            start_points,
            color_map_size,
        })
    }

    pub fn colors(&self) -> &[u32] {
        &self.colors
    }

    pub fn start_points(&self) -> &[f64] {
        &self.start_points
    }

    pub fn color_map_size(&self) -> usize {
        self.color_map_size
    }

    /// Intervals keyed by the colour map index they start at
    fn color_intervals(&self) -> BTreeMap<usize, ColorInterval> {
        let size = self.color_map_size as f64;
        let first = self.colors[0];
        let last = self.colors.len() - 1;
        let mut intervals = BTreeMap::new();

        if self.start_points[0] != 0.0 {
            let transparent = color::argb(0, color::red(first), color::green(first), color::blue(first));
            intervals.insert(
                0,
                ColorInterval {
                    from: transparent,
                    to: first,
                    duration: size * self.start_points[0],
                },
            );
        }
        for i in 1..self.colors.len() {
            intervals.insert(
                (size * self.start_points[i - 1]) as usize,
                ColorInterval {
                    from: self.colors[i - 1],
                    to: self.colors[i],
                    duration: size * (self.start_points[i] - self.start_points[i - 1]),
                },
            );
        }
        if self.start_points[last] != 1.0 {
            intervals.insert(
                (size * self.start_points[last]) as usize,
                ColorInterval {
                    from: self.colors[last],
                    to: self.colors[last],
                    duration: size * (1.0 - self.start_points[last]),
                },
            );
        }
        intervals
    }

    /// Lookup table of `color_map_size` packed colours, alpha scaled by
    /// `opacity`
    pub fn generate_color_map(&self, opacity: f64) -> Vec<u32> {
        let intervals = self.color_intervals();
        let mut active: Option<(usize, ColorInterval)> = None;
        let mut map = Vec::with_capacity(self.color_map_size);

        for i in 0..self.color_map_size {
            if let Some(interval) = intervals.get(&i) {
                active = Some((i, *interval));
            }
            let color = match active {
                Some((start, interval)) => {
                    let ratio = (i - start) as f64 / interval.duration;
                    interpolate_color(interval.from, interval.to, ratio)
                }
                None => 0,
            };
            map.push(color);
        }

        if opacity != 1.0 {
            for c in &mut map {
                let alpha = (f64::from(color::alpha(*c)) * opacity) as u8;
                *c = color::argb(alpha, color::red(*c), color::green(*c), color::blue(*c));
            }
        }
        map
    }
}

impl Default for Gradient {
    /// Green at 20% intensity to red at full intensity
    fn default() -> Self {
        Self {
            colors: vec![color::rgb(102, 225, 0), color::rgb(255, 0, 0)],
            start_points: vec![0.2, 1.0],
            color_map_size: Self::DEFAULT_COLOR_MAP_SIZE,
        }
    }
}

/// Blend two colours in HSV, taking the shorter way round the hue circle;
/// alpha is blended linearly
pub fn interpolate_color(from: u32, to: u32, ratio: f64) -> u32 {
    let alpha_from = f64::from(color::alpha(from));
    let alpha_to = f64::from(color::alpha(to));
    let alpha = ((alpha_to - alpha_from) * ratio + alpha_from).clamp(0.0, 255.0) as u8;

    let mut hsv_from = color::to_hsv(from);
    let mut hsv_to = color::to_hsv(to);
    if hsv_from[0] - hsv_to[0] > 180.0 {
        hsv_to[0] += 360.0;
    } else if hsv_to[0] - hsv_from[0] > 180.0 {
        hsv_from[0] += 360.0;
    }

    let mut blended = [0.0; 3];
    for (i, channel) in blended.iter_mut().enumerate() {
        *channel = (hsv_to[i] - hsv_from[i]) * ratio + hsv_from[i];
    }
    color::from_hsv(alpha, blended)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        let red = color::rgb(255, 0, 0);
        let blue = color::rgb(0, 0, 255);
        assert!(matches!(
            Gradient::new(vec![red], vec![0.1, 0.5]),
            Err(ClusterError::InvalidGradient(_))
        ));
        assert!(matches!(
            Gradient::new(vec![], vec![]),
            Err(ClusterError::InvalidGradient(_))
        ));
        assert!(matches!(
            Gradient::new(vec![red, blue], vec![0.5, 0.5]),
            Err(ClusterError::InvalidGradient(_))
        ));
        assert!(matches!(
            Gradient::new(vec![red, blue], vec![0.6, 0.2]),
            Err(ClusterError::InvalidGradient(_))
        ));
        assert!(matches!(
            Gradient::new(vec![red], vec![1.5]),
            Err(ClusterError::InvalidGradient(_))
        ));
        assert!(Gradient::new(vec![red, blue], vec![0.0, 1.0]).is_ok());
    }

    #[test]
    fn test_default_color_map() {
        let map = Gradient::default().generate_color_map(1.0);
        assert_eq!(map.len(), 1000);
        // Fades in from transparent green
        assert_eq!(color::alpha(map[0]), 0);
        assert_eq!(map[200], color::rgb(102, 225, 0));
        assert_eq!(color::alpha(map[100]), 127);
        // Reaches red at the top
        let [hue, ..] = color::to_hsv(map[999]);
        assert!(hue < 1.0, "{hue}");
        assert_eq!(color::red(map[999]), 255);
    }

    #[test]
    fn test_opacity_scales_alpha() {
        let map = Gradient::default().generate_color_map(0.5);
        assert_eq!(color::alpha(map[500]), 127);
        assert_eq!(color::alpha(map[0]), 0);
    }

    #[test]
    fn test_last_color_extends_to_end() {
        let red = color::rgb(255, 0, 0);
        let blue = color::rgb(0, 0, 255);
        let gradient = Gradient::with_color_map_size(vec![red, blue], vec![0.0, 0.5], 10).unwrap();
        let map = gradient.generate_color_map(1.0);
        assert_eq!(map[0], red);
        assert_eq!(map[5], blue);
        assert_eq!(map[9], blue);
    }

    #[test]
    fn test_interpolation_takes_short_hue_arc() {
        // Hue 350 to hue 10 passes through 0, not 180
        let from = color::from_hsv(255, [350.0, 1.0, 1.0]);
        let to = color::from_hsv(255, [10.0, 1.0, 1.0]);
        let mid = interpolate_color(from, to, 0.5);
        let [hue, ..] = color::to_hsv(mid);
        assert!(!(20.0..340.0).contains(&hue), "{hue}");
        assert_eq!(interpolate_color(from, to, 0.0), from);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_validates() {
        let err = serde_json::from_str::<Gradient>(r#"{"colors":[],"start_points":[]}"#).unwrap_err();
        assert!(err.to_string().contains("no colors"), "{err}");
        assert!(serde_json::from_str::<Gradient>(r#"{"colors":[1,2],"start_points":[0.7,0.3]}"#).is_err());
        assert!(
            serde_json::from_str::<Gradient>(r#"{"colors":[1],"start_points":[0.5],"color_map_size":0}"#)
                .is_err()
        );

        let gradient: Gradient = serde_json::from_str(r#"{"colors":[1,2],"start_points":[0.2,1.0]}"#).unwrap();
        assert_eq!(gradient.color_map_size(), Gradient::DEFAULT_COLOR_MAP_SIZE);
        let json = serde_json::to_string(&Gradient::default()).unwrap();
        assert_eq!(serde_json::from_str::<Gradient>(&json).unwrap(), Gradient::default());
    }
}
