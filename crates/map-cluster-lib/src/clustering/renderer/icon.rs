//! Cluster glyph selection: size buckets, labels and colours

use crate::color;
use crate::map::ClusterIcon;

/// Cluster sizes above the first bucket are rounded down to one of these
pub const BUCKETS: [usize; 7] = [10, 20, 50, 100, 200, 500, 1000];

/// Bucketed size used for the glyph of a cluster with `size` items
pub fn bucket(size: usize) -> usize {
    if size <= BUCKETS[0] {
        return size;
    }
    BUCKETS
        .windows(2)
        .find(|pair| size < pair[1])
        .map_or(BUCKETS[BUCKETS.len() - 1], |pair| pair[0])
}

/// Text for a bucket: exact below the first bucket, `N+` from there on
pub fn label(bucket: usize) -> String {
    if bucket < BUCKETS[0] {
        bucket.to_string()
    } else {
        format!("{bucket}+")
    }
}

/// Colour for a bucket, from blue for small clusters to red for large ones
pub fn color(bucket: usize) -> u32 {
    const HUE_RANGE: f64 = 220.0;
    const SIZE_RANGE: f64 = 300.0;
    let size = (bucket as f64).min(SIZE_RANGE);
    let hue = (SIZE_RANGE - size) * (SIZE_RANGE - size) / (SIZE_RANGE * SIZE_RANGE) * HUE_RANGE;
    color::from_hsv(255, [hue, 1.0, 0.6])
}

pub fn cluster_icon(size: usize) -> ClusterIcon {
    let bucket = bucket(size);
    ClusterIcon {
        bucket,
        label: label(bucket),
        color: color(bucket),
    }
}
