//! Lap segmentation by lapdist resets

use std::ops::Range;

/// Indices where a lap starts: 0 plus every sample whose lapdist is more than
/// `drop` below its predecessor
pub fn lap_starts(lapdist: &[f64], drop: f64) -> Vec<usize> {
    if lapdist.is_empty() {
        return Vec::new();
    }
    let mut starts = vec![0];
    starts.extend((1..lapdist.len()).filter(|&i| lapdist[i] - lapdist[i - 1] < -drop));
    starts
}

/// Sample ranges between lap starts, including the trailing partial lap
pub fn lap_segments(lapdist: &[f64], drop: f64) -> Vec<Range<usize>> {
    let starts = lap_starts(lapdist, drop);
    starts
        .iter()
        .enumerate()
        .map(|(k, &s)| s..starts.get(k + 1).copied().unwrap_or(lapdist.len()))
        .collect()
}
