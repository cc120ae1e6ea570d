//! Speed profiles, ideal lap time and sectors

use serde::{Deserialize, Serialize};

use super::laps::LapTrace;
use crate::config::CanonicalConfig;
use crate::filters::{gaussian_filter1d, interp, median, percentile, unique_by_x, BoundaryMode};

/// Equal-distance slice of the canonical lap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    /// 1-based sector number
    pub sector: usize,
    /// Start distance in metres
    pub start_dist_m: f64,
    /// End distance in metres
    pub end_dist_m: f64,
    /// Ideal time through the sector in seconds
    pub ideal_time_s: f64,
}

/// Speed along a lap from positions and timestamps.
///
/// Steps shorter than `min_dt_s` (or non-positive) use the median positive step.
/// The result is smoothed and clipped to `[0, max_speed_ms]`. Laps with fewer than
/// three points or no elapsed time give all zeros.
pub fn lap_speed(trace: &LapTrace, config: &CanonicalConfig) -> Vec<f64> {
    let n = trace.dist.len();
    let t = trace.relative_time_s();
    if n < 3 || t.last().copied().unwrap_or(0.0) <= t[0] {
        return vec![0.0; n];
    }
    let positive: Vec<f64> = t
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|dt| *dt > 0.0)
        .collect();
    let dt_median = median(&positive);
    if !dt_median.is_finite() {
        return vec![0.0; n];
    }

    let mut v: Vec<f64> = (1..n)
        .map(|i| {
            let dt = t[i] - t[i - 1];
            let dt = if dt <= 0.0 || dt < config.min_dt_s { dt_median } else { dt };
            let s = (trace.dist[i] - trace.dist[i - 1]) / dt;
            if s.is_finite() {
                s
            } else {
                0.0
            }
        })
        .collect();
    v.insert(0, v[0]);

    gaussian_filter1d(&v, config.speed_sigma, BoundaryMode::Reflect)
        .into_iter()
        .map(|s| s.clamp(0.0, config.max_speed_ms))
        .collect()
}

/// Map a per-lap series onto the canonical grid by normalized arc length
pub fn to_canonical_grid(trace: &LapTrace, values: &[f64], canonical_dist: &[f64]) -> Option<Vec<f64>> {
    let lap_len = trace.length();
    let track_len = canonical_dist.last().copied().unwrap_or(0.0);
    if lap_len <= 0.0 || track_len <= 0.0 {
        return None;
    }
    let s_norm: Vec<f64> = trace.dist.iter().map(|d| d / lap_len).collect();
    let (xp, fp) = unique_by_x(&s_norm, values);
    Some(
        canonical_dist
            .iter()
            .map(|d| interp(d / track_len, &xp, &fp))
            .collect(),
    )
}

/// Reference speed: the configured percentile across laps at each canonical point
pub fn reference_speed(per_lap: &[Vec<f64>], n_points: usize, config: &CanonicalConfig) -> Vec<f64> {
    if per_lap.is_empty() {
        return vec![0.0; n_points];
    }
    let mut column = Vec::with_capacity(per_lap.len());
    (0..n_points)
        .map(|i| {
            column.clear();
            column.extend(per_lap.iter().map(|lap| lap[i]));
            percentile(&column, config.ref_percentile)
        })
        .collect()
}

/// Curvature-derated ideal speed with a floor
pub fn ideal_speed(ref_speed: &[f64], curvature: &[f64], config: &CanonicalConfig) -> Vec<f64> {
    let k_max = curvature.iter().copied().fold(0.0, f64::max);
    let k_max = if k_max > 0.0 { k_max } else { 1.0 };
    ref_speed
        .iter()
        .zip(curvature)
        .map(|(v, k)| (v * (1.0 - config.curvature_derate * k / k_max)).max(config.min_ideal_speed_ms))
        .collect()
}

/// Cumulative time at each point driving at `speed`; starts at 0
pub fn ideal_time(dist: &[f64], speed: &[f64]) -> Vec<f64> {
    let mut acc = 0.0;
    dist.iter()
        .enumerate()
        .map(|(i, d)| {
            if i > 0 && speed[i] > 0.0 {
                acc += (d - dist[i - 1]) / speed[i];
            }
            acc
        })
        .collect()
}

/// Split `[0, track_length]` into equal sectors timed from the cumulative ideal time
/// at their boundaries
pub fn build_sectors(dist: &[f64], ideal_time: &[f64], n_sectors: usize) -> Vec<Sector> {
    let track_len = dist.last().copied().unwrap_or(0.0);
    let n = n_sectors.max(1);
    let edges = crate::filters::linspace(0.0, track_len, n + 1);
    edges
        .windows(2)
        .enumerate()
        .map(|(i, w)| Sector {
            sector: i + 1,
            start_dist_m: w[0],
            end_dist_m: w[1],
            ideal_time_s: interp(w[1], dist, ideal_time) - interp(w[0], dist, ideal_time),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(dist: Vec<f64>, t_ms: Vec<i64>) -> LapTrace {
        let n = dist.len();
        LapTrace {
            vehicle_id: "car".to_string(),
            lap: 2,
            timestamp_ms: t_ms,
            x: dist.clone(),
            y: vec![0.0; n],
            dist,
        }
    }

    #[test]
    fn test_lap_speed_constant() {
        let tr = trace(
            (0..50).map(|i| i as f64 * 3.0).collect(),
            (0..50).map(|i| i * 100).collect(),
        );
        for v in lap_speed(&tr, &CanonicalConfig::default()) {
            assert!((v - 30.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_lap_speed_repairs_tiny_steps() {
        // duplicated timestamp in the middle
        let mut t: Vec<i64> = (0..40).map(|i| i * 100).collect();
        t[20] = t[19];
        let tr = trace((0..40).map(|i| i as f64 * 2.0).collect(), t);
        let v = lap_speed(&tr, &CanonicalConfig::default());
        assert!(v.iter().all(|s| s.is_finite() && *s <= 90.0));
    }

    #[test]
    fn test_lap_speed_degenerate() {
        let tr = trace(vec![0.0, 1.0], vec![0, 100]);
        assert_eq!(lap_speed(&tr, &CanonicalConfig::default()), vec![0.0, 0.0]);
        let tr = trace(vec![0.0, 1.0, 2.0], vec![0, 0, 0]);
        assert_eq!(lap_speed(&tr, &CanonicalConfig::default()), vec![0.0; 3]);
    }

    #[test]
    fn test_ideal_speed_floor_and_derate() {
        let config = CanonicalConfig::default();
        let v = ideal_speed(&[40.0, 40.0, 20.0], &[0.0, 0.02, 0.02], &config);
        assert_eq!(v[0], 40.0);
        assert!((v[1] - 18.0).abs() < 1e-9);
        assert_eq!(v[2], 15.0);
        // flat curvature keeps the reference speed
        assert_eq!(ideal_speed(&[30.0], &[0.0], &config), vec![30.0]);
    }

    #[test]
    fn test_sectors_sum_to_lap_time() {
        let dist: Vec<f64> = (0..101).map(|i| i as f64 * 10.0).collect();
        let speed: Vec<f64> = (0..101).map(|i| 20.0 + (i % 7) as f64).collect();
        let t = ideal_time(&dist, &speed);
        let sectors = build_sectors(&dist, &t, 3);
        assert_eq!(sectors.len(), 3);
        assert_eq!(sectors[0].start_dist_m, 0.0);
        assert_eq!(sectors[2].end_dist_m, 1000.0);
        let total: f64 = sectors.iter().map(|s| s.ideal_time_s).sum();
        assert!((total - t[100]).abs() < 1e-9);
        assert_eq!(sectors[1].sector, 2);
    }

    #[test]
    fn test_to_canonical_grid() {
        let tr = trace(vec![0.0, 50.0, 100.0], vec![0, 1000, 2000]);
        let grid = to_canonical_grid(&tr, &[10.0, 20.0, 30.0], &[0.0, 250.0, 500.0]).unwrap();
        assert_eq!(grid, vec![10.0, 20.0, 30.0]);
    }
}
