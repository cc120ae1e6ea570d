//! Fleet-wide racing line

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::bin_index;
use crate::config::RacingLineConfig;
use crate::error::{PipelineError, Result};
use crate::filters::{gaussian_filter1d, mean, median, variance, BoundaryMode};
use crate::trajectory::Trajectory;

/// Filter counters for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RacingLineStats {
    /// Vehicles contributing samples
    pub vehicles_used: usize,
    /// Samples above the speed floor
    pub samples_moving: usize,
    /// Samples dropped by the bucket deviation filter
    pub dropped_outliers: usize,
    /// Samples dropped as pit-lane windows
    pub dropped_pit: usize,
    /// Output bins without data, filled by interpolation
    pub empty_bins: usize,
    /// Output bins invalidated by the jump filter
    pub jump_bins: usize,
}

/// Closed racing line shared by all vehicles
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalRacingLine {
    /// Ordered points around the lap
    pub points: Vec<[f64; 2]>,
    /// Distance between the last and first point
    pub loop_closure_m: f64,
    /// Filter counters
    pub stats: RacingLineStats,
}

#[derive(Debug, Clone, Copy)]
struct LineSample {
    x: f64,
    y: f64,
    s: f64,
    speed: f64,
}

fn drop_bucket_outliers(samples: Vec<LineSample>, config: &RacingLineConfig) -> Vec<LineSample> {
    let mut buckets: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, s) in samples.iter().enumerate() {
        buckets.entry(bin_index(s.s, config.coarse_bins)).or_default().push(i);
    }
    let mut keep = vec![true; samples.len()];
    for members in buckets.values().filter(|m| m.len() >= 3) {
        let xs: Vec<f64> = members.iter().map(|&i| samples[i].x).collect();
        let ys: Vec<f64> = members.iter().map(|&i| samples[i].y).collect();
        let (mx, my) = (median(&xs), median(&ys));
        for &i in members {
            if (samples[i].x - mx).hypot(samples[i].y - my) > config.max_deviation {
                keep[i] = false;
            }
        }
    }
    samples
        .into_iter()
        .zip(keep)
        .filter_map(|(s, k)| k.then_some(s))
        .collect()
}

fn drop_pit_windows(samples: Vec<LineSample>, config: &RacingLineConfig) -> Vec<LineSample> {
    let mut windows: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, s) in samples.iter().enumerate() {
        windows.entry(bin_index(s.s, config.pit_windows)).or_default().push(i);
    }
    let mut pit = vec![false; samples.len()];
    for (w, members) in windows.iter().filter(|(_, m)| m.len() >= 10) {
        let xs: Vec<f64> = members.iter().map(|&i| samples[i].x).collect();
        let ys: Vec<f64> = members.iter().map(|&i| samples[i].y).collect();
        let speeds: Vec<f64> = members.iter().map(|&i| samples[i].speed).collect();
        let spread = (variance(&xs) + variance(&ys)).sqrt();
        if mean(&speeds) < config.pit_window_speed && spread > config.pit_window_spread {
            debug!("Racing line window {} looks like pit lane (spread {:.1} m)", w, spread);
            for &i in members {
                pit[i] = true;
            }
        }
    }
    samples
        .into_iter()
        .zip(pit)
        .filter_map(|(s, p)| (!p).then_some(s))
        .collect()
}

/// Fill invalid entries by linear interpolation between the nearest valid entries
/// around the closed loop
fn fill_periodic(values: &mut [Option<[f64; 2]>]) {
    let n = values.len();
    let valid: Vec<usize> = (0..n).filter(|&i| values[i].is_some()).collect();
    if valid.is_empty() || valid.len() == n {
        return;
    }
    let snapshot: Vec<Option<[f64; 2]>> = values.to_vec();
    for (k, &a) in valid.iter().enumerate() {
        let b = valid[(k + 1) % valid.len()];
        let gap = (b + n - a) % n;
        let gap = if gap == 0 { n } else { gap };
        let (Some(pa), Some(pb)) = (snapshot[a], snapshot[b]) else {
            continue;
        };
        for step in 1..gap {
            let t = step as f64 / gap as f64;
            values[(a + step) % n] = Some([
                pa[0] + (pb[0] - pa[0]) * t,
                pa[1] + (pb[1] - pa[1]) * t,
            ]);
        }
    }
}

/// Build the global racing line from all trajectories.
///
/// Each vehicle's lapdist is normalized to [0, 1] on its own range. Samples are
/// filtered by speed, by distance from their coarse bucket median and by pit-lane
/// windows, then binned, median-reduced, de-jumped, gap-filled and smoothed around
/// the loop.
pub fn build_global_line(
    trajectories: &[&Trajectory],
    config: &RacingLineConfig,
) -> Result<GlobalRacingLine> {
    let mut stats = RacingLineStats::default();
    let mut samples = Vec::new();
    for traj in trajectories {
        let (lo, hi) = traj.rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
            (lo.min(r.lapdist), hi.max(r.lapdist))
        });
        let range = hi - lo;
        if !(range >= config.min_lapdist_range) {
            debug!("Vehicle {}: lapdist range {:.1} too small for racing line", traj.vehicle_id, range);
            continue;
        }
        stats.vehicles_used += 1;
        samples.extend(traj.rows.iter().filter(|r| r.speed >= config.min_speed).map(|r| {
            LineSample {
                x: r.x,
                y: r.y,
                s: (r.lapdist - lo) / range,
                speed: r.speed,
            }
        }));
    }
    stats.samples_moving = samples.len();
    if samples.is_empty() {
        return Err(PipelineError::EmptyRacingLine(
            "no samples above minimum speed".to_string(),
        ));
    }

    let samples = drop_bucket_outliers(samples, config);
    stats.dropped_outliers = stats.samples_moving - samples.len();
    let before_pit = samples.len();
    let samples = drop_pit_windows(samples, config);
    stats.dropped_pit = before_pit - samples.len();
    if samples.is_empty() {
        return Err(PipelineError::EmptyRacingLine(
            "all samples removed by filters".to_string(),
        ));
    }

    let n = config.n_points.max(2);
    let mut bins: Vec<(Vec<f64>, Vec<f64>)> = vec![(Vec::new(), Vec::new()); n];
    for s in &samples {
        let b = bin_index(s.s, n);
        bins[b].0.push(s.x);
        bins[b].1.push(s.y);
    }
    let mut line: Vec<Option<[f64; 2]>> = bins
        .iter()
        .map(|(xs, ys)| (!xs.is_empty()).then(|| [median(xs), median(ys)]))
        .collect();
    stats.empty_bins = line.iter().filter(|p| p.is_none()).count();

    let edges: Vec<Option<f64>> = (0..n)
        .map(|i| match (line[i], line[(i + 1) % n]) {
            (Some(a), Some(b)) => Some((b[0] - a[0]).hypot(b[1] - a[1])),
            _ => None,
        })
        .collect();
    let too_long = |e: Option<f64>| e.is_some_and(|d| d > config.max_jump);
    let jumps: Vec<usize> = (0..n)
        .filter(|&i| line[i].is_some() && (too_long(edges[(i + n - 1) % n]) || too_long(edges[i])))
        .collect();
    stats.jump_bins = jumps.len();
    for i in jumps {
        line[i] = None;
    }
    if line.iter().all(Option::is_none) {
        return Err(PipelineError::EmptyRacingLine("no valid bins".to_string()));
    }

    fill_periodic(&mut line);
    let xs: Vec<f64> = line.iter().map(|p| p.map_or(0.0, |p| p[0])).collect();
    let ys: Vec<f64> = line.iter().map(|p| p.map_or(0.0, |p| p[1])).collect();
    let xs = gaussian_filter1d(&xs, config.smooth_sigma, BoundaryMode::Wrap);
    let ys = gaussian_filter1d(&ys, config.smooth_sigma, BoundaryMode::Wrap);
    let points: Vec<[f64; 2]> = xs.iter().zip(&ys).map(|(&x, &y)| [x, y]).collect();

    let loop_closure_m = (points[n - 1][0] - points[0][0]).hypot(points[n - 1][1] - points[0][1]);
    info!(
        "Global racing line: {} points from {} vehicles, loop closure {:.2} m",
        n, stats.vehicles_used, loop_closure_m
    );
    Ok(GlobalRacingLine {
        points,
        loop_closure_m,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_periodic_wraps() {
        let mut v = vec![None, Some([0.0, 0.0]), None, None, Some([3.0, 3.0]), None];
        fill_periodic(&mut v);
        let v: Vec<[f64; 2]> = v.into_iter().map(|p| p.unwrap()).collect();
        assert_eq!(v[2], [1.0, 1.0]);
        assert_eq!(v[3], [2.0, 2.0]);
        // 4 -> 1 across the seam: 5, 0
        assert_eq!(v[5], [2.0, 2.0]);
        assert_eq!(v[0], [1.0, 1.0]);
    }

    #[test]
    fn test_fill_single_valid() {
        let mut v = vec![None, Some([5.0, 1.0]), None];
        fill_periodic(&mut v);
        assert!(v.iter().all(|p| *p == Some([5.0, 1.0])));
    }

    #[test]
    fn test_bucket_outlier_dropped() {
        let config = RacingLineConfig::default();
        let mut samples: Vec<LineSample> = (0..5)
            .map(|i| LineSample { x: i as f64, y: 0.0, s: 0.001, speed: 30.0 })
            .collect();
        samples.push(LineSample { x: 100.0, y: 0.0, s: 0.002, speed: 30.0 });
        let kept = drop_bucket_outliers(samples, &config);
        assert_eq!(kept.len(), 5);
    }

    #[test]
    fn test_pit_window_dropped() {
        let config = RacingLineConfig::default();
        let samples: Vec<LineSample> = (0..20)
            .map(|i| LineSample {
                x: if i % 2 == 0 { 0.0 } else { 100.0 },
                y: 0.0,
                s: 0.5,
                speed: 5.0,
            })
            .collect();
        assert!(drop_pit_windows(samples, &config).is_empty());
    }

    #[test]
    fn test_no_moving_samples_is_error() {
        let traj = Trajectory::new("car", 10, Vec::new());
        let err = build_global_line(&[&traj], &RacingLineConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyRacingLine(_)));
    }
}
