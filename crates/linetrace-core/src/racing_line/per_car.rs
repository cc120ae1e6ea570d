//! Per-car median racing line

use tracing::{debug, info};

use crate::config::PerCarLineConfig;
use crate::error::{PipelineError, Result};
use crate::filters::{gaussian_filter1d, interp, linspace, median, BoundaryMode};
use crate::trajectory::{lap_segments, Trajectory};

/// Median racing line of one car
#[derive(Debug, Clone, PartialEq)]
pub struct CarRacingLine {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// Ordered points around the lap
    pub points: Vec<[f64; 2]>,
    /// Median lapdist range of the laps used
    pub lap_length_m: f64,
    /// Number of laps in the median
    pub laps_used: usize,
}

/// Build a car's racing line as the per-point median of its laps resampled on
/// lapdist.
///
/// Laps are split where lapdist drops by more than `lap_drop`. Short segments,
/// segments whose lapdist ever decreases and segments with a small range are left
/// out. Fails when fewer than `min_laps` laps remain.
pub fn build_car_line(trajectory: &Trajectory, config: &PerCarLineConfig) -> Result<CarRacingLine> {
    let vehicle = &trajectory.vehicle_id;
    let lapdist = trajectory.column(|r| r.lapdist);
    let xs = trajectory.column(|r| r.x);
    let ys = trajectory.column(|r| r.y);

    let segments: Vec<_> = lap_segments(&lapdist, config.lap_drop)
        .into_iter()
        .filter(|r| r.len() > config.min_lap_samples)
        .collect();
    if segments.len() < config.min_laps {
        return Err(PipelineError::InsufficientLaps {
            vehicle: vehicle.clone(),
            found: segments.len(),
            required: config.min_laps,
        });
    }

    let n = config.n_points.max(2);
    let mut lap_xs: Vec<Vec<f64>> = Vec::new();
    let mut lap_ys: Vec<Vec<f64>> = Vec::new();
    let mut lengths = Vec::new();
    for seg in segments {
        let ld = &lapdist[seg.clone()];
        if ld.windows(2).any(|w| w[1] < w[0]) {
            debug!("Vehicle {}: skipping lap with decreasing lapdist", vehicle);
            continue;
        }
        let (lo, hi) = (ld[0], ld[ld.len() - 1]);
        if hi - lo < config.min_lap_range {
            continue;
        }
        let grid = linspace(lo, hi, n);
        lap_xs.push(grid.iter().map(|&g| interp(g, ld, &xs[seg.clone()])).collect());
        lap_ys.push(grid.iter().map(|&g| interp(g, ld, &ys[seg.clone()])).collect());
        lengths.push(hi - lo);
    }
    if lap_xs.len() < config.min_laps {
        return Err(PipelineError::InsufficientLaps {
            vehicle: vehicle.clone(),
            found: lap_xs.len(),
            required: config.min_laps,
        });
    }

    let mut column = Vec::with_capacity(lap_xs.len());
    let mut median_across = |laps: &[Vec<f64>]| -> Vec<f64> {
        (0..n)
            .map(|i| {
                column.clear();
                column.extend(laps.iter().map(|lap| lap[i]));
                median(&column)
            })
            .collect()
    };
    let mx = median_across(&lap_xs);
    let my = median_across(&lap_ys);
    let mx = gaussian_filter1d(&mx, config.smooth_sigma, BoundaryMode::Wrap);
    let my = gaussian_filter1d(&my, config.smooth_sigma, BoundaryMode::Wrap);

    let lap_length_m = median(&lengths);
    info!(
        "Vehicle {}: racing line from {} laps, lap length {:.1} m",
        vehicle,
        lap_xs.len(),
        lap_length_m
    );
    Ok(CarRacingLine {
        vehicle_id: vehicle.clone(),
        points: mx.into_iter().zip(my).map(|(x, y)| [x, y]).collect(),
        lap_length_m,
        laps_used: lap_xs.len(),
    })
}
