//! Canonical line & curvature engine
//!
//! Builds a cross-vehicle consensus line in a shared ENU frame directly from the
//! raw telemetry, then derives curvature, reference and ideal speed profiles, the
//! ideal lap time and equal-distance sectors.
//!
//! ## Pipeline
//!
//! 1. Pivot each vehicle to one row per (lap, timestamp) and compute lap stats
//! 2. Keep valid laps of valid cars, pick the ENU origin and project the laps
//! 3. Resample every lap on a common normalized grid, median per car
//! 4. Reject cars whose median lap time is a z-score outlier
//! 5. Median across the remaining cars, then curvature
//! 6. Reference speed from every clean lap, including those of rejected cars

mod curvature;
mod export;
mod laps;
mod profile;

pub use curvature::curvature;
pub use export::{
    find_fastest_lap_file, load_canonical, read_fastest_lap, read_sector_map, safe_file_id,
    write_canonical, CanonicalExports, FastestLapIndexRow, SectorMap,
};
pub use laps::{reference_origin, LapStats, LapTrace, VehiclePivot};
pub use profile::{
    build_sectors, ideal_speed, ideal_time, lap_speed, reference_speed, to_canonical_grid, Sector,
};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CanonicalConfig;
use crate::error::{PipelineError, Result};
use crate::filters::{cumulative_distance, interp, linspace, mean, median, sample_std, unique_by_x};
use crate::spatial::IndexedLine;
use crate::telemetry::EventTable;

/// Consensus line with its derived per-point profiles
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalLine {
    /// Arc length from the first point
    pub dist_m: Vec<f64>,
    /// East offset in metres
    pub x_m: Vec<f64>,
    /// North offset in metres
    pub y_m: Vec<f64>,
    /// Unsigned curvature in 1/m
    pub curvature: Vec<f64>,
    /// Reference speed in m/s
    pub ref_speed_ms: Vec<f64>,
    /// Ideal speed in m/s
    pub ideal_speed_ms: Vec<f64>,
    /// Cumulative ideal time in seconds
    pub ideal_time_s: Vec<f64>,
}

impl CanonicalLine {
    /// Number of points
    pub fn len(&self) -> usize {
        self.dist_m.len()
    }

    /// True when the line has no points
    pub fn is_empty(&self) -> bool {
        self.dist_m.is_empty()
    }

    /// Length of the line
    pub fn track_length_m(&self) -> f64 {
        self.dist_m.last().copied().unwrap_or(0.0)
    }

    /// Ideal time for the full line
    pub fn ideal_lap_time_s(&self) -> f64 {
        self.ideal_time_s.last().copied().unwrap_or(0.0)
    }

    /// Ideal speed at a distance, clamped to the line
    pub fn ideal_speed_at(&self, dist_m: f64) -> f64 {
        interp(dist_m, &self.dist_m, &self.ideal_speed_ms)
    }

    /// Reference speed at a distance, clamped to the line
    pub fn ref_speed_at(&self, dist_m: f64) -> f64 {
        interp(dist_m, &self.dist_m, &self.ref_speed_ms)
    }

    /// Spatial index over the line's points
    pub fn index(&self) -> IndexedLine {
        IndexedLine::from_xy(&self.x_m, &self.y_m)
    }
}

/// Median line of one car on the normalized grid
#[derive(Debug, Clone, PartialEq)]
pub struct CarMedianLine {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// East offsets
    pub x: Vec<f64>,
    /// North offsets
    pub y: Vec<f64>,
    /// Median length of the laps used
    pub lap_length_m: f64,
    /// Number of laps in the median
    pub laps_used: usize,
}

/// One point of an exported fastest lap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FastestLapRow {
    /// Epoch milliseconds
    pub timestamp_ms: i64,
    /// Distance along the lap
    pub dist_m: f64,
    /// East offset in the ENU frame
    pub x_m: f64,
    /// North offset in the ENU frame
    pub y_m: f64,
    /// Measured speed
    pub speed_ms: f64,
}

/// A car's fastest valid lap
#[derive(Debug, Clone, PartialEq)]
pub struct FastestLap {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// Lap number
    pub lap: i64,
    /// Lap duration from the lap stats
    pub lap_time_s: f64,
    /// Points ordered by time
    pub rows: Vec<FastestLapRow>,
}

/// Counters describing one canonical run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    /// Raw telemetry events
    pub raw_rows: usize,
    /// Vehicles in the session
    pub total_cars: usize,
    /// Vehicles with at least `min_valid_laps` valid laps
    pub cars_with_valid_laps: usize,
    /// Valid laps of those vehicles
    pub clean_laps: usize,
    /// Vehicles with a per-car median line
    pub cars_with_median_lines: usize,
    /// Vehicles kept after the outlier filter
    pub cars_after_outlier_filter: usize,
    /// Canonical track length
    pub track_length_m: f64,
    /// Ideal lap time
    pub ideal_lap_time_s: f64,
    /// Number of sectors
    pub n_sectors: usize,
}

/// Everything the canonical engine produces
#[derive(Debug, Clone)]
pub struct CanonicalResult {
    /// ENU origin latitude/longitude
    pub origin: (f64, f64),
    /// Consensus line and profiles
    pub line: CanonicalLine,
    /// Equal-distance sectors
    pub sectors: Vec<Sector>,
    /// Per-car median lines of retained cars
    pub car_lines: Vec<CarMedianLine>,
    /// Fastest lap of each retained car
    pub fastest_laps: Vec<FastestLap>,
    /// Cars rejected by the lap-time outlier filter
    pub rejected_vehicles: Vec<String>,
    /// Stats of every lap in the session
    pub lap_stats: Vec<LapStats>,
    /// Run counters
    pub stats: ProcessingStats,
}

fn resample_lap(trace: &LapTrace, n: usize) -> Option<(Vec<f64>, Vec<f64>)> {
    let len = trace.length();
    if !(len > 0.0) {
        return None;
    }
    let (ux, xs) = unique_by_x(&trace.dist, &trace.x);
    let (_, ys) = unique_by_x(&trace.dist, &trace.y);
    let grid = linspace(0.0, len, n);
    Some((
        grid.iter().map(|&g| interp(g, &ux, &xs)).collect(),
        grid.iter().map(|&g| interp(g, &ux, &ys)).collect(),
    ))
}

fn median_columns(series: &[Vec<f64>], n: usize) -> Vec<f64> {
    let mut column = Vec::with_capacity(series.len());
    (0..n)
        .map(|i| {
            column.clear();
            column.extend(series.iter().map(|s| s[i]));
            median(&column)
        })
        .collect()
}

/// Cars whose median valid-lap duration is more than `z` sample standard deviations
/// from the mean across cars. Nothing is rejected when the spread is zero or
/// undefined.
pub fn lap_time_outliers(median_lap_times: &BTreeMap<String, f64>, z: f64) -> Vec<String> {
    let values: Vec<f64> = median_lap_times.values().copied().collect();
    let mu = mean(&values);
    let sigma = sample_std(&values);
    if !(sigma.is_finite() && sigma > 0.0) {
        return Vec::new();
    }
    median_lap_times
        .iter()
        .filter(|(_, t)| ((*t - mu) / sigma).abs() > z)
        .map(|(v, _)| v.clone())
        .collect()
}

/// Run the canonical engine over a session
pub fn build_canonical(table: &EventTable, config: &CanonicalConfig) -> Result<CanonicalResult> {
    let mut stats = ProcessingStats {
        raw_rows: table.len(),
        total_cars: table.vehicle_ids().len(),
        n_sectors: config.n_sectors,
        ..Default::default()
    };

    let pivots: BTreeMap<String, VehiclePivot> = table
        .vehicle_ids()
        .into_iter()
        .filter_map(|v| table.vehicle(&v).map(|e| (v, VehiclePivot::build(e))))
        .collect();
    let lap_stats: Vec<LapStats> = pivots
        .iter()
        .flat_map(|(v, p)| p.lap_stats(v))
        .collect();

    let mut valid_laps: BTreeMap<String, Vec<&LapStats>> = BTreeMap::new();
    for lap in lap_stats.iter().filter(|l| l.is_valid(config)) {
        valid_laps.entry(lap.vehicle_id.clone()).or_default().push(lap);
    }
    valid_laps.retain(|_, laps| laps.len() >= config.min_valid_laps);
    stats.cars_with_valid_laps = valid_laps.len();
    stats.clean_laps = valid_laps.values().map(Vec::len).sum();

    let frame = reference_origin(&pivots, &valid_laps, config)
        .ok_or_else(|| PipelineError::Canonical("no clean lap with GPS data".to_string()))?;

    let mut traces: BTreeMap<String, Vec<LapTrace>> = BTreeMap::new();
    for (vehicle, laps) in &valid_laps {
        let Some(pivot) = pivots.get(vehicle) else { continue };
        let projected: Vec<LapTrace> = laps
            .iter()
            .filter_map(|l| LapTrace::project(vehicle, l.lap, &pivot.gps_rows(l.lap), &frame))
            .collect();
        traces.insert(vehicle.clone(), projected);
    }

    let n = config.n_points.max(2);
    let mut car_lines = Vec::new();
    for (vehicle, laps) in &traces {
        let (xs, ys): (Vec<Vec<f64>>, Vec<Vec<f64>>) =
            laps.iter().filter_map(|t| resample_lap(t, n)).unzip();
        if xs.len() < config.min_valid_laps {
            warn!("Vehicle {}: only {} resampled laps, no median line", vehicle, xs.len());
            continue;
        }
        let lengths: Vec<f64> = laps.iter().map(LapTrace::length).filter(|l| *l > 0.0).collect();
        car_lines.push(CarMedianLine {
            vehicle_id: vehicle.clone(),
            x: median_columns(&xs, n),
            y: median_columns(&ys, n),
            lap_length_m: median(&lengths),
            laps_used: xs.len(),
        });
    }
    stats.cars_with_median_lines = car_lines.len();

    let median_lap_times: BTreeMap<String, f64> = valid_laps
        .iter()
        .map(|(v, laps)| {
            let durations: Vec<f64> = laps.iter().map(|l| l.duration_s).collect();
            (v.clone(), median(&durations))
        })
        .collect();
    let rejected_vehicles = lap_time_outliers(&median_lap_times, config.outlier_z);
    if !rejected_vehicles.is_empty() {
        info!("Lap-time outliers rejected: {}", rejected_vehicles.join(", "));
    }
    car_lines.retain(|c| !rejected_vehicles.contains(&c.vehicle_id));
    stats.cars_after_outlier_filter = car_lines.len();
    if car_lines.is_empty() {
        return Err(PipelineError::Canonical(
            "no vehicle with enough valid laps after filtering".to_string(),
        ));
    }

    let x_m = median_columns(&car_lines.iter().map(|c| c.x.clone()).collect::<Vec<_>>(), n);
    let y_m = median_columns(&car_lines.iter().map(|c| c.y.clone()).collect::<Vec<_>>(), n);
    let dist_m = cumulative_distance(&x_m, &y_m);
    let curv = curvature(&x_m, &y_m, &dist_m, config);

    let per_lap_speed: Vec<Vec<f64>> = traces
        .values()
        .flatten()
        .filter_map(|t| to_canonical_grid(t, &lap_speed(t, config), &dist_m))
        .collect();
    let ref_speed_ms = reference_speed(&per_lap_speed, n, config);
    let ideal_speed_ms = ideal_speed(&ref_speed_ms, &curv, config);
    let ideal_time_s = ideal_time(&dist_m, &ideal_speed_ms);
    let sectors = build_sectors(&dist_m, &ideal_time_s, config.n_sectors);

    let line = CanonicalLine {
        dist_m,
        x_m,
        y_m,
        curvature: curv,
        ref_speed_ms,
        ideal_speed_ms,
        ideal_time_s,
    };
    stats.track_length_m = line.track_length_m();
    stats.ideal_lap_time_s = line.ideal_lap_time_s();

    let mut fastest_laps = Vec::new();
    for car in &car_lines {
        let Some(best) = valid_laps
            .get(&car.vehicle_id)
            .and_then(|laps| laps.iter().min_by(|a, b| a.duration_s.total_cmp(&b.duration_s)))
        else {
            continue;
        };
        let Some(trace) = traces
            .get(&car.vehicle_id)
            .and_then(|ts| ts.iter().find(|t| t.lap == best.lap))
        else {
            continue;
        };
        let speed = lap_speed(trace, config);
        fastest_laps.push(FastestLap {
            vehicle_id: car.vehicle_id.clone(),
            lap: best.lap,
            lap_time_s: best.duration_s,
            rows: (0..trace.dist.len())
                .map(|i| FastestLapRow {
                    timestamp_ms: trace.timestamp_ms[i],
                    dist_m: trace.dist[i],
                    x_m: trace.x[i],
                    y_m: trace.y[i],
                    speed_ms: speed[i],
                })
                .collect(),
        });
    }

    info!(
        "Canonical line: {:.1} m from {} cars, ideal lap {:.2} s",
        stats.track_length_m, stats.cars_after_outlier_filter, stats.ideal_lap_time_s
    );
    Ok(CanonicalResult {
        origin: frame.origin(),
        line,
        sectors,
        car_lines,
        fastest_laps,
        rejected_vehicles,
        lap_stats,
        stats,
    })
}
