//! Trailing delta-speed traces
//!
//! Each car's fastest lap is projected onto the canonical line. Every sample picks
//! up the canonical distance, reference speed and ideal speed of its nearest
//! canonical point; the last seconds of the lap are kept as the trail.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::canonical::{
    find_fastest_lap_file, read_fastest_lap, safe_file_id, CanonicalLine, FastestLapRow,
};
use crate::config::{TrailCompare, TrailConfig};
use crate::error::{PipelineError, Result};
use crate::spatial::{IndexedLine, ReferenceLine};

/// Trail directory under the output directory
pub const TRAIL_DIR: &str = "trails";

/// One trail sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailPoint {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// Epoch milliseconds
    pub timestamp_ms: i64,
    /// Seconds since the lap's first sample
    pub t_rel_s: f64,
    /// East offset in the canonical frame
    pub x_m: f64,
    /// North offset in the canonical frame
    pub y_m: f64,
    /// Distance of the nearest canonical point
    pub canonical_dist_m: f64,
    /// Measured speed
    pub speed_ms: f64,
    /// Reference speed at the nearest canonical point
    pub ref_speed_ms_at_point: f64,
    /// Ideal speed at the nearest canonical point
    pub ideal_speed_ms_at_point: f64,
    /// Measured minus reference speed
    pub delta_vs_ref_ms: f64,
    /// Measured minus ideal speed
    pub delta_vs_ideal_ms: f64,
    /// Selected delta in km/h
    pub delta_kmh: f64,
}

/// Row of the trail index file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailIndexRow {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// Trail file path
    pub trail_path: String,
    /// Window length in seconds
    pub trail_seconds: f64,
    /// Comparison label
    pub compare: String,
    /// Points in the trail
    pub n_points: usize,
}

/// Trail file name for a vehicle
pub fn trail_file_name(vehicle_id: &str, config: &TrailConfig) -> String {
    format!(
        "trail_{}_fastestlap_{}s_{}.csv",
        safe_file_id(vehicle_id),
        config.seconds as i64,
        config.compare.as_str()
    )
}

/// Trail index file name
pub fn trail_index_name(config: &TrailConfig) -> String {
    format!("trail_index_{}s_{}.csv", config.seconds as i64, config.compare.as_str())
}

/// Project a lap onto the canonical line and keep its trailing window.
///
/// Rows are sorted by time first. Fails when the lap has no rows or no elapsed time.
pub fn build_trail(
    vehicle_id: &str,
    mut rows: Vec<FastestLapRow>,
    line: &CanonicalLine,
    index: &IndexedLine,
    config: &TrailConfig,
) -> Result<Vec<TrailPoint>> {
    rows.sort_by_key(|r| r.timestamp_ms);
    let Some(t0) = rows.first().map(|r| r.timestamp_ms) else {
        return Err(PipelineError::Validation(format!("empty fastest lap for {vehicle_id}")));
    };
    let t_max = rows
        .iter()
        .map(|r| (r.timestamp_ms - t0) as f64 / 1000.0)
        .fold(0.0, f64::max);
    if t_max <= 0.0 {
        return Err(PipelineError::Validation(format!(
            "non-positive lap duration for {vehicle_id}: {t_max}s"
        )));
    }

    let kept: Vec<FastestLapRow> = if t_max < config.seconds {
        info!(
            "Using last {} samples for {} (lap shorter than {}s)",
            config.fallback_samples, vehicle_id, config.seconds
        );
        let skip = rows.len().saturating_sub(config.fallback_samples);
        rows.split_off(skip)
    } else {
        let cutoff = t_max - config.seconds;
        rows.into_iter()
            .filter(|r| (r.timestamp_ms - t0) as f64 / 1000.0 >= cutoff)
            .collect()
    };

    let compare = config.compare;
    Ok(kept
        .into_iter()
        .filter_map(|r| {
            let (_, idx) = index.nearest([r.x_m, r.y_m])?;
            let ref_speed = line.ref_speed_ms[idx];
            let ideal_speed = line.ideal_speed_ms[idx];
            let delta_vs_ref_ms = r.speed_ms - ref_speed;
            let delta_vs_ideal_ms = r.speed_ms - ideal_speed;
            let delta = match compare {
                TrailCompare::Ref => delta_vs_ref_ms,
                TrailCompare::Ideal => delta_vs_ideal_ms,
            };
            Some(TrailPoint {
                vehicle_id: vehicle_id.to_string(),
                timestamp_ms: r.timestamp_ms,
                t_rel_s: (r.timestamp_ms - t0) as f64 / 1000.0,
                x_m: r.x_m,
                y_m: r.y_m,
                canonical_dist_m: line.dist_m[idx],
                speed_ms: r.speed_ms,
                ref_speed_ms_at_point: ref_speed,
                ideal_speed_ms_at_point: ideal_speed,
                delta_vs_ref_ms,
                delta_vs_ideal_ms,
                delta_kmh: delta * 3.6,
            })
        })
        .collect())
}

fn write_trail(path: &Path, points: &[TrailPoint]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for p in points {
        writer.serialize(p)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a trail written by [`generate_all_trails`]
pub fn read_trail(path: &Path) -> Result<Vec<TrailPoint>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut points = Vec::new();
    for row in reader.deserialize() {
        points.push(row?);
    }
    Ok(points)
}

/// Locate a vehicle's trail file in a trail directory
pub fn find_trail_file(trail_dir: &Path, vehicle_id: &str) -> Option<PathBuf> {
    let prefix = format!("trail_{}_fastestlap_", safe_file_id(vehicle_id));
    let mut matches: Vec<PathBuf> = fs::read_dir(trail_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".csv"))
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

/// Build, write and index trails for the given vehicles.
///
/// Vehicles without a readable, non-empty fastest lap are skipped with a log line.
/// Trails go to `<out_dir>/trails`.
pub fn generate_all_trails(
    out_dir: &Path,
    line: &CanonicalLine,
    vehicle_ids: &[String],
    config: &TrailConfig,
) -> Result<Vec<TrailIndexRow>> {
    let trail_dir = out_dir.join(TRAIL_DIR);
    fs::create_dir_all(&trail_dir)?;
    let index = line.index();

    let mut records = Vec::new();
    for vehicle in vehicle_ids {
        let Some((lap_path, lap)) = find_fastest_lap_file(out_dir, vehicle) else {
            warn!("Skipping trail for {}: no fastest lap file", vehicle);
            continue;
        };
        let fastest = match read_fastest_lap(&lap_path, vehicle, lap) {
            Ok(f) => f,
            Err(e) => {
                warn!("Skipping trail for {}: {}", vehicle, e);
                continue;
            }
        };
        let points = match build_trail(vehicle, fastest.rows, line, &index, config) {
            Ok(p) => p,
            Err(e) => {
                warn!("Skipping trail for {}: {}", vehicle, e);
                continue;
            }
        };
        let path = trail_dir.join(trail_file_name(vehicle, config));
        write_trail(&path, &points)?;
        records.push(TrailIndexRow {
            vehicle_id: vehicle.clone(),
            trail_path: path.display().to_string(),
            trail_seconds: config.seconds,
            compare: config.compare.as_str().to_string(),
            n_points: points.len(),
        });
    }

    let mut writer = csv::Writer::from_path(trail_dir.join(trail_index_name(config)))?;
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!("Generated {} trails in {}", records.len(), trail_dir.display());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> CanonicalLine {
        let dist: Vec<f64> = (0..=100).map(|i| i as f64 * 10.0).collect();
        let n = dist.len();
        CanonicalLine {
            x_m: dist.clone(),
            y_m: vec![0.0; n],
            curvature: vec![0.0; n],
            ref_speed_ms: vec![40.0; n],
            ideal_speed_ms: vec![30.0; n],
            ideal_time_s: vec![0.0; n],
            dist_m: dist,
        }
    }

    fn rows(duration_s: i64) -> Vec<FastestLapRow> {
        (0..=duration_s * 10)
            .rev()
            .map(|i| FastestLapRow {
                timestamp_ms: 1_000_000 + i * 100,
                dist_m: i as f64,
                x_m: i as f64 + 3.3,
                y_m: 2.0,
                speed_ms: 35.0,
            })
            .collect()
    }

    #[test]
    fn test_trail_window_and_deltas() {
        let line = line();
        let config = TrailConfig::default();
        let trail = build_trail("car", rows(40), &line, &line.index(), &config).unwrap();
        assert!(trail.windows(2).all(|w| w[0].t_rel_s < w[1].t_rel_s));
        assert!((trail[0].t_rel_s - 25.0).abs() < 1e-9);
        assert_eq!(trail.len(), 151);
        let p = &trail[0];
        assert_eq!(p.delta_vs_ref_ms, -5.0);
        assert_eq!(p.delta_vs_ideal_ms, 5.0);
        assert!((p.delta_kmh + 18.0).abs() < 1e-9);

        let ideal = TrailConfig { compare: TrailCompare::Ideal, ..TrailConfig::default() };
        let trail = build_trail("car", rows(40), &line, &line.index(), &ideal).unwrap();
        assert!((trail[0].delta_kmh - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_canonical_dist_is_nearest_point() {
        let line = line();
        let trail = build_trail("car", rows(40), &line, &line.index(), &TrailConfig::default()).unwrap();
        for p in &trail {
            let closest = line
                .x_m
                .iter()
                .map(|x| (x - p.x_m).abs())
                .fold(f64::INFINITY, f64::min);
            // canonical x equals canonical distance on this line
            assert!(((p.canonical_dist_m - p.x_m).abs() - closest).abs() < 1e-9);
        }
    }

    #[test]
    fn test_short_lap_keeps_last_samples() {
        let line = line();
        let trail = build_trail("car", rows(10), &line, &line.index(), &TrailConfig::default()).unwrap();
        assert_eq!(trail.len(), 50);
        assert!((trail.last().unwrap().t_rel_s - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_laps_fail() {
        let line = line();
        let index = line.index();
        let config = TrailConfig::default();
        assert!(build_trail("car", Vec::new(), &line, &index, &config).is_err());
        assert!(build_trail("car", rows(0), &line, &index, &config).is_err());
    }

    #[test]
    fn test_file_names() {
        let config = TrailConfig::default();
        assert_eq!(trail_file_name("GR86/2", &config), "trail_GR86_2_fastestlap_15s_ref.csv");
        assert_eq!(trail_index_name(&config), "trail_index_15s_ref.csv");
    }
}
