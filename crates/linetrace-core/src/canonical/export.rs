//! Canonical artifacts on disk

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{CanonicalLine, CanonicalResult, FastestLap, FastestLapRow, Sector};
use crate::error::Result;

/// Canonical line file name
pub const CANONICAL_LINE_FILE: &str = "canonical_racing_line.csv";
/// Ideal profile file name
pub const IDEAL_PROFILE_FILE: &str = "ideal_lap_profile.csv";
/// Speed profile file name
pub const SPEED_PROFILE_FILE: &str = "speed_profile.csv";
/// Sector map file name
pub const SECTOR_MAP_FILE: &str = "sector_map.json";
/// Processing stats file name
pub const STATS_FILE: &str = "processing_stats.json";

const FASTEST_LAP_DIR: &str = "fastest_laps";
const MEDIAN_LINE_DIR: &str = "per_car_racing_lines";

/// Sector definitions with the lap totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorMap {
    /// Canonical track length
    pub track_length_m: f64,
    /// Ideal lap time
    pub ideal_lap_time_s: f64,
    /// Sectors in lap order
    pub sectors: Vec<Sector>,
}

/// Row of the fastest-lap export index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastestLapIndexRow {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// Lap number
    pub lap: i64,
    /// Lap duration
    pub lap_time_s: f64,
    /// Points in the lap file
    pub n_points: usize,
    /// Lap file path
    pub csv_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CanonicalRecord {
    dist_m: f64,
    x_m: f64,
    y_m: f64,
    curvature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct IdealProfileRecord {
    dist_m: f64,
    ideal_speed_ms: f64,
    ideal_time_s: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SpeedProfileRecord {
    dist_m: f64,
    ref_speed_ms: f64,
    ideal_speed_ms: f64,
}

#[derive(Debug, Serialize)]
struct MedianLineRecord<'a> {
    vehicle_id: &'a str,
    dist_m: f64,
    s_norm: f64,
    x_m: f64,
    y_m: f64,
}

#[derive(Debug, Serialize)]
struct MedianLineIndexRow {
    vehicle_id: String,
    laps_used: usize,
    lap_length_m: f64,
    csv_path: String,
}

/// Paths written by [`write_canonical`]
#[derive(Debug, Clone, Default)]
pub struct CanonicalExports {
    /// Canonical line CSV
    pub canonical_line: PathBuf,
    /// Sector map JSON
    pub sector_map: PathBuf,
    /// Fastest lap CSVs
    pub fastest_laps: Vec<PathBuf>,
    /// Per-car median line CSVs
    pub median_lines: Vec<PathBuf>,
}

/// File-name-safe form of a vehicle id
pub fn safe_file_id(vehicle_id: &str) -> String {
    vehicle_id.replace(['/', '\\'], "_")
}

fn write_rows<P: AsRef<Path>, T: Serialize>(path: P, rows: impl IntoIterator<Item = T>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn read_rows<P: AsRef<Path>, T: for<'de> Deserialize<'de>>(path: P) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

fn fastest_lap_path(dir: &Path, lap: &FastestLap) -> PathBuf {
    dir.join(format!(
        "fastest_lap_{}_lap{}.csv",
        safe_file_id(&lap.vehicle_id),
        lap.lap
    ))
}

/// Write every canonical artifact under `out_dir`
pub fn write_canonical(result: &CanonicalResult, out_dir: &Path) -> Result<CanonicalExports> {
    let line = &result.line;
    let canonical_line = out_dir.join(CANONICAL_LINE_FILE);
    write_rows(
        &canonical_line,
        (0..line.len()).map(|i| CanonicalRecord {
            dist_m: line.dist_m[i],
            x_m: line.x_m[i],
            y_m: line.y_m[i],
            curvature: line.curvature[i],
        }),
    )?;
    write_rows(
        out_dir.join(IDEAL_PROFILE_FILE),
        (0..line.len()).map(|i| IdealProfileRecord {
            dist_m: line.dist_m[i],
            ideal_speed_ms: line.ideal_speed_ms[i],
            ideal_time_s: line.ideal_time_s[i],
        }),
    )?;
    write_rows(
        out_dir.join(SPEED_PROFILE_FILE),
        (0..line.len()).map(|i| SpeedProfileRecord {
            dist_m: line.dist_m[i],
            ref_speed_ms: line.ref_speed_ms[i],
            ideal_speed_ms: line.ideal_speed_ms[i],
        }),
    )?;

    let sector_map = out_dir.join(SECTOR_MAP_FILE);
    let map = SectorMap {
        track_length_m: line.track_length_m(),
        ideal_lap_time_s: line.ideal_lap_time_s(),
        sectors: result.sectors.clone(),
    };
    fs::write(&sector_map, serde_json::to_string_pretty(&map)?)?;
    fs::write(out_dir.join(STATS_FILE), serde_json::to_string_pretty(&result.stats)?)?;

    let lap_dir = out_dir.join(FASTEST_LAP_DIR).join("lap_csv");
    fs::create_dir_all(&lap_dir)?;
    let mut fastest_laps = Vec::new();
    let mut index = Vec::new();
    for lap in &result.fastest_laps {
        let path = fastest_lap_path(&lap_dir, lap);
        write_rows(&path, lap.rows.iter())?;
        index.push(FastestLapIndexRow {
            vehicle_id: lap.vehicle_id.clone(),
            lap: lap.lap,
            lap_time_s: lap.lap_time_s,
            n_points: lap.rows.len(),
            csv_path: path.display().to_string(),
        });
        fastest_laps.push(path);
    }
    write_rows(out_dir.join(FASTEST_LAP_DIR).join("fastest_lap_exports.csv"), index)?;

    let median_dir = out_dir.join(MEDIAN_LINE_DIR).join("median_csv");
    fs::create_dir_all(&median_dir)?;
    let mut median_lines = Vec::new();
    let mut median_index = Vec::new();
    for car in &result.car_lines {
        let path = median_dir.join(format!(
            "median_racing_line_{}.csv",
            safe_file_id(&car.vehicle_id)
        ));
        let n = car.x.len();
        let denom = n.saturating_sub(1).max(1) as f64;
        write_rows(
            &path,
            (0..n).map(|i| {
                let s_norm = i as f64 / denom;
                MedianLineRecord {
                    vehicle_id: &car.vehicle_id,
                    dist_m: s_norm * car.lap_length_m,
                    s_norm,
                    x_m: car.x[i],
                    y_m: car.y[i],
                }
            }),
        )?;
        median_index.push(MedianLineIndexRow {
            vehicle_id: car.vehicle_id.clone(),
            laps_used: car.laps_used,
            lap_length_m: car.lap_length_m,
            csv_path: path.display().to_string(),
        });
        median_lines.push(path);
    }
    write_rows(
        out_dir.join(MEDIAN_LINE_DIR).join("per_car_racing_line_exports.csv"),
        median_index,
    )?;

    info!(
        "Canonical artifacts written to {} ({} fastest laps, {} median lines)",
        out_dir.display(),
        fastest_laps.len(),
        median_lines.len()
    );
    Ok(CanonicalExports {
        canonical_line,
        sector_map,
        fastest_laps,
        median_lines,
    })
}

/// Load the canonical line and its profiles; `None` when the line file is absent
pub fn load_canonical(dir: &Path) -> Result<Option<CanonicalLine>> {
    let line_path = dir.join(CANONICAL_LINE_FILE);
    if !line_path.exists() {
        return Ok(None);
    }
    let records: Vec<CanonicalRecord> = read_rows(&line_path)?;
    let n = records.len();
    let mut line = CanonicalLine {
        dist_m: records.iter().map(|r| r.dist_m).collect(),
        x_m: records.iter().map(|r| r.x_m).collect(),
        y_m: records.iter().map(|r| r.y_m).collect(),
        curvature: records.iter().map(|r| r.curvature).collect(),
        ref_speed_ms: vec![0.0; n],
        ideal_speed_ms: vec![0.0; n],
        ideal_time_s: vec![0.0; n],
    };

    let speed_path = dir.join(SPEED_PROFILE_FILE);
    if speed_path.exists() {
        let speed: Vec<SpeedProfileRecord> = read_rows(speed_path)?;
        if speed.len() == n {
            line.ref_speed_ms = speed.iter().map(|r| r.ref_speed_ms).collect();
            line.ideal_speed_ms = speed.iter().map(|r| r.ideal_speed_ms).collect();
        }
    }
    let ideal_path = dir.join(IDEAL_PROFILE_FILE);
    if ideal_path.exists() {
        let ideal: Vec<IdealProfileRecord> = read_rows(ideal_path)?;
        if ideal.len() == n {
            line.ideal_speed_ms = ideal.iter().map(|r| r.ideal_speed_ms).collect();
            line.ideal_time_s = ideal.iter().map(|r| r.ideal_time_s).collect();
        }
    }
    Ok(Some(line))
}

/// Read a sector map; `None` when the file is absent
pub fn read_sector_map(dir: &Path) -> Result<Option<SectorMap>> {
    let path = dir.join(SECTOR_MAP_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Locate a vehicle's fastest-lap CSV under an output directory
pub fn find_fastest_lap_file(out_dir: &Path, vehicle_id: &str) -> Option<(PathBuf, i64)> {
    let prefix = format!("fastest_lap_{}_lap", safe_file_id(vehicle_id));
    let entries = fs::read_dir(out_dir.join(FASTEST_LAP_DIR).join("lap_csv")).ok()?;
    entries.filter_map(|e| e.ok()).find_map(|entry| {
        let name = entry.file_name().to_string_lossy().into_owned();
        let lap = name
            .strip_prefix(&prefix)?
            .strip_suffix(".csv")?
            .parse::<i64>()
            .ok()?;
        Some((entry.path(), lap))
    })
}

/// Read a fastest-lap CSV
pub fn read_fastest_lap(path: &Path, vehicle_id: &str, lap: i64) -> Result<FastestLap> {
    let rows: Vec<FastestLapRow> = read_rows(path)?;
    let lap_time_s = match (rows.first(), rows.last()) {
        (Some(a), Some(b)) => (b.timestamp_ms - a.timestamp_ms) as f64 / 1000.0,
        _ => 0.0,
    };
    Ok(FastestLap {
        vehicle_id: vehicle_id.to_string(),
        lap,
        lap_time_s,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::ProcessingStats;
    use pretty_assertions::assert_eq;

    fn result() -> CanonicalResult {
        let dist: Vec<f64> = (0..5).map(|i| i as f64 * 10.0).collect();
        CanonicalResult {
            origin: (33.0, -86.0),
            line: CanonicalLine {
                x_m: dist.clone(),
                y_m: vec![0.0; 5],
                curvature: vec![0.0; 5],
                ref_speed_ms: vec![30.0; 5],
                ideal_speed_ms: vec![25.0; 5],
                ideal_time_s: dist.iter().map(|d| d / 25.0).collect(),
                dist_m: dist,
            },
            sectors: vec![Sector {
                sector: 1,
                start_dist_m: 0.0,
                end_dist_m: 40.0,
                ideal_time_s: 1.6,
            }],
            car_lines: Vec::new(),
            fastest_laps: vec![FastestLap {
                vehicle_id: "GR86/7".to_string(),
                lap: 4,
                lap_time_s: 1.0,
                rows: vec![
                    FastestLapRow { timestamp_ms: 0, dist_m: 0.0, x_m: 0.0, y_m: 0.0, speed_ms: 20.0 },
                    FastestLapRow { timestamp_ms: 1000, dist_m: 20.0, x_m: 20.0, y_m: 0.0, speed_ms: 20.0 },
                ],
            }],
            rejected_vehicles: Vec::new(),
            lap_stats: Vec::new(),
            stats: ProcessingStats::default(),
        }
    }

    #[test]
    fn test_write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let result = result();
        let exports = write_canonical(&result, dir.path()).unwrap();
        assert_eq!(exports.fastest_laps.len(), 1);
        assert!(exports.fastest_laps[0].ends_with("fastest_lap_GR86_7_lap4.csv"));

        let line = load_canonical(dir.path()).unwrap().unwrap();
        assert_eq!(line, result.line);

        let map = read_sector_map(dir.path()).unwrap().unwrap();
        assert_eq!(map.sectors, result.sectors);
        assert_eq!(map.track_length_m, 40.0);

        let (path, lap) = find_fastest_lap_file(dir.path(), "GR86/7").unwrap();
        assert_eq!(lap, 4);
        let fastest = read_fastest_lap(&path, "GR86/7", lap).unwrap();
        assert_eq!(fastest.rows, result.fastest_laps[0].rows);
        assert!(find_fastest_lap_file(dir.path(), "other").is_none());
    }

    #[test]
    fn test_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_canonical(dir.path()).unwrap().is_none());
        assert!(read_sector_map(dir.path()).unwrap().is_none());
    }
}
