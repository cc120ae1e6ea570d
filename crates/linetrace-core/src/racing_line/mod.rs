//! Racing lines
//!
//! A fleet-wide line built from every trajectory and one median line per car. Both
//! live in the per-vehicle projection frame of the trajectories.

mod global;
mod per_car;

pub use global::{build_global_line, GlobalRacingLine, RacingLineStats};
pub use per_car::{build_car_line, CarRacingLine};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Serialize, Deserialize)]
struct LinePointRecord {
    x: f64,
    y: f64,
}

/// Write `(x, y)` points as CSV
pub fn write_line_csv<P: AsRef<Path>>(path: P, points: &[[f64; 2]]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for p in points {
        writer.serialize(LinePointRecord { x: p[0], y: p[1] })?;
    }
    writer.flush()?;
    Ok(())
}

/// Read `(x, y)` points written by [`write_line_csv`]
pub fn read_line_csv<P: AsRef<Path>>(path: P) -> Result<Vec<[f64; 2]>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut points = Vec::new();
    for record in reader.deserialize() {
        let r: LinePointRecord = record?;
        points.push([r.x, r.y]);
    }
    Ok(points)
}

/// Bin for a value normalized to [0, 1], clamped to the valid range
pub(crate) fn bin_index(value: f64, bins: usize) -> usize {
    if bins == 0 {
        return 0;
    }
    let b = (value * bins as f64).floor();
    if b < 0.0 {
        0
    } else {
        (b as usize).min(bins - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_index() {
        assert_eq!(bin_index(0.0, 10), 0);
        assert_eq!(bin_index(0.55, 10), 5);
        assert_eq!(bin_index(1.0, 10), 9);
        assert_eq!(bin_index(-0.2, 10), 0);
    }

    #[test]
    fn test_line_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("racing_line.csv");
        let points = vec![[1.5, -2.0], [3.0, 4.25]];
        write_line_csv(&path, &points).unwrap();
        assert_eq!(read_line_csv(&path).unwrap(), points);
    }
}
