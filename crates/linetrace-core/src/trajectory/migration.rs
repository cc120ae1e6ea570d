//! Trajectory layout migration
//!
//! Older exports stored fewer columns: a single brake channel, and in the oldest
//! files no acceleration or lap column. Loading such a file maps it onto the current
//! [`TrajectoryRow`] and reports what had to be synthesized.

use serde::{Deserialize, Serialize};

use super::laps::lap_starts;
use super::TrajectoryRow;
use crate::error::{PipelineError, Result};

/// Lapdist drop used to rebuild lap numbers for layouts without a lap column
const LEGACY_LAP_DROP: f64 = 100.0;

/// Column layouts a trajectory file may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrajectoryLayout {
    /// x, y, speed, lapdist, brake, gear, steering, heading
    Basic8,
    /// Basic8 plus accel_norm
    WithAccel9,
    /// WithAccel9 plus lap
    SingleBrake10,
    /// Current layout with split brake channels
    Current11,
}

impl TrajectoryLayout {
    /// Layout for a stored column count
    pub fn from_columns(columns: u16) -> Result<Self> {
        match columns {
            8 => Ok(Self::Basic8),
            9 => Ok(Self::WithAccel9),
            10 => Ok(Self::SingleBrake10),
            11 => Ok(Self::Current11),
            other => Err(PipelineError::UnsupportedLayout(other)),
        }
    }

    /// Stored column count
    pub fn columns(&self) -> usize {
        match self {
            Self::Basic8 => 8,
            Self::WithAccel9 => 9,
            Self::SingleBrake10 => 10,
            Self::Current11 => 11,
        }
    }
}

/// What a load-time migration changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Layout found in the file
    pub source_layout: TrajectoryLayout,
    /// Current columns copied from another stored column
    pub duplicated: Vec<String>,
    /// Current columns computed or zero-filled
    pub synthesized: Vec<String>,
}

impl MigrationReport {
    /// Report for a file already in the current layout
    pub fn empty() -> Self {
        Self {
            source_layout: TrajectoryLayout::Current11,
            duplicated: Vec::new(),
            synthesized: Vec::new(),
        }
    }

    /// Check if the file needed any migration
    pub fn has_changes(&self) -> bool {
        !self.duplicated.is_empty() || !self.synthesized.is_empty()
    }

    /// One-line description for logs
    pub fn summary(&self) -> String {
        if !self.has_changes() {
            return "current layout, no migration".to_string();
        }
        let mut parts = vec![format!("migrated from {:?}", self.source_layout)];
        if !self.duplicated.is_empty() {
            parts.push(format!("copied: {}", self.duplicated.join(", ")));
        }
        if !self.synthesized.is_empty() {
            parts.push(format!("synthesized: {}", self.synthesized.join(", ")));
        }
        parts.join("; ")
    }
}

/// Map row-major values in `layout` onto current rows
pub fn migrate(layout: TrajectoryLayout, values: &[f64]) -> (Vec<TrajectoryRow>, MigrationReport) {
    let width = layout.columns();
    if layout == TrajectoryLayout::Current11 {
        let rows = values
            .chunks_exact(width)
            .map(|c| {
                let mut arr = [0.0; 11];
                arr.copy_from_slice(c);
                TrajectoryRow::from_array(arr)
            })
            .collect();
        return (rows, MigrationReport::empty());
    }

    let mut rows: Vec<TrajectoryRow> = values
        .chunks_exact(width)
        .map(|c| TrajectoryRow {
            x: c[0],
            y: c[1],
            speed: c[2],
            lapdist: c[3],
            brake_front: c[4],
            brake_rear: c[4],
            gear: c[5],
            steering_deg: c[6],
            heading_rad: c[7],
            accel_norm: c.get(8).copied().unwrap_or(0.0),
            lap: c.get(9).copied().unwrap_or(0.0),
        })
        .collect();

    let mut report = MigrationReport {
        source_layout: layout,
        duplicated: vec!["brake_front".to_string(), "brake_rear".to_string()],
        synthesized: Vec::new(),
    };
    if width < 9 {
        report.synthesized.push("accel_norm".to_string());
    }
    if width < 10 {
        let lapdist: Vec<f64> = rows.iter().map(|r| r.lapdist).collect();
        let starts = lap_starts(&lapdist, LEGACY_LAP_DROP);
        for (k, &start) in starts.iter().enumerate() {
            let end = starts.get(k + 1).copied().unwrap_or(rows.len());
            for row in &mut rows[start..end] {
                row.lap = (k + 1) as f64;
            }
        }
        report.synthesized.push("lap".to_string());
    }
    (rows, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_brake_layout() {
        let values = [1.0, 2.0, 30.0, 40.0, 0.6, 3.0, -5.0, 0.1, 0.4, 2.0];
        let (rows, report) = migrate(TrajectoryLayout::SingleBrake10, &values);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].brake_front, 0.6);
        assert_eq!(rows[0].brake_rear, 0.6);
        assert_eq!(rows[0].lap, 2.0);
        assert_eq!(rows[0].accel_norm, 0.4);
        assert!(report.has_changes());
        assert!(report.synthesized.is_empty());
    }

    #[test]
    fn test_basic_layout_rebuilds_laps() {
        let lapdist = [0.0, 800.0, 1600.0, 10.0, 900.0, 20.0];
        let values: Vec<f64> = lapdist
            .iter()
            .flat_map(|&ld| [0.0, 0.0, 10.0, ld, 0.0, 2.0, 0.0, 0.0])
            .collect();
        let (rows, report) = migrate(TrajectoryLayout::Basic8, &values);
        let laps: Vec<f64> = rows.iter().map(|r| r.lap).collect();
        assert_eq!(laps, vec![1.0, 1.0, 1.0, 2.0, 2.0, 3.0]);
        assert_eq!(report.synthesized, vec!["accel_norm".to_string(), "lap".to_string()]);
        assert!(report.summary().contains("Basic8"));
    }

    #[test]
    fn test_unknown_layout() {
        assert!(matches!(
            TrajectoryLayout::from_columns(7),
            Err(PipelineError::UnsupportedLayout(7))
        ));
        assert_eq!(TrajectoryLayout::from_columns(11).unwrap().columns(), 11);
        assert!(!MigrationReport::empty().has_changes());
    }
}
