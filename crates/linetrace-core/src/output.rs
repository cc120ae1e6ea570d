//! Output directory layout and the metadata document
//!
//! A processed dataset is a directory. The pipeline writes it and the runtime loads
//! it back through the paths defined here.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::safe_file_id;
use crate::error::Result;
use crate::trajectory::{Trajectory, TrajectoryRow, FORMAT_VERSION};

/// Metadata file name
pub const METADATA_FILE: &str = "metadata.json";
/// Trajectory directory
pub const TRAJECTORY_DIR: &str = "trajectories";
/// Global racing line file name
pub const RACING_LINE_FILE: &str = "racing_line.csv";
/// Per-car racing line directory
pub const RACING_LINES_DIR: &str = "racing_lines";

/// Display colors assigned to cars in order, wrapping around
pub const PALETTE: [[u8; 3]; 18] = [
    [255, 68, 68],
    [68, 255, 68],
    [68, 68, 255],
    [255, 255, 68],
    [255, 68, 255],
    [68, 255, 255],
    [255, 136, 68],
    [136, 255, 68],
    [255, 136, 255],
    [136, 68, 255],
    [255, 200, 68],
    [68, 200, 255],
    [200, 68, 255],
    [255, 68, 136],
    [68, 255, 136],
    [136, 136, 255],
    [255, 136, 136],
    [136, 255, 255],
];

/// Trajectory file of a vehicle
pub fn trajectory_path(dir: &Path, vehicle_id: &str) -> PathBuf {
    dir.join(TRAJECTORY_DIR)
        .join(format!("{}.traj", safe_file_id(vehicle_id)))
}

/// Per-car racing line file of a vehicle
pub fn car_line_path(dir: &Path, vehicle_id: &str) -> PathBuf {
    dir.join(RACING_LINES_DIR)
        .join(format!("{}_racing_line.csv", safe_file_id(vehicle_id)))
}

/// Axis-aligned extent of all trajectories
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Minimum x
    pub x_min: f64,
    /// Maximum x
    pub x_max: f64,
    /// Minimum y
    pub y_min: f64,
    /// Maximum y
    pub y_max: f64,
}

/// Per-car racing line details
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineMetadata {
    /// Median lap length of the laps used
    pub lap_length_m: f64,
}

/// Dataset description written next to the trajectories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Extent of all trajectories
    pub bounds: Bounds,
    /// Longest trajectory duration
    pub total_duration_ms: u64,
    /// Trajectory sample period
    pub sample_rate_ms: u32,
    /// Vehicles in the dataset, sorted
    pub car_ids: Vec<String>,
    /// Display color per vehicle
    pub colors: BTreeMap<String, [u8; 3]>,
    /// Whether per-car racing lines were written
    pub per_car_racing_lines: bool,
    /// Points per per-car racing line
    pub racing_line_points: usize,
    /// Per-car racing line details
    pub racing_line_metadata: BTreeMap<String, LineMetadata>,
    /// Stored trajectory columns
    pub trajectory_columns: usize,
    /// Front and rear brake stored separately
    pub separate_brake_channels: bool,
    /// Trajectory file format version
    pub format_version: u16,
    /// Creation time
    pub generated_at: DateTime<Utc>,
    /// Optional session label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
}

impl Metadata {
    /// Describe a set of trajectories and their per-car racing lines
    pub fn build<'a, I>(
        trajectories: I,
        lap_lengths: &BTreeMap<String, f64>,
        racing_line_points: usize,
    ) -> Self
    where
        I: IntoIterator<Item = &'a Trajectory>,
    {
        let mut bounds: Option<Bounds> = None;
        let mut total_duration_ms = 0;
        let mut sample_rate_ms = 10;
        let mut car_ids = Vec::new();
        for traj in trajectories {
            if let Some((x0, x1, y0, y1)) = traj.bounds() {
                bounds = Some(match bounds {
                    None => Bounds { x_min: x0, x_max: x1, y_min: y0, y_max: y1 },
                    Some(b) => Bounds {
                        x_min: b.x_min.min(x0),
                        x_max: b.x_max.max(x1),
                        y_min: b.y_min.min(y0),
                        y_max: b.y_max.max(y1),
                    },
                });
            }
            total_duration_ms = total_duration_ms.max(traj.duration_ms());
            sample_rate_ms = traj.sample_rate_ms;
            car_ids.push(traj.vehicle_id.clone());
        }
        car_ids.sort();

        let colors = car_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), PALETTE[i % PALETTE.len()]))
            .collect();
        let racing_line_metadata = lap_lengths
            .iter()
            .map(|(id, len)| (id.clone(), LineMetadata { lap_length_m: *len }))
            .collect();

        Self {
            bounds: bounds.unwrap_or_default(),
            total_duration_ms,
            sample_rate_ms,
            car_ids,
            colors,
            per_car_racing_lines: !lap_lengths.is_empty(),
            racing_line_points,
            racing_line_metadata,
            trajectory_columns: TrajectoryRow::COLUMNS,
            separate_brake_channels: true,
            format_version: FORMAT_VERSION,
            generated_at: Utc::now(),
            session_name: None,
        }
    }

    /// Load `metadata.json` from a dataset directory
    pub fn load(dir: &Path) -> Result<Self> {
        let content = fs::read_to_string(dir.join(METADATA_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write `metadata.json` into a dataset directory
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::write(dir.join(METADATA_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Duration as `m:ss`
    pub fn duration_string(&self) -> String {
        format_duration(self.total_duration_ms)
    }
}

/// Milliseconds as `m:ss`
pub fn format_duration(ms: u64) -> String {
    let total_s = ms / 1000;
    format!("{}:{:02}", total_s / 60, total_s % 60)
}
