//! Trajectories
//!
//! Fixed-rate per-vehicle state on the session clock, plus the binary file format
//! they are stored in.

mod format;
mod interpolate;
mod laps;
mod migration;

pub use format::{decode, encode, encode_columns, read_trajectory, write_trajectory, FORMAT_VERSION, MAGIC};
pub use interpolate::{interpolate_trajectory, repair_lapdist};
pub use laps::{lap_starts, lap_segments};
pub use migration::{MigrationReport, TrajectoryLayout};

use serde::{Deserialize, Serialize};

/// One trajectory sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRow {
    /// East offset in metres
    pub x: f64,
    /// North offset in metres
    pub y: f64,
    /// Vehicle speed
    pub speed: f64,
    /// Repaired distance since lap start
    pub lapdist: f64,
    /// Front brake in [0, 1]
    pub brake_front: f64,
    /// Rear brake in [0, 1]
    pub brake_rear: f64,
    /// Gear
    pub gear: f64,
    /// Steering angle in degrees
    pub steering_deg: f64,
    /// Direction of travel in radians
    pub heading_rad: f64,
    /// Acceleration magnitude in [0, 1]
    pub accel_norm: f64,
    /// Lap number, first lap is 1
    pub lap: f64,
}

impl TrajectoryRow {
    /// Number of stored columns
    pub const COLUMNS: usize = 11;

    /// Column names in storage order
    pub const COLUMN_NAMES: [&'static str; 11] = [
        "x",
        "y",
        "speed",
        "lapdist",
        "brake_front",
        "brake_rear",
        "gear",
        "steering_deg",
        "heading_rad",
        "accel_norm",
        "lap",
    ];

    /// Values in storage order
    pub fn to_array(&self) -> [f64; 11] {
        [
            self.x,
            self.y,
            self.speed,
            self.lapdist,
            self.brake_front,
            self.brake_rear,
            self.gear,
            self.steering_deg,
            self.heading_rad,
            self.accel_norm,
            self.lap,
        ]
    }

    /// Build a row from values in storage order
    pub fn from_array(v: [f64; 11]) -> Self {
        Self {
            x: v[0],
            y: v[1],
            speed: v[2],
            lapdist: v[3],
            brake_front: v[4],
            brake_rear: v[5],
            gear: v[6],
            steering_deg: v[7],
            heading_rad: v[8],
            accel_norm: v[9],
            lap: v[10],
        }
    }

    /// Combined brake: the stronger of the two channels
    pub fn brake(&self) -> f64 {
        self.brake_front.max(self.brake_rear)
    }
}

/// Uniformly sampled trajectory of one vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// Sample period in milliseconds
    pub sample_rate_ms: u32,
    /// Samples, the first at session time 0
    pub rows: Vec<TrajectoryRow>,
}

impl Trajectory {
    /// Create a trajectory
    pub fn new(vehicle_id: impl Into<String>, sample_rate_ms: u32, rows: Vec<TrajectoryRow>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            sample_rate_ms: sample_rate_ms.max(1),
            rows,
        }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no samples
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Covered duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.rows.len() as u64 * self.sample_rate_ms as u64
    }

    /// Frame index for a session time, clamped to the trajectory
    pub fn frame_index(&self, time_ms: f64) -> Option<usize> {
        if self.rows.is_empty() {
            return None;
        }
        let idx = (time_ms.max(0.0) / self.sample_rate_ms as f64).floor() as usize;
        Some(idx.min(self.rows.len() - 1))
    }

    /// Session time of a frame in milliseconds
    pub fn time_ms(&self, frame: usize) -> f64 {
        frame as f64 * self.sample_rate_ms as f64
    }

    /// Sample period in seconds
    pub fn dt_s(&self) -> f64 {
        self.sample_rate_ms as f64 / 1000.0
    }

    /// Extract one column
    pub fn column(&self, f: impl Fn(&TrajectoryRow) -> f64) -> Vec<f64> {
        self.rows.iter().map(f).collect()
    }

    /// Axis-aligned bounds `(x_min, x_max, y_min, y_max)`
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let first = self.rows.first()?;
        Some(self.rows.iter().fold(
            (first.x, first.x, first.y, first.y),
            |(x0, x1, y0, y1), r| (x0.min(r.x), x1.max(r.x), y0.min(r.y), y1.max(r.y)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trajectory(n: usize) -> Trajectory {
        let rows = (0..n)
            .map(|i| TrajectoryRow {
                x: i as f64,
                y: -(i as f64),
                ..Default::default()
            })
            .collect();
        Trajectory::new("car", 10, rows)
    }

    #[test]
    fn test_frame_index_clamps() {
        let t = trajectory(100);
        assert_eq!(t.frame_index(0.0), Some(0));
        assert_eq!(t.frame_index(25.0), Some(2));
        assert_eq!(t.frame_index(-50.0), Some(0));
        assert_eq!(t.frame_index(1e9), Some(99));
        assert_eq!(trajectory(0).frame_index(0.0), None);
        assert_eq!(t.duration_ms(), 1000);
    }

    #[test]
    fn test_bounds() {
        assert_eq!(trajectory(5).bounds(), Some((0.0, 4.0, -4.0, 0.0)));
        assert_eq!(trajectory(0).bounds(), None);
    }

    #[test]
    fn test_row_array_order() {
        let row = TrajectoryRow {
            brake_front: 0.2,
            brake_rear: 0.7,
            lap: 3.0,
            ..Default::default()
        };
        let arr = row.to_array();
        assert_eq!(arr[4], 0.2);
        assert_eq!(arr[10], 3.0);
        assert_eq!(TrajectoryRow::from_array(arr), row);
        assert_eq!(row.brake(), 0.7);
    }
}
