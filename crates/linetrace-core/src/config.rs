//! Pipeline configuration
//!
//! Every empirical threshold used by the pipeline lives here. A config file is a
//! JSON document; any section or field left out takes its default.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level configuration for a pipeline run and the runtime layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Signal extraction settings
    pub signals: SignalConfig,
    /// Session start detection
    pub alignment: AlignmentConfig,
    /// Uniform resampling and lapdist repair
    pub interpolation: InterpolationConfig,
    /// Global racing line filters
    pub racing_line: RacingLineConfig,
    /// Per-car racing line settings
    pub per_car_line: PerCarLineConfig,
    /// Canonical line, speed profile and sector settings
    pub canonical: CanonicalConfig,
    /// Trail export settings
    pub trail: TrailConfig,
    /// Runtime query settings
    pub runtime: RuntimeConfig,
}

impl PipelineConfig {
    /// Load a config from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save the config as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Signal extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Timestamp rounding step in milliseconds
    pub round_ms: i64,
    /// Vehicles with fewer joined rows are skipped
    pub min_rows: usize,
    /// Duplicate ratio above which a warning is logged
    pub duplicate_warn_ratio: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            round_ms: 100,
            min_rows: 100,
            duplicate_warn_ratio: 0.2,
        }
    }
}

/// Session start detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Lapdist drop treated as a lap reset
    pub reset_drop: f64,
    /// Speed above which a car counts as moving
    pub motion_speed: f64,
    /// Length of the sustained-motion window in seconds
    pub window_s: f64,
    /// Rows required after alignment
    pub min_rows: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            reset_drop: 1000.0,
            motion_speed: 20.0,
            window_s: 3.0,
            min_rows: 100,
        }
    }
}

/// Resampling and lapdist repair settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    /// Output sample period in milliseconds
    pub dt_ms: u32,
    /// A true lap reset drops by more than this
    pub reset_drop: f64,
    /// ...and lands below this distance
    pub reset_ceiling: f64,
    /// Maximum lapdist growth per second
    pub max_slope: f64,
    /// Acceleration magnitude mapped to accel_norm = 1
    pub accel_clip: f64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            dt_ms: 10,
            reset_drop: 100.0,
            reset_ceiling: 500.0,
            max_slope: 120.0,
            accel_clip: 12.0,
        }
    }
}

/// Global racing line settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RacingLineConfig {
    /// Output point count
    pub n_points: usize,
    /// Samples below this speed are dropped
    pub min_speed: f64,
    /// Maximum distance from the coarse bucket median
    pub max_deviation: f64,
    /// Coarse bucket count for the deviation filter
    pub coarse_bins: usize,
    /// Window count for pit-lane detection
    pub pit_windows: usize,
    /// Windows slower than this on average may be pit windows
    pub pit_window_speed: f64,
    /// ...when their spread exceeds this
    pub pit_window_spread: f64,
    /// Edges longer than this invalidate both ends
    pub max_jump: f64,
    /// Periodic smoothing sigma in points
    pub smooth_sigma: f64,
    /// Vehicles with a smaller lapdist range are ignored
    pub min_lapdist_range: f64,
}

impl Default for RacingLineConfig {
    fn default() -> Self {
        Self {
            n_points: 1500,
            min_speed: 8.0,
            max_deviation: 20.0,
            coarse_bins: 100,
            pit_windows: 50,
            pit_window_speed: 15.0,
            pit_window_spread: 30.0,
            max_jump: 15.0,
            smooth_sigma: 2.0,
            min_lapdist_range: 100.0,
        }
    }
}

/// Per-car racing line settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerCarLineConfig {
    /// Output point count
    pub n_points: usize,
    /// Laps required
    pub min_laps: usize,
    /// Lapdist drop that starts a new lap
    pub lap_drop: f64,
    /// Segments need more samples than this
    pub min_lap_samples: usize,
    /// Segments need at least this lapdist range
    pub min_lap_range: f64,
    /// Periodic smoothing sigma in points
    pub smooth_sigma: f64,
}

impl Default for PerCarLineConfig {
    fn default() -> Self {
        Self {
            n_points: 30_000,
            min_laps: 3,
            lap_drop: 100.0,
            min_lap_samples: 100,
            min_lap_range: 100.0,
            smooth_sigma: 3.0,
        }
    }
}

/// Canonical line settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalConfig {
    /// Vehicle whose lap anchors the ENU origin
    pub reference_vehicle: String,
    /// Lap of the reference vehicle
    pub reference_lap: i64,
    /// Points on the canonical grid
    pub n_points: usize,
    /// Laps numbered this are never valid (out lap)
    pub excluded_lap: i64,
    /// GPS rows needed for a valid lap
    pub min_gps_rows: usize,
    /// Minimum lap duration in seconds
    pub min_lap_duration_s: f64,
    /// Valid laps needed for a valid car
    pub min_valid_laps: usize,
    /// Cars beyond this z-score are rejected
    pub outlier_z: f64,
    /// Savitzky-Golay window length
    pub savgol_window: usize,
    /// Savitzky-Golay polynomial degree
    pub savgol_degree: usize,
    /// Curvature smoothing sigma in points
    pub curvature_sigma: f64,
    /// Measured speed smoothing sigma in samples
    pub speed_sigma: f64,
    /// Measured speed clip in m/s
    pub max_speed_ms: f64,
    /// Time steps below this (seconds) are replaced by the median step
    pub min_dt_s: f64,
    /// Percentile of lap speeds used as reference speed
    pub ref_percentile: f64,
    /// Fractional slowdown at maximum curvature
    pub curvature_derate: f64,
    /// Ideal speed floor in m/s
    pub min_ideal_speed_ms: f64,
    /// Number of equal-distance sectors
    pub n_sectors: usize,
}

impl Default for CanonicalConfig {
    fn default() -> Self {
        Self {
            reference_vehicle: "GR86-016-55".to_string(),
            reference_lap: 2,
            n_points: 30_000,
            excluded_lap: 1,
            min_gps_rows: 50,
            min_lap_duration_s: 40.0,
            min_valid_laps: 3,
            outlier_z: 2.5,
            savgol_window: 101,
            savgol_degree: 3,
            curvature_sigma: 8.0,
            speed_sigma: 2.0,
            max_speed_ms: 90.0,
            min_dt_s: 0.005,
            ref_percentile: 95.0,
            curvature_derate: 0.55,
            min_ideal_speed_ms: 15.0,
            n_sectors: 3,
        }
    }
}

/// Which speed a trail delta compares against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailCompare {
    /// 95th percentile reference speed
    #[default]
    Ref,
    /// Curvature-derated ideal speed
    Ideal,
}

impl TrailCompare {
    /// Label used in file names and index rows
    pub fn as_str(&self) -> &'static str {
        match self {
            TrailCompare::Ref => "ref",
            TrailCompare::Ideal => "ideal",
        }
    }
}

impl std::str::FromStr for TrailCompare {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ref" => Ok(TrailCompare::Ref),
            "ideal" => Ok(TrailCompare::Ideal),
            other => Err(format!("unknown comparison '{other}', expected 'ref' or 'ideal'")),
        }
    }
}

/// Trail export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailConfig {
    /// Trailing window length in seconds
    pub seconds: f64,
    /// Speed the delta compares against
    pub compare: TrailCompare,
    /// Samples kept when the lap is shorter than the window
    pub fallback_samples: usize,
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            seconds: 15.0,
            compare: TrailCompare::Ref,
            fallback_samples: 50,
        }
    }
}

/// Reference line used for deviation queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceMode {
    /// The car's own median racing line
    #[default]
    PerCarLine,
    /// The fleet-wide racing line
    GlobalLine,
    /// The car's individual line
    IndividualLine,
}

/// Runtime query settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Reference line for deviation in car states
    pub reference_mode: ReferenceMode,
    /// Lapdist drop that marks a new lap for sector timing
    pub lap_drop: f64,
    /// Samples a lap needs before it is timed
    pub min_lap_samples: usize,
    /// Sector delta below this is reported as level
    pub delta_tolerance_s: f64,
    /// Half length of sector marker segments in metres
    pub sector_marker_half_width: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            reference_mode: ReferenceMode::PerCarLine,
            lap_drop: 100.0,
            min_lap_samples: 10,
            delta_tolerance_s: 0.001,
            sector_marker_half_width: 20.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{ "interpolation": { "max_slope": 90.0 }, "trail": { "compare": "ideal" } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.interpolation.max_slope, 90.0);
        assert_eq!(config.interpolation.dt_ms, 10);
        assert_eq!(config.trail.compare, TrailCompare::Ideal);
        assert_eq!(config.racing_line, RacingLineConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = PipelineConfig::default();
        config.canonical.n_sectors = 4;
        config.runtime.reference_mode = ReferenceMode::GlobalLine;
        config.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_trail_compare_parse() {
        assert_eq!("REF".parse::<TrailCompare>().unwrap(), TrailCompare::Ref);
        assert!("fast".parse::<TrailCompare>().is_err());
    }
}
