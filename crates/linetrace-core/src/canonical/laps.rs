//! Lap pivot and lap statistics for the canonical path

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::CanonicalConfig;
use crate::filters::{cumulative_distance, median};
use crate::geo::EnuFrame;
use crate::telemetry::{Channel, VehicleEvents};

/// Summary of one (vehicle, lap)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapStats {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// Lap number as logged
    pub lap: i64,
    /// Distinct timestamps with any reading
    pub n_rows: usize,
    /// Timestamps with both latitude and longitude
    pub n_gps: usize,
    /// First timestamp in epoch milliseconds
    pub t_start_ms: i64,
    /// Last timestamp in epoch milliseconds
    pub t_end_ms: i64,
    /// Lap duration in seconds
    pub duration_s: f64,
}

impl LapStats {
    /// Lap counts for canonical processing
    pub fn is_valid(&self, config: &CanonicalConfig) -> bool {
        self.lap != config.excluded_lap
            && self.n_gps >= config.min_gps_rows
            && self.duration_s > config.min_lap_duration_s
    }
}

/// Mean GPS position at one timestamp of one lap
#[derive(Debug, Clone, Copy, Default)]
struct PivotRow {
    lat_sum: f64,
    lat_n: usize,
    lon_sum: f64,
    lon_n: usize,
}

impl PivotRow {
    fn position(&self) -> Option<(f64, f64)> {
        (self.lat_n > 0 && self.lon_n > 0).then(|| {
            (
                self.lat_sum / self.lat_n as f64,
                self.lon_sum / self.lon_n as f64,
            )
        })
    }
}

/// One vehicle's readings pivoted to one row per (lap, timestamp)
#[derive(Debug, Clone, Default)]
pub struct VehiclePivot {
    rows: BTreeMap<(i64, i64), PivotRow>,
}

impl VehiclePivot {
    /// Pivot a vehicle's readings; readings without a lap number are ignored
    pub fn build(events: &VehicleEvents) -> Self {
        let lat_name = Channel::Lat.aliases().iter().find(|n| events.channel(n).is_some());
        let lon_name = Channel::Lon.aliases().iter().find(|n| events.channel(n).is_some());

        let mut rows: BTreeMap<(i64, i64), PivotRow> = BTreeMap::new();
        for name in events.channel_names() {
            let is_lat = lat_name.is_some_and(|n| *n == name);
            let is_lon = lon_name.is_some_and(|n| *n == name);
            for s in events.channel(name).unwrap_or_default() {
                let Some(lap) = s.lap else { continue };
                let row = rows.entry((lap, s.timestamp_ms)).or_default();
                if is_lat {
                    row.lat_sum += s.value;
                    row.lat_n += 1;
                } else if is_lon {
                    row.lon_sum += s.value;
                    row.lon_n += 1;
                }
            }
        }
        Self { rows }
    }

    /// Laps present in the pivot
    pub fn laps(&self) -> Vec<i64> {
        let mut laps: Vec<i64> = self.rows.keys().map(|(lap, _)| *lap).collect();
        laps.dedup();
        laps
    }

    /// Stats for every lap
    pub fn lap_stats(&self, vehicle_id: &str) -> Vec<LapStats> {
        self.laps()
            .into_iter()
            .map(|lap| {
                let rows: Vec<(&i64, &PivotRow)> = self
                    .rows
                    .range((lap, i64::MIN)..=(lap, i64::MAX))
                    .map(|((_, t), r)| (t, r))
                    .collect();
                let t_start_ms = rows.first().map_or(0, |(t, _)| **t);
                let t_end_ms = rows.last().map_or(0, |(t, _)| **t);
                LapStats {
                    vehicle_id: vehicle_id.to_string(),
                    lap,
                    n_rows: rows.len(),
                    n_gps: rows.iter().filter(|(_, r)| r.position().is_some()).count(),
                    t_start_ms,
                    t_end_ms,
                    duration_s: (t_end_ms - t_start_ms) as f64 / 1000.0,
                }
            })
            .collect()
    }

    /// GPS positions of one lap ordered by time
    pub fn gps_rows(&self, lap: i64) -> Vec<(i64, f64, f64)> {
        self.rows
            .range((lap, i64::MIN)..=(lap, i64::MAX))
            .filter_map(|((_, t), r)| r.position().map(|(la, lo)| (*t, la, lo)))
            .collect()
    }
}

/// One lap projected into the shared ENU frame
#[derive(Debug, Clone, PartialEq)]
pub struct LapTrace {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// Lap number
    pub lap: i64,
    /// Epoch milliseconds per point
    pub timestamp_ms: Vec<i64>,
    /// East offset in metres
    pub x: Vec<f64>,
    /// North offset in metres
    pub y: Vec<f64>,
    /// Cumulative distance along the lap, starting at 0
    pub dist: Vec<f64>,
}

impl LapTrace {
    /// Project a lap's GPS rows; `None` below two points
    pub fn project(
        vehicle_id: &str,
        lap: i64,
        rows: &[(i64, f64, f64)],
        frame: &EnuFrame,
    ) -> Option<Self> {
        if rows.len() < 2 {
            return None;
        }
        let lat: Vec<f64> = rows.iter().map(|r| r.1).collect();
        let lon: Vec<f64> = rows.iter().map(|r| r.2).collect();
        let (x, y) = frame.project_all(&lat, &lon);
        let dist = cumulative_distance(&x, &y);
        Some(Self {
            vehicle_id: vehicle_id.to_string(),
            lap,
            timestamp_ms: rows.iter().map(|r| r.0).collect(),
            x,
            y,
            dist,
        })
    }

    /// Total distance covered
    pub fn length(&self) -> f64 {
        self.dist.last().copied().unwrap_or(0.0)
    }

    /// Seconds since the first point
    pub fn relative_time_s(&self) -> Vec<f64> {
        let t0 = self.timestamp_ms.first().copied().unwrap_or(0);
        self.timestamp_ms
            .iter()
            .map(|&t| (t - t0) as f64 / 1000.0)
            .collect()
    }
}

/// Pick the ENU origin: median position of the configured reference lap, or of the
/// first clean lap with GPS data in (vehicle, lap) order.
///
/// `clean` holds the valid laps of the cars that have enough of them.
pub fn reference_origin(
    pivots: &BTreeMap<String, VehiclePivot>,
    clean: &BTreeMap<String, Vec<&LapStats>>,
    config: &CanonicalConfig,
) -> Option<EnuFrame> {
    let median_of = |rows: &[(i64, f64, f64)]| {
        let lat: Vec<f64> = rows.iter().map(|r| r.1).collect();
        let lon: Vec<f64> = rows.iter().map(|r| r.2).collect();
        EnuFrame::new(median(&lat), median(&lon))
    };

    if let Some(pivot) = pivots.get(&config.reference_vehicle) {
        let rows = pivot.gps_rows(config.reference_lap);
        if !rows.is_empty() {
            return Some(median_of(&rows));
        }
    }

    for (vehicle, laps) in clean {
        let Some(pivot) = pivots.get(vehicle) else { continue };
        for lap in laps {
            let rows = pivot.gps_rows(lap.lap);
            if !rows.is_empty() {
                warn!(
                    "Reference lap {} of {} not available, using {} lap {} as ENU origin",
                    config.reference_lap, config.reference_vehicle, vehicle, lap.lap
                );
                return Some(median_of(&rows));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{EventTable, TelemetryEvent};

    fn table() -> EventTable {
        let mut events = Vec::new();
        for (lap, t0) in [(1, 0), (2, 60_000)] {
            for k in 0..60 {
                let t = t0 + k * 1000;
                for (channel, value) in [("VBOX_Lat_Min", 33.0 + (lap - 1) as f64 * 1e-3 + k as f64 * 1e-5), ("VBOX_Long_Minutes", -86.0), ("speed", 30.0)] {
                    events.push(TelemetryEvent {
                        vehicle_id: "car".to_string(),
                        timestamp_ms: t,
                        channel: channel.to_string(),
                        value,
                        lap: Some(lap),
                    });
                }
            }
        }
        // speed-only row without GPS
        events.push(TelemetryEvent {
            vehicle_id: "car".to_string(),
            timestamp_ms: 119_500,
            channel: "speed".to_string(),
            value: 1.0,
            lap: Some(2),
        });
        events.into_iter().collect()
    }

    #[test]
    fn test_lap_stats_and_validity() {
        let table = table();
        let pivot = VehiclePivot::build(table.vehicle("car").unwrap());
        let stats = pivot.lap_stats("car");
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[1].n_rows, 61);
        assert_eq!(stats[1].n_gps, 60);
        assert_eq!(stats[1].duration_s, 59.5);
        let config = CanonicalConfig::default();
        assert!(!stats[0].is_valid(&config), "out lap is never valid");
        assert!(stats[1].is_valid(&config));
    }

    fn pivots(table: &EventTable) -> BTreeMap<String, VehiclePivot> {
        let mut pivots = BTreeMap::new();
        pivots.insert("car".to_string(), VehiclePivot::build(table.vehicle("car").unwrap()));
        pivots
    }

    #[test]
    fn test_origin_falls_back_to_first_clean_lap() {
        let table = table();
        let pivots = pivots(&table);
        let config = CanonicalConfig::default();
        let stats = pivots["car"].lap_stats("car");
        let mut clean = BTreeMap::new();
        clean.insert(
            "car".to_string(),
            stats.iter().filter(|l| l.is_valid(&config)).collect::<Vec<_>>(),
        );

        let frame = reference_origin(&pivots, &clean, &config).unwrap();
        let (lat, lon) = frame.origin();
        assert!((lat - (33.001 + 29.5e-5)).abs() < 1e-9, "lat {lat}");
        assert_eq!(lon, -86.0);
    }

    #[test]
    fn test_origin_ignores_unclean_laps() {
        let table = table();
        let pivots = pivots(&table);
        assert!(reference_origin(&pivots, &BTreeMap::new(), &CanonicalConfig::default()).is_none());
    }

    #[test]
    fn test_origin_prefers_reference_lap() {
        let table = table();
        let pivots = pivots(&table);
        let config = CanonicalConfig {
            reference_vehicle: "car".to_string(),
            reference_lap: 1,
            ..CanonicalConfig::default()
        };
        let frame = reference_origin(&pivots, &BTreeMap::new(), &config).unwrap();
        assert!((frame.origin().0 - (33.0 + 29.5e-5)).abs() < 1e-9);
    }

    #[test]
    fn test_lap_trace_distance() {
        let frame = EnuFrame::new(33.0, -86.0);
        let rows = [(0, 33.0, -86.0), (1000, 33.0001, -86.0), (2000, 33.0002, -86.0)];
        let trace = LapTrace::project("car", 2, &rows, &frame).unwrap();
        assert_eq!(trace.dist[0], 0.0);
        assert!((trace.length() - 22.18).abs() < 0.1, "length {}", trace.length());
        assert_eq!(trace.relative_time_s(), vec![0.0, 1.0, 2.0]);
        assert!(LapTrace::project("car", 2, &rows[..1], &frame).is_none());
    }
}
