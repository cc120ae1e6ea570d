//! Sector timing
//!
//! Laps are cut at lapdist resets and each sector is timed from the first sample
//! whose lapdist reaches the sector's end distance. A lap only counts when every
//! sector resolved; its lap time is the sum of the sector times.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::canonical::{CanonicalLine, Sector};
use crate::config::RuntimeConfig;
use crate::trajectory::{lap_starts, Trajectory};

/// Sector times of one car
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarSectorTimes {
    /// Sector times of fully timed laps, keyed by 1-based lap index
    pub laps: BTreeMap<usize, Vec<f64>>,
    /// Lap times of fully timed laps in lap order
    pub lap_times: Vec<f64>,
    /// Personal best per sector
    pub best_sectors: Vec<Option<f64>>,
}

impl CarSectorTimes {
    /// Time every complete lap of a lapdist series sampled every `sample_rate_ms`.
    ///
    /// Returns `None` when the series has no complete lap.
    pub fn compute(
        lapdist: &[f64],
        sample_rate_ms: u32,
        sectors: &[Sector],
        config: &RuntimeConfig,
    ) -> Option<Self> {
        let starts = lap_starts(lapdist, config.lap_drop);
        if starts.len() < 2 {
            return None;
        }
        let mut times = CarSectorTimes {
            best_sectors: vec![None; sectors.len()],
            ..Default::default()
        };

        for (k, bounds) in starts.windows(2).enumerate() {
            let (start, end) = (bounds[0], bounds[1]);
            let lap = &lapdist[start..end];
            if lap.len() < config.min_lap_samples {
                continue;
            }
            let mut prev = 0usize;
            let mut sector_times = Vec::with_capacity(sectors.len());
            for (i, sector) in sectors.iter().enumerate() {
                let Some(hit) = lap.iter().position(|d| *d >= sector.end_dist_m) else {
                    continue;
                };
                let t = (hit.saturating_sub(prev) as u64 * sample_rate_ms as u64) as f64 / 1000.0;
                prev = hit;
                sector_times.push(t);
                let best = &mut times.best_sectors[i];
                if best.map_or(true, |b| t < b) {
                    *best = Some(t);
                }
            }
            if !sectors.is_empty() && sector_times.len() == sectors.len() {
                times.lap_times.push(sector_times.iter().sum());
                times.laps.insert(k + 1, sector_times);
            }
        }
        Some(times)
    }

    /// Fastest fully timed lap
    pub fn best_lap_time(&self) -> Option<f64> {
        self.lap_times.iter().copied().reduce(f64::min)
    }

    /// Sector times of the last fully timed lap
    pub fn last_lap(&self) -> Option<&[f64]> {
        self.laps.values().next_back().map(Vec::as_slice)
    }
}

/// Comparison of a car's last sector time with the bests
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SectorDelta {
    /// Last time minus the personal best
    pub to_personal: f64,
    /// Last time minus the fleet best
    pub to_fleet: f64,
    /// Last time matches the personal best
    pub is_personal_best: bool,
    /// Last time matches the fleet best
    pub is_fleet_best: bool,
}

/// Sector times of every car plus the fleet bests
#[derive(Debug, Clone, Default)]
pub struct SectorTimes {
    sectors: Vec<Sector>,
    cars: BTreeMap<String, CarSectorTimes>,
    fleet_best: Vec<Option<f64>>,
    tolerance_s: f64,
}

impl SectorTimes {
    /// Time every trajectory against the given sectors
    pub fn compute<'a, I>(trajectories: I, sectors: &[Sector], config: &RuntimeConfig) -> Self
    where
        I: IntoIterator<Item = &'a Trajectory>,
    {
        let mut cars = BTreeMap::new();
        for traj in trajectories {
            let lapdist = traj.column(|r| r.lapdist);
            match CarSectorTimes::compute(&lapdist, traj.sample_rate_ms, sectors, config) {
                Some(times) => {
                    cars.insert(traj.vehicle_id.clone(), times);
                }
                None => debug!("Vehicle {}: no complete lap to time", traj.vehicle_id),
            }
        }

        let mut fleet_best: Vec<Option<f64>> = vec![None; sectors.len()];
        for times in cars.values() {
            for (fleet, car) in fleet_best.iter_mut().zip(&times.best_sectors) {
                if let Some(t) = car {
                    if fleet.map_or(true, |b| *t < b) {
                        *fleet = Some(*t);
                    }
                }
            }
        }
        if !sectors.is_empty() {
            let bests: Vec<String> = fleet_best
                .iter()
                .enumerate()
                .map(|(i, b)| match b {
                    Some(t) => format!("S{}={:.3}s", i + 1, t),
                    None => format!("S{}=-", i + 1),
                })
                .collect();
            info!("Computed sector times for {} cars ({})", cars.len(), bests.join(", "));
        }

        Self {
            sectors: sectors.to_vec(),
            cars,
            fleet_best,
            tolerance_s: config.delta_tolerance_s,
        }
    }

    /// Sector definitions
    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    /// Times of one car
    pub fn car(&self, vehicle_id: &str) -> Option<&CarSectorTimes> {
        self.cars.get(vehicle_id)
    }

    /// Fleet best per sector
    pub fn fleet_best(&self) -> &[Option<f64>] {
        &self.fleet_best
    }

    /// Best lap time of a car
    pub fn best_lap_time(&self, vehicle_id: &str) -> Option<f64> {
        self.car(vehicle_id)?.best_lap_time()
    }

    /// Delta of the car's last timed `sector` (1-based) to its own and the fleet best
    pub fn sector_delta(&self, vehicle_id: &str, sector: usize) -> SectorDelta {
        let Some(car) = self.car(vehicle_id) else {
            return SectorDelta::default();
        };
        let i = match sector.checked_sub(1) {
            Some(i) if i < self.sectors.len() => i,
            _ => return SectorDelta::default(),
        };
        let (Some(last), Some(personal), Some(fleet)) = (
            car.last_lap().and_then(|l| l.get(i).copied()),
            car.best_sectors[i],
            self.fleet_best[i],
        ) else {
            return SectorDelta::default();
        };
        let to_personal = last - personal;
        let to_fleet = last - fleet;
        SectorDelta {
            to_personal,
            to_fleet,
            is_personal_best: to_personal.abs() < self.tolerance_s,
            is_fleet_best: to_fleet.abs() < self.tolerance_s,
        }
    }

    /// Predicted lap time: elapsed lap time plus the car's best times of the sectors
    /// after `current_sector` (1-based)
    pub fn predicted_lap_time(
        &self,
        vehicle_id: &str,
        current_sector: usize,
        current_lap_time_s: f64,
    ) -> Option<f64> {
        let car = self.car(vehicle_id)?;
        car.best_sectors
            .iter()
            .skip(current_sector)
            .try_fold(current_lap_time_s, |acc, best| best.map(|b| acc + b))
    }
}

/// 1-based sector containing a lapdist; the last sector when none does
pub fn sector_at(sectors: &[Sector], lapdist: f64) -> usize {
    sectors
        .iter()
        .position(|s| s.start_dist_m <= lapdist && lapdist < s.end_dist_m)
        .map(|i| i + 1)
        .unwrap_or(sectors.len().max(1))
}

/// Marker segment across the canonical line at the start of sector `sector_idx`
/// (0-based), `half_width` metres to each side along the normal
pub fn sector_marker(
    line: &CanonicalLine,
    sectors: &[Sector],
    sector_idx: usize,
    half_width: f64,
) -> Option<[[f64; 2]; 2]> {
    let n = line.len();
    if n < 2 || sector_idx >= sectors.len() {
        return None;
    }
    let boundary = if sector_idx == 0 {
        0.0
    } else {
        sectors[sector_idx].start_dist_m
    };
    let idx = line.dist_m.partition_point(|d| *d < boundary).min(n - 1);
    let (a, b) = if idx + 1 < n { (idx, idx + 1) } else { (idx - 1, idx) };
    let (mut tx, mut ty) = (line.x_m[b] - line.x_m[a], line.y_m[b] - line.y_m[a]);
    let len = tx.hypot(ty);
    if len > 0.0 {
        tx /= len;
        ty /= len;
    }
    let (nx, ny) = (-ty, tx);
    let (cx, cy) = (line.x_m[idx], line.y_m[idx]);
    Some([
        [cx - nx * half_width, cy - ny * half_width],
        [cx + nx * half_width, cy + ny * half_width],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::TrajectoryRow;

    fn sectors() -> Vec<Sector> {
        (0..3)
            .map(|i| Sector {
                sector: i + 1,
                start_dist_m: i as f64 * 300.0,
                end_dist_m: (i + 1) as f64 * 300.0,
                ideal_time_s: 10.0,
            })
            .collect()
    }

    /// `laps` laps of 900 m at `step` metres per 10 ms sample, then a partial lap
    fn lapdist(laps: usize, step: f64) -> Vec<f64> {
        let per_lap = (900.0 / step) as usize + 1;
        let mut ld = Vec::new();
        for _ in 0..laps {
            ld.extend((0..per_lap).map(|i| i as f64 * step));
        }
        ld.extend((0..20).map(|i| i as f64 * step));
        ld
    }

    #[test]
    fn test_sector_times_sum_to_lap() {
        let config = RuntimeConfig::default();
        let times = CarSectorTimes::compute(&lapdist(2, 0.5), 10, &sectors(), &config).unwrap();
        assert_eq!(times.laps.len(), 2);
        let lap = &times.laps[&1];
        // 600 samples per 300 m sector
        for t in lap {
            assert!((t - 6.0).abs() < 1e-9);
        }
        assert!((times.lap_times[0] - 18.0).abs() < 1e-9);
        assert_eq!(times.best_lap_time(), Some(times.lap_times[0]));
    }

    #[test]
    fn test_incomplete_lap_not_recorded() {
        let config = RuntimeConfig::default();
        // lap reset before reaching the last sector end
        let mut ld: Vec<f64> = (0..1000).map(|i| i as f64 * 0.7).collect();
        ld.extend((0..50).map(|i| i as f64));
        let times = CarSectorTimes::compute(&ld, 10, &sectors(), &config).unwrap();
        assert!(times.laps.is_empty());
        assert!(times.best_sectors[0].is_some());
        assert!(times.best_sectors[2].is_none());
        assert!(CarSectorTimes::compute(&[0.0, 1.0, 2.0], 10, &sectors(), &config).is_none());
    }

    #[test]
    fn test_fleet_best_and_delta() {
        let config = RuntimeConfig::default();
        let rows = |step: f64| {
            lapdist(2, step)
                .into_iter()
                .map(|d| TrajectoryRow { lapdist: d, ..Default::default() })
                .collect::<Vec<_>>()
        };
        let fast = Trajectory::new("fast", 10, rows(1.0));
        let slow = Trajectory::new("slow", 10, rows(0.5));
        let times = SectorTimes::compute([&fast, &slow], &sectors(), &config);
        assert_eq!(times.fleet_best()[0], Some(3.0));

        let fast_delta = times.sector_delta("fast", 1);
        assert!(fast_delta.is_personal_best && fast_delta.is_fleet_best);
        let slow_delta = times.sector_delta("slow", 2);
        assert!(slow_delta.is_personal_best);
        assert!(!slow_delta.is_fleet_best);
        assert!((slow_delta.to_fleet - 3.0).abs() < 1e-9);
        assert_eq!(times.sector_delta("ghost", 1), SectorDelta::default());
        assert_eq!(times.sector_delta("fast", 0), SectorDelta::default());

        let predicted = times.predicted_lap_time("fast", 1, 2.0).unwrap();
        assert!((predicted - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_sector_at() {
        let s = sectors();
        assert_eq!(sector_at(&s, 0.0), 1);
        assert_eq!(sector_at(&s, 450.0), 2);
        assert_eq!(sector_at(&s, 5000.0), 3);
        assert_eq!(sector_at(&[], 10.0), 1);
    }

    #[test]
    fn test_sector_marker_is_perpendicular() {
        let dist: Vec<f64> = (0..=900).map(|i| i as f64).collect();
        let line = CanonicalLine {
            x_m: dist.clone(),
            y_m: vec![0.0; dist.len()],
            curvature: vec![0.0; dist.len()],
            ref_speed_ms: vec![0.0; dist.len()],
            ideal_speed_ms: vec![0.0; dist.len()],
            ideal_time_s: vec![0.0; dist.len()],
            dist_m: dist,
        };
        let [a, b] = sector_marker(&line, &sectors(), 1, 20.0).unwrap();
        assert_eq!(a, [300.0, -20.0]);
        assert_eq!(b, [300.0, 20.0]);
        assert!(sector_marker(&line, &sectors(), 3, 20.0).is_none());
    }
}
