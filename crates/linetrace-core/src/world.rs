//! Runtime world
//!
//! Read-only view of one processed dataset for interactive replay. Car states are
//! computed on demand from the trajectories; deviation queries go through the
//! spatial index of the selected reference line.
//!
//! Trajectories, racing lines and their indexes share the per-vehicle projection
//! frame. The canonical line, sector markers and delta trails share the ENU frame.
//! Queries never combine positions from the two.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::canonical::{load_canonical, read_sector_map, CanonicalLine, Sector};
use crate::config::{ReferenceMode, RuntimeConfig};
use crate::error::Result;
use crate::output::{car_line_path, trajectory_path, Metadata, RACING_LINE_FILE};
use crate::racing_line::read_line_csv;
use crate::sectors::{sector_at, sector_marker, SectorDelta, SectorTimes};
use crate::spatial::{signed_deviation, Deviation, IndexedLine};
use crate::trail::{find_trail_file, read_trail, TRAIL_DIR};
use crate::trajectory::{lap_starts, read_trajectory, Trajectory};

/// State of one car at one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarState {
    /// Frame index the state was read from
    pub frame: usize,
    /// East offset
    pub x: f64,
    /// North offset
    pub y: f64,
    /// Speed
    pub speed: f64,
    /// Distance since lap start
    pub lapdist: f64,
    /// Stronger of the two brake channels
    pub brake: f64,
    /// Front brake
    pub brake_front: f64,
    /// Rear brake
    pub brake_rear: f64,
    /// Gear
    pub gear: i32,
    /// Lap number
    pub lap: i64,
    /// Steering angle in degrees
    pub steering_deg: f64,
    /// Heading in radians
    pub heading_rad: f64,
    /// Normalized acceleration
    pub accel_norm: f64,
    /// Signed offset from the reference line
    pub deviation: f64,
    /// Nearest reference line point
    pub ideal_x: f64,
    /// Nearest reference line point
    pub ideal_y: f64,
}

/// One car's place in the running order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaceEntry {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// 1-based position
    pub position: usize,
    /// Lap number
    pub lap: i64,
    /// Distance since lap start
    pub lapdist: f64,
    /// First in the order
    pub is_leader: bool,
    /// On the leader's lap
    pub on_lead_lap: bool,
    /// Laps behind the leader
    pub laps_down: i64,
}

/// Running order at one time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RaceOrder {
    /// Leader, if any car exists
    pub leader_id: Option<String>,
    /// Entries by position
    pub cars: Vec<RaceEntry>,
}

impl RaceOrder {
    /// Entry of a car
    pub fn entry(&self, vehicle_id: &str) -> Option<&RaceEntry> {
        self.cars.iter().find(|e| e.vehicle_id == vehicle_id)
    }
}

/// Everything a [`World`] is built from
#[derive(Debug, Clone, Default)]
pub struct WorldParts {
    /// Dataset metadata; derived from the trajectories when absent
    pub metadata: Option<Metadata>,
    /// Trajectories of every car
    pub trajectories: Vec<Trajectory>,
    /// Fleet-wide racing line
    pub global_line: Option<Vec<[f64; 2]>>,
    /// Per-car racing lines
    pub car_lines: BTreeMap<String, Vec<[f64; 2]>>,
    /// Canonical line with profiles
    pub canonical: Option<CanonicalLine>,
    /// Sector definitions
    pub sectors: Vec<Sector>,
    /// Delta trail points `[x, y, delta_kmh]` per car
    pub trails: BTreeMap<String, Vec<[f64; 3]>>,
}

#[derive(Debug)]
struct Car {
    trajectory: Trajectory,
    lap_starts: Vec<usize>,
    line: Option<IndexedLine>,
    trail: Vec<[f64; 3]>,
}

/// Loaded dataset with its spatial indexes
#[derive(Debug)]
pub struct World {
    metadata: Metadata,
    cars: BTreeMap<String, Car>,
    global_line: Option<IndexedLine>,
    canonical: Option<CanonicalLine>,
    sector_times: SectorTimes,
    config: RuntimeConfig,
}

impl World {
    /// Build a world from in-memory parts
    pub fn from_parts(parts: WorldParts, config: RuntimeConfig) -> Self {
        let WorldParts {
            metadata,
            trajectories,
            global_line,
            mut car_lines,
            canonical,
            sectors,
            mut trails,
        } = parts;

        let metadata = metadata.unwrap_or_else(|| {
            let lengths = BTreeMap::new();
            Metadata::build(&trajectories, &lengths, 0)
        });
        let sector_times = SectorTimes::compute(&trajectories, &sectors, &config);

        let cars = trajectories
            .into_iter()
            .map(|trajectory| {
                let id = trajectory.vehicle_id.clone();
                let lapdist = trajectory.column(|r| r.lapdist);
                let car = Car {
                    lap_starts: lap_starts(&lapdist, config.lap_drop),
                    line: car_lines
                        .remove(&id)
                        .filter(|l| !l.is_empty())
                        .map(IndexedLine::new),
                    trail: trails.remove(&id).unwrap_or_default(),
                    trajectory,
                };
                (id, car)
            })
            .collect();

        Self {
            metadata,
            cars,
            global_line: global_line.filter(|l| !l.is_empty()).map(IndexedLine::new),
            canonical,
            sector_times,
            config,
        }
    }

    /// Load a processed dataset directory.
    ///
    /// Metadata and trajectories are required. Racing lines, canonical artifacts and
    /// trails are optional; missing ones disable the features that need them.
    pub fn load(dir: &Path, config: RuntimeConfig) -> Result<Self> {
        let metadata = Metadata::load(dir)?;

        let mut trajectories = Vec::with_capacity(metadata.car_ids.len());
        for car in &metadata.car_ids {
            let mut trajectory = read_trajectory(trajectory_path(dir, car))?;
            trajectory.vehicle_id = car.clone();
            trajectories.push(trajectory);
        }

        let global_path = dir.join(RACING_LINE_FILE);
        let global_line = if global_path.exists() {
            Some(read_line_csv(&global_path)?)
        } else {
            info!("No global racing line in {}", dir.display());
            None
        };

        let mut car_lines = BTreeMap::new();
        if metadata.per_car_racing_lines {
            for car in &metadata.car_ids {
                let path = car_line_path(dir, car);
                if path.exists() {
                    car_lines.insert(car.clone(), read_line_csv(&path)?);
                }
            }
            info!("Loaded per-car racing lines for {} vehicles", car_lines.len());
        }

        let canonical = load_canonical(dir)?;
        let sectors = match read_sector_map(dir)? {
            Some(map) => {
                info!(
                    "Loaded sector map: {} sectors, track length {:.1}m",
                    map.sectors.len(),
                    map.track_length_m
                );
                map.sectors
            }
            None => {
                info!("Sector map not found, sector features disabled");
                Vec::new()
            }
        };

        let trail_dir = dir.join(TRAIL_DIR);
        let mut trails = BTreeMap::new();
        for car in &metadata.car_ids {
            let Some(path) = find_trail_file(&trail_dir, car) else { continue };
            match read_trail(&path) {
                Ok(points) => {
                    trails.insert(
                        car.clone(),
                        points.iter().map(|p| [p.x_m, p.y_m, p.delta_kmh]).collect(),
                    );
                }
                Err(e) => warn!("Failed to load trail for {}: {}", car, e),
            }
        }

        info!(
            "Loaded {} vehicles, {:.1} s of data",
            trajectories.len(),
            metadata.total_duration_ms as f64 / 1000.0
        );
        Ok(Self::from_parts(
            WorldParts {
                metadata: Some(metadata),
                trajectories,
                global_line,
                car_lines,
                canonical,
                sectors,
                trails,
            },
            config,
        ))
    }

    /// Dataset metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Vehicles, sorted
    pub fn car_ids(&self) -> impl Iterator<Item = &str> {
        self.cars.keys().map(String::as_str)
    }

    /// Runtime settings
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Trajectory of a car
    pub fn trajectory(&self, vehicle_id: &str) -> Option<&Trajectory> {
        self.cars.get(vehicle_id).map(|c| &c.trajectory)
    }

    /// Per-car racing line
    pub fn racing_line(&self, vehicle_id: &str) -> Option<&[[f64; 2]]> {
        self.cars.get(vehicle_id)?.line.as_ref().map(IndexedLine::points)
    }

    /// Fleet-wide racing line
    pub fn global_line(&self) -> Option<&[[f64; 2]]> {
        self.global_line.as_ref().map(IndexedLine::points)
    }

    /// Canonical line, when loaded
    pub fn canonical(&self) -> Option<&CanonicalLine> {
        self.canonical.as_ref()
    }

    /// Sector timing
    pub fn sector_times(&self) -> &SectorTimes {
        &self.sector_times
    }

    /// State of a car at a session time, with deviation from the configured
    /// reference line
    pub fn get_car_state(&self, vehicle_id: &str, time_ms: f64) -> Option<CarState> {
        let traj = &self.cars.get(vehicle_id)?.trajectory;
        let frame = traj.frame_index(time_ms)?;
        let row = traj.rows[frame];
        let dev = self.compute_deviation(vehicle_id, frame, self.config.reference_mode);
        Some(CarState {
            frame,
            x: row.x,
            y: row.y,
            speed: row.speed,
            lapdist: row.lapdist,
            brake: row.brake(),
            brake_front: row.brake_front,
            brake_rear: row.brake_rear,
            gear: row.gear as i32,
            lap: row.lap as i64,
            steering_deg: row.steering_deg,
            heading_rad: row.heading_rad,
            accel_norm: row.accel_norm,
            deviation: dev.deviation,
            ideal_x: dev.nearest[0],
            ideal_y: dev.nearest[1],
        })
    }

    /// Signed deviation of a car at a frame from the line selected by `mode`.
    ///
    /// `IndividualLine` measures against the car's own line, like `PerCarLine`.
    /// Zero when the line is missing or the frame is out of range.
    pub fn compute_deviation(&self, vehicle_id: &str, frame: usize, mode: ReferenceMode) -> Deviation {
        let Some(car) = self.cars.get(vehicle_id) else {
            return Deviation::default();
        };
        let line = match mode {
            ReferenceMode::GlobalLine => self.global_line.as_ref(),
            ReferenceMode::PerCarLine | ReferenceMode::IndividualLine => car.line.as_ref(),
        };
        let (Some(line), Some(row)) = (line, car.trajectory.rows.get(frame)) else {
            return Deviation::default();
        };
        signed_deviation(line, [row.x, row.y]).unwrap_or_default()
    }

    /// States of every car at a session time
    pub fn get_all_car_states(&self, time_ms: f64) -> BTreeMap<String, CarState> {
        self.cars
            .keys()
            .filter_map(|id| Some((id.clone(), self.get_car_state(id, time_ms)?)))
            .collect()
    }

    /// Running order: descending by lap, then lapdist, then vehicle id
    pub fn get_race_order(&self, time_ms: f64) -> RaceOrder {
        let mut states: Vec<(String, CarState)> =
            self.get_all_car_states(time_ms).into_iter().collect();
        states.sort_by(|(a_id, a), (b_id, b)| {
            b.lap
                .cmp(&a.lap)
                .then(b.lapdist.total_cmp(&a.lapdist))
                .then(b_id.cmp(a_id))
        });
        let Some((leader_id, leader_lap)) = states.first().map(|(id, s)| (id.clone(), s.lap)) else {
            return RaceOrder::default();
        };
        let cars = states
            .into_iter()
            .enumerate()
            .map(|(i, (vehicle_id, s))| {
                let laps_down = (leader_lap - s.lap).max(0);
                RaceEntry {
                    is_leader: vehicle_id == leader_id,
                    vehicle_id,
                    position: i + 1,
                    lap: s.lap,
                    lapdist: s.lapdist,
                    on_lead_lap: laps_down == 0,
                    laps_down,
                }
            })
            .collect();
        RaceOrder {
            leader_id: Some(leader_id),
            cars,
        }
    }

    fn positions(&self, vehicle_id: &str, range: std::ops::Range<usize>) -> Vec<[f64; 2]> {
        self.trajectory(vehicle_id)
            .and_then(|t| t.rows.get(range))
            .map(|rows| rows.iter().map(|r| [r.x, r.y]).collect())
            .unwrap_or_default()
    }

    /// Every position of a car
    pub fn full_trace(&self, vehicle_id: &str) -> Vec<[f64; 2]> {
        let n = self.trajectory(vehicle_id).map_or(0, Trajectory::len);
        self.positions(vehicle_id, 0..n)
    }

    /// Positions over the `duration_s` seconds up to `time_ms`
    pub fn fading_trail(&self, vehicle_id: &str, time_ms: f64, duration_s: f64) -> Vec<[f64; 2]> {
        let Some(traj) = self.trajectory(vehicle_id) else {
            return Vec::new();
        };
        let Some(current) = traj.frame_index(time_ms) else {
            return Vec::new();
        };
        let span = (duration_s.max(0.0) * 1000.0 / traj.sample_rate_ms as f64) as usize;
        self.positions(vehicle_id, current.saturating_sub(span)..current + 1)
    }

    /// Positions of the last complete lap; the full trace when there is none
    pub fn last_lap_trace(&self, vehicle_id: &str) -> Vec<[f64; 2]> {
        let Some(car) = self.cars.get(vehicle_id) else {
            return Vec::new();
        };
        match car.lap_starts.as_slice() {
            [.., start, end] => self.positions(vehicle_id, *start..*end),
            _ => self.full_trace(vehicle_id),
        }
    }

    /// Delta trail points `[x, y, delta_kmh]` in the canonical frame
    pub fn delta_trail(&self, vehicle_id: &str) -> &[[f64; 3]] {
        self.cars
            .get(vehicle_id)
            .map(|c| c.trail.as_slice())
            .unwrap_or(&[])
    }

    /// 1-based sector a car is in at a time; 1 without sectors
    pub fn current_sector(&self, vehicle_id: &str, time_ms: f64) -> usize {
        let sectors = self.sector_times.sectors();
        match self.get_car_state(vehicle_id, time_ms) {
            Some(state) if !sectors.is_empty() => sector_at(sectors, state.lapdist),
            _ => 1,
        }
    }

    fn current_lap_start(car: &Car, frame: usize) -> usize {
        car.lap_starts
            .iter()
            .copied()
            .take_while(|s| *s <= frame)
            .last()
            .unwrap_or(0)
    }

    /// Seconds since the car's current lap started
    pub fn current_lap_time(&self, vehicle_id: &str, time_ms: f64) -> f64 {
        let Some(car) = self.cars.get(vehicle_id) else {
            return 0.0;
        };
        let Some(frame) = car.trajectory.frame_index(time_ms) else {
            return 0.0;
        };
        let start = Self::current_lap_start(car, frame);
        (frame - start) as f64 * car.trajectory.dt_s()
    }

    /// Seconds since the car entered its current sector, bounded by the lap start
    pub fn current_sector_time(&self, vehicle_id: &str, time_ms: f64) -> f64 {
        let sectors = self.sector_times.sectors();
        let Some(car) = self.cars.get(vehicle_id) else {
            return 0.0;
        };
        let Some(frame) = car.trajectory.frame_index(time_ms) else {
            return 0.0;
        };
        if sectors.is_empty() {
            return 0.0;
        }
        let rows = &car.trajectory.rows;
        let sector = sector_at(sectors, rows[frame].lapdist);
        let start_dist = sectors[sector - 1].start_dist_m;
        let lap_start = Self::current_lap_start(car, frame);
        let entry = (lap_start..=frame)
            .rev()
            .find(|&i| rows[i].lapdist < start_dist)
            .unwrap_or(lap_start);
        (frame - entry) as f64 * car.trajectory.dt_s()
    }

    /// Best fully timed lap of a car
    pub fn best_lap_time(&self, vehicle_id: &str) -> Option<f64> {
        self.sector_times.best_lap_time(vehicle_id)
    }

    /// Delta of the car's last time in `sector` (1-based) to the bests
    pub fn sector_delta(&self, vehicle_id: &str, sector: usize) -> SectorDelta {
        self.sector_times.sector_delta(vehicle_id, sector)
    }

    /// Current lap time plus the car's best times for the remaining sectors
    pub fn predicted_lap_time(&self, vehicle_id: &str, time_ms: f64) -> Option<f64> {
        if self.sector_times.sectors().is_empty() {
            return None;
        }
        self.sector_times.predicted_lap_time(
            vehicle_id,
            self.current_sector(vehicle_id, time_ms),
            self.current_lap_time(vehicle_id, time_ms),
        )
    }

    /// Ideal speed at a canonical distance; 0 without a canonical line
    pub fn ideal_speed_at(&self, dist_m: f64) -> f64 {
        match &self.canonical {
            Some(line) if !line.is_empty() => line.ideal_speed_at(dist_m),
            _ => 0.0,
        }
    }

    /// Marker segment across the canonical line at the start of a sector (0-based)
    pub fn sector_marker(&self, sector_idx: usize) -> Option<[[f64; 2]; 2]> {
        sector_marker(
            self.canonical.as_ref()?,
            self.sector_times.sectors(),
            sector_idx,
            self.config.sector_marker_half_width,
        )
    }
}
