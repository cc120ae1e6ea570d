//! Synthetic telemetry sessions
//!
//! Generates long-format telemetry for a fleet of cars lapping a circle or an oval.
//! Each car idles in the pit, drives an out lap from pit exit, then runs its timed
//! laps. Output is deterministic for a given seed.

use std::f64::consts::PI;
use std::path::Path;

use chrono::{DateTime, SecondsFormat};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::geo::EARTH_RADIUS_M;
use crate::telemetry::{EventTable, TelemetryEvent};

/// Closed circuit geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackShape {
    /// Circle of the given radius
    Circle {
        /// Radius in metres
        radius_m: f64,
    },
    /// Two straights joined by semicircles
    Oval {
        /// Straight length in metres
        straight_m: f64,
        /// Corner radius in metres
        radius_m: f64,
    },
}

impl TrackShape {
    /// Lap length in metres
    pub fn length_m(&self) -> f64 {
        match *self {
            TrackShape::Circle { radius_m } => 2.0 * PI * radius_m,
            TrackShape::Oval { straight_m, radius_m } => 2.0 * straight_m + 2.0 * PI * radius_m,
        }
    }

    /// Position at distance `s` from the start line, in local metres
    pub fn position(&self, s: f64) -> (f64, f64) {
        let s = s.rem_euclid(self.length_m());
        match *self {
            TrackShape::Circle { radius_m } => {
                let a = s / radius_m - PI / 2.0;
                (radius_m * a.cos(), radius_m * a.sin())
            }
            TrackShape::Oval { straight_m, radius_m } => {
                let half = straight_m / 2.0;
                let arc = PI * radius_m;
                if s < straight_m {
                    (-half + s, -radius_m)
                } else if s < straight_m + arc {
                    let a = (s - straight_m) / radius_m - PI / 2.0;
                    (half + radius_m * a.cos(), radius_m * a.sin())
                } else if s < 2.0 * straight_m + arc {
                    (half - (s - straight_m - arc), radius_m)
                } else {
                    let a = (s - 2.0 * straight_m - arc) / radius_m + PI / 2.0;
                    (-half + radius_m * a.cos(), radius_m * a.sin())
                }
            }
        }
    }

    /// Unsigned curvature at distance `s`
    pub fn curvature(&self, s: f64) -> f64 {
        let s = s.rem_euclid(self.length_m());
        match *self {
            TrackShape::Circle { radius_m } => 1.0 / radius_m,
            TrackShape::Oval { straight_m, radius_m } => {
                let arc = PI * radius_m;
                let on_corner = (straight_m..straight_m + arc).contains(&s)
                    || s >= 2.0 * straight_m + arc;
                if on_corner {
                    1.0 / radius_m
                } else {
                    0.0
                }
            }
        }
    }
}

/// One car of a synthetic session
#[derive(Debug, Clone, PartialEq)]
pub struct CarSpec {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// Timed laps after the out lap
    pub laps: usize,
    /// Straight-line speed in km/h
    pub speed_kmh: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Glitch {
    vehicle_id: String,
    at_s: f64,
    lapdist: f64,
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    timestamp: String,
    vehicle_id: &'a str,
    lap: Option<i64>,
    telemetry_name: &'a str,
    telemetry_value: f64,
}

/// Builder for a deterministic synthetic session
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    seed: u64,
    shape: TrackShape,
    origin: (f64, f64),
    start_epoch_ms: i64,
    sample_ms: i64,
    idle_s: f64,
    pit_exit_fraction: f64,
    corner_speed_factor: f64,
    lap_jitter: f64,
    gps_noise_m: f64,
    optional_channels: bool,
    cars: Vec<CarSpec>,
    glitches: Vec<Glitch>,
}

impl SessionBuilder {
    /// New session with a 350 m circle near Barber Motorsports Park
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            shape: TrackShape::Circle { radius_m: 350.0 },
            origin: (33.5326, -86.6195),
            start_epoch_ms: 1_745_762_400_000,
            sample_ms: 100,
            idle_s: 5.0,
            pit_exit_fraction: 0.6,
            corner_speed_factor: 0.8,
            lap_jitter: 0.01,
            gps_noise_m: 0.0,
            optional_channels: true,
            cars: Vec::new(),
            glitches: Vec::new(),
        }
    }

    /// Circuit geometry
    pub fn shape(mut self, shape: TrackShape) -> Self {
        self.shape = shape;
        self
    }

    /// Latitude/longitude of the circuit centre
    pub fn origin(mut self, lat: f64, lon: f64) -> Self {
        self.origin = (lat, lon);
        self
    }

    /// Telemetry sample period
    pub fn sample_ms(mut self, sample_ms: i64) -> Self {
        self.sample_ms = sample_ms.max(1);
        self
    }

    /// Seconds each car waits in the pit before its out lap
    pub fn idle_s(mut self, idle_s: f64) -> Self {
        self.idle_s = idle_s.max(0.0);
        self
    }

    /// Uniform GPS noise amplitude in metres
    pub fn gps_noise_m(mut self, noise: f64) -> Self {
        self.gps_noise_m = noise.max(0.0);
        self
    }

    /// Relative lap-to-lap pace variation
    pub fn lap_jitter(mut self, jitter: f64) -> Self {
        self.lap_jitter = jitter.max(0.0);
        self
    }

    /// Emit only the core channels (lat, lon, lapdist, speed)
    pub fn core_channels_only(mut self) -> Self {
        self.optional_channels = false;
        self
    }

    /// Add a car
    pub fn car(mut self, vehicle_id: impl Into<String>, laps: usize, speed_kmh: f64) -> Self {
        self.cars.push(CarSpec {
            vehicle_id: vehicle_id.into(),
            laps,
            speed_kmh,
        });
        self
    }

    /// Replace one lapdist reading of a car, `at_s` seconds after its first sample
    pub fn lapdist_glitch(mut self, vehicle_id: impl Into<String>, at_s: f64, lapdist: f64) -> Self {
        self.glitches.push(Glitch {
            vehicle_id: vehicle_id.into(),
            at_s,
            lapdist,
        });
        self
    }

    /// Lap length of the circuit
    pub fn track_length_m(&self) -> f64 {
        self.shape.length_m()
    }

    /// Cars in the session
    pub fn cars(&self) -> &[CarSpec] {
        &self.cars
    }

    fn to_lat_lon(&self, x: f64, y: f64) -> (f64, f64) {
        let (lat0, lon0) = self.origin;
        let lat = lat0 + (y / EARTH_RADIUS_M).to_degrees();
        let lon = lon0 + (x / (EARTH_RADIUS_M * lat0.to_radians().cos())).to_degrees();
        (lat, lon)
    }

    fn speed_at(&self, s: f64, pace: f64) -> f64 {
        let factor = if self.shape.curvature(s) > 0.0 && matches!(self.shape, TrackShape::Oval { .. }) {
            self.corner_speed_factor
        } else {
            1.0
        };
        pace * factor
    }

    fn car_events(&self, index: usize, car: &CarSpec, rng: &mut StdRng, out: &mut Vec<TelemetryEvent>) {
        let length = self.shape.length_m();
        let dt = self.sample_ms as f64 / 1000.0;
        let t0 = self.start_epoch_ms + index as i64 * 500;
        let idle_steps = (self.idle_s / dt).round() as i64;

        let mut s = self.pit_exit_fraction * length;
        let mut lap: i64 = 1;
        let mut pace_kmh = car.speed_kmh;
        let mut prev_kmh = 0.0;
        let mut step: i64 = 0;

        loop {
            let moving = step >= idle_steps;
            let target_kmh = if moving { self.speed_at(s, pace_kmh) } else { 0.0 };
            // launch from the pit over a few seconds
            let speed_kmh = if moving && prev_kmh < target_kmh {
                (prev_kmh + 25.0 * dt).min(target_kmh)
            } else {
                target_kmh
            };
            let mut lapdist = s;
            let elapsed_s = step as f64 * dt;
            if let Some(g) = self.glitches.iter().find(|g| {
                g.vehicle_id == car.vehicle_id && ((g.at_s - elapsed_s).abs() < dt / 2.0)
            }) {
                lapdist = g.lapdist;
            }

            let (mut x, mut y) = self.shape.position(s);
            if self.gps_noise_m > 0.0 {
                x += rng.gen_range(-1.0..=1.0) * self.gps_noise_m;
                y += rng.gen_range(-1.0..=1.0) * self.gps_noise_m;
            }
            let (lat, lon) = self.to_lat_lon(x, y);
            let timestamp_ms = t0 + step * self.sample_ms;

            let mut push = |channel: &str, value: f64| {
                out.push(TelemetryEvent {
                    vehicle_id: car.vehicle_id.clone(),
                    timestamp_ms,
                    channel: channel.to_string(),
                    value,
                    lap: Some(lap),
                });
            };
            push("VBOX_Lat_Min", lat);
            push("VBOX_Long_Minutes", lon);
            push("Laptrigger_lapdist_dls", lapdist);
            push("speed", speed_kmh);
            if self.optional_channels {
                let v = speed_kmh / 3.6;
                let accel = (speed_kmh - prev_kmh) / 3.6 / dt;
                let kappa = if moving { self.shape.curvature(s) } else { 0.0 };
                let braking = accel < -0.5;
                push("gear", (1.0 + (speed_kmh / 40.0).floor()).clamp(1.0, 6.0));
                push("nmot", 1500.0 + speed_kmh * 30.0);
                push("aps", if braking || !moving { 0.0 } else { 100.0 });
                push("pbrake_f", if braking { (-accel * 4.0).min(60.0) } else { 0.0 });
                push("pbrake_r", if braking { (-accel * 2.5).min(40.0) } else { 0.0 });
                push("Steering_Angle", (2.6 * kappa).atan().to_degrees() * 14.0);
                push("accx_can", accel / 9.81);
                push("accy_can", v * v * kappa / 9.81);
            }

            prev_kmh = speed_kmh;
            step += 1;
            if !moving {
                continue;
            }
            s += speed_kmh / 3.6 * dt;
            if s >= length {
                s -= length;
                lap += 1;
                if lap as usize > car.laps + 1 {
                    break;
                }
                pace_kmh = car.speed_kmh * (1.0 + rng.gen_range(-1.0..=1.0) * self.lap_jitter);
            }
        }
    }

    /// Generate every event, ordered by car then time
    pub fn build_events(&self) -> Vec<TelemetryEvent> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut events = Vec::new();
        for (i, car) in self.cars.iter().enumerate() {
            if car.speed_kmh > 0.0 {
                self.car_events(i, car, &mut rng, &mut events);
            }
        }
        events
    }

    /// Generate the session as an event table
    pub fn build_table(&self) -> EventTable {
        self.build_events().into_iter().collect()
    }

    /// Write the session as a long-format telemetry CSV
    pub fn write_csv(&self, path: &Path) -> Result<usize> {
        let events = self.build_events();
        let mut writer = csv::Writer::from_path(path)?;
        for e in &events {
            let timestamp = DateTime::from_timestamp_millis(e.timestamp_ms)
                .ok_or_else(|| PipelineError::BadTimestamp(e.timestamp_ms.to_string()))?
                .to_rfc3339_opts(SecondsFormat::Millis, true);
            writer.serialize(CsvRow {
                timestamp,
                vehicle_id: &e.vehicle_id,
                lap: e.lap,
                telemetry_name: &e.channel,
                telemetry_value: e.value,
            })?;
        }
        writer.flush()?;
        info!(
            "Wrote {} synthetic events for {} cars to {}",
            events.len(),
            self.cars.len(),
            path.display()
        );
        Ok(events.len())
    }
}
