//! Signal extraction
//!
//! Pivots one vehicle's long-format events into a wide table keyed by rounded
//! timestamp.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::channels::Channel;
use super::{EventTable, Sample};
use crate::config::SignalConfig;
use crate::error::{PipelineError, Result};
use crate::filters::median;
use crate::geo::LocalProjection;

/// Wide per-vehicle signal table, one row per rounded timestamp
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalTable {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// Rounded timestamp in epoch milliseconds, strictly increasing
    pub timestamp_ms: Vec<i64>,
    /// Latitude in degrees
    pub lat: Vec<f64>,
    /// Longitude in degrees
    pub lon: Vec<f64>,
    /// Distance since lap start
    pub lapdist: Vec<f64>,
    /// Vehicle speed
    pub speed: Vec<f64>,
    /// Lap number from the speed channel
    pub lap: Vec<f64>,
    /// Front brake, normalized to [0, 1]
    pub brake_front: Vec<f64>,
    /// Rear brake, normalized to [0, 1]
    pub brake_rear: Vec<f64>,
    /// Gear
    pub gear: Vec<f64>,
    /// Steering angle in degrees
    pub steering_deg: Vec<f64>,
    /// Longitudinal acceleration
    pub accx: Vec<f64>,
    /// Lateral acceleration
    pub accy: Vec<f64>,
    /// Projected east offset in metres (empty until projected)
    pub x: Vec<f64>,
    /// Projected north offset in metres (empty until projected)
    pub y: Vec<f64>,
}

impl SignalTable {
    /// Number of rows
    pub fn len(&self) -> usize {
        self.timestamp_ms.len()
    }

    /// True when the table has no rows
    pub fn is_empty(&self) -> bool {
        self.timestamp_ms.is_empty()
    }

    /// Fill `x`/`y` with the equirectangular projection about this vehicle's mean
    /// position and return the projection used
    pub fn project_local(&mut self) -> Option<LocalProjection> {
        let projection = LocalProjection::from_mean(&self.lat, &self.lon)?;
        let (x, y) = projection.project_all(&self.lat, &self.lon);
        self.x = x;
        self.y = y;
        Some(projection)
    }

    /// Keep only the rows where `keep` is true
    pub fn retain_rows(&mut self, keep: &[bool]) {
        fn filter<T: Copy>(column: &mut Vec<T>, keep: &[bool]) {
            if column.len() == keep.len() {
                *column = column
                    .iter()
                    .zip(keep)
                    .filter(|(_, k)| **k)
                    .map(|(v, _)| *v)
                    .collect();
            }
        }
        filter(&mut self.timestamp_ms, keep);
        for column in [
            &mut self.lat,
            &mut self.lon,
            &mut self.lapdist,
            &mut self.speed,
            &mut self.lap,
            &mut self.brake_front,
            &mut self.brake_rear,
            &mut self.gear,
            &mut self.steering_deg,
            &mut self.accx,
            &mut self.accy,
            &mut self.x,
            &mut self.y,
        ] {
            filter(column, keep);
        }
    }
}

fn round_ts(t: i64, step: i64) -> i64 {
    if step <= 1 {
        return t;
    }
    ((t as f64 / step as f64).round() as i64) * step
}

/// Collapse samples onto rounded timestamps. GPS channels take the median of the
/// duplicates; everything else keeps the first reading.
fn aggregate(
    samples: &[Sample],
    channel: Channel,
    config: &SignalConfig,
    vehicle_id: &str,
) -> BTreeMap<i64, (f64, Option<i64>)> {
    let mut groups: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    let mut first: BTreeMap<i64, (f64, Option<i64>)> = BTreeMap::new();
    for s in samples {
        let t = round_ts(s.timestamp_ms, config.round_ms);
        if channel.is_gps() {
            groups.entry(t).or_default().push(s.value);
        }
        first.entry(t).or_insert((s.value, s.lap));
    }

    let duplicates = samples.len() - first.len();
    let ratio = duplicates as f64 / samples.len().max(1) as f64;
    if ratio > config.duplicate_warn_ratio {
        warn!(
            "Vehicle {}: {:.1}% duplicate {} timestamps after rounding",
            vehicle_id,
            ratio * 100.0,
            channel.label()
        );
    }

    if channel.is_gps() {
        for (t, values) in groups {
            if let Some(entry) = first.get_mut(&t) {
                entry.0 = median(&values);
            }
        }
    }
    first
}

fn required<'a>(
    table: &'a EventTable,
    vehicle_id: &str,
    channel: Channel,
) -> Result<&'a [Sample]> {
    table
        .vehicle(vehicle_id)
        .and_then(|events| channel.resolve(events))
        .ok_or_else(|| PipelineError::MissingChannel {
            vehicle: vehicle_id.to_string(),
            channel: channel.label().to_string(),
        })
}

fn normalize_by_max(values: &mut [f64]) {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max > 0.0 {
        for v in values.iter_mut() {
            *v /= max;
        }
    }
}

/// Build the wide signal table for one vehicle.
///
/// Core channels (lat, lon, lapdist, speed) are inner-joined on the rounded
/// timestamp, optional channels are left-joined with zero fill. The lap column comes
/// from the lap numbers reported with the speed readings.
pub fn extract_signals(
    table: &EventTable,
    vehicle_id: &str,
    config: &SignalConfig,
) -> Result<SignalTable> {
    let lat = aggregate(required(table, vehicle_id, Channel::Lat)?, Channel::Lat, config, vehicle_id);
    let lon = aggregate(required(table, vehicle_id, Channel::Lon)?, Channel::Lon, config, vehicle_id);
    let lapdist = aggregate(
        required(table, vehicle_id, Channel::LapDist)?,
        Channel::LapDist,
        config,
        vehicle_id,
    );
    let speed = aggregate(
        required(table, vehicle_id, Channel::Speed)?,
        Channel::Speed,
        config,
        vehicle_id,
    );

    let events = table.vehicle(vehicle_id);
    let optional = |channel: Channel| {
        events
            .and_then(|e| channel.resolve(e))
            .map(|samples| aggregate(samples, channel, config, vehicle_id))
    };
    let mut brake_front = optional(Channel::BrakeFront);
    let mut brake_rear = optional(Channel::BrakeRear);
    if brake_front.is_none() && brake_rear.is_none() {
        let generic = optional(Channel::Brake);
        brake_front = generic.clone();
        brake_rear = generic;
    }
    let gear = optional(Channel::Gear);
    let steering = optional(Channel::Steering);
    let accx = optional(Channel::AccX);
    let accy = optional(Channel::AccY);

    let lookup = |map: &Option<BTreeMap<i64, (f64, Option<i64>)>>, t: &i64| {
        map.as_ref()
            .and_then(|m| m.get(t))
            .map_or(0.0, |(v, _)| *v)
    };

    let mut out = SignalTable {
        vehicle_id: vehicle_id.to_string(),
        ..Default::default()
    };
    for (t, (lat_v, _)) in &lat {
        let (Some((lon_v, _)), Some((ld_v, _)), Some((speed_v, lap))) =
            (lon.get(t), lapdist.get(t), speed.get(t))
        else {
            continue;
        };
        out.timestamp_ms.push(*t);
        out.lat.push(*lat_v);
        out.lon.push(*lon_v);
        out.lapdist.push(*ld_v);
        out.speed.push(*speed_v);
        out.lap.push(lap.unwrap_or(1) as f64);
        out.brake_front.push(lookup(&brake_front, t));
        out.brake_rear.push(lookup(&brake_rear, t));
        out.gear.push(lookup(&gear, t));
        out.steering_deg.push(lookup(&steering, t));
        out.accx.push(lookup(&accx, t));
        out.accy.push(lookup(&accy, t));
    }

    normalize_by_max(&mut out.brake_front);
    normalize_by_max(&mut out.brake_rear);

    debug!("Vehicle {}: {} joined signal rows", vehicle_id, out.len());
    if out.len() < config.min_rows {
        return Err(PipelineError::InsufficientData {
            vehicle: vehicle_id.to_string(),
            rows: out.len(),
            required: config.min_rows,
        });
    }
    Ok(out)
}
