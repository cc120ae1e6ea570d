//! Telemetry events
//!
//! Long-format telemetry (one row per vehicle, timestamp and channel) and the
//! per-vehicle wide signal tables extracted from it.

mod channels;
mod extract;
mod reader;

pub use channels::{Channel, EXPECTED_CHANNELS};
pub use extract::{extract_signals, SignalTable};
pub use reader::{parse_timestamp, read_events, read_events_from, validate, ValidationReport};

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One raw telemetry reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Channel name as logged
    pub channel: String,
    /// Reading
    pub value: f64,
    /// Lap number reported with the reading
    pub lap: Option<i64>,
}

/// A reading without its vehicle and channel keys
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Reading
    pub value: f64,
    /// Lap number reported with the reading
    pub lap: Option<i64>,
}

/// Readings of one vehicle grouped by channel, in file order
#[derive(Debug, Clone, Default)]
pub struct VehicleEvents {
    channels: BTreeMap<String, Vec<Sample>>,
}

impl VehicleEvents {
    /// Samples of a channel by exact name
    pub fn channel(&self, name: &str) -> Option<&[Sample]> {
        self.channels
            .get(name)
            .map(Vec::as_slice)
            .filter(|s| !s.is_empty())
    }

    /// Channel names with at least one sample
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Total number of readings
    pub fn len(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }

    /// True when the vehicle has no readings
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All telemetry of one session
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    vehicles: BTreeMap<String, VehicleEvents>,
    channels: BTreeSet<String>,
    rows: usize,
}

impl EventTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event
    pub fn push(&mut self, event: TelemetryEvent) {
        self.channels.insert(event.channel.clone());
        self.vehicles
            .entry(event.vehicle_id)
            .or_default()
            .channels
            .entry(event.channel)
            .or_default()
            .push(Sample {
                timestamp_ms: event.timestamp_ms,
                value: event.value,
                lap: event.lap,
            });
        self.rows += 1;
    }

    /// Vehicle ids in sorted order
    pub fn vehicle_ids(&self) -> Vec<String> {
        self.vehicles.keys().cloned().collect()
    }

    /// Events of one vehicle
    pub fn vehicle(&self, vehicle_id: &str) -> Option<&VehicleEvents> {
        self.vehicles.get(vehicle_id)
    }

    /// Every channel name seen in the session
    pub fn channel_names(&self) -> &BTreeSet<String> {
        &self.channels
    }

    /// Number of raw events
    pub fn len(&self) -> usize {
        self.rows
    }

    /// True when no events were loaded
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

impl FromIterator<TelemetryEvent> for EventTable {
    fn from_iter<I: IntoIterator<Item = TelemetryEvent>>(iter: I) -> Self {
        let mut table = EventTable::new();
        for event in iter {
            table.push(event);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(vehicle: &str, channel: &str, t: i64, value: f64) -> TelemetryEvent {
        TelemetryEvent {
            vehicle_id: vehicle.to_string(),
            timestamp_ms: t,
            channel: channel.to_string(),
            value,
            lap: Some(2),
        }
    }

    #[test]
    fn test_event_table_groups_by_vehicle_and_channel() {
        let table: EventTable = vec![
            event("B", "speed", 0, 10.0),
            event("A", "speed", 0, 11.0),
            event("A", "speed", 100, 12.0),
            event("A", "gear", 0, 3.0),
        ]
        .into_iter()
        .collect();

        assert_eq!(table.len(), 4);
        assert_eq!(table.vehicle_ids(), vec!["A".to_string(), "B".to_string()]);
        let a = table.vehicle("A").unwrap();
        assert_eq!(a.channel("speed").unwrap().len(), 2);
        assert_eq!(a.len(), 3);
        assert!(a.channel("lat").is_none());
        assert_eq!(table.channel_names().len(), 2);
    }
}
