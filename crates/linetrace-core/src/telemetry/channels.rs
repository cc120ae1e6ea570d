//! Channel name aliases
//!
//! Loggers name the same signal differently. Each logical channel lists its
//! accepted names in priority order; the first name with data wins.

use super::{Sample, VehicleEvents};

/// Channels present in a complete session export
pub const EXPECTED_CHANNELS: &[&str] = &[
    "Laptrigger_lapdist_dls",
    "Steering_Angle",
    "VBOX_Lat_Min",
    "VBOX_Long_Minutes",
    "accx_can",
    "accy_can",
    "aps",
    "gear",
    "nmot",
    "pbrake_f",
    "pbrake_r",
    "speed",
];

/// Logical telemetry channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// GPS latitude in degrees
    Lat,
    /// GPS longitude in degrees
    Lon,
    /// Distance since lap start
    LapDist,
    /// Vehicle speed
    Speed,
    /// Front brake pressure
    BrakeFront,
    /// Rear brake pressure
    BrakeRear,
    /// Single brake channel used when no front/rear split exists
    Brake,
    /// Selected gear
    Gear,
    /// Steering wheel angle in degrees
    Steering,
    /// Longitudinal acceleration
    AccX,
    /// Lateral acceleration
    AccY,
}

impl Channel {
    /// Channels every vehicle must provide
    pub const CORE: [Channel; 4] = [Channel::Lat, Channel::Lon, Channel::LapDist, Channel::Speed];

    /// Accepted names in priority order
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Channel::Lat => &["VBOX_Lat_Min", "lat", "latitude", "gps_lat"],
            Channel::Lon => &["VBOX_Long_Minutes", "lon", "long", "longitude", "gps_lon"],
            Channel::LapDist => &["Laptrigger_lapdist_dls", "lapdist", "lap_distance"],
            Channel::Speed => &["speed", "Speed", "vehicle_speed"],
            Channel::BrakeFront => &["pbrake_f", "brake_front", "BrakeF"],
            Channel::BrakeRear => &["pbrake_r", "brake_rear", "BrakeR"],
            Channel::Brake => &["brake", "Brake"],
            Channel::Gear => &["gear", "Gear", "gear_position", "GearPosition"],
            Channel::Steering => &["Steering_Angle", "steering", "Steering", "steering_angle"],
            Channel::AccX => &["accx_can", "acc_x", "accel_x"],
            Channel::AccY => &["accy_can", "acc_y", "accel_y"],
        }
    }

    /// Short name used in logs and errors
    pub fn label(&self) -> &'static str {
        match self {
            Channel::Lat => "lat",
            Channel::Lon => "lon",
            Channel::LapDist => "lapdist",
            Channel::Speed => "speed",
            Channel::BrakeFront => "brake_front",
            Channel::BrakeRear => "brake_rear",
            Channel::Brake => "brake",
            Channel::Gear => "gear",
            Channel::Steering => "steering",
            Channel::AccX => "accx",
            Channel::AccY => "accy",
        }
    }

    /// True when the channel is a GPS coordinate
    pub fn is_gps(&self) -> bool {
        matches!(self, Channel::Lat | Channel::Lon)
    }

    /// Samples of the first alias that has data
    pub fn resolve<'a>(&self, events: &'a VehicleEvents) -> Option<&'a [Sample]> {
        self.aliases().iter().find_map(|name| events.channel(name))
    }

    /// True when any alias appears in the given channel names
    pub fn present_in<'a, I>(&self, names: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        let aliases = self.aliases();
        names.into_iter().any(|n| aliases.contains(&n.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{EventTable, TelemetryEvent};

    #[test]
    fn test_resolve_prefers_first_alias() {
        let mut table = EventTable::new();
        for (name, value) in [("lat", 1.0), ("VBOX_Lat_Min", 2.0)] {
            table.push(TelemetryEvent {
                vehicle_id: "car".to_string(),
                timestamp_ms: 0,
                channel: name.to_string(),
                value,
                lap: None,
            });
        }
        let events = table.vehicle("car").unwrap();
        assert_eq!(Channel::Lat.resolve(events).unwrap()[0].value, 2.0);
        assert!(Channel::Lon.resolve(events).is_none());
    }

    #[test]
    fn test_present_in() {
        let names = vec!["Speed".to_string(), "foo".to_string()];
        assert!(Channel::Speed.present_in(&names));
        assert!(!Channel::LapDist.present_in(&names));
    }
}
