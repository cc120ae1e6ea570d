//! Telemetry CSV reader and input validation

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::channels::{Channel, EXPECTED_CHANNELS};
use super::{EventTable, TelemetryEvent};
use crate::error::{PipelineError, Result};

const VEHICLE_COLUMNS: &[&str] = &["original_vehicle_id", "vehicle_id"];

/// Parse a timestamp cell into milliseconds since the Unix epoch.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]` (with a space or `T`, read as
/// UTC) and plain numeric seconds.
pub fn parse_timestamp(raw: &str) -> Result<i64> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    match s.parse::<f64>() {
        Ok(secs) if secs.is_finite() => Ok((secs * 1000.0).round() as i64),
        _ => Err(PipelineError::BadTimestamp(raw.to_string())),
    }
}

fn parse_lap(raw: &str) -> Option<i64> {
    let s = raw.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))
}

fn column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

fn required_column(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    column(headers, name).ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
}

/// Read long-format telemetry from a CSV file
pub fn read_events<P: AsRef<Path>>(path: P) -> Result<EventTable> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let table = read_events_from(reader)?;
    info!(
        "Loaded {} telemetry events for {} vehicles from {}",
        table.len(),
        table.vehicle_ids().len(),
        path.display()
    );
    Ok(table)
}

/// Read long-format telemetry from any CSV source
pub fn read_events_from<R: Read>(mut reader: csv::Reader<R>) -> Result<EventTable> {
    let headers = reader.headers()?.clone();
    let ts_col = required_column(&headers, "timestamp")?;
    let vehicle_col = VEHICLE_COLUMNS
        .iter()
        .find_map(|name| column(&headers, name))
        .ok_or_else(|| PipelineError::MissingColumn("vehicle_id".to_string()))?;
    let name_col = required_column(&headers, "telemetry_name")?;
    let value_col = required_column(&headers, "telemetry_value")?;
    let lap_col = column(&headers, "lap");

    let mut table = EventTable::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("");

        let value = match field(value_col).trim().parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => {
                skipped += 1;
                continue;
            }
        };
        let timestamp_ms = match parse_timestamp(field(ts_col)) {
            Ok(t) => t,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        let vehicle_id = field(vehicle_col).trim();
        if vehicle_id.is_empty() {
            skipped += 1;
            continue;
        }

        table.push(TelemetryEvent {
            vehicle_id: vehicle_id.to_string(),
            timestamp_ms,
            channel: field(name_col).trim().to_string(),
            value,
            lap: lap_col.and_then(|i| parse_lap(field(i))),
        });
    }
    if skipped > 0 {
        warn!("Skipped {} telemetry rows with missing or invalid fields", skipped);
    }
    Ok(table)
}

/// Outcome of a successful input check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Number of distinct vehicles
    pub vehicle_count: usize,
    /// Number of raw events
    pub event_count: usize,
    /// Expected export channels that are absent
    pub missing_channels: Vec<String>,
}

/// Check that a session can be processed at all.
///
/// Requires at least one vehicle and at least one alias of every core channel
/// (latitude, longitude, lapdist, speed). Missing optional channels are reported
/// but accepted.
pub fn validate(table: &EventTable) -> Result<ValidationReport> {
    let vehicle_count = table.vehicle_ids().len();
    if vehicle_count == 0 {
        return Err(PipelineError::Validation(
            "no vehicles found in telemetry file".to_string(),
        ));
    }

    let names = table.channel_names();
    let missing_core: Vec<&str> = Channel::CORE
        .iter()
        .filter(|c| !c.present_in(names))
        .map(|c| c.label())
        .collect();
    if !missing_core.is_empty() {
        return Err(PipelineError::Validation(format!(
            "missing required channels: {}",
            missing_core.join(", ")
        )));
    }

    let missing_channels: Vec<String> = EXPECTED_CHANNELS
        .iter()
        .filter(|name| !names.contains(**name))
        .map(|name| name.to_string())
        .collect();
    if !missing_channels.is_empty() {
        info!("Optional channels not present: {}", missing_channels.join(", "));
    }

    Ok(ValidationReport {
        vehicle_count,
        event_count: table.len(),
        missing_channels,
    })
}
