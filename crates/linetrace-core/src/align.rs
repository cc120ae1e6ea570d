//! Session start alignment
//!
//! Puts every vehicle on a common clock whose zero is the first real lap start
//! after the car is moving.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AlignmentConfig;
use crate::error::{PipelineError, Result};
use crate::telemetry::SignalTable;

/// How the session start was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartDetection {
    /// First lap reset at or after sustained motion began
    MotionWindow,
    /// First lap reset taken while the car was moving
    MovingReset,
    /// First lap reset of any kind
    FirstReset,
    /// No reset in the log; first timestamp
    FirstTimestamp,
}

/// Signal table with its session-relative clock
#[derive(Debug, Clone)]
pub struct AlignedSignals {
    /// Rows at or after the session start
    pub signals: SignalTable,
    /// Seconds since the session start, one per row
    pub rel_time_s: Vec<f64>,
    /// Session start in epoch milliseconds
    pub start_ms: i64,
    /// Rule that picked the start
    pub detection: StartDetection,
}

/// Earliest timestamp that opens a window of `window_s` seconds in which every
/// sample is moving
fn first_motion_window(timestamps: &[i64], speed: &[f64], config: &AlignmentConfig) -> Option<i64> {
    let window_ms = (config.window_s * 1000.0).round() as i64;
    let mut stationary_before = Vec::with_capacity(timestamps.len() + 1);
    stationary_before.push(0usize);
    for &v in speed {
        let last = *stationary_before.last().unwrap_or(&0);
        stationary_before.push(last + usize::from(v <= config.motion_speed));
    }

    (0..timestamps.len()).find_map(|i| {
        let end = timestamps.partition_point(|&t| t < timestamps[i] + window_ms);
        (stationary_before[end] == stationary_before[i]).then_some(timestamps[i])
    })
}

/// Pick the session start for one vehicle
pub fn detect_session_start(
    timestamps: &[i64],
    lapdist: &[f64],
    speed: &[f64],
    config: &AlignmentConfig,
) -> Option<(i64, StartDetection)> {
    let first = *timestamps.first()?;
    let resets: Vec<usize> = (1..lapdist.len())
        .filter(|&i| lapdist[i] - lapdist[i - 1] < -config.reset_drop)
        .collect();
    if resets.is_empty() {
        return Some((first, StartDetection::FirstTimestamp));
    }

    if let Some(window_start) = first_motion_window(timestamps, speed, config) {
        if let Some(&i) = resets.iter().find(|&&i| timestamps[i] >= window_start) {
            return Some((timestamps[i], StartDetection::MotionWindow));
        }
    }
    if let Some(&i) = resets.iter().find(|&&i| speed[i] > config.motion_speed) {
        return Some((timestamps[i], StartDetection::MovingReset));
    }
    Some((timestamps[resets[0]], StartDetection::FirstReset))
}

/// Shift a vehicle's clock to its session start and drop earlier rows
pub fn align_session(mut signals: SignalTable, config: &AlignmentConfig) -> Result<AlignedSignals> {
    let (start_ms, detection) = detect_session_start(
        &signals.timestamp_ms,
        &signals.lapdist,
        &signals.speed,
        config,
    )
    .ok_or_else(|| PipelineError::InsufficientData {
        vehicle: signals.vehicle_id.clone(),
        rows: 0,
        required: config.min_rows,
    })?;

    if detection != StartDetection::MotionWindow {
        warn!(
            "Vehicle {}: no lap reset after sustained motion, start picked by {:?}",
            signals.vehicle_id, detection
        );
    }

    let keep: Vec<bool> = signals.timestamp_ms.iter().map(|&t| t >= start_ms).collect();
    signals.retain_rows(&keep);
    let rel_time_s: Vec<f64> = signals
        .timestamp_ms
        .iter()
        .map(|&t| (t - start_ms) as f64 / 1000.0)
        .collect();

    debug!(
        "Vehicle {}: session start {} ms, {} rows kept",
        signals.vehicle_id,
        start_ms,
        rel_time_s.len()
    );
    if rel_time_s.len() < config.min_rows {
        return Err(PipelineError::InsufficientData {
            vehicle: signals.vehicle_id.clone(),
            rows: rel_time_s.len(),
            required: config.min_rows,
        });
    }

    Ok(AlignedSignals {
        signals,
        rel_time_s,
        start_ms,
        detection,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(n: usize) -> Vec<i64> {
        (0..n as i64).map(|i| i * 100).collect()
    }

    #[test]
    fn test_reset_after_motion_window() {
        let t = ts(100);
        let speed: Vec<f64> = (0..100).map(|i| if i < 10 { 0.0 } else { 60.0 }).collect();
        let mut lapdist: Vec<f64> = (0..100).map(|i| 3000.0 + i as f64).collect();
        // reset while stationary, then a real one at sample 60
        lapdist[5] = 0.0;
        for (i, ld) in lapdist.iter_mut().enumerate().skip(60) {
            *ld = (i - 60) as f64 * 5.0;
        }
        for (i, ld) in lapdist.iter_mut().enumerate().take(60).skip(6) {
            *ld = 2000.0 + i as f64;
        }
        let (start, how) =
            detect_session_start(&t, &lapdist, &speed, &AlignmentConfig::default()).unwrap();
        assert_eq!(how, StartDetection::MotionWindow);
        assert_eq!(start, 6000);
    }

    #[test]
    fn test_reset_before_motion_falls_back_to_moving_reset() {
        let t = ts(100);
        // moving briefly at the reset, stationary again, sustained motion later
        let speed: Vec<f64> = (0..100)
            .map(|i| match i {
                8..=12 => 30.0,
                50.. => 60.0,
                _ => 0.0,
            })
            .collect();
        let lapdist: Vec<f64> = (0..100)
            .map(|i| if i < 10 { 3000.0 + i as f64 } else { i as f64 })
            .collect();
        let (start, how) =
            detect_session_start(&t, &lapdist, &speed, &AlignmentConfig::default()).unwrap();
        assert_eq!(how, StartDetection::MovingReset);
        assert_eq!(start, 1000);
    }

    #[test]
    fn test_no_reset_uses_first_timestamp() {
        let t = ts(10);
        let lapdist: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let (start, how) =
            detect_session_start(&t, &lapdist, &[0.0; 10], &AlignmentConfig::default()).unwrap();
        assert_eq!((start, how), (0, StartDetection::FirstTimestamp));
    }

    #[test]
    fn test_align_drops_rows_before_start() {
        let n = 300;
        let signals = SignalTable {
            vehicle_id: "car".to_string(),
            timestamp_ms: ts(n),
            lat: vec![0.0; n],
            lon: vec![0.0; n],
            lapdist: (0..n).map(|i| if i < 50 { 5000.0 } else { i as f64 }).collect(),
            speed: vec![80.0; n],
            lap: vec![1.0; n],
            brake_front: vec![0.0; n],
            brake_rear: vec![0.0; n],
            gear: vec![3.0; n],
            steering_deg: vec![0.0; n],
            accx: vec![0.0; n],
            accy: vec![0.0; n],
            x: vec![0.0; n],
            y: vec![0.0; n],
        };
        let aligned = align_session(signals, &AlignmentConfig::default()).unwrap();
        assert_eq!(aligned.start_ms, 5000);
        assert_eq!(aligned.rel_time_s.len(), 250);
        assert_eq!(aligned.rel_time_s[0], 0.0);
        assert_eq!(aligned.signals.len(), 250);
        assert_eq!(aligned.signals.lapdist[0], 50.0);
    }
}
