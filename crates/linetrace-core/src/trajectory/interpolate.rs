//! Uniform resampling of aligned signals

use tracing::debug;

use super::{Trajectory, TrajectoryRow};
use crate::align::AlignedSignals;
use crate::config::InterpolationConfig;
use crate::error::{PipelineError, Result};
use crate::filters::{interp_extrapolate, interp_nearest};

/// Repair a resampled lapdist trace.
///
/// A true reset drops by more than `reset_drop` and lands below `reset_ceiling`.
/// Inside each segment between true resets any decrease is clamped to the previous
/// value and any increase is limited to `max_slope * dt_s`.
pub fn repair_lapdist(lapdist: &[f64], dt_s: f64, config: &InterpolationConfig) -> Vec<f64> {
    let n = lapdist.len();
    let mut starts: Vec<usize> = vec![0];
    starts.extend((1..n).filter(|&i| {
        lapdist[i] < lapdist[i - 1] - config.reset_drop && lapdist[i] < config.reset_ceiling
    }));

    let max_step = config.max_slope * dt_s;
    let mut out = lapdist.to_vec();
    for (k, &start) in starts.iter().enumerate() {
        let end = starts.get(k + 1).copied().unwrap_or(n);
        for i in (start + 1)..end {
            let prev = out[i - 1];
            out[i] = out[i].max(prev).min(prev + max_step);
        }
    }
    out
}

/// Resample aligned signals onto a `dt_ms` grid starting at session time 0.
///
/// Continuous channels use linear interpolation with extrapolation, discrete
/// channels (gear, steering, lap) take the nearest sample. Fails when fewer than two
/// distinct timestamps remain or the grid would have fewer than two rows.
pub fn interpolate_trajectory(
    aligned: &AlignedSignals,
    config: &InterpolationConfig,
) -> Result<Trajectory> {
    let s = &aligned.signals;
    let insufficient = |rows: usize| PipelineError::InsufficientData {
        vehicle: s.vehicle_id.clone(),
        rows,
        required: 2,
    };

    let mut order: Vec<usize> = (0..aligned.rel_time_s.len()).collect();
    order.sort_by(|&a, &b| aligned.rel_time_s[a].total_cmp(&aligned.rel_time_s[b]));
    order.dedup_by(|b, a| aligned.rel_time_s[*a] == aligned.rel_time_s[*b]);
    if order.len() < 2 {
        return Err(insufficient(order.len()));
    }

    let pick = |column: &[f64]| -> Vec<f64> { order.iter().map(|&i| column[i]).collect() };
    let t = pick(&aligned.rel_time_s);
    let t_last_ms = (t[t.len() - 1] * 1000.0).round() as i64;
    let dt_ms = config.dt_ms.max(1) as i64;
    let n_grid = ((t_last_ms + dt_ms - 1) / dt_ms).max(0) as usize;
    if n_grid < 2 {
        return Err(insufficient(n_grid));
    }
    let grid: Vec<f64> = (0..n_grid)
        .map(|k| (k as i64 * dt_ms) as f64 / 1000.0)
        .collect();

    let linear = |column: &[f64]| -> Vec<f64> {
        let fp = pick(column);
        grid.iter().map(|&g| interp_extrapolate(g, &t, &fp)).collect()
    };
    let nearest = |column: &[f64]| -> Vec<f64> {
        let fp = pick(column);
        grid.iter().map(|&g| interp_nearest(g, &t, &fp)).collect()
    };

    let x = linear(&s.x);
    let y = linear(&s.y);
    let speed = linear(&s.speed);
    let brake_front = linear(&s.brake_front);
    let brake_rear = linear(&s.brake_rear);
    let accx = linear(&s.accx);
    let accy = linear(&s.accy);
    let gear = nearest(&s.gear);
    let steering = nearest(&s.steering_deg);
    let mut lap = nearest(&s.lap);

    let min_lap = lap.iter().copied().fold(f64::INFINITY, f64::min);
    if min_lap.is_finite() && min_lap > 1.0 {
        for l in &mut lap {
            *l -= min_lap - 1.0;
        }
    }

    let dt_s = dt_ms as f64 / 1000.0;
    let lapdist = repair_lapdist(&linear(&s.lapdist), dt_s, config);

    let rows = (0..n_grid)
        .map(|i| {
            let (dx, dy) = if i + 1 < n_grid {
                (x[i + 1] - x[i], y[i + 1] - y[i])
            } else {
                (0.0, 0.0)
            };
            let accel = accx[i].hypot(accy[i]).clamp(0.0, config.accel_clip);
            TrajectoryRow {
                x: x[i],
                y: y[i],
                speed: speed[i],
                lapdist: lapdist[i],
                brake_front: brake_front[i],
                brake_rear: brake_rear[i],
                gear: gear[i],
                steering_deg: steering[i],
                heading_rad: dy.atan2(dx),
                accel_norm: if config.accel_clip > 0.0 { accel / config.accel_clip } else { 0.0 },
                lap: lap[i],
            }
        })
        .collect::<Vec<_>>();

    debug!("Vehicle {}: {} trajectory rows", s.vehicle_id, rows.len());
    Ok(Trajectory::new(s.vehicle_id.clone(), config.dt_ms, rows))
}
