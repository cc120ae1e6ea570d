//! Batch pipeline
//!
//! Turns one raw telemetry CSV into a processed dataset directory: per-vehicle
//! trajectories, the global and per-car racing lines, the metadata document, the
//! canonical line with its profiles and sectors, and the delta-speed trails.
//!
//! Vehicles that fail any step are skipped. The job only fails when the input cannot
//! be read or validated, or when no vehicle survives.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::align::align_session;
use crate::canonical::{build_canonical, write_canonical, ProcessingStats};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::output::{
    car_line_path, trajectory_path, Metadata, RACING_LINES_DIR, RACING_LINE_FILE, TRAJECTORY_DIR,
};
use crate::progress::{JobCounter, ProgressSink};
use crate::racing_line::{build_car_line, build_global_line, write_line_csv};
use crate::telemetry::{extract_signals, read_events, validate, EventTable};
use crate::trail::generate_all_trails;
use crate::trajectory::{interpolate_trajectory, write_trajectory, Trajectory};

/// What a pipeline run produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSummary {
    /// Output directory
    pub output_dir: PathBuf,
    /// Vehicles with a trajectory, sorted
    pub vehicles: Vec<String>,
    /// Vehicles skipped with the reason
    pub skipped: Vec<(String, String)>,
    /// Longest trajectory
    pub total_duration_ms: u64,
    /// Points in the global racing line, 0 when it could not be built
    pub racing_line_points: usize,
    /// Gap between the global line's ends
    pub loop_closure_m: Option<f64>,
    /// Vehicles with a per-car racing line
    pub car_lines: usize,
    /// Canonical run counters, absent when the canonical step failed
    pub canonical: Option<ProcessingStats>,
    /// Trails written
    pub trails: usize,
}

fn process_vehicle(
    table: &EventTable,
    vehicle_id: &str,
    config: &PipelineConfig,
    counter: &JobCounter<'_>,
    base_job: usize,
) -> Result<Trajectory> {
    counter.step(&format!("{vehicle_id} - Extracting signals"), base_job + 1);
    let mut signals = extract_signals(table, vehicle_id, &config.signals)?;

    counter.step(&format!("{vehicle_id} - Converting GPS coordinates"), base_job + 2);
    if signals.project_local().is_none() {
        return Err(PipelineError::InsufficientData {
            vehicle: vehicle_id.to_string(),
            rows: signals.len(),
            required: config.signals.min_rows,
        });
    }

    counter.step(&format!("{vehicle_id} - Detecting race start"), base_job + 3);
    let aligned = align_session(signals, &config.alignment)?;

    counter.step(&format!("{vehicle_id} - Interpolating trajectory"), base_job + 4);
    interpolate_trajectory(&aligned, &config.interpolation)
}

/// Run the whole batch job from `input` into `output`
pub fn run_pipeline(
    input: &Path,
    output: &Path,
    config: &PipelineConfig,
    progress: &dyn ProgressSink,
) -> Result<PipelineSummary> {
    if !input.exists() {
        return Err(PipelineError::Validation(format!(
            "File not found: {}",
            input.display()
        )));
    }
    progress.report("Loading telemetry data...", 0.0);
    let table = read_events(input)?;
    let report = validate(&table)?;
    info!(
        "Loaded {} events for {} vehicles from {}",
        report.event_count,
        report.vehicle_count,
        input.display()
    );

    let vehicle_ids = table.vehicle_ids();
    let n = vehicle_ids.len();
    let counter = JobCounter::new(progress, 3 + 6 * n);
    counter.step(&format!("Found {n} vehicles"), 2);

    fs::create_dir_all(output.join(TRAJECTORY_DIR))?;
    let mut summary = PipelineSummary {
        output_dir: output.to_path_buf(),
        ..Default::default()
    };

    let mut trajectories: Vec<Trajectory> = Vec::new();
    for (i, vehicle_id) in vehicle_ids.iter().enumerate() {
        let base_job = 2 + i * 5;
        match process_vehicle(&table, vehicle_id, config, &counter, base_job) {
            Ok(trajectory) => {
                write_trajectory(trajectory_path(output, vehicle_id), &trajectory)?;
                counter.step(
                    &format!("{} - Saved {} samples", vehicle_id, trajectory.len()),
                    base_job + 5,
                );
                info!(
                    "Saved {}: {} samples, {:.1}s",
                    vehicle_id,
                    trajectory.len(),
                    trajectory.duration_ms() as f64 / 1000.0
                );
                trajectories.push(trajectory);
            }
            Err(e) => {
                warn!("Skipping {}: {}", vehicle_id, e);
                summary.skipped.push((vehicle_id.clone(), e.to_string()));
            }
        }
    }
    if trajectories.is_empty() {
        return Err(PipelineError::NoVehicles);
    }

    let racing_line_job = 2 + n * 5 + 1;
    counter.step("Generating global racing line", racing_line_job);
    let refs: Vec<&Trajectory> = trajectories.iter().collect();
    match build_global_line(&refs, &config.racing_line) {
        Ok(line) => {
            write_line_csv(output.join(RACING_LINE_FILE), &line.points)?;
            info!(
                "Saved racing line: {} points, closure {:.2} m",
                line.points.len(),
                line.loop_closure_m
            );
            summary.racing_line_points = line.points.len();
            summary.loop_closure_m = Some(line.loop_closure_m);
        }
        Err(e) => warn!("Global racing line failed: {}", e),
    }

    fs::create_dir_all(output.join(RACING_LINES_DIR))?;
    let mut lap_lengths = BTreeMap::new();
    for (j, trajectory) in trajectories.iter().enumerate() {
        let vehicle_id = &trajectory.vehicle_id;
        counter.step(
            &format!("Generating racing line for {vehicle_id}"),
            racing_line_job + 1 + j,
        );
        match build_car_line(trajectory, &config.per_car_line) {
            Ok(line) => {
                write_line_csv(car_line_path(output, vehicle_id), &line.points)?;
                lap_lengths.insert(vehicle_id.clone(), line.lap_length_m);
            }
            Err(e) => warn!("No racing line for {}: {}", vehicle_id, e),
        }
    }
    summary.car_lines = lap_lengths.len();
    info!("Saved per-car racing lines for {} vehicles", lap_lengths.len());

    counter.step("Saving metadata", counter.total());
    let metadata = Metadata::build(&trajectories, &lap_lengths, config.per_car_line.n_points);
    metadata.save(output)?;
    summary.vehicles = metadata.car_ids.clone();
    summary.total_duration_ms = metadata.total_duration_ms;

    progress.report("Running section compare processing...", 0.85);
    match build_canonical(&table, &config.canonical) {
        Ok(result) => {
            write_canonical(&result, output)?;
            let fastest: Vec<String> = result
                .fastest_laps
                .iter()
                .map(|lap| lap.vehicle_id.clone())
                .collect();
            match generate_all_trails(output, &result.line, &fastest, &config.trail) {
                Ok(records) => summary.trails = records.len(),
                Err(e) => warn!("Trail generation failed: {}", e),
            }
            info!(
                "Section compare complete: track {:.1} m, ideal lap {:.3} s",
                result.stats.track_length_m, result.stats.ideal_lap_time_s
            );
            summary.canonical = Some(result.stats);
            progress.report("Section compare processing complete", 0.95);
        }
        Err(e) => warn!("Section compare processing failed: {}", e),
    }

    progress.report("Complete!", 1.0);
    info!(
        "Processed {} vehicles ({} skipped) into {}",
        summary.vehicles.len(),
        summary.skipped.len(),
        output.display()
    );
    Ok(summary)
}
