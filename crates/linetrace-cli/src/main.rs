//! linetrace - telemetry pipeline and replay queries
//!
//! Usage:
//!   linetrace process session.csv processed/    # Build a dataset
//!   linetrace query processed/ --time-ms 90000  # Car states and race order
//!   linetrace demo session.csv --cars 4         # Write a synthetic session

use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use linetrace_core::config::{PipelineConfig, ReferenceMode, RuntimeConfig, TrailCompare};
use linetrace_core::runner::PipelineRunner;
use linetrace_core::synthetic::{SessionBuilder, TrackShape};
use linetrace_core::world::World;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "linetrace")]
#[command(about = "Turn raw session telemetry into racing lines and replay queries")]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    PerCar,
    Global,
    Individual,
}

impl From<Mode> for ReferenceMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::PerCar => ReferenceMode::PerCarLine,
            Mode::Global => ReferenceMode::GlobalLine,
            Mode::Individual => ReferenceMode::IndividualLine,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Process a telemetry CSV into a dataset directory
    Process {
        /// Long-format telemetry CSV
        input: PathBuf,

        /// Output directory
        output: PathBuf,

        /// JSON pipeline config
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Trail window in seconds
        #[arg(long)]
        trail_seconds: Option<f64>,

        /// Trail comparison: ref or ideal
        #[arg(long)]
        compare: Option<TrailCompare>,
    },

    /// Print car states and the running order at one session time
    Query {
        /// Processed dataset directory
        dir: PathBuf,

        /// Session time in milliseconds
        #[arg(short, long, default_value_t = 0.0)]
        time_ms: f64,

        /// Reference line for deviation
        #[arg(long, value_enum, default_value = "per-car")]
        mode: Mode,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a synthetic telemetry CSV
    Demo {
        /// Output CSV
        output: PathBuf,

        /// Number of cars
        #[arg(long, default_value_t = 4)]
        cars: usize,

        /// Timed laps per car
        #[arg(long, default_value_t = 5)]
        laps: usize,

        /// Random seed
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Use an oval instead of a circle
        #[arg(long)]
        oval: bool,

        /// GPS noise amplitude in metres
        #[arg(long, default_value_t = 0.5)]
        noise: f64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let result = match cli.command {
        Commands::Process {
            input,
            output,
            config,
            trail_seconds,
            compare,
        } => handle_process(input, output, config, trail_seconds, compare),
        Commands::Query {
            dir,
            time_ms,
            mode,
            json,
        } => handle_query(dir, time_ms, mode.into(), json),
        Commands::Demo {
            output,
            cars,
            laps,
            seed,
            oval,
            noise,
        } => handle_demo(output, cars, laps, seed, oval, noise),
    };
    if let Err(e) = &result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn handle_process(
    input: PathBuf,
    output: PathBuf,
    config_path: Option<PathBuf>,
    trail_seconds: Option<f64>,
    compare: Option<TrailCompare>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(seconds) = trail_seconds {
        config.trail.seconds = seconds;
    }
    if let Some(compare) = compare {
        config.trail.compare = compare;
    }

    let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
    let summary = runtime.block_on(async {
        let runner = PipelineRunner::new(config);
        let mut job = runner.spawn(input.clone(), output.clone());
        while let Some(update) = job.next_progress().await {
            eprintln!("[{:>3.0}%] {}", update.fraction * 100.0, update.message);
        }
        job.wait().await
    });
    let summary = summary.with_context(|| format!("processing {}", input.display()))?;

    println!("Processed {} vehicles into {}", summary.vehicles.len(), output.display());
    for (vehicle, reason) in &summary.skipped {
        println!("  skipped {vehicle}: {reason}");
    }
    if let Some(stats) = &summary.canonical {
        println!(
            "Track {:.1} m, ideal lap {:.3} s, {} trails",
            stats.track_length_m, stats.ideal_lap_time_s, summary.trails
        );
    }
    Ok(())
}

fn handle_query(dir: PathBuf, time_ms: f64, mode: ReferenceMode, as_json: bool) -> Result<()> {
    let config = RuntimeConfig {
        reference_mode: mode,
        ..RuntimeConfig::default()
    };
    let world = World::load(&dir, config)
        .with_context(|| format!("loading dataset {}", dir.display()))?;
    let states = world.get_all_car_states(time_ms);
    if states.is_empty() {
        return Err(anyhow!("no car has data at {time_ms} ms"));
    }
    let order = world.get_race_order(time_ms);

    if as_json {
        let doc = json!({
            "time_ms": time_ms,
            "states": states,
            "race_order": order,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!(
        "{:>3}  {:<16} {:>4} {:>9} {:>7} {:>8} {:>6} {:>8}",
        "Pos", "Car", "Lap", "Lapdist", "Speed", "Dev", "Sector", "Lap t"
    );
    for entry in &order.cars {
        let Some(state) = states.get(&entry.vehicle_id) else {
            continue;
        };
        let gap = if entry.on_lead_lap {
            String::new()
        } else {
            format!("  +{}L", entry.laps_down)
        };
        println!(
            "{:>3}  {:<16} {:>4} {:>9.1} {:>7.1} {:>8.2} {:>6} {:>8.2}{}",
            entry.position,
            entry.vehicle_id,
            entry.lap,
            entry.lapdist,
            state.speed,
            state.deviation,
            world.current_sector(&entry.vehicle_id, time_ms),
            world.current_lap_time(&entry.vehicle_id, time_ms),
            gap
        );
    }
    if let Some(line) = world.canonical() {
        println!(
            "Canonical line: {:.1} m, ideal lap {:.3} s",
            line.track_length_m(),
            line.ideal_lap_time_s()
        );
    }
    Ok(())
}

fn handle_demo(
    output: PathBuf,
    cars: usize,
    laps: usize,
    seed: u64,
    oval: bool,
    noise: f64,
) -> Result<()> {
    if cars == 0 {
        return Err(anyhow!("at least one car is required"));
    }
    let mut builder = SessionBuilder::new(seed).gps_noise_m(noise);
    if oval {
        builder = builder.shape(TrackShape::Oval {
            straight_m: 600.0,
            radius_m: 200.0,
        });
    }
    for i in 0..cars {
        builder = builder.car(format!("GR86-{:03}-{}", i + 1, 10 + i), laps, 150.0 - i as f64 * 2.0);
    }
    let events = builder
        .write_csv(&output)
        .with_context(|| format!("writing {}", output.display()))?;
    info!("Track length {:.1} m", builder.track_length_m());
    println!("Wrote {events} events for {cars} cars to {}", output.display());
    Ok(())
}
