//! # linetrace Core Library
//!
//! Batch processing and replay queries for motorsport telemetry.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Long-format telemetry ingestion and validation
//! - Session alignment and uniform trajectory resampling
//! - Global and per-car racing lines
//! - A canonical line with curvature, speed profiles and sectors
//! - Delta-speed trails of each car's fastest lap
//! - A read-only query layer over a processed dataset
//!
//! ## Example
//!
//! ```rust,ignore
//! use linetrace_core::prelude::*;
//!
//! // Process a session
//! let summary = run_pipeline(
//!     Path::new("session.csv"),
//!     Path::new("processed"),
//!     &PipelineConfig::default(),
//!     &NoopProgress,
//! )?;
//!
//! // Replay it
//! let world = World::load(Path::new("processed"), RuntimeConfig::default())?;
//! for state in world.get_all_car_states(60_000.0).values() {
//!     println!("{:.1} m off line", state.deviation);
//! }
//! ```

pub mod align;
pub mod canonical;
pub mod config;
pub mod dataset;
pub mod error;
pub mod filters;
pub mod geo;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod racing_line;
pub mod runner;
pub mod sectors;
pub mod spatial;
pub mod synthetic;
pub mod telemetry;
pub mod trail;
pub mod trajectory;
pub mod world;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::canonical::{build_canonical, CanonicalLine, CanonicalResult, Sector};
    pub use crate::config::{PipelineConfig, ReferenceMode, RuntimeConfig, TrailCompare};
    pub use crate::dataset::{DatasetInfo, DatasetManager};
    pub use crate::error::{PipelineError, Result};
    pub use crate::output::Metadata;
    pub use crate::pipeline::{run_pipeline, PipelineSummary};
    pub use crate::progress::{NoopProgress, ProgressSink};
    pub use crate::runner::{PipelineJob, PipelineRunner, ProgressUpdate};
    pub use crate::spatial::{Deviation, IndexedLine, ReferenceLine};
    pub use crate::synthetic::{SessionBuilder, TrackShape};
    pub use crate::telemetry::{read_events, EventTable, TelemetryEvent};
    pub use crate::trajectory::{read_trajectory, write_trajectory, Trajectory, TrajectoryRow};
    pub use crate::world::{CarState, RaceOrder, World};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
