//! Background pipeline jobs
//!
//! The batch job is blocking work. [`PipelineRunner`] moves it onto tokio's blocking
//! pool and streams progress back over a channel, so an async caller can keep
//! rendering while a dataset is processed.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::{run_pipeline, PipelineSummary};
use crate::progress::ProgressSink;

/// One progress update from a running job
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Step description
    pub message: String,
    /// Completion in [0, 1]
    pub fraction: f64,
}

struct ChannelProgress(mpsc::UnboundedSender<ProgressUpdate>);

impl ProgressSink for ChannelProgress {
    fn report(&self, message: &str, fraction: f64) {
        // receiver gone means nobody is listening any more
        let _ = self.0.send(ProgressUpdate {
            message: message.to_string(),
            fraction,
        });
    }
}

/// Handle to a running pipeline job
pub struct PipelineJob {
    handle: JoinHandle<Result<PipelineSummary>>,
    progress: mpsc::UnboundedReceiver<ProgressUpdate>,
}

impl PipelineJob {
    /// Next progress update; `None` once the job has stopped reporting
    pub async fn next_progress(&mut self) -> Option<ProgressUpdate> {
        self.progress.recv().await
    }

    /// True when the worker has finished
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the job to finish
    pub async fn wait(self) -> Result<PipelineSummary> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Job(format!("Processing failed: {e}"))),
        }
    }
}

/// Spawns pipeline jobs on the blocking pool
#[derive(Debug, Clone, Default)]
pub struct PipelineRunner {
    config: Arc<PipelineConfig>,
}

impl PipelineRunner {
    /// Create a runner that processes with `config`
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Configuration used for every job
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start processing `input` into `output`. Must be called inside a tokio runtime.
    pub fn spawn(&self, input: PathBuf, output: PathBuf) -> PipelineJob {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = Arc::clone(&self.config);
        let handle = tokio::task::spawn_blocking(move || {
            info!("Processing {} -> {}", input.display(), output.display());
            let sink = ChannelProgress(tx);
            let result = run_pipeline(&input, &output, &config, &sink);
            if let Err(e) = &result {
                error!("Processing failed: {}", e);
            }
            result
        });
        PipelineJob {
            handle,
            progress: rx,
        }
    }

    /// Process and wait, collecting every progress update
    pub async fn run(
        &self,
        input: PathBuf,
        output: PathBuf,
    ) -> (Result<PipelineSummary>, Vec<ProgressUpdate>) {
        let mut job = self.spawn(input, output);
        let mut updates = Vec::new();
        while let Some(update) = job.next_progress().await {
            updates.push(update);
        }
        (job.wait().await, updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_input_fails_in_worker() {
        let dir = tempfile::tempdir().unwrap();
        let runner = PipelineRunner::default();
        let (result, updates) = runner
            .run(dir.path().join("missing.csv"), dir.path().join("out"))
            .await;

        match result {
            Err(PipelineError::Validation(msg)) => assert!(msg.starts_with("File not found")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(updates.is_empty());
    }
}
