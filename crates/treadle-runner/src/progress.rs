//! Progress reporting for training and evaluation runs.

use crate::runner::RunId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { run_id: RunId, num_steps: u64 },
    Initialized { run_id: RunId },
    Restored { run_id: RunId, checkpoint: PathBuf, global_step: u64 },
    Loss { run_id: RunId, global_step: u64, mean_loss: f64 },
    CheckpointSaved { run_id: RunId, path: PathBuf, global_step: u64 },
    EvalResult { run_id: RunId, mean_metric: f64, num_steps: u64 },
    Finished { run_id: RunId, global_step: u64 },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Default sink: structured `tracing` events.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run_id, num_steps } => {
                info!(run = %run_id, num_steps, "run started");
            }
            ProgressEvent::Initialized { run_id } => {
                info!(run = %run_id, "initialized fresh parameters");
            }
            ProgressEvent::Restored { run_id, checkpoint, global_step } => {
                info!(run = %run_id, checkpoint = %checkpoint.display(), global_step, "restored from checkpoint");
            }
            ProgressEvent::Loss { run_id, global_step, mean_loss } => {
                info!(run = %run_id, global_step, mean_loss, "loss");
            }
            ProgressEvent::CheckpointSaved { run_id, path, global_step } => {
                info!(run = %run_id, path = %path.display(), global_step, "checkpoint saved");
            }
            ProgressEvent::EvalResult { run_id, mean_metric, num_steps } => {
                info!(run = %run_id, mean_metric, num_steps, "evaluation complete");
            }
            ProgressEvent::Finished { run_id, global_step } => {
                info!(run = %run_id, global_step, "run finished");
            }
        }
    }
}

/// Sink that records every event in memory; used in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }
}

impl ProgressSink for MemorySink {
    fn on_event(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}
