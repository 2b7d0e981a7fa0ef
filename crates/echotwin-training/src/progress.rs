use crate::pipeline::{PipelineStage, RunId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageStarted { run_id: RunId, stage: PipelineStage },
    Message { run_id: RunId, message: String },
    StageFinished { run_id: RunId, stage: PipelineStage },
    Failed { run_id: RunId, stage: PipelineStage, error: String },
    Finished { run_id: RunId },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::StageStarted { run_id, stage } => println!("[echotwin:{run_id}] {stage}"),
            ProgressEvent::Message { run_id, message } => println!("[echotwin:{run_id}] {message}"),
            ProgressEvent::StageFinished { .. } => {}
            ProgressEvent::Failed { run_id, stage, error } => {
                eprintln!("[echotwin:{run_id}] {stage} failed: {error}");
            }
            ProgressEvent::Finished { run_id } => println!("[echotwin:{run_id}] done"),
        }
    }
}

/// Discards every event, for machine-readable output modes.
#[derive(Debug, Default)]
pub struct SilentProgressSink;

impl ProgressSink for SilentProgressSink {
    fn on_event(&self, _event: ProgressEvent) {}
}
