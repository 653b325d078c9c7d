use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::command::RegistrationCommand;
use crate::results::AppliedResult;
use crate::supervisor::RunReport;

/// Pipeline execution context
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    /// Timing information
    pub stage_timings: Vec<StageTime>,

    /// Warnings raised along the way
    pub messages: Vec<PipelineMessage>,
}

impl PipelineContext {
    pub fn warn(&mut self, stage: &str, message: impl Into<String>) {
        self.messages.push(PipelineMessage {
            level: MessageLevel::Warning,
            stage: stage.to_string(),
            message: message.into(),
        });
    }

    pub fn total_duration_ms(&self) -> f64 {
        self.stage_timings.iter().map(|t| t.duration_ms).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTime {
    pub stage_name: String,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMessage {
    pub level: MessageLevel,
    pub stage: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageLevel {
    Warning,
}

/// Everything a completed registration left behind.
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub correlation_id: Uuid,
    pub command: RegistrationCommand,
    pub report: RunReport,
    pub applied: AppliedResult,
    pub context: PipelineContext,
    /// Run directory, when it was kept.
    pub run_directory: Option<PathBuf>,
}
