//! Structured spans for hierarchical logging
//!
//! Pre-defined spans for a registration run and for the pipeline stages
//! inside it, so every event carries the algorithm and correlation id.

use std::time::{Duration, Instant};
use tracing::{field, span, Level, Span};
use uuid::Uuid;

/// Span covering one external registration run
pub struct RunSpan {
    span: Span,
    start_time: Instant,
}

impl RunSpan {
    /// Create a new run span
    pub fn new(algorithm: &str, reference: &str, floating: &str, correlation_id: Option<Uuid>) -> Self {
        let span = span!(
            Level::INFO,
            "registration_run",
            algorithm = algorithm,
            reference = reference,
            floating = floating,
            correlation_id = field::Empty,
            levels_built = field::Empty,
            levels_performed = field::Empty,
            exit_code = field::Empty,
            outcome = field::Empty,
            execution_time_ms = field::Empty
        );
        if let Some(corr_id) = correlation_id {
            span.record("correlation_id", field::display(corr_id));
        }

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    /// Record the pyramid levels passed to the tool
    pub fn record_levels(&self, built: usize, performed: usize) {
        self.span.record("levels_built", built as u64);
        self.span.record("levels_performed", performed as u64);
    }

    /// Record the process outcome
    pub fn record_outcome(&self, exit_code: Option<i32>, succeeded: bool) -> Duration {
        let duration = self.start_time.elapsed();
        if let Some(code) = exit_code {
            self.span.record("exit_code", code);
        }
        let outcome = if succeeded { "succeeded" } else { "failed" };
        self.span.record("outcome", outcome);
        self.span.record("execution_time_ms", duration.as_millis() as u64);

        tracing::info!(
            parent: &self.span,
            exit_code = exit_code,
            outcome = outcome,
            execution_time_ms = duration.as_millis() as u64,
            "Registration run finished"
        );
        duration
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Enter the span context
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Span for a pipeline stage (prepare, validate, run, load)
pub struct StageSpan {
    span: Span,
    start_time: Instant,
    stage_name: String,
}

impl StageSpan {
    /// Create a new pipeline stage span
    pub fn new(stage_name: &str, correlation_id: Option<Uuid>) -> Self {
        let span = span!(
            Level::INFO,
            "pipeline_stage",
            stage = stage_name,
            correlation_id = field::Empty,
            success = field::Empty,
            execution_time_ms = field::Empty
        );
        if let Some(corr_id) = correlation_id {
            span.record("correlation_id", field::display(corr_id));
        }

        Self {
            span,
            start_time: Instant::now(),
            stage_name: stage_name.to_string(),
        }
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Record stage completion and return its duration
    pub fn record_completion(&self, success: bool) -> Duration {
        let duration = self.start_time.elapsed();
        self.span.record("success", success);
        self.span.record("execution_time_ms", duration.as_millis() as u64);

        tracing::debug!(
            parent: &self.span,
            stage = %self.stage_name,
            success = success,
            execution_time_ms = duration.as_millis() as u64,
            "Pipeline stage completed"
        );
        duration
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Enter the span context
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}
