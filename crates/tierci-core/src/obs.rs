//! Structured observability hooks for pipeline stages.
//!
//! Stage lifecycle is emitted as `info!` events with a stable `event`
//! field so JSON log consumers can follow a run:
//!
//! - `stage.started` / `stage.finished`
//! - `pipeline.finished`
//! - `cleanup.failed` (warn level; cleanup never fails a run)

use tracing::{info, warn};

/// RAII guard that enters a stage-scoped span for synchronous work.
///
/// ```ignore
/// let _span = StageSpan::enter("run-123", "unit");
/// // everything logged here carries run_id and stage
/// ```
pub struct StageSpan {
    _span: tracing::span::EnteredSpan,
}

impl StageSpan {
    pub fn enter(run_id: &str, stage: &str) -> Self {
        Self {
            _span: stage_span(run_id, stage).entered(),
        }
    }
}

/// Span for one stage; attach to async work with `Instrument::instrument`.
pub fn stage_span(run_id: &str, stage: &str) -> tracing::Span {
    tracing::info_span!("tierci.stage", run_id = %run_id, stage = %stage)
}

pub fn emit_stage_started(stage: &str) {
    info!(event = "stage.started", stage = %stage);
}

pub fn emit_stage_finished(stage: &str, exit_code: i32, duration_ms: u64) {
    info!(
        event = "stage.finished",
        stage = %stage,
        exit_code = exit_code,
        duration_ms = duration_ms,
        success = exit_code == 0,
    );
}

pub fn emit_pipeline_finished(run_id: &str, stages: usize, success: bool, duration_ms: u64) {
    info!(
        event = "pipeline.finished",
        run_id = %run_id,
        stages = stages,
        success = success,
        duration_ms = duration_ms,
    );
}

/// A best-effort cleanup step failed; logged, never raised.
pub fn emit_cleanup_failed(step: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cleanup.failed", step = %step, error = %error);
}
