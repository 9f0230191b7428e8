//! Pipeline stage implementations with structured tracing.
//!
//! Every stage turns its slice of the input into a [`StageResult`]. Stages
//! never return errors and never panic; a failed remote call is recorded in
//! `StageResult::error` and the orchestrator decides what to do next.
//!
//! ## Span Fields (every stage)
//!
//! | Field | Description |
//! |-------|-------------|
//! | `stage` | Stage name string |
//! | `duration_ms` | Recorded after processing completes |
//! | `outcome` | `"ok"` or `"err"` |
//! | `error_kind` | Recorded only on error, the [`crate::ModelError::kind`] label |
//!
//! ## Sensitive Fields (never logged)
//!
//! - Document text and assembled prompts
//! - Model responses
//! - API keys

pub mod classification;
pub mod enrichment;
pub mod generator;
pub mod parse;
pub mod prompts;
pub mod synthesis;

pub use classification::ClassificationStage;
pub use enrichment::{
    DiagramEnrichmentStage, EnrichmentElement, EnrichmentStage, ImageEnrichmentStage,
    TableEnrichmentStage,
};
pub use generator::{GenerationRequest, ScenarioGeneratorStage};
pub use synthesis::{SynthesisInput, SynthesisStage, Synthesized};

use crate::metrics;
use crate::resilience::FallbackController;
use crate::routing::ModelSelector;
use crate::types::{StageKind, StageResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, Span};

/// Collaborators every remote-calling stage needs.
///
/// Cheap to clone; clones share the selector, the worker and the pool.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Pooled, retrying, falling-back model invoker.
    pub controller: FallbackController,
    /// Model selection policy.
    pub selector: Arc<ModelSelector>,
}

impl StageContext {
    /// Bundle a controller and a selector.
    pub fn new(controller: FallbackController, selector: Arc<ModelSelector>) -> Self {
        Self {
            controller,
            selector,
        }
    }
}

/// A stage that wraps one category of remote call behind `process`.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    /// What the stage consumes.
    type Input: ?Sized + Sync;

    /// Which stage this is.
    fn kind(&self) -> StageKind;

    /// Run the stage. Failures are carried in the returned result.
    async fn process(&self, input: &Self::Input) -> StageResult;
}

/// Run `work` inside the stage span, then stamp the elapsed time and
/// outcome on both the span and the result.
pub(crate) async fn instrumented<F>(stage: StageKind, work: F) -> StageResult
where
    F: Future<Output = StageResult>,
{
    let span = tracing::info_span!(
        "pipeline.stage",
        stage = stage.as_str(),
        duration_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
        error_kind = tracing::field::Empty,
    );

    let start = Instant::now();
    let mut result = work.instrument(span.clone()).await;
    let elapsed = start.elapsed();

    result.processing_time_ms = elapsed.as_millis() as u64;
    metrics::record_stage_latency(stage.as_str(), elapsed);
    record_outcome(&span, &result);
    result
}

fn record_outcome(span: &Span, result: &StageResult) {
    span.record("duration_ms", result.processing_time_ms);
    match &result.error {
        None => {
            span.record("outcome", "ok");
        }
        Some(e) => {
            span.record("outcome", "err");
            span.record("error_kind", e.kind());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StagePayload;
    use crate::ModelError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_instrumented_stamps_processing_time() {
        let result = instrumented(StageKind::Synthesis, async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            StageResult::ok(
                StageKind::Synthesis,
                None,
                StagePayload::Summary("s".into()),
                0,
            )
        })
        .await;
        assert!(result.processing_time_ms >= 5);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_instrumented_keeps_error() {
        let result = instrumented(StageKind::Generation, async {
            StageResult::failed(
                StageKind::Generation,
                None,
                ModelError::Auth("401".into()),
                0,
            )
        })
        .await;
        assert!(matches!(result.error, Some(ModelError::Auth(_))));
    }
}
