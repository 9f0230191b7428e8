//! # Stage: Orchestration
//!
//! ## Responsibility
//! Drive one [`ContentUnit`] through the pipeline state machine and always
//! hand back a [`ScenarioSet`]:
//! ```text
//! PENDING → CLASSIFYING → ENRICHING → GENERATING → SYNTHESIZING → DONE | DEGRADED
//! ```
//! Classification runs concurrently with the three enrichment stages; all
//! four share the worker pool and one pipeline deadline. Generation waits
//! for all of them. A failed generation gets one retry on the fallback
//! model, with the document text left out when rich content exists.
//!
//! ## Guarantees
//! - No failure return path: every error ends up in `StageResult::error`
//!   and `metadata.degraded`
//! - Non-empty output: at least one scenario, each with a test case
//! - Bounded: nothing runs past the pipeline deadline except the final
//!   in-memory merge
//! - Isolated runs: each `process` call owns its [`PipelineRun`]; the
//!   orchestrator itself only shares the worker pool and counters
//!
//! ## NOT Responsible For
//! - Talking to providers (that belongs to `worker`)
//! - Retry and fallback of single calls (that belongs to `resilience`)

use crate::config::PipelineConfig;
use crate::metrics;
use crate::resilience::{should_substitute, FallbackController};
use crate::routing::{ComplexityScorer, ModelSelector};
use crate::stages::{
    ClassificationStage, DiagramEnrichmentStage, GenerationRequest, ImageEnrichmentStage,
    ScenarioGeneratorStage, StageContext, StageProcessor, SynthesisInput, SynthesisStage,
    TableEnrichmentStage,
};
use crate::stats::{ProcessingStats, StatsSnapshot};
use crate::types::{
    prefix_chars, ContentUnit, DocumentClassification, ElementInsight, ImageElement,
    PipelineMetadata, ScenarioDraft, ScenarioSet, StageKind, StagePayload, StageResult, TaskType,
};
use crate::worker::ModelWorker;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

pub use crate::types::Strategy;

/// Where a run is in the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Created, nothing started.
    Pending,
    /// Classification in flight.
    Classifying,
    /// Image, table and diagram stages in flight.
    Enriching,
    /// Scenario generation (and its retry) in flight.
    Generating,
    /// Final merge.
    Synthesizing,
    /// Finished with a generated draft.
    Done,
    /// Finished on deterministic scenarios.
    Degraded,
}

impl PipelineState {
    /// Label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Classifying => "classifying",
            Self::Enriching => "enriching",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Done => "done",
            Self::Degraded => "degraded",
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Multi-model pipeline or a single generation call.
    pub strategy: Strategy,
    /// Replaces the generation model name for this call.
    pub preferred_model: Option<String>,
}

impl ProcessOptions {
    /// Options for a single generation call without enrichment.
    pub fn single_model() -> Self {
        Self {
            strategy: Strategy::SingleModel,
            preferred_model: None,
        }
    }
}

/// Mutable accumulator for one `process` call.
///
/// Stage tasks never touch it; their results are merged here one at a time
/// after they complete.
#[derive(Debug)]
pub struct PipelineRun {
    run_id: Uuid,
    state: PipelineState,
    stage_results: Vec<StageResult>,
    classification: Option<DocumentClassification>,
    images: Vec<ElementInsight>,
    tables: Vec<ElementInsight>,
    diagrams: Vec<ElementInsight>,
    draft: Option<ScenarioDraft>,
}

impl PipelineRun {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: PipelineState::Pending,
            stage_results: Vec::new(),
            classification: None,
            images: Vec::new(),
            tables: Vec::new(),
            diagrams: Vec::new(),
            draft: None,
        }
    }

    /// Unique id of the run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Results merged so far.
    pub fn stage_results(&self) -> &[StageResult] {
        &self.stage_results
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(
            target: "orchestrator::pipeline",
            run_id = %self.run_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "state transition"
        );
        self.state = next;
    }

    /// Merge one finished stage.
    fn record(&mut self, result: StageResult) {
        match &result.payload {
            Some(StagePayload::Classification(c)) if result.is_ok() => {
                self.classification = Some(c.clone());
            }
            Some(StagePayload::Elements(items)) => match result.stage {
                StageKind::ImageEnrichment => self.images = items.clone(),
                StageKind::TableEnrichment => self.tables = items.clone(),
                StageKind::DiagramEnrichment => self.diagrams = items.clone(),
                _ => {}
            },
            Some(StagePayload::Draft(draft)) if result.is_ok() => {
                self.draft = Some(draft.clone());
            }
            _ => {}
        }
        self.stage_results.push(result);
    }

    /// Distinct models that produced usable output, in first-use order.
    fn models_used(&self) -> Vec<String> {
        let mut models: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if !models.iter().any(|m| m == name) {
                models.push(name.to_string());
            }
        };
        for result in &self.stage_results {
            match &result.payload {
                Some(StagePayload::Elements(items)) => items
                    .iter()
                    .filter(|i| i.error.is_none())
                    .filter_map(|i| i.model_used.as_deref())
                    .for_each(&mut push),
                _ if result.is_ok() => {
                    if let Some(model) = result.model_used.as_deref() {
                        push(model);
                    }
                }
                _ => {}
            }
        }
        models
    }
}

/// Run `work` until `deadline`; on expiry build the result with `on_timeout`
/// from the elapsed milliseconds.
async fn until<F, T>(deadline: Instant, work: F, on_timeout: T) -> StageResult
where
    F: Future<Output = StageResult>,
    T: FnOnce(u64) -> StageResult,
{
    let started = Instant::now();
    match tokio::time::timeout_at(deadline, work).await {
        Ok(result) => result,
        Err(_) => {
            let result = on_timeout(started.elapsed().as_millis() as u64);
            warn!(
                target: "orchestrator::pipeline",
                stage = result.stage.as_str(),
                "stage cancelled at pipeline deadline"
            );
            metrics::inc_error(result.stage.as_str(), "timeout");
            result
        }
    }
}

/// The scenario pipeline.
///
/// Construct once and share; `process` takes `&self` and runs are fully
/// independent apart from the worker pool and the stats counters.
#[derive(Debug)]
pub struct Orchestrator {
    selector: Arc<ModelSelector>,
    scorer: ComplexityScorer,
    classification: ClassificationStage,
    images: ImageEnrichmentStage,
    tables: TableEnrichmentStage,
    diagrams: DiagramEnrichmentStage,
    generator: ScenarioGeneratorStage,
    synthesis: SynthesisStage,
    deadline: Duration,
    complexity_sample_chars: usize,
    stats: ProcessingStats,
}

impl Orchestrator {
    /// Build an orchestrator over `worker` with the given configuration.
    ///
    /// The config is assumed valid; use [`crate::config::loader`] to get
    /// one that is.
    pub fn new(worker: Arc<dyn ModelWorker>, config: &PipelineConfig) -> Self {
        let selector = Arc::new(ModelSelector::new(
            config.models.clone(),
            config.selection.clone(),
        ));
        let pool = Arc::new(Semaphore::new(config.limits.max_concurrent_calls.max(1)));
        let controller = FallbackController::new(
            worker,
            pool,
            config.resilience.retry_policy(),
            config.limits.call_timeout(),
        );
        let ctx = StageContext::new(controller, Arc::clone(&selector));
        let generation = &config.generation;

        Self {
            scorer: ComplexityScorer::new(),
            classification: ClassificationStage::new(
                ctx.clone(),
                generation.classification_max_chars,
            ),
            images: ImageEnrichmentStage::new(ctx.clone()),
            tables: TableEnrichmentStage::new(ctx.clone()),
            diagrams: DiagramEnrichmentStage::new(ctx.clone()),
            generator: ScenarioGeneratorStage::new(
                ctx.clone(),
                generation.min_text_chars,
                generation.hint_chars,
            ),
            synthesis: SynthesisStage::new(ctx),
            selector,
            deadline: config.limits.pipeline_deadline(),
            complexity_sample_chars: generation.complexity_sample_chars,
            stats: ProcessingStats::new(),
        }
    }

    /// Build with [`PipelineConfig::default`].
    pub fn with_defaults(worker: Arc<dyn ModelWorker>) -> Self {
        Self::new(worker, &PipelineConfig::default())
    }

    /// The selector every stage uses.
    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    /// Counters over every finished run.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Process with default options.
    pub async fn process(&self, unit: &ContentUnit) -> ScenarioSet {
        self.process_with(unit, &ProcessOptions::default()).await
    }

    /// Process one content unit. Never fails; see the module docs.
    pub async fn process_with(&self, unit: &ContentUnit, options: &ProcessOptions) -> ScenarioSet {
        let run = PipelineRun::new();
        let span = tracing::info_span!(
            "pipeline.run",
            run_id = %run.run_id,
            strategy = ?options.strategy,
            text_chars = unit.text_chars(),
            images = unit.images.len(),
            tables = unit.tables.len(),
            diagrams = unit.diagrams.len(),
        );
        self.execute(run, unit, options).instrument(span).await
    }

    /// Analyse one image outside a pipeline run.
    pub async fn analyze_image(&self, image: &ImageElement) -> ElementInsight {
        self.images.analyze(0, image).await
    }

    async fn execute(
        &self,
        mut run: PipelineRun,
        unit: &ContentUnit,
        options: &ProcessOptions,
    ) -> ScenarioSet {
        let started = Instant::now();
        let deadline = started + self.deadline;
        let complexity = self.scorer.score(
            prefix_chars(&unit.text, self.complexity_sample_chars),
            Some(TaskType::Technical),
        );

        if options.strategy == Strategy::MultiModel {
            self.classify_and_enrich(&mut run, unit, deadline).await;
        }

        // ── Generation ───────────────────────────────────────────────
        run.transition(PipelineState::Generating);
        let attempts = if Instant::now() >= deadline {
            vec![StageResult::timed_out(StageKind::Generation, 0)]
        } else {
            self.generate(&run, unit, options, complexity, deadline).await
        };
        for attempt in attempts {
            run.record(attempt);
        }
        let degraded = run.draft.is_none();
        if degraded {
            warn!(
                target: "orchestrator::pipeline",
                run_id = %run.run_id,
                "generation failed, continuing in degraded mode"
            );
        }

        // ── Synthesis ────────────────────────────────────────────────
        run.transition(PipelineState::Synthesizing);
        let synthesized = self
            .synthesis
            .synthesize(
                SynthesisInput {
                    draft: run.draft.take(),
                    classification: run.classification.take(),
                    images: std::mem::take(&mut run.images),
                    tables: std::mem::take(&mut run.tables),
                    diagrams: std::mem::take(&mut run.diagrams),
                },
                deadline,
            )
            .await;
        if let Some(result) = synthesized.stage_result {
            run.record(result);
        }
        run.transition(if degraded {
            PipelineState::Degraded
        } else {
            PipelineState::Done
        });

        let total_time_ms = started.elapsed().as_millis() as u64;
        self.stats.record(total_time_ms, degraded);
        metrics::inc_run(degraded);
        info!(
            target: "orchestrator::pipeline",
            run_id = %run.run_id,
            degraded,
            scenarios = synthesized.scenarios.len(),
            total_time_ms,
            "pipeline finished"
        );

        ScenarioSet {
            summary: synthesized.summary,
            scenarios: synthesized.scenarios,
            metadata: PipelineMetadata {
                run_id: run.run_id,
                models_used: run.models_used(),
                total_time_ms,
                document_size: unit.text_chars(),
                degraded,
                strategy: options.strategy,
                complexity_score: complexity,
                stage_results: run.stage_results,
                document_classification: synthesized.classification,
                image_analysis: synthesized.image_analysis,
                table_analysis: synthesized.table_analysis,
                diagram_analysis: synthesized.diagram_analysis,
                completed_at: Utc::now(),
            },
        }
    }

    /// Classification concurrently with the three enrichment stages.
    /// Blank text and empty element lists are skipped and leave no stage
    /// result.
    async fn classify_and_enrich(&self, run: &mut PipelineRun, unit: &ContentUnit, deadline: Instant) {
        run.transition(PipelineState::Classifying);
        let classification = async {
            if unit.text.trim().is_empty() {
                return None;
            }
            Some(
                until(deadline, self.classification.process(unit), |ms| {
                    StageResult::timed_out(StageKind::Classification, ms)
                })
                .await,
            )
        };

        run.transition(PipelineState::Enriching);
        let images = async {
            if unit.images.is_empty() {
                return None;
            }
            Some(
                until(deadline, self.images.process(&unit.images), |ms| {
                    self.images.cancelled(&unit.images, ms)
                })
                .await,
            )
        };
        let tables = async {
            if unit.tables.is_empty() {
                return None;
            }
            Some(
                until(deadline, self.tables.process(&unit.tables), |ms| {
                    self.tables.cancelled(&unit.tables, ms)
                })
                .await,
            )
        };
        let diagrams = async {
            if unit.diagrams.is_empty() {
                return None;
            }
            Some(
                until(deadline, self.diagrams.process(&unit.diagrams), |ms| {
                    self.diagrams.cancelled(&unit.diagrams, ms)
                })
                .await,
            )
        };

        let (classification, images, tables, diagrams) =
            tokio::join!(classification, images, tables, diagrams);

        for result in [classification, images, tables, diagrams].into_iter().flatten() {
            run.record(result);
        }
    }

    /// First attempt on the selected model, then at most one retry on the
    /// fallback model.
    async fn generate(
        &self,
        run: &PipelineRun,
        unit: &ContentUnit,
        options: &ProcessOptions,
        complexity: f64,
        deadline: Instant,
    ) -> Vec<StageResult> {
        let request = GenerationRequest {
            unit,
            classification: run.classification.as_ref(),
            images: &run.images,
            tables: &run.tables,
            diagrams: &run.diagrams,
            suppress_text: false,
        };
        let timed_out = |ms: u64| StageResult::timed_out(StageKind::Generation, ms);

        let primary = self
            .generator
            .primary_model(unit, complexity, options.preferred_model.as_deref());
        let first = until(deadline, self.generator.generate(&request, &primary), timed_out).await;

        // a first attempt that never reached a model has nothing to retry
        let retry = match &first.error {
            Some(e) => first.model_used.is_some() && should_substitute(e),
            None => false,
        };
        let fallback = self.generator.fallback_model();
        if !retry || fallback == primary {
            return vec![first];
        }

        let retry_request = if unit.has_rich_content() && options.strategy == Strategy::MultiModel {
            request.without_text()
        } else {
            request
        };
        info!(
            target: "orchestrator::pipeline",
            run_id = %run.run_id,
            model = %fallback.model_name,
            suppress_text = retry_request.suppress_text,
            "retrying generation on fallback model"
        );
        metrics::inc_fallback(StageKind::Generation.as_str());
        let second = until(
            deadline,
            self.generator.generate(&retry_request, &fallback),
            timed_out,
        )
        .await;
        vec![first, second]
    }
}
