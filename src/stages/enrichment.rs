//! # Stage: Enrichment (images, tables, diagrams)
//!
//! ## Responsibility
//! Analyse every extracted element with one remote call and turn the
//! answer into test scenarios tagged with the element's provenance.
//!
//! ## Guarantees
//! - One [`ElementInsight`] per input element, in input order
//! - Every insight carries at least one scenario. Derivation falls through:
//!   1. scenarios the model returned (`test_scenarios`)
//!   2. one scenario built from the model's analysis text, or from the
//!      element's description or caption
//!   3. one generic scenario built from whatever metadata keys exist
//! - A failed call still yields an insight (with `error` set); the stage
//!   reports an error only when every element failed
//!
//! ## NOT Responsible For
//! - Bounding concurrency (the worker pool in the controller does that)
//! - Deadlines (the orchestrator cancels the whole stage)

use super::{instrumented, parse, prompts, StageContext, StageProcessor};
use crate::types::{
    truncate_chars, DiagramElement, ElementInsight, ElementMeta, ImageElement, Scenario,
    ScenarioSource, StageKind, StagePayload, StageResult, TableElement, TaskType, TestCase,
};
use crate::worker::PromptPayload;
use crate::ModelError;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::marker::PhantomData;
use tracing::debug;

/// An element kind an [`EnrichmentStage`] can analyse.
pub trait EnrichmentElement: Send + Sync {
    /// Stage label for spans, metrics and results.
    const STAGE: StageKind;
    /// Model tier the element is analysed with.
    const TASK: TaskType;
    /// Provenance tag on derived scenarios.
    const SOURCE: ScenarioSource;
    /// Title prefix, e.g. `Image` in `"Image 2 - …"`.
    const LABEL: &'static str;

    /// Descriptive metadata.
    fn meta(&self) -> &ElementMeta;

    /// Prompt for the element at 0-based `index`.
    fn prompt(&self, index: usize) -> PromptPayload;
}

impl EnrichmentElement for ImageElement {
    const STAGE: StageKind = StageKind::ImageEnrichment;
    const TASK: TaskType = TaskType::ImageAnalysis;
    const SOURCE: ScenarioSource = ScenarioSource::Image;
    const LABEL: &'static str = "Image";

    fn meta(&self) -> &ElementMeta {
        &self.meta
    }

    fn prompt(&self, index: usize) -> PromptPayload {
        prompts::image(index, self)
    }
}

impl EnrichmentElement for TableElement {
    const STAGE: StageKind = StageKind::TableEnrichment;
    const TASK: TaskType = TaskType::Classification;
    const SOURCE: ScenarioSource = ScenarioSource::Table;
    const LABEL: &'static str = "Table";

    fn meta(&self) -> &ElementMeta {
        &self.meta
    }

    fn prompt(&self, index: usize) -> PromptPayload {
        prompts::table(index, self)
    }
}

impl EnrichmentElement for DiagramElement {
    const STAGE: StageKind = StageKind::DiagramEnrichment;
    const TASK: TaskType = TaskType::ImageAnalysis;
    const SOURCE: ScenarioSource = ScenarioSource::Diagram;
    const LABEL: &'static str = "Diagram";

    fn meta(&self) -> &ElementMeta {
        &self.meta
    }

    fn prompt(&self, index: usize) -> PromptPayload {
        prompts::diagram(index, self)
    }
}

/// Per-element enrichment for one element kind.
pub struct EnrichmentStage<E> {
    ctx: StageContext,
    _element: PhantomData<fn() -> E>,
}

/// Image enrichment.
pub type ImageEnrichmentStage = EnrichmentStage<ImageElement>;
/// Table enrichment.
pub type TableEnrichmentStage = EnrichmentStage<TableElement>;
/// Diagram enrichment.
pub type DiagramEnrichmentStage = EnrichmentStage<DiagramElement>;

impl<E> Clone for EnrichmentStage<E> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            _element: PhantomData,
        }
    }
}

impl<E: EnrichmentElement> std::fmt::Debug for EnrichmentStage<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentStage")
            .field("stage", &E::STAGE.as_str())
            .finish()
    }
}

impl<E: EnrichmentElement> EnrichmentStage<E> {
    /// Build the stage.
    pub fn new(ctx: StageContext) -> Self {
        Self {
            ctx,
            _element: PhantomData,
        }
    }

    /// Analyse one element. Never fails; see the module docs.
    pub async fn analyze(&self, index: usize, element: &E) -> ElementInsight {
        let selector = &self.ctx.selector;
        let primary = selector.select_for(E::TASK, None, 0, None);
        let fallback = selector.get_fallback(E::TASK);
        let prompt = element.prompt(index);

        let invocation = self
            .ctx
            .controller
            .invoke(&primary, Some(&fallback), &prompt, parse::json_object)
            .await;

        match invocation.result {
            Ok(reply) => ElementInsight {
                index,
                source_element: element.meta().clone(),
                scenarios: derive_scenarios::<E>(index, element.meta(), Some(&reply)),
                model_used: invocation.model_used,
                analysis: Some(Value::Object(reply)),
                error: None,
            },
            Err(e) => {
                debug!(
                    target: "orchestrator::pipeline",
                    stage = E::STAGE.as_str(),
                    index,
                    error_kind = e.kind(),
                    "element analysis failed, deriving from metadata"
                );
                failed_insight::<E>(index, element.meta(), e)
            }
        }
    }

    /// Result for a stage cut off by the pipeline deadline: every element
    /// is derived from its metadata and marked with `Timeout`.
    pub fn cancelled(&self, elements: &[E], elapsed_ms: u64) -> StageResult {
        let error = ModelError::Timeout(format!(
            "{} cancelled at pipeline deadline",
            E::STAGE.as_str()
        ));
        let insights = elements
            .iter()
            .enumerate()
            .map(|(i, e)| failed_insight::<E>(i, e.meta(), error.clone()))
            .collect();
        StageResult {
            stage: E::STAGE,
            model_used: None,
            payload: Some(StagePayload::Elements(insights)),
            error: Some(error),
            processing_time_ms: elapsed_ms,
        }
    }
}

#[async_trait]
impl<E: EnrichmentElement> StageProcessor for EnrichmentStage<E> {
    type Input = [E];

    fn kind(&self) -> StageKind {
        E::STAGE
    }

    async fn process(&self, elements: &[E]) -> StageResult {
        instrumented(E::STAGE, async {
            // join_all keeps input order regardless of completion order
            let insights = join_all(
                elements
                    .iter()
                    .enumerate()
                    .map(|(i, element)| self.analyze(i, element)),
            )
            .await;

            let model_used = insights.iter().find_map(|i| i.model_used.clone());
            let error = if !insights.is_empty() && insights.iter().all(|i| i.error.is_some()) {
                insights.iter().find_map(|i| i.error.clone())
            } else {
                None
            };

            StageResult {
                stage: E::STAGE,
                model_used,
                payload: Some(StagePayload::Elements(insights)),
                error,
                processing_time_ms: 0,
            }
        })
        .await
    }
}

fn failed_insight<E: EnrichmentElement>(
    index: usize,
    meta: &ElementMeta,
    error: ModelError,
) -> ElementInsight {
    ElementInsight {
        index,
        source_element: meta.clone(),
        model_used: None,
        analysis: None,
        scenarios: derive_scenarios::<E>(index, meta, None),
        error: Some(error),
    }
}

/// Turn a model reply (or its absence) into at least one scenario.
fn derive_scenarios<E: EnrichmentElement>(
    index: usize,
    meta: &ElementMeta,
    reply: Option<&Map<String, Value>>,
) -> Vec<Scenario> {
    let n = index + 1;
    let prefix = format!("{} {n} - ", E::LABEL);

    if let Some(native) = reply.and_then(native_scenarios) {
        let scenarios: Vec<Scenario> = native
            .into_iter()
            .map(|mut s| {
                s.title = format!("{prefix}{}", s.title.trim());
                s.with_source(E::SOURCE).normalized()
            })
            .collect();
        if !scenarios.is_empty() {
            return scenarios;
        }
    }

    let element = format!("{} {n}", E::LABEL.to_lowercase());
    let case = |expected: String| {
        TestCase::new(
            format!("Check {element}"),
            format!(
                "1. Open the section containing {element}\n\
                 2. Inspect the {element}\n\
                 3. Verify the content matches the document"
            ),
            expected,
        )
    };

    if let Some(text) = reply.and_then(analysis_text).or_else(|| meta.label()) {
        let headline = meta.label().unwrap_or(text);
        return vec![Scenario::new(
            format!("{prefix}{}", truncate_chars(headline, 60)),
            truncate_chars(text, 500),
        )
        .with_case(case(format!(
            "The {element} is present and matches: {}",
            truncate_chars(headline, 100)
        )))
        .with_source(E::SOURCE)];
    }

    let kind = characterize(meta).unwrap_or(E::LABEL);
    let pairs = meta.pairs();
    let details = if pairs.is_empty() {
        "no metadata available".to_string()
    } else {
        pairs
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    vec![Scenario::new(
        format!("{prefix}{} content check", capitalize(kind)),
        format!("Generic check derived from {element} metadata:\n{details}"),
    )
    .with_case(case(format!(
        "The {element} is displayed and consistent with the surrounding document"
    )))
    .with_source(E::SOURCE)]
}

fn native_scenarios(reply: &Map<String, Value>) -> Option<Vec<Scenario>> {
    parse::scenario_list(reply, &["test_scenarios", "testScenarios"])
}

fn analysis_text(reply: &Map<String, Value>) -> Option<&str> {
    ["analysis", "description", "caption"]
        .into_iter()
        .filter_map(|key| reply.get(key)?.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Guess what kind of picture an element is from its pixel size.
fn characterize(meta: &ElementMeta) -> Option<&'static str> {
    let (w, h) = (meta.width?, meta.height?);
    let (wf, hf) = (f64::from(w), f64::from(h));
    Some(if wf > hf * 1.5 {
        "diagram"
    } else if w > h {
        "screenshot"
    } else if w < 100 && h < 100 {
        "icon"
    } else {
        "image"
    })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Short human description of an insight, used when the generator has to
/// describe elements instead of quoting document text.
pub fn describe(insight: &ElementInsight) -> Option<String> {
    insight
        .analysis
        .as_ref()
        .and_then(Value::as_object)
        .and_then(analysis_text)
        .or_else(|| insight.source_element.label())
        .map(|s| truncate_chars(s, 200))
}
