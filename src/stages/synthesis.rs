//! # Stage: Synthesis
//!
//! ## Responsibility
//! Combine everything the run produced into the final scenario list and
//! summary.
//!
//! ## Guarantees
//! - With a draft: the draft's scenarios come first, followed by
//!   enrichment scenarios whose titles are not already present; a
//!   model-written executive summary is attempted but never required
//! - Without a draft: scenarios are built from enrichment insights only,
//!   and if there are none, from the fixed basic functionality scenario
//! - The scenario list is never empty and every scenario has a test case
//! - Classification and all three analysis summaries are always passed
//!   through for traceability
//!
//! ## NOT Responsible For
//! - Assembling run metadata (timing, models, run id)

use super::{instrumented, parse, prompts, StageContext};
use crate::types::{
    AnalysisSummary, DocumentClassification, ElementInsight, Scenario, ScenarioDraft, StageKind,
    StagePayload, StageResult, TaskType, TestCase,
};
use crate::ModelError;
use std::collections::HashSet;
use tokio::time::Instant;
use tracing::info;

/// Title of the fixed scenario returned when nothing else is available.
pub const BASIC_SCENARIO_TITLE: &str = "Basic Functionality Test";

/// Inputs to synthesis, consumed once per run.
#[derive(Debug, Clone, Default)]
pub struct SynthesisInput {
    /// Generation output, if either attempt succeeded.
    pub draft: Option<ScenarioDraft>,
    /// Classification, if that stage succeeded.
    pub classification: Option<DocumentClassification>,
    /// Image insights in input order.
    pub images: Vec<ElementInsight>,
    /// Table insights in input order.
    pub tables: Vec<ElementInsight>,
    /// Diagram insights in input order.
    pub diagrams: Vec<ElementInsight>,
}

/// Synthesis output.
#[derive(Debug, Clone)]
pub struct Synthesized {
    /// Executive summary.
    pub summary: String,
    /// Final scenarios, never empty.
    pub scenarios: Vec<Scenario>,
    /// Passed-through classification.
    pub classification: Option<DocumentClassification>,
    /// Image results with count.
    pub image_analysis: AnalysisSummary,
    /// Table results with count.
    pub table_analysis: AnalysisSummary,
    /// Diagram results with count.
    pub diagram_analysis: AnalysisSummary,
    /// The summary call, present whenever a draft existed.
    pub stage_result: Option<StageResult>,
}

/// Final merge stage.
#[derive(Debug, Clone)]
pub struct SynthesisStage {
    ctx: StageContext,
}

impl SynthesisStage {
    /// Build the stage.
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    /// Merge a run's outputs. The summary call is skipped, and recorded as
    /// timed out, once `deadline` has passed.
    pub async fn synthesize(&self, input: SynthesisInput, deadline: Instant) -> Synthesized {
        let SynthesisInput {
            draft,
            classification,
            images,
            tables,
            diagrams,
        } = input;

        let enrichment: Vec<Scenario> = [&images, &tables, &diagrams]
            .into_iter()
            .flat_map(|insights| insights.iter().flat_map(|i| i.scenarios.iter().cloned()))
            .collect();

        let (summary, scenarios, stage_result) = match draft {
            Some(draft) => {
                let result = if Instant::now() < deadline {
                    match tokio::time::timeout_at(deadline, self.summarize(&draft)).await {
                        Ok(result) => result,
                        Err(_) => StageResult::timed_out(StageKind::Synthesis, 0),
                    }
                } else {
                    StageResult::timed_out(StageKind::Synthesis, 0)
                };
                let summary = match &result.payload {
                    Some(StagePayload::Summary(s)) => s.clone(),
                    _ => draft_summary(&draft),
                };
                (summary, merge(draft.scenarios, enrichment), Some(result))
            }
            None => {
                let scenarios = if enrichment.is_empty() {
                    vec![basic_scenario()]
                } else {
                    enrichment.into_iter().map(Scenario::normalized).collect()
                };
                info!(
                    target: "orchestrator::pipeline",
                    scenarios = scenarios.len(),
                    "no generated draft, using deterministic scenarios"
                );
                let summary = deterministic_summary(&images, &tables, &diagrams);
                (summary, scenarios, None)
            }
        };

        Synthesized {
            summary,
            scenarios,
            classification,
            image_analysis: AnalysisSummary::from_results(images),
            table_analysis: AnalysisSummary::from_results(tables),
            diagram_analysis: AnalysisSummary::from_results(diagrams),
            stage_result,
        }
    }

    async fn summarize(&self, draft: &ScenarioDraft) -> StageResult {
        instrumented(StageKind::Synthesis, async {
            let selector = &self.ctx.selector;
            let primary = selector.select_for(TaskType::Integration, None, 0, None);
            let fallback = selector.get_fallback(TaskType::Integration);
            let prompt = prompts::summary(draft);
            let invocation = self
                .ctx
                .controller
                .invoke(&primary, Some(&fallback), &prompt, parse_summary)
                .await;
            match invocation.result {
                Ok(summary) => StageResult::ok(
                    StageKind::Synthesis,
                    invocation.model_used,
                    StagePayload::Summary(summary),
                    0,
                ),
                Err(e) => StageResult::failed(StageKind::Synthesis, invocation.model_used, e, 0),
            }
        })
        .await
    }
}

fn parse_summary(raw: &str) -> Result<String, ModelError> {
    let reply = parse::json_object(raw)?;
    reply
        .get("summary")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ModelError::MalformedResponse("reply has no summary".to_string()))
}

/// Draft scenarios first, then enrichment scenarios with unseen titles.
fn merge(draft: Vec<Scenario>, enrichment: Vec<Scenario>) -> Vec<Scenario> {
    let mut seen: HashSet<String> = draft.iter().map(|s| s.title.to_lowercase()).collect();
    let mut merged = draft;
    for scenario in enrichment {
        if seen.insert(scenario.title.to_lowercase()) {
            merged.push(scenario.normalized());
        }
    }
    if merged.is_empty() {
        merged.push(basic_scenario());
    }
    merged
}

fn draft_summary(draft: &ScenarioDraft) -> String {
    if draft.summary.trim().is_empty() {
        format!("{} test scenario(s) generated.", draft.scenarios.len())
    } else {
        draft.summary.clone()
    }
}

fn deterministic_summary(
    images: &[ElementInsight],
    tables: &[ElementInsight],
    diagrams: &[ElementInsight],
) -> String {
    if images.is_empty() && tables.is_empty() && diagrams.is_empty() {
        return "Automatic scenario generation was unavailable; a basic functionality \
                scenario was produced instead."
            .to_string();
    }
    format!(
        "Automatic scenario generation was unavailable; scenarios were derived from \
         {} image(s), {} table(s) and {} diagram(s).",
        images.len(),
        tables.len(),
        diagrams.len()
    )
}

/// The unconditional floor scenario.
pub fn basic_scenario() -> Scenario {
    Scenario::new(
        BASIC_SCENARIO_TITLE,
        "Verify that the core functions of the system work",
    )
    .with_case(TestCase::new(
        "Basic functionality check",
        "1. Log in to the system\n2. Go to the main page\n3. Check core functions",
        "System core functions work without errors",
    ))
}
