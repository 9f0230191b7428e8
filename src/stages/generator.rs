//! # Stage: Scenario Generation
//!
//! ## Responsibility
//! Produce the draft scenario list from the document text, the
//! classification and every enrichment insight, with one call to the
//! technical tier.
//!
//! ## Guarantees
//! - Never sends an empty prompt: near-empty text is replaced by a short
//!   description synthesized from the enrichment insights, and a request
//!   with nothing to work from fails locally with `Validation`
//! - A draft always holds at least one normalized scenario tagged `text`
//! - Calls exactly the model it is given; substitution is the
//!   orchestrator's single-model retry
//!
//! ## NOT Responsible For
//! - Merging enrichment scenarios into the draft (that belongs to synthesis)

use super::{enrichment, instrumented, parse, prompts, StageContext};
use crate::routing::ModelConfig;
use crate::types::{
    prefix_chars, ContentUnit, DocumentClassification, ElementInsight, Scenario, ScenarioDraft,
    ScenarioSource, StageKind, StagePayload, StageResult, TaskType,
};
use crate::ModelError;
use serde_json::Value;
use tracing::debug;

/// Default near-empty text threshold in characters.
pub const DEFAULT_MIN_TEXT_CHARS: usize = 50;
/// Default size of the text sample used as a selection hint.
pub const DEFAULT_HINT_CHARS: usize = 2000;

/// How many elements per category the synthesized text describes.
const DESCRIBED_PER_CATEGORY: usize = 3;

/// Everything the generator reads for one call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// Original input.
    pub unit: &'a ContentUnit,
    /// Classification, if that stage succeeded.
    pub classification: Option<&'a DocumentClassification>,
    /// Image insights in input order.
    pub images: &'a [ElementInsight],
    /// Table insights in input order.
    pub tables: &'a [ElementInsight],
    /// Diagram insights in input order.
    pub diagrams: &'a [ElementInsight],
    /// Leave the document text out and frame the prompt on insights only.
    pub suppress_text: bool,
}

impl<'a> GenerationRequest<'a> {
    /// A request over text alone.
    pub fn text_only(unit: &'a ContentUnit) -> Self {
        Self {
            unit,
            classification: None,
            images: &[],
            tables: &[],
            diagrams: &[],
            suppress_text: false,
        }
    }

    /// The same request with the document text left out.
    pub fn without_text(self) -> Self {
        Self {
            suppress_text: true,
            ..self
        }
    }

    fn has_insights(&self) -> bool {
        !(self.images.is_empty() && self.tables.is_empty() && self.diagrams.is_empty())
    }
}

/// Scenario generation stage.
#[derive(Debug, Clone)]
pub struct ScenarioGeneratorStage {
    ctx: StageContext,
    min_text_chars: usize,
    hint_chars: usize,
}

impl ScenarioGeneratorStage {
    /// Build the stage with the near-empty threshold and hint size.
    pub fn new(ctx: StageContext, min_text_chars: usize, hint_chars: usize) -> Self {
        Self {
            ctx,
            min_text_chars,
            hint_chars,
        }
    }

    /// Model for the first attempt. `preferred` replaces the model name.
    pub fn primary_model(
        &self,
        unit: &ContentUnit,
        complexity: f64,
        preferred: Option<&str>,
    ) -> ModelConfig {
        let hint = prefix_chars(&unit.text, self.hint_chars);
        let hint = (!hint.trim().is_empty()).then_some(hint);
        let mut config = self.ctx.selector.select_for(
            TaskType::Technical,
            hint,
            unit.text_chars(),
            Some(complexity),
        );
        if let Some(name) = preferred {
            config.model_name = name.to_string();
        }
        config
    }

    /// Model for the single-model retry.
    pub fn fallback_model(&self) -> ModelConfig {
        self.ctx.selector.get_fallback(TaskType::Technical)
    }

    /// Run one generation attempt against `model`.
    pub async fn generate(&self, request: &GenerationRequest<'_>, model: &ModelConfig) -> StageResult {
        instrumented(StageKind::Generation, async {
            let text = self.document_text(request);
            let nothing_to_say = text.as_deref().map_or(true, |t| t.trim().is_empty())
                && !request.has_insights()
                && request.classification.is_none();
            if nothing_to_say {
                return StageResult::failed(
                    StageKind::Generation,
                    None,
                    ModelError::Validation("no text or insights to generate from".to_string()),
                    0,
                );
            }

            let visual: Vec<Scenario> = request
                .images
                .iter()
                .chain(request.diagrams)
                .flat_map(|i| i.scenarios.iter().cloned())
                .collect();
            let tabular: Vec<Scenario> = request
                .tables
                .iter()
                .flat_map(|i| i.scenarios.iter().cloned())
                .collect();

            let prompt = prompts::generation(prompts::GenerationContext {
                text: text.as_deref(),
                classification: request.classification,
                visual_insights: &visual,
                table_insights: &tabular,
                image_count: request.unit.images.len(),
                table_count: request.unit.tables.len(),
                diagram_count: request.unit.diagrams.len(),
            });
            debug!(
                target: "orchestrator::pipeline",
                prompt_chars = prompt.len_chars(),
                suppress_text = request.suppress_text,
                model = %model.model_name,
                "generation prompt assembled"
            );

            let invocation = self
                .ctx
                .controller
                .invoke(model, None, &prompt, parse_draft)
                .await;

            match invocation.result {
                Ok(draft) => StageResult::ok(
                    StageKind::Generation,
                    invocation.model_used,
                    StagePayload::Draft(draft),
                    0,
                ),
                Err(e) => StageResult::failed(StageKind::Generation, invocation.model_used, e, 0),
            }
        })
        .await
    }

    /// Text to put in the prompt, or `None` when it is suppressed.
    fn document_text(&self, request: &GenerationRequest<'_>) -> Option<String> {
        if request.suppress_text {
            return None;
        }
        let unit = request.unit;
        if unit.text.trim().chars().count() < self.min_text_chars && request.has_insights() {
            return Some(synthesize_text(request));
        }
        Some(unit.text.clone())
    }
}

/// Short description of the document built from enrichment insights.
fn synthesize_text(request: &GenerationRequest<'_>) -> String {
    let mut text = format!(
        "The document contains {} image(s) and {} table(s).",
        request.unit.images.len(),
        request.unit.tables.len()
    );
    for (label, insights) in [
        ("Image", request.images),
        ("Table", request.tables),
        ("Diagram", request.diagrams),
    ] {
        for insight in insights.iter().take(DESCRIBED_PER_CATEGORY) {
            if let Some(description) = enrichment::describe(insight) {
                text.push_str(&format!("\n{label} {}: {description}", insight.index + 1));
            }
        }
    }
    text
}

/// Keys a draft reply may list its scenarios under; the first present wins.
const DRAFT_KEYS: [&str; 3] = ["scenarios", "test_scenarios", "testScenarios"];

fn parse_draft(raw: &str) -> Result<ScenarioDraft, ModelError> {
    let reply = parse::json_object(raw)?;
    let scenarios = parse::scenario_list(&reply, &DRAFT_KEYS).unwrap_or_default();
    if scenarios.is_empty() {
        return Err(ModelError::MalformedResponse(
            "reply contained no usable scenarios".to_string(),
        ));
    }
    let summary = reply
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(ScenarioDraft {
        summary,
        scenarios: scenarios
            .into_iter()
            .map(|s| s.with_source(ScenarioSource::Text).normalized())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{FallbackController, RetryPolicy};
    use crate::routing::ModelSelector;
    use crate::types::{ElementMeta, ImageElement};
    use crate::worker::{ModelResponse, ModelWorker, PromptPayload};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Records every prompt and answers with a fixed body.
    struct Recorder {
        reply: &'static str,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelWorker for Recorder {
        async fn invoke(
            &self,
            config: &ModelConfig,
            prompt: &PromptPayload,
        ) -> Result<ModelResponse, ModelError> {
            if let Ok(mut p) = self.prompts.lock() {
                p.push(prompt.user.clone());
            }
            Ok(ModelResponse {
                content: self.reply.to_string(),
                model: config.model_name.clone(),
            })
        }
    }

    fn stage(reply: &'static str) -> (ScenarioGeneratorStage, Arc<Recorder>) {
        let worker = Arc::new(Recorder {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        let controller = FallbackController::new(
            worker.clone(),
            Arc::new(Semaphore::new(2)),
            RetryPolicy::none(),
            Duration::from_secs(5),
        );
        let ctx = StageContext::new(controller, Arc::new(ModelSelector::default()));
        (
            ScenarioGeneratorStage::new(ctx, DEFAULT_MIN_TEXT_CHARS, DEFAULT_HINT_CHARS),
            worker,
        )
    }

    const DRAFT: &str = r#"{"summary": "plan", "scenarios": [
        {"title": "Login", "description": "d", "testCases": [
            {"title": "t", "steps": ["1. open", "2. log in"], "expected_results": "home"}]},
        {"title": "Logout", "description": "d"}]}"#;

    fn insight(caption: &str) -> ElementInsight {
        ElementInsight {
            index: 0,
            source_element: ElementMeta::captioned(caption),
            model_used: None,
            analysis: None,
            scenarios: vec![Scenario::new(format!("Image 1 - {caption}"), caption)],
            error: None,
        }
    }

    #[tokio::test]
    async fn test_draft_scenarios_are_tagged_and_normalized() {
        let (s, _) = stage(DRAFT);
        let unit = ContentUnit::from_text("The user logs in with a password and sees the home page.");
        let model = s.primary_model(&unit, 0.5, None);
        let result = s.generate(&GenerationRequest::text_only(&unit), &model).await;
        match result.payload {
            Some(StagePayload::Draft(draft)) => {
                assert_eq!(draft.scenarios.len(), 2);
                assert!(draft
                    .scenarios
                    .iter()
                    .all(|sc| sc.source == Some(ScenarioSource::Text) && !sc.test_cases.is_empty()));
                assert_eq!(draft.scenarios[0].test_cases[0].steps, "1. open\n2. log in");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_scenario_list_is_malformed() {
        let (s, _) = stage(r#"{"summary": "x", "scenarios": []}"#);
        let unit = ContentUnit::from_text("Some document text that is long enough to be used.");
        let model = s.fallback_model();
        let result = s.generate(&GenerationRequest::text_only(&unit), &model).await;
        assert!(matches!(result.error, Some(ModelError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_one_bad_scenario_does_not_sink_the_draft() {
        let (s, _) = stage(
            r#"{"summary": "plan", "scenarios": [
                {"title": "Login", "description": "d", "priority": 1, "source": "requirements"},
                {"title": "Broken", "description": "d", "test_cases": "not a list"},
                {"title": "Logout", "description": "d", "category": "functional"}]}"#,
        );
        let unit = ContentUnit::from_text("The user logs in with a password and sees the home page.");
        let model = s.fallback_model();
        let result = s.generate(&GenerationRequest::text_only(&unit), &model).await;
        assert!(result.error.is_none());
        match result.payload {
            Some(StagePayload::Draft(draft)) => {
                let titles: Vec<&str> = draft.scenarios.iter().map(|sc| sc.title.as_str()).collect();
                assert_eq!(titles, ["Login", "Logout"]);
                assert_eq!(draft.scenarios[0].priority.as_deref(), Some("1"));
                assert_eq!(draft.scenarios[0].source, Some(ScenarioSource::Text));
                assert_eq!(draft.summary, "plan");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_draft_with_both_list_keys_uses_scenarios() {
        let (s, _) = stage(
            r#"{"scenarios": [{"title": "Primary", "description": "d"}],
                "test_scenarios": [{"title": "Secondary", "description": "d"}]}"#,
        );
        let unit = ContentUnit::from_text("The user logs in with a password and sees the home page.");
        let model = s.fallback_model();
        let result = s.generate(&GenerationRequest::text_only(&unit), &model).await;
        match result.payload {
            Some(StagePayload::Draft(draft)) => {
                assert_eq!(draft.scenarios.len(), 1);
                assert_eq!(draft.scenarios[0].title, "Primary");
                assert!(draft.summary.is_empty());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_only_bad_scenarios_is_malformed() {
        let (s, _) = stage(r#"{"scenarios": [{"title": "Broken", "test_cases": 7}, "stray"]}"#);
        let unit = ContentUnit::from_text("Some document text that is long enough to be used.");
        let model = s.fallback_model();
        let result = s.generate(&GenerationRequest::text_only(&unit), &model).await;
        assert!(matches!(result.error, Some(ModelError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_near_empty_text_is_replaced_by_insight_description() {
        let (s, worker) = stage(DRAFT);
        let unit = ContentUnit {
            images: vec![ImageElement::default()],
            ..ContentUnit::default()
        };
        let images = vec![insight("Login form")];
        let request = GenerationRequest {
            images: &images,
            ..GenerationRequest::text_only(&unit)
        };
        let model = s.fallback_model();
        let result = s.generate(&request, &model).await;
        assert!(result.is_ok());
        let prompts = worker.prompts.lock().map(|p| p.clone()).unwrap_or_default();
        assert!(prompts[0].contains("The document contains 1 image(s) and 0 table(s)."));
        assert!(prompts[0].contains("Image 1: Login form"));
    }

    #[tokio::test]
    async fn test_nothing_to_generate_from_skips_the_call() {
        let (s, worker) = stage(DRAFT);
        let unit = ContentUnit::default();
        let model = s.fallback_model();
        let result = s.generate(&GenerationRequest::text_only(&unit), &model).await;
        assert!(matches!(result.error, Some(ModelError::Validation(_))));
        assert!(worker.prompts.lock().map(|p| p.is_empty()).unwrap_or(false));
    }

    #[test]
    fn test_preferred_model_overrides_name() {
        let (s, _) = stage(DRAFT);
        let unit = ContentUnit::from_text("x");
        let config = s.primary_model(&unit, 0.9, Some("my-model"));
        assert_eq!(config.model_name, "my-model");
    }
}
