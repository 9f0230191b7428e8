//! End-to-end tests for the orchestrator against a scripted model worker.
//!
//! Covers:
//! - Non-empty output for empty and fully failing inputs
//! - Partial failure isolation between enrichment stages
//! - Order preservation inside a stage
//! - Generation retry on the fallback model, and its absence on auth errors
//! - Pipeline deadline and worker pool bounds

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use scenario_orchestrator::config::PipelineConfig;
use scenario_orchestrator::stages::synthesis::BASIC_SCENARIO_TITLE;
use scenario_orchestrator::types::{
    ElementMeta, ImageElement, ScenarioSource, StageKind, TableElement,
};
use scenario_orchestrator::{
    ContentUnit, ModelConfig, ModelError, ModelWorker, Orchestrator, ProcessOptions,
    PromptPayload, Strategy,
};
use scenario_orchestrator::worker::ModelResponse;

// ============================================================================
// Scripted worker
// ============================================================================

type Script = dyn Fn(&ModelConfig, &PromptPayload) -> Result<String, ModelError> + Send + Sync;

/// Worker whose replies come from a closure. Records every call and the
/// highest number of calls in flight at once.
struct Scripted {
    script: Box<Script>,
    delay: Box<dyn Fn(&PromptPayload) -> Duration + Send + Sync>,
    calls: Mutex<Vec<(StageKind, String, String)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Scripted {
    fn new(
        script: impl Fn(&ModelConfig, &PromptPayload) -> Result<String, ModelError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            delay: Box::new(|_| Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: impl Fn(&PromptPayload) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    fn calls_for(&self, stage: StageKind) -> Vec<(String, String)> {
        self.calls
            .lock()
            .expect("test: calls lock")
            .iter()
            .filter(|(s, _, _)| *s == stage)
            .map(|(_, model, user)| (model.clone(), user.clone()))
            .collect()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().expect("test: calls lock").len()
    }
}

#[async_trait]
impl ModelWorker for Scripted {
    async fn invoke(
        &self,
        config: &ModelConfig,
        prompt: &PromptPayload,
    ) -> Result<ModelResponse, ModelError> {
        self.calls.lock().expect("test: calls lock").push((
            prompt.stage,
            config.model_name.clone(),
            prompt.user.clone(),
        ));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = (self.delay)(prompt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = (self.script)(config, prompt);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        reply.map(|content| ModelResponse {
            content,
            model: config.model_name.clone(),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Defaults with millisecond retries so failing paths stay fast.
fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.resilience.retry_attempts = 3;
    config.resilience.retry_base_ms = 1;
    config.resilience.retry_max_ms = 1;
    config.resilience.jitter = false;
    config
}

fn classification_reply() -> String {
    json!({"document_type": "specification", "domain": "billing", "key_topics": ["invoices"]})
        .to_string()
}

fn element_reply(title: &str) -> String {
    json!({
        "description": format!("analysis of {title}"),
        "test_scenarios": [{
            "title": title,
            "description": "derived from the element",
            "test_cases": [{
                "title": "check",
                "steps": "1. Open it\n2. Look at it",
                "expected_results": "It is there"
            }]
        }]
    })
    .to_string()
}

fn draft_reply() -> String {
    json!({
        "summary": "Invoices can be created and exported",
        "scenarios": [{
            "title": "Create invoice",
            "description": "A user creates an invoice",
            "test_cases": [{
                "title": "Happy path",
                "steps": ["Open invoices", "Click create", "Save"],
                "expected_results": "The invoice is listed"
            }]
        }]
    })
    .to_string()
}

fn summary_reply() -> String {
    json!({"summary": "Merged summary of every stage"}).to_string()
}

/// Replies successfully to every stage.
fn happy(_: &ModelConfig, prompt: &PromptPayload) -> Result<String, ModelError> {
    Ok(match prompt.stage {
        StageKind::Classification => classification_reply(),
        StageKind::ImageEnrichment => element_reply("Screen layout"),
        StageKind::TableEnrichment => element_reply("Limits table"),
        StageKind::DiagramEnrichment => element_reply("Flow"),
        StageKind::Generation => draft_reply(),
        StageKind::Synthesis => summary_reply(),
    })
}

fn image(caption: &str) -> ImageElement {
    ImageElement {
        meta: ElementMeta::captioned(caption),
        data: None,
    }
}

fn table(caption: &str) -> TableElement {
    TableElement {
        meta: ElementMeta::captioned(caption),
        content: Some(format!("| {caption} | 1 |")),
        rows: Vec::new(),
    }
}

fn technical_text(chars: usize) -> String {
    let sentence = "The billing API validates each invoice request, applies tax rules and \
                    persists the invoice with an audit trail. ";
    sentence.repeat(chars / sentence.len() + 1)[..chars].to_string()
}

fn assert_well_formed(set: &scenario_orchestrator::ScenarioSet) {
    assert!(!set.scenarios.is_empty(), "scenario set must never be empty");
    for s in &set.scenarios {
        assert!(!s.title.trim().is_empty());
        assert!(!s.test_cases.is_empty(), "scenario {:?} has no test case", s.title);
        for case in &s.test_cases {
            assert!(!case.steps.trim().is_empty());
            assert!(!case.expected_results.trim().is_empty());
        }
    }
}

// ============================================================================
// Non-empty floor
// ============================================================================

#[tokio::test]
async fn test_empty_unit_returns_basic_scenario_without_calls() {
    let worker = Arc::new(Scripted::new(happy));
    let orch = Orchestrator::new(worker.clone(), &fast_config());

    let set = orch.process(&ContentUnit::default()).await;

    assert_well_formed(&set);
    assert_eq!(set.scenarios.len(), 1);
    assert_eq!(set.scenarios[0].title, BASIC_SCENARIO_TITLE);
    assert!(set.metadata.degraded);
    assert_eq!(worker.total_calls(), 0);
    assert!(!set.summary.trim().is_empty());
}

#[tokio::test]
async fn test_happy_path_merges_every_stage() {
    let worker = Arc::new(Scripted::new(happy));
    let orch = Orchestrator::new(worker.clone(), &fast_config());
    let unit = ContentUnit {
        text: technical_text(600),
        images: vec![image("Login screen")],
        tables: vec![table("Rate limits")],
        ..ContentUnit::default()
    };

    let set = orch.process(&unit).await;

    assert_well_formed(&set);
    assert!(!set.metadata.degraded);
    assert_eq!(set.summary, "Merged summary of every stage");
    assert_eq!(set.scenarios[0].title, "Create invoice");
    assert_eq!(set.scenarios[0].source, Some(ScenarioSource::Text));
    assert!(set
        .scenarios
        .iter()
        .any(|s| s.source == Some(ScenarioSource::Image)));
    assert!(set
        .scenarios
        .iter()
        .any(|s| s.source == Some(ScenarioSource::Table)));
    assert_eq!(
        set.metadata
            .document_classification
            .as_ref()
            .and_then(|c| c.domain.as_deref()),
        Some("billing")
    );
    assert!(set.metadata.stage_results.iter().all(|r| r.error.is_none()));
    assert_eq!(set.metadata.document_size, 600);
}

// ============================================================================
// Partial failure isolation
// ============================================================================

#[tokio::test]
async fn test_image_failure_does_not_affect_tables_or_diagrams() {
    let worker = Arc::new(Scripted::new(|config, prompt| {
        if prompt.stage == StageKind::ImageEnrichment {
            return Err(ModelError::Auth("vision key revoked".into()));
        }
        happy(config, prompt)
    }));
    let orch = Orchestrator::new(worker.clone(), &fast_config());
    let unit = ContentUnit {
        text: technical_text(400),
        images: vec![image("Dashboard"), image("Settings")],
        tables: vec![table("Quotas")],
        diagrams: vec![scenario_orchestrator::types::DiagramElement {
            meta: ElementMeta::captioned("Checkout flow"),
            data: None,
        }],
    };

    let set = orch.process(&unit).await;

    assert_well_formed(&set);
    assert!(!set.metadata.degraded);

    let images = &set.metadata.image_analysis;
    assert_eq!(images.count, 2);
    assert!(images
        .results
        .iter()
        .all(|r| matches!(r.error, Some(ModelError::Auth(_)))));
    // failed images still contribute metadata-derived scenarios
    assert!(images.results.iter().all(|r| !r.scenarios.is_empty()));

    let image_stage = set
        .metadata
        .stage_results
        .iter()
        .find(|r| r.stage == StageKind::ImageEnrichment)
        .expect("test: image stage recorded");
    assert!(matches!(image_stage.error, Some(ModelError::Auth(_))));

    assert_eq!(set.metadata.table_analysis.count, 1);
    assert!(set.metadata.table_analysis.results[0].error.is_none());
    assert_eq!(set.metadata.diagram_analysis.count, 1);
    assert!(set.metadata.diagram_analysis.results[0].error.is_none());
    assert!(set
        .scenarios
        .iter()
        .any(|s| s.source == Some(ScenarioSource::Table)));
    assert!(set
        .scenarios
        .iter()
        .any(|s| s.source == Some(ScenarioSource::Diagram)));

    // auth is never retried and never falls back: one call per image
    assert_eq!(worker.calls_for(StageKind::ImageEnrichment).len(), 2);
}

// ============================================================================
// Order preservation
// ============================================================================

#[tokio::test]
async fn test_table_results_keep_input_order() {
    let worker = Arc::new(
        Scripted::new(happy).with_delay(|prompt| {
            // the first table finishes last
            if prompt.user.contains("Alpha") {
                Duration::from_millis(40)
            } else if prompt.user.contains("Beta") {
                Duration::from_millis(20)
            } else {
                Duration::ZERO
            }
        }),
    );
    let orch = Orchestrator::new(worker, &fast_config());
    let unit = ContentUnit {
        text: technical_text(300),
        tables: vec![table("Alpha"), table("Beta"), table("Gamma")],
        ..ContentUnit::default()
    };

    let set = orch.process(&unit).await;

    let captions: Vec<_> = set
        .metadata
        .table_analysis
        .results
        .iter()
        .map(|r| r.source_element.caption.clone().unwrap_or_default())
        .collect();
    assert_eq!(captions, vec!["Alpha", "Beta", "Gamma"]);
    let indices: Vec<_> = set
        .metadata
        .table_analysis
        .results
        .iter()
        .map(|r| r.index)
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

// ============================================================================
// Image-only documents
// ============================================================================

#[tokio::test]
async fn test_images_without_text_generate_from_insights() {
    let worker = Arc::new(Scripted::new(happy));
    let orch = Orchestrator::new(worker.clone(), &fast_config());
    let unit = ContentUnit {
        images: vec![image("one"), image("two"), image("three")],
        ..ContentUnit::default()
    };

    let set = orch.process(&unit).await;

    assert_well_formed(&set);
    assert!(!set.metadata.degraded);
    let image_scenarios = set
        .scenarios
        .iter()
        .filter(|s| s.source == Some(ScenarioSource::Image))
        .count();
    assert!(image_scenarios >= 3);

    // blank text is never classified, and never sent as an empty prompt
    assert!(worker.calls_for(StageKind::Classification).is_empty());
    let generation = worker.calls_for(StageKind::Generation);
    assert_eq!(generation.len(), 1);
    assert!(generation[0].1.contains("The document contains 3 image(s)"));
}

#[tokio::test]
async fn test_images_without_text_degrade_with_image_scenarios() {
    let worker = Arc::new(Scripted::new(|config, prompt| {
        if prompt.stage == StageKind::Generation {
            return Ok("this is not json".into());
        }
        happy(config, prompt)
    }));
    let orch = Orchestrator::new(worker.clone(), &fast_config());
    let unit = ContentUnit {
        images: vec![image("one"), image("two"), image("three")],
        ..ContentUnit::default()
    };

    let set = orch.process(&unit).await;

    assert_well_formed(&set);
    assert!(set.metadata.degraded);
    assert!(
        set.scenarios
            .iter()
            .filter(|s| s.source == Some(ScenarioSource::Image))
            .count()
            >= 3
    );
    assert!(set.scenarios.iter().all(|s| s.title != BASIC_SCENARIO_TITLE));

    // primary attempt plus one fallback retry
    let generation: Vec<_> = set
        .metadata
        .stage_results
        .iter()
        .filter(|r| r.stage == StageKind::Generation)
        .collect();
    assert_eq!(generation.len(), 2);
    assert!(generation
        .iter()
        .all(|r| matches!(r.error, Some(ModelError::MalformedResponse(_)))));
}

// ============================================================================
// Total failure
// ============================================================================

#[tokio::test]
async fn test_all_calls_failing_yields_single_basic_scenario() {
    let worker = Arc::new(Scripted::new(|_, _| {
        Err(ModelError::Network("connection refused".into()))
    }));
    let orch = Orchestrator::new(worker.clone(), &fast_config());

    let set = orch.process(&ContentUnit::from_text(technical_text(5000))).await;

    assert_well_formed(&set);
    assert!(set.metadata.degraded);
    assert_eq!(set.scenarios.len(), 1);
    assert_eq!(set.scenarios[0].title, BASIC_SCENARIO_TITLE);
    assert!(set.metadata.models_used.is_empty());
    assert!(set
        .metadata
        .stage_results
        .iter()
        .all(|r| matches!(r.error, Some(ModelError::Network(_)))));
    // no summary call without a draft
    assert!(worker.calls_for(StageKind::Synthesis).is_empty());
}

// ============================================================================
// Generation retry policy
// ============================================================================

#[tokio::test]
async fn test_auth_error_on_generation_is_not_retried() {
    let worker = Arc::new(Scripted::new(|config, prompt| {
        if prompt.stage == StageKind::Generation {
            return Err(ModelError::Auth("401".into()));
        }
        happy(config, prompt)
    }));
    let orch = Orchestrator::new(worker.clone(), &fast_config());

    let set = orch.process(&ContentUnit::from_text(technical_text(800))).await;

    assert!(set.metadata.degraded);
    assert_eq!(worker.calls_for(StageKind::Generation).len(), 1);
    let generation: Vec<_> = set
        .metadata
        .stage_results
        .iter()
        .filter(|r| r.stage == StageKind::Generation)
        .collect();
    assert_eq!(generation.len(), 1);
    assert!(matches!(generation[0].error, Some(ModelError::Auth(_))));
}

#[tokio::test]
async fn test_retry_suppresses_text_when_rich_content_exists() {
    let first_model = Arc::new(Mutex::new(None::<String>));
    let seen = Arc::clone(&first_model);
    let worker = Arc::new(Scripted::new(move |config, prompt| {
        if prompt.stage == StageKind::Generation {
            let mut first = seen.lock().expect("test: lock");
            if first.is_none() {
                *first = Some(config.model_name.clone());
                return Ok("{\"scenarios\": []}".into());
            }
        }
        happy(config, prompt)
    }));
    let orch = Orchestrator::new(worker.clone(), &fast_config());
    let unit = ContentUnit {
        text: format!("MARKER-7731 {}", technical_text(400)),
        tables: vec![table("Fees")],
        ..ContentUnit::default()
    };

    let set = orch.process(&unit).await;

    assert!(!set.metadata.degraded);
    let generation = worker.calls_for(StageKind::Generation);
    assert_eq!(generation.len(), 2);
    assert!(generation[0].1.contains("MARKER-7731"));
    assert!(!generation[1].1.contains("MARKER-7731"));
    assert_eq!(generation[1].0, fast_config().models.technical.fallback.model_name);
}

#[tokio::test]
async fn test_preferred_model_is_used_for_generation() {
    let worker = Arc::new(Scripted::new(happy));
    let orch = Orchestrator::new(worker.clone(), &fast_config());
    let options = ProcessOptions {
        strategy: Strategy::MultiModel,
        preferred_model: Some("custom-writer".into()),
    };

    let set = orch
        .process_with(&ContentUnit::from_text(technical_text(300)), &options)
        .await;

    assert!(!set.metadata.degraded);
    let generation = worker.calls_for(StageKind::Generation);
    assert_eq!(generation[0].0, "custom-writer");
    assert!(set.metadata.models_used.contains(&"custom-writer".to_string()));
}

#[tokio::test]
async fn test_single_model_strategy_makes_no_enrichment_calls() {
    let worker = Arc::new(Scripted::new(happy));
    let orch = Orchestrator::new(worker.clone(), &fast_config());
    let unit = ContentUnit {
        text: technical_text(300),
        images: vec![image("ignored")],
        ..ContentUnit::default()
    };

    let set = orch.process_with(&unit, &ProcessOptions::single_model()).await;

    assert!(!set.metadata.degraded);
    assert!(worker.calls_for(StageKind::Classification).is_empty());
    assert!(worker.calls_for(StageKind::ImageEnrichment).is_empty());
    assert_eq!(worker.calls_for(StageKind::Generation).len(), 1);
}

// ============================================================================
// Deadline and pool bounds
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_slow_generation() {
    let worker = Arc::new(Scripted::new(happy).with_delay(|prompt| {
        if prompt.stage == StageKind::Generation {
            Duration::from_secs(600)
        } else {
            Duration::from_secs(1)
        }
    }));
    let mut config = fast_config();
    config.limits.pipeline_deadline_s = 180;
    config.limits.call_timeout_s = 1000;
    let orch = Orchestrator::new(worker.clone(), &config);

    let set = orch.process(&ContentUnit::from_text(technical_text(500))).await;

    assert_well_formed(&set);
    assert!(set.metadata.degraded);
    assert!(set.metadata.total_time_ms >= 180_000);
    assert!(set.metadata.total_time_ms < 181_000);
    let generation: Vec<_> = set
        .metadata
        .stage_results
        .iter()
        .filter(|r| r.stage == StageKind::Generation)
        .collect();
    assert_eq!(generation.len(), 1);
    assert!(matches!(generation[0].error, Some(ModelError::Timeout(_))));
    // classification finished before the deadline and is kept
    assert!(set.metadata.document_classification.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_keeps_every_cancelled_element() {
    let worker = Arc::new(Scripted::new(happy).with_delay(|prompt| {
        if prompt.stage == StageKind::ImageEnrichment {
            Duration::from_secs(500)
        } else {
            Duration::ZERO
        }
    }));
    let mut config = fast_config();
    config.limits.pipeline_deadline_s = 60;
    config.limits.call_timeout_s = 1000;
    let orch = Orchestrator::new(worker, &config);
    let unit = ContentUnit {
        text: technical_text(300),
        images: vec![image("a"), image("b")],
        ..ContentUnit::default()
    };

    let set = orch.process(&unit).await;

    assert_well_formed(&set);
    let images = &set.metadata.image_analysis;
    assert_eq!(images.count, 2);
    assert!(images
        .results
        .iter()
        .all(|r| matches!(r.error, Some(ModelError::Timeout(_)))));
    // generation never started because the deadline had passed
    assert!(set.metadata.degraded);
}

#[tokio::test]
async fn test_worker_pool_bounds_concurrent_calls() {
    let worker = Arc::new(
        Scripted::new(happy).with_delay(|prompt| {
            if prompt.stage == StageKind::ImageEnrichment {
                Duration::from_millis(20)
            } else {
                Duration::ZERO
            }
        }),
    );
    let mut config = fast_config();
    config.limits.max_concurrent_calls = 2;
    let orch = Orchestrator::new(worker.clone(), &config);
    let unit = ContentUnit {
        text: technical_text(300),
        images: (0..6).map(|i| image(&format!("shot {i}"))).collect(),
        ..ContentUnit::default()
    };

    let set = orch.process(&unit).await;

    assert_eq!(set.metadata.image_analysis.count, 6);
    assert!(worker.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_stats_track_degraded_runs() {
    let worker = Arc::new(Scripted::new(happy));
    let orch = Orchestrator::new(worker, &fast_config());

    orch.process(&ContentUnit::from_text(technical_text(300))).await;
    orch.process(&ContentUnit::default()).await;

    let stats = orch.stats();
    assert_eq!(stats.total_runs, 2);
    assert_eq!(stats.degraded_runs, 1);
    assert_eq!(stats.completed_runs, 1);
}
