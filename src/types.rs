//! Data model shared by every stage of the pipeline.
//!
//! Input ([`ContentUnit`] and its elements) is produced by an external
//! extraction step and treated as immutable. Output ([`ScenarioSet`]) is
//! consumed verbatim by whoever called the orchestrator. Everything in
//! between travels as a [`StageResult`] with a typed [`StagePayload`].

use crate::ModelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ── Task and stage identifiers ─────────────────────────────────────────────

/// Model tier a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Vision-capable analysis of images and diagrams.
    ImageAnalysis,
    /// Cheap labelling: document classification, table analysis.
    Classification,
    /// Scenario generation over technical content.
    Technical,
    /// Merging and summarizing stage outputs.
    Integration,
}

impl TaskType {
    /// All task types in catalog order.
    pub const ALL: [TaskType; 4] = [
        TaskType::ImageAnalysis,
        TaskType::Classification,
        TaskType::Technical,
        TaskType::Integration,
    ];

    /// The snake_case name used in configs and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImageAnalysis => "image_analysis",
            Self::Classification => "classification",
            Self::Technical => "technical",
            Self::Integration => "integration",
        }
    }

    /// Parse a task name. Returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage that produced a [`StageResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Document type / purpose classification.
    Classification,
    /// Per-image analysis.
    ImageEnrichment,
    /// Per-table analysis.
    TableEnrichment,
    /// Per-diagram analysis.
    DiagramEnrichment,
    /// Main scenario generation.
    Generation,
    /// Executive summary over the generated draft.
    Synthesis,
}

impl StageKind {
    /// Label used for spans and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::ImageEnrichment => "image_enrichment",
            Self::TableEnrichment => "table_enrichment",
            Self::DiagramEnrichment => "diagram_enrichment",
            Self::Generation => "generation",
            Self::Synthesis => "synthesis",
        }
    }
}

/// How the orchestrator spreads work across models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Classification and enrichment stages feed a separate generation call.
    #[default]
    MultiModel,
    /// One generation call over the text and a structure summary.
    SingleModel,
}

// ── Input ──────────────────────────────────────────────────────────────────

/// Descriptive metadata attached to an extracted element.
///
/// A handful of well-known fields are typed; anything else the extractor
/// emitted is kept verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementMeta {
    /// Caption text near the element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Extractor-provided description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Alternative text, for images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    /// 1-based page number.
    #[serde(
        default,
        deserialize_with = "lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub page: Option<u32>,
    /// Pixel width.
    #[serde(
        default,
        deserialize_with = "lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub width: Option<u32>,
    /// Pixel height.
    #[serde(
        default,
        deserialize_with = "lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub height: Option<u32>,
    /// Provider-specific keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ElementMeta {
    /// Metadata with only a caption set.
    pub fn captioned(caption: impl Into<String>) -> Self {
        Self {
            caption: Some(caption.into()),
            ..Self::default()
        }
    }

    /// The most descriptive human text available: description, caption,
    /// then alt text. Blank values are skipped.
    pub fn label(&self) -> Option<&str> {
        [&self.description, &self.caption, &self.alt_text]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }

    /// Every populated key rendered as a `(key, value)` pair, values cut to
    /// 50 characters. Keys named `data` are omitted.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let typed = [
            ("caption", self.caption.clone()),
            ("description", self.description.clone()),
            ("alt_text", self.alt_text.clone()),
            ("page", self.page.map(|v| v.to_string())),
            ("width", self.width.map(|v| v.to_string())),
            ("height", self.height.map(|v| v.to_string())),
        ];
        for (key, value) in typed {
            if let Some(value) = value {
                out.push((key.to_string(), truncate_chars(&value, 50)));
            }
        }
        for (key, value) in &self.extra {
            if key == "data" {
                continue;
            }
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push((key.clone(), truncate_chars(&rendered, 50)));
        }
        out
    }
}

/// Where the pixels of an image live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// A fetchable URL.
    Url {
        /// Absolute URL.
        url: String,
    },
    /// Inline base64-encoded bytes.
    Base64 {
        /// MIME type, e.g. `image/png`.
        media_type: String,
        /// Base64 payload without a data-URL prefix.
        data: String,
    },
}

impl ImageSource {
    /// Render as a URL usable in an `image_url` content part.
    pub fn to_url(&self) -> String {
        match self {
            Self::Url { url } => url.clone(),
            Self::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
        }
    }
}

/// An image extracted from the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageElement {
    /// Descriptive metadata.
    #[serde(flatten)]
    pub meta: ElementMeta,
    /// Image bytes or location, when the extractor kept them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ImageSource>,
}

/// A table extracted from the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableElement {
    /// Descriptive metadata.
    #[serde(flatten)]
    pub meta: ElementMeta,
    /// Pre-rendered table text (markdown or similar).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Parsed cells, row-major.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Vec<String>>,
}

impl TableElement {
    /// Text form of the table: `content` if present, else pipe-joined rows.
    pub fn render(&self) -> String {
        if let Some(content) = self.content.as_deref().filter(|c| !c.trim().is_empty()) {
            return content.to_string();
        }
        self.rows
            .iter()
            .map(|row| format!("| {} |", row.join(" | ")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A diagram (flowchart, architecture sketch, etc.).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagramElement {
    /// Descriptive metadata.
    #[serde(flatten)]
    pub meta: ElementMeta,
    /// Diagram rendered as an image, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ImageSource>,
}

/// Everything the extractor pulled out of one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    /// Plain text body.
    #[serde(default)]
    pub text: String,
    /// Images in document order.
    #[serde(default)]
    pub images: Vec<ImageElement>,
    /// Tables in document order.
    #[serde(default)]
    pub tables: Vec<TableElement>,
    /// Diagrams in document order.
    #[serde(default)]
    pub diagrams: Vec<DiagramElement>,
}

impl ContentUnit {
    /// A unit with text only.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// `true` if any images, tables, or diagrams are present.
    pub fn has_rich_content(&self) -> bool {
        !(self.images.is_empty() && self.tables.is_empty() && self.diagrams.is_empty())
    }

    /// Character count of the text body.
    pub fn text_chars(&self) -> usize {
        self.text.chars().count()
    }

    /// One-line structural overview used in prompts.
    pub fn structure_summary(&self) -> String {
        format!(
            "{} characters of text, {} image(s), {} table(s), {} diagram(s)",
            self.text_chars(),
            self.images.len(),
            self.tables.len(),
            self.diagrams.len()
        )
    }
}

// ── Output ─────────────────────────────────────────────────────────────────

/// Where a scenario came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioSource {
    /// Derived from an image.
    Image,
    /// Derived from a table.
    Table,
    /// Derived from a diagram.
    Diagram,
    /// Produced by the generation model from the document text.
    Text,
}

/// A concrete test case. `steps` and `expected_results` are never empty once
/// a scenario has been through [`Scenario::normalized`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Short name.
    #[serde(default)]
    pub title: String,
    /// Newline-separated numbered steps.
    #[serde(default, deserialize_with = "text_or_lines", alias = "test_steps")]
    pub steps: String,
    /// What a passing run observes.
    #[serde(
        default,
        deserialize_with = "text_or_lines",
        alias = "expectedResults",
        alias = "expected_result",
        alias = "expected"
    )]
    pub expected_results: String,
}

impl TestCase {
    /// Build a test case from its three parts.
    pub fn new(
        title: impl Into<String>,
        steps: impl Into<String>,
        expected_results: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            steps: steps.into(),
            expected_results: expected_results.into(),
        }
    }

    /// Deterministic stand-in used when a stage produced no usable case.
    pub fn placeholder(scenario_title: &str) -> Self {
        Self::new(
            format!("Verify {scenario_title}"),
            format!(
                "1. Open the part of the system described by \"{scenario_title}\"\n\
                 2. Exercise the described behaviour\n\
                 3. Compare the outcome with the documentation"
            ),
            "The observed behaviour matches the documented description",
        )
    }

    fn is_complete(&self) -> bool {
        !self.steps.trim().is_empty() && !self.expected_results.trim().is_empty()
    }
}

/// A test scenario with at least one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario title.
    #[serde(default)]
    pub title: String,
    /// What the scenario covers.
    #[serde(default)]
    pub description: String,
    /// Free-form priority (e.g. "high").
    #[serde(
        default,
        deserialize_with = "scalar_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<String>,
    /// Free-form category (e.g. "functional").
    #[serde(
        default,
        deserialize_with = "scalar_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<String>,
    /// Test cases.
    #[serde(default, alias = "testCases")]
    pub test_cases: Vec<TestCase>,
    /// Provenance tag. Unknown tags read as `None`.
    #[serde(
        default,
        deserialize_with = "known_source",
        skip_serializing_if = "Option::is_none"
    )]
    pub source: Option<ScenarioSource>,
}

impl Scenario {
    /// A scenario with a title and description and no test cases yet.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            priority: None,
            category: None,
            test_cases: Vec::new(),
            source: None,
        }
    }

    /// Attach a test case.
    pub fn with_case(mut self, case: TestCase) -> Self {
        self.test_cases.push(case);
        self
    }

    /// Set the provenance tag.
    pub fn with_source(mut self, source: ScenarioSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Enforce the output invariants: non-empty title, and at least one
    /// test case with non-empty steps and expected results. Incomplete
    /// cases are dropped; if none remain the placeholder is inserted.
    pub fn normalized(mut self) -> Self {
        if self.title.trim().is_empty() {
            self.title = if self.description.trim().is_empty() {
                "Untitled scenario".to_string()
            } else {
                truncate_chars(self.description.trim(), 60)
            };
        }
        self.test_cases.retain(TestCase::is_complete);
        for case in &mut self.test_cases {
            if case.title.trim().is_empty() {
                case.title = format!("Verify {}", self.title);
            }
        }
        if self.test_cases.is_empty() {
            self.test_cases.push(TestCase::placeholder(&self.title));
        }
        self
    }
}

/// Result of the document classification stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentClassification {
    /// E.g. "requirements specification", "user manual".
    #[serde(default, alias = "documentType", alias = "type")]
    pub document_type: Option<String>,
    /// What the document is for.
    #[serde(default)]
    pub purpose: Option<String>,
    /// Business or technical domain.
    #[serde(default)]
    pub domain: Option<String>,
    /// Main topics.
    #[serde(default, alias = "keyTopics", alias = "topics")]
    pub key_topics: Vec<String>,
    /// Any further fields the model returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of analysing one image, table, or diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInsight {
    /// 0-based position in the input list.
    pub index: usize,
    /// Metadata of the element this insight belongs to.
    pub source_element: ElementMeta,
    /// Model that answered, if any call succeeded.
    pub model_used: Option<String>,
    /// Parsed model output, if any.
    pub analysis: Option<Value>,
    /// Scenarios derived from this element. Never empty.
    pub scenarios: Vec<Scenario>,
    /// Why the model call failed, if it did.
    pub error: Option<ModelError>,
}

/// Count plus raw per-element results for one enrichment category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// Number of elements analysed.
    pub count: usize,
    /// One entry per input element, in input order.
    pub results: Vec<ElementInsight>,
}

impl AnalysisSummary {
    /// Wrap a result list.
    pub fn from_results(results: Vec<ElementInsight>) -> Self {
        Self {
            count: results.len(),
            results,
        }
    }
}

/// A generation result before synthesis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDraft {
    /// Model-written summary, possibly empty.
    #[serde(default)]
    pub summary: String,
    /// Generated scenarios.
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
}

/// Typed payload of a [`StageResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StagePayload {
    /// Classification stage output.
    Classification(DocumentClassification),
    /// Enrichment stage output, one entry per element in input order.
    Elements(Vec<ElementInsight>),
    /// Generation stage output.
    Draft(ScenarioDraft),
    /// Synthesis summary.
    Summary(String),
}

/// Record of one stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Which stage ran.
    pub stage: StageKind,
    /// Model that produced the payload (last model tried on failure).
    pub model_used: Option<String>,
    /// Stage output; enrichment stages keep it even when they report an error.
    pub payload: Option<StagePayload>,
    /// Failure, if any.
    pub error: Option<ModelError>,
    /// Wall-clock time spent in the stage.
    pub processing_time_ms: u64,
}

impl StageResult {
    /// A successful result.
    pub fn ok(stage: StageKind, model_used: Option<String>, payload: StagePayload, ms: u64) -> Self {
        Self {
            stage,
            model_used,
            payload: Some(payload),
            error: None,
            processing_time_ms: ms,
        }
    }

    /// A failed result with no payload.
    pub fn failed(stage: StageKind, model_used: Option<String>, error: ModelError, ms: u64) -> Self {
        Self {
            stage,
            model_used,
            payload: None,
            error: Some(error),
            processing_time_ms: ms,
        }
    }

    /// Result for a stage cancelled by the pipeline deadline.
    pub fn timed_out(stage: StageKind, ms: u64) -> Self {
        Self::failed(
            stage,
            None,
            ModelError::Timeout(format!("{} cancelled at pipeline deadline", stage.as_str())),
            ms,
        )
    }

    /// `true` when no error was recorded.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Element insights carried by an enrichment payload.
    pub fn elements(&self) -> &[ElementInsight] {
        match &self.payload {
            Some(StagePayload::Elements(items)) => items,
            _ => &[],
        }
    }
}

/// Provenance and diagnostics attached to every [`ScenarioSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Distinct models that returned usable output, in first-use order.
    pub models_used: Vec<String>,
    /// End-to-end wall-clock time.
    pub total_time_ms: u64,
    /// Character count of the input text.
    pub document_size: usize,
    /// `true` when scenario generation failed and a deterministic fallback
    /// produced the scenarios.
    pub degraded: bool,
    /// Strategy the run used.
    pub strategy: Strategy,
    /// Complexity of the sampled input text.
    pub complexity_score: f64,
    /// Every stage invocation, in completion order of the merge step.
    pub stage_results: Vec<StageResult>,
    /// Classification output, if the stage succeeded.
    pub document_classification: Option<DocumentClassification>,
    /// Image enrichment results.
    pub image_analysis: AnalysisSummary,
    /// Table enrichment results.
    pub table_analysis: AnalysisSummary,
    /// Diagram enrichment results.
    pub diagram_analysis: AnalysisSummary,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
}

/// Final pipeline output. `scenarios` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSet {
    /// Executive summary.
    pub summary: String,
    /// Scenarios in presentation order.
    pub scenarios: Vec<Scenario>,
    /// Provenance and diagnostics.
    pub metadata: PipelineMetadata,
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// Cut `s` to at most `max` characters, appending `...` when shortened.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}...")
}

/// First `max` characters of `s`, on a char boundary.
pub fn prefix_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Accept either a string or a list of strings (joined with newlines).
fn text_or_lines<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Accept a string or any scalar rendered as a string; anything else is `None`.
fn scalar_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// Accept integers, floats and numeric strings; anything out of range or
/// unreadable is `None` rather than an error.
fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let number = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(number
        .filter(|n| n.is_finite() && *n >= 0.0 && *n <= f64::from(u32::MAX))
        .map(|n| n.round() as u32))
}

fn known_source<'de, D>(deserializer: D) -> Result<Option<ScenarioSource>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}
