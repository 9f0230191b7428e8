//! # Stage: Declarative Pipeline Configuration
//!
//! ## Responsibility
//! Parse and validate the TOML file that tunes a scenario pipeline:
//! concurrency and deadlines, retry policy, generation thresholds, model
//! selection and the model catalog.
//! ```text
//! scenario-orchestrator content.json --config pipeline.toml
//! ```
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `PipelineConfig`
//! - Total defaults: an empty file is a valid config equal to `PipelineConfig::default()`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building the orchestrator from config (that belongs to `orchestrator`)
//! - Provider credentials (read from the environment by `worker`)

pub mod loader;
pub mod validation;

use crate::resilience::RetryPolicy;
use crate::routing::{ModelCatalog, SelectionConfig};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Default value functions ──────────────────────────────────────────────

fn default_pipeline_name() -> String {
    "scenario-orchestrator".to_string()
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Default worker pool size: 6 concurrent remote calls.
fn default_max_concurrent_calls() -> usize {
    6
}

/// Default pipeline deadline: 180 seconds.
fn default_pipeline_deadline_s() -> u64 {
    180
}

/// Default per-call timeout: 120 seconds.
fn default_call_timeout_s() -> u64 {
    120
}

fn default_retry_attempts() -> u32 {
    3
}

/// Default retry base delay: 1000ms.
fn default_retry_base_ms() -> u64 {
    1000
}

/// Default retry maximum delay: 60000ms.
fn default_retry_max_ms() -> u64 {
    60_000
}

fn default_min_text_chars() -> usize {
    50
}

fn default_classification_max_chars() -> usize {
    8000
}

fn default_complexity_sample_chars() -> usize {
    5000
}

fn default_hint_chars() -> usize {
    2000
}

/// Default enabled state: true.
fn default_true() -> bool {
    true
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a pipeline instance.
///
/// Deserialized from a TOML file and validated before use.
/// Every section is optional and falls back to its documented defaults.
///
/// # Example
///
/// ```toml
/// [pipeline]
/// name = "production"
///
/// [limits]
/// max_concurrent_calls = 8
///
/// [models.technical.primary]
/// provider = "azure"
/// model_name = "o1"
/// max_tokens = 3000
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PipelineConfig {
    /// Pipeline identity and version metadata.
    #[serde(default)]
    pub pipeline: PipelineSection,
    /// Worker pool size and time limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Retry settings for transient model errors.
    #[serde(default)]
    pub resilience: ResilienceConfig,
    /// Thresholds used by the classification and generation stages.
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Model selector thresholds.
    #[serde(default)]
    pub selection: SelectionConfig,
    /// Task tier → model table.
    #[serde(default)]
    pub models: ModelCatalog,
    /// Observability: logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Pipeline identity ────────────────────────────────────────────────────

/// Pipeline identity and version metadata.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PipelineSection {
    /// Human-readable pipeline name (e.g., "production", "staging").
    #[serde(default = "default_pipeline_name")]
    pub name: String,
    /// Semantic version of this configuration (e.g., "1.0").
    #[serde(default = "default_version")]
    pub version: String,
    /// Optional description for documentation purposes.
    pub description: Option<String>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            name: default_pipeline_name(),
            version: default_version(),
            description: None,
        }
    }
}

// ── Limits ───────────────────────────────────────────────────────────────

/// Concurrency and time limits.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LimitsConfig {
    /// Remote calls in flight at once, across all stages. 4–8 is typical.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    /// Budget for one whole `process()` call, in seconds.
    #[serde(default = "default_pipeline_deadline_s")]
    pub pipeline_deadline_s: u64,
    /// Budget for one remote call, in seconds. Must be ≤ the deadline.
    #[serde(default = "default_call_timeout_s")]
    pub call_timeout_s: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: default_max_concurrent_calls(),
            pipeline_deadline_s: default_pipeline_deadline_s(),
            call_timeout_s: default_call_timeout_s(),
        }
    }
}

impl LimitsConfig {
    /// The pipeline deadline as a duration.
    pub fn pipeline_deadline(&self) -> Duration {
        Duration::from_secs(self.pipeline_deadline_s)
    }

    /// The per-call timeout as a duration.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_s)
    }
}

// ── Resilience ───────────────────────────────────────────────────────────

/// Retry configuration for transient model errors.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ResilienceConfig {
    /// Total attempts per call, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay (ms) for exponential backoff. Must be ≤ `retry_max_ms`.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Maximum delay (ms) cap for exponential backoff.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Randomize delays by up to 25%.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            jitter: true,
        }
    }
}

impl ResilienceConfig {
    /// The retry policy these settings describe.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.retry_attempts as usize,
            Duration::from_millis(self.retry_base_ms),
        )
        .with_max_delay(Duration::from_millis(self.retry_max_ms))
        .with_jitter(self.jitter)
    }
}

// ── Generation ───────────────────────────────────────────────────────────

/// Text thresholds for the classification and generation stages.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct GenerationConfig {
    /// Text shorter than this is replaced by an insight-derived description.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    /// Text sent to the classification stage is cut to this length.
    #[serde(default = "default_classification_max_chars")]
    pub classification_max_chars: usize,
    /// Complexity is scored over this many leading characters.
    #[serde(default = "default_complexity_sample_chars")]
    pub complexity_sample_chars: usize,
    /// Leading characters used as the model-selection content hint.
    #[serde(default = "default_hint_chars")]
    pub hint_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            min_text_chars: default_min_text_chars(),
            classification_max_chars: default_classification_max_chars(),
            complexity_sample_chars: default_complexity_sample_chars(),
            hint_chars: default_hint_chars(),
        }
    }
}

// ── Observability ────────────────────────────────────────────────────────

/// Observability configuration: logging and metrics.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilityConfig {
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Register Prometheus metrics at startup.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            metrics_enabled: true,
        }
    }
}

/// Log output format.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, colorized log output.
    #[default]
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

impl LogFormat {
    /// Value understood by the `LOG_FORMAT` environment variable.
    pub fn as_env(&self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

/// Export the JSON Schema for `PipelineConfig`.
///
/// This enables IDE autocomplete when editing TOML config files.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails (should not
/// happen with well-formed derive macros).
///
/// # Panics
///
/// This function never panics.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(PipelineConfig);
    serde_json::to_string_pretty(&schema)
}
