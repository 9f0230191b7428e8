//! # scenario-orchestrator
//!
//! Multi-model orchestration pipeline that turns extracted document content
//! into a structured set of test scenarios.
//!
//! ## Architecture
//!
//! One `process()` call walks a fixed state machine:
//! ```text
//! PENDING → CLASSIFYING ─┐
//!           ENRICHING ───┴→ GENERATING → SYNTHESIZING → DONE | DEGRADED
//!            (image │ table │ diagram, concurrent, bounded worker pool)
//! ```
//!
//! Every remote call goes through the [`worker::ModelWorker`] capability and
//! the [`resilience::FallbackController`]. Failures are absorbed into
//! [`types::StageResult`] errors and the `degraded` flag; the pipeline always
//! returns a non-empty [`types::ScenarioSet`].

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod resilience;
pub mod routing;
pub mod stages;
pub mod stats;
pub mod types;
pub mod worker;

// Re-exports for convenience
pub use orchestrator::{Orchestrator, PipelineState, ProcessOptions, Strategy};
pub use routing::{ComplexityScorer, ModelCatalog, ModelConfig, ModelSelector, Provider};
pub use types::{ContentUnit, Scenario, ScenarioSet, StageResult, TaskType, TestCase};
pub use worker::{ChatCompletionsWorker, EchoWorker, ModelWorker, PromptPayload, ProviderRouter};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```no_run
/// # use scenario_orchestrator::{init_tracing, OrchestratorError};
/// # fn example() -> Result<(), OrchestratorError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), OrchestratorError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::Other(format!("tracing init failed: {e}")))
}

/// Construction-time errors.
///
/// The pipeline itself never returns these: once an [`Orchestrator`] exists,
/// `process()` absorbs every failure into the returned scenario set.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A configuration value is missing or invalid (e.g., missing env var).
    ///
    /// Returned at construction time so that misconfiguration surfaces
    /// immediately rather than at the first model call.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

/// Failure of a single remote model call or stage.
///
/// Serializable so it can travel inside [`StageResult`] and the final
/// metadata. [`ModelError::is_retryable`] drives the retry layer; the
/// fallback controller decides model substitution from the variant.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ModelError {
    /// Transport failure or per-call timeout. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// Provider throttled the request. Retryable.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// The model replied but the content could not be parsed.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Credentials were rejected. Never retried, never falls back.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The request was rejected before or by the provider as invalid.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The pipeline deadline elapsed while the stage was in flight.
    #[error("timed out: {0}")]
    Timeout(String),
}

impl ModelError {
    /// `true` for transient failures worth retrying with the same model.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimit(_))
    }

    /// Stable snake_case label used for span fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::RateLimit(_) => "rate_limit",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Auth(_) => "auth",
            Self::Validation(_) => "validation",
            Self::Timeout(_) => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_includes_message() {
        let err = OrchestratorError::ConfigError("OPENAI_API_KEY not set".to_string());
        assert!(err.to_string().contains("OPENAI_API_KEY not set"));
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(ModelError::Network("reset".into()).is_retryable());
        assert!(ModelError::RateLimit("429".into()).is_retryable());
    }

    #[test]
    fn test_permanent_errors_are_not_retryable() {
        assert!(!ModelError::Auth("401".into()).is_retryable());
        assert!(!ModelError::MalformedResponse("no json".into()).is_retryable());
        assert!(!ModelError::Validation("bad".into()).is_retryable());
        assert!(!ModelError::Timeout("deadline".into()).is_retryable());
    }

    #[test]
    fn test_model_error_serializes_as_tagged_object() {
        let json = serde_json::to_value(ModelError::RateLimit("slow down".into()))
            .expect("test: serialize");
        assert_eq!(json["kind"], "rate_limit");
        assert_eq!(json["message"], "slow down");
    }

    #[test]
    fn test_kind_labels_match_serde_tags() {
        let errors = [
            ModelError::Network(String::new()),
            ModelError::RateLimit(String::new()),
            ModelError::MalformedResponse(String::new()),
            ModelError::Auth(String::new()),
            ModelError::Validation(String::new()),
            ModelError::Timeout(String::new()),
        ];
        for err in errors {
            let json = serde_json::to_value(&err).expect("test: serialize");
            assert_eq!(json["kind"], err.kind());
        }
    }

    #[test]
    fn test_init_tracing_second_call_returns_err() {
        let _ = init_tracing();
        let result = init_tracing();
        assert!(result.is_err(), "double init must return Err, not panic");
    }
}
