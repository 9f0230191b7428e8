//! Prometheus metrics for the scenario pipeline.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`record_stage_latency`, `inc_model_call`, …) are no-ops if `init_metrics`
//! was never called, so the pipeline is always safe to run and observability
//! simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `scenario_pipeline_runs_total` | Counter | `outcome` |
//! | `scenario_model_calls_total` | Counter | `stage`, `outcome` |
//! | `scenario_errors_total` | Counter | `stage`, `err_type` |
//! | `scenario_fallbacks_total` | Counter | `stage` |
//! | `scenario_stage_duration_seconds` | Histogram | `stage` |

use crate::OrchestratorError;
use prometheus::{
    core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the pipeline, bundled so they can be stored in
/// a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Completed pipeline runs by outcome (`done` / `degraded`).
    pub runs_total: CounterVec,
    /// Remote model calls by stage and outcome (`ok` / `err`).
    pub model_calls_total: CounterVec,
    /// Errors by stage and error kind.
    pub errors_total: CounterVec,
    /// Fallback-model substitutions by stage.
    pub fallbacks_total: CounterVec,
    /// Stage processing latency histogram.
    pub stage_duration: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn counter(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<CounterVec, OrchestratorError> {
    let c = CounterVec::new(Opts::new(name, help), labels)
        .map_err(|e| OrchestratorError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(c.clone()))
        .map_err(|e| OrchestratorError::Other(format!("metrics registration failed: {e}")))?;
    Ok(c)
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if metric construction or registry
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), OrchestratorError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let runs_total = counter(
        &registry,
        "scenario_pipeline_runs_total",
        "Completed pipeline runs by outcome",
        &["outcome"],
    )?;
    let model_calls_total = counter(
        &registry,
        "scenario_model_calls_total",
        "Remote model calls by stage and outcome",
        &["stage", "outcome"],
    )?;
    let errors_total = counter(
        &registry,
        "scenario_errors_total",
        "Errors by stage and kind",
        &["stage", "err_type"],
    )?;
    let fallbacks_total = counter(
        &registry,
        "scenario_fallbacks_total",
        "Fallback model substitutions by stage",
        &["stage"],
    )?;

    let stage_duration = HistogramVec::new(
        HistogramOpts::new(
            "scenario_stage_duration_seconds",
            "Processing duration per stage",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 180.0]),
        &["stage"],
    )
    .map_err(|e| OrchestratorError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(stage_duration.clone()))
        .map_err(|e| OrchestratorError::Other(format!("metrics registration failed: {e}")))?;

    // A racing initialiser produces identical descriptors; first one wins.
    let _ = METRICS.set(Metrics {
        registry,
        runs_total,
        model_calls_total,
        errors_total,
        fallbacks_total,
        stage_duration,
    });

    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

fn inc(vec: &CounterVec, labels: &[&str]) {
    if let Ok(c) = vec.get_metric_with_label_values(labels) {
        c.inc();
    }
}

// ── Public helper functions ────────────────────────────────────────────────

/// Record the processing latency for a pipeline stage.
///
/// No-op if metrics have not been initialised.
pub fn record_stage_latency(stage: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.stage_duration.get_metric_with_label_values(&[stage]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Count one remote model call. `ok` selects the outcome label.
///
/// No-op if metrics have not been initialised.
pub fn inc_model_call(stage: &str, ok: bool) {
    if let Some(m) = metrics() {
        inc(&m.model_calls_total, &[stage, if ok { "ok" } else { "err" }]);
    }
}

/// Increment the error counter for a stage and error kind.
///
/// No-op if metrics have not been initialised.
pub fn inc_error(stage: &str, err_type: &str) {
    if let Some(m) = metrics() {
        inc(&m.errors_total, &[stage, err_type]);
    }
}

/// Count a fallback-model substitution.
///
/// No-op if metrics have not been initialised.
pub fn inc_fallback(stage: &str) {
    if let Some(m) = metrics() {
        inc(&m.fallbacks_total, &[stage]);
    }
}

/// Count a finished pipeline run.
///
/// No-op if metrics have not been initialised.
pub fn inc_run(degraded: bool) {
    if let Some(m) = metrics() {
        inc(&m.runs_total, &[if degraded { "degraded" } else { "done" }]);
    }
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    let families = m.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Current counter values keyed by joined label values (`"a:b"`).
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Runs keyed by outcome.
    pub runs_total: HashMap<String, u64>,
    /// Errors keyed by `"stage:err_type"`.
    pub errors_total: HashMap<String, u64>,
    /// Fallbacks keyed by stage.
    pub fallbacks_total: HashMap<String, u64>,
}

fn snapshot(vec: &CounterVec) -> HashMap<String, u64> {
    let mut out = HashMap::new();
    for family in vec.collect() {
        for metric in family.get_metric() {
            let key = metric
                .get_label()
                .iter()
                .map(|l| l.get_value())
                .collect::<Vec<_>>()
                .join(":");
            out.insert(key, metric.get_counter().get_value() as u64);
        }
    }
    out
}

/// Return a structured summary of current counter values.
///
/// Returns a zeroed [`MetricsSummary`] if metrics have not been initialised.
pub fn get_metrics_summary() -> MetricsSummary {
    let Some(m) = metrics() else {
        return MetricsSummary::default();
    };
    MetricsSummary {
        runs_total: snapshot(&m.runs_total),
        errors_total: snapshot(&m.errors_total),
        fallbacks_total: snapshot(&m.fallbacks_total),
    }
}
