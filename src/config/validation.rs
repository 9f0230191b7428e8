//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`PipelineConfig`] that cannot
//! be expressed through the type system alone (e.g., range checks, cross-field
//! invariants).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::PipelineConfig;
use crate::routing;

/// Largest accepted worker pool.
pub const MAX_CONCURRENT_CALLS: usize = 64;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "resilience.retry_base_ms").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Validate all semantic constraints on a [`PipelineConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &PipelineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Pipeline identity ────────────────────────────────────────────
    if config.pipeline.name.trim().is_empty() {
        errors.push(invalid("pipeline.name", "", "pipeline name must not be empty"));
    }
    if config.pipeline.version.trim().is_empty() {
        errors.push(invalid(
            "pipeline.version",
            "",
            "pipeline version must not be empty",
        ));
    }

    // ── Limits ───────────────────────────────────────────────────────
    let limits = &config.limits;
    if limits.max_concurrent_calls == 0 || limits.max_concurrent_calls > MAX_CONCURRENT_CALLS {
        errors.push(invalid(
            "limits.max_concurrent_calls",
            limits.max_concurrent_calls,
            "must be between 1 and 64",
        ));
    }
    if limits.call_timeout_s == 0 {
        errors.push(invalid(
            "limits.call_timeout_s",
            0,
            "must be at least 1 second",
        ));
    }
    if limits.pipeline_deadline_s < limits.call_timeout_s {
        errors.push(invalid(
            "limits.pipeline_deadline_s",
            limits.pipeline_deadline_s,
            "must be \u{2265} call_timeout_s",
        ));
    }

    // ── Retry settings ───────────────────────────────────────────────
    if config.resilience.retry_base_ms > config.resilience.retry_max_ms {
        errors.push(invalid(
            "resilience.retry_base_ms",
            config.resilience.retry_base_ms,
            "must be \u{2264} retry_max_ms",
        ));
    }
    if config.resilience.retry_attempts == 0 {
        errors.push(invalid(
            "resilience.retry_attempts",
            0,
            "must be at least 1",
        ));
    }

    // ── Generation thresholds ────────────────────────────────────────
    for (field, value) in [
        (
            "generation.classification_max_chars",
            config.generation.classification_max_chars,
        ),
        (
            "generation.complexity_sample_chars",
            config.generation.complexity_sample_chars,
        ),
    ] {
        if value == 0 {
            errors.push(invalid(field, 0, "must be at least 1"));
        }
    }

    // ── Selection thresholds ─────────────────────────────────────────
    errors.extend(
        routing::config::validate(&config.selection)
            .into_iter()
            .map(|msg| ConfigError::Validation(format!("selection: {msg}"))),
    );

    // ── Model catalog ────────────────────────────────────────────────
    for (task, models) in config.models.iter() {
        for (slot, model) in [("primary", &models.primary), ("fallback", &models.fallback)] {
            let field = format!("models.{}.{slot}", task.as_str());
            if model.model_name.trim().is_empty() {
                errors.push(invalid(
                    &format!("{field}.model_name"),
                    "",
                    "model name must not be empty",
                ));
            }
            if let Some(temp) = model.params.temperature {
                if !(0.0..=2.0).contains(&temp) {
                    errors.push(invalid(
                        &format!("{field}.temperature"),
                        temp,
                        "must be between 0.0 and 2.0",
                    ));
                }
            }
            if model.params.max_tokens == Some(0) {
                errors.push(invalid(
                    &format!("{field}.max_tokens"),
                    0,
                    "must be at least 1",
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
