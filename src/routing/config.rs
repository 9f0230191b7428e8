//! Model selection thresholds.
//!
//! Provides [`SelectionConfig`] for tuning task detection, large-document
//! token shrinking, and complexity-based tier changes. All fields have
//! defaults and are (de)serialisable for the `[selection]` TOML section.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ── Default value functions ────────────────────────────────────────────

/// Documents longer than this many characters get a reduced token budget.
fn default_large_document_chars() -> usize {
    50_000
}

/// Token budgets of large documents are multiplied by this factor.
fn default_token_shrink_factor() -> f64 {
    0.8
}

/// Complexity above which a non-technical task escalates.
fn default_escalate_above() -> f64 {
    0.7
}

/// Complexity below which the technical task de-escalates.
fn default_deescalate_below() -> f64 {
    0.3
}

/// Minimum normalized pattern score for task re-detection.
fn default_detection_threshold() -> f64 {
    0.05
}

// ── SelectionConfig ────────────────────────────────────────────────────

/// Configuration for the [`super::ModelSelector`].
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SelectionConfig {
    /// Content size (chars) above which token budgets shrink. Default: `50000`.
    #[serde(default = "default_large_document_chars")]
    pub large_document_chars: usize,

    /// Multiplier applied to token budgets of large documents.
    ///
    /// Range: `(0.0, 1.0]`. Default: `0.8`.
    #[serde(default = "default_token_shrink_factor")]
    pub token_shrink_factor: f64,

    /// Complexity above which non-technical tasks use the technical tier.
    ///
    /// Range: `0.0..=1.0`, must be `> deescalate_below`. Default: `0.7`.
    #[serde(default = "default_escalate_above")]
    pub escalate_above: f64,

    /// Complexity below which the technical task uses the classification tier.
    ///
    /// Range: `0.0..=1.0`. Default: `0.3`.
    #[serde(default = "default_deescalate_below")]
    pub deescalate_below: f64,

    /// A detected task must score above this to replace the requested one.
    ///
    /// Range: `0.0..=1.0`. Default: `0.05`.
    #[serde(default = "default_detection_threshold")]
    pub detection_threshold: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            large_document_chars: default_large_document_chars(),
            token_shrink_factor: default_token_shrink_factor(),
            escalate_above: default_escalate_above(),
            deescalate_below: default_deescalate_below(),
            detection_threshold: default_detection_threshold(),
        }
    }
}

/// Validate a [`SelectionConfig`], returning every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &SelectionConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if !(config.token_shrink_factor > 0.0 && config.token_shrink_factor <= 1.0) {
        errors.push(format!(
            "token_shrink_factor must be in (0.0, 1.0], got {}",
            config.token_shrink_factor
        ));
    }

    for (name, value) in [
        ("escalate_above", config.escalate_above),
        ("deescalate_below", config.deescalate_below),
        ("detection_threshold", config.detection_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            errors.push(format!("{name} must be in [0.0, 1.0], got {value}"));
        }
    }

    if config.escalate_above <= config.deescalate_below {
        errors.push(format!(
            "escalate_above ({}) must be > deescalate_below ({})",
            config.escalate_above, config.deescalate_below
        ));
    }

    if config.large_document_chars == 0 {
        errors.push("large_document_chars must be > 0".to_string());
    }

    errors
}
