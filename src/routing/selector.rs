//! Model selection.
//!
//! The [`ModelSelector`] maps `(task, content hint, content size,
//! complexity)` to a concrete [`ModelConfig`]. It never fails: unknown task
//! names resolve to the technical tier and every task has a catalog entry.

use super::catalog::{ModelCatalog, ModelConfig};
use super::config::SelectionConfig;
use crate::types::TaskType;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Keyword table used to re-derive a task from a content hint.
const TASK_PATTERNS: [(TaskType, &[&str]); 4] = [
    (
        TaskType::ImageAnalysis,
        &["image", "screenshot", "diagram", "figure", "chart", "flow", "visual"],
    ),
    (
        TaskType::Classification,
        &["classify", "categorize", "label", "identify", "define"],
    ),
    (
        TaskType::Technical,
        &["test", "technical", "scenario", "use case", "requirement", "feature"],
    ),
    (
        TaskType::Integration,
        &["merge", "synthesize", "summarize", "integrate", "compile"],
    ),
];

/// Whole-word matchers, compiled once, aligned with [`TASK_PATTERNS`].
fn word_matchers() -> &'static [Vec<(String, Option<Regex>)>] {
    static MATCHERS: OnceLock<Vec<Vec<(String, Option<Regex>)>>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        TASK_PATTERNS
            .iter()
            .map(|(_, words)| {
                words
                    .iter()
                    .map(|w| {
                        let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(w))).ok();
                        (w.to_lowercase(), re)
                    })
                    .collect()
            })
            .collect()
    })
}

/// Picks the model for each request.
///
/// Holds an immutable catalog and thresholds; every method is a pure
/// function of its inputs, so one selector can be shared freely.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    catalog: ModelCatalog,
    config: SelectionConfig,
}

impl ModelSelector {
    /// Create a selector over `catalog` with `config` thresholds.
    pub fn new(catalog: ModelCatalog, config: SelectionConfig) -> Self {
        Self { catalog, config }
    }

    /// The catalog this selector draws from.
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Select by task name. Unknown names resolve to [`TaskType::Technical`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use scenario_orchestrator::routing::ModelSelector;
    /// let selector = ModelSelector::default();
    /// let unknown = selector.select("poetry", None, 0, None);
    /// let technical = selector.select("technical", None, 0, None);
    /// assert_eq!(unknown, technical);
    /// ```
    pub fn select(
        &self,
        task: &str,
        content_hint: Option<&str>,
        content_size: usize,
        complexity: Option<f64>,
    ) -> ModelConfig {
        let resolved = TaskType::from_name(task).unwrap_or_else(|| {
            warn!(
                target: "orchestrator::routing",
                task = task,
                "unknown task type, using technical"
            );
            TaskType::Technical
        });
        self.select_for(resolved, content_hint, content_size, complexity)
    }

    /// Select for a typed task.
    ///
    /// 1. A content hint may re-derive the task (see [`Self::detect_task`]).
    /// 2. Start from the task's primary config.
    /// 3. Content over `large_document_chars` shrinks the token budget.
    /// 4. High complexity escalates non-technical tasks to the technical
    ///    primary; low complexity drops the technical task to the
    ///    classification primary.
    pub fn select_for(
        &self,
        task: TaskType,
        content_hint: Option<&str>,
        content_size: usize,
        complexity: Option<f64>,
    ) -> ModelConfig {
        let mut task = task;
        if let Some(hint) = content_hint {
            if let Some(detected) = self.detect_task(hint, task) {
                if detected != task {
                    info!(
                        target: "orchestrator::routing",
                        from = task.as_str(),
                        to = detected.as_str(),
                        "task re-derived from content"
                    );
                    task = detected;
                }
            }
        }

        let mut config = self.catalog.get(task).primary.clone();

        if content_size > self.config.large_document_chars {
            if let Some(budget) = config.params.max_tokens {
                let shrunk = (f64::from(budget) * self.config.token_shrink_factor) as u32;
                debug!(
                    target: "orchestrator::routing",
                    content_size,
                    from = budget,
                    to = shrunk,
                    "large document, shrinking token budget"
                );
                config.params.max_tokens = Some(shrunk);
            }
        }

        if let Some(complexity) = complexity {
            if complexity > self.config.escalate_above && task != TaskType::Technical {
                info!(
                    target: "orchestrator::routing",
                    complexity,
                    task = task.as_str(),
                    "high complexity, escalating to technical tier"
                );
                config = self.catalog.technical.primary.clone();
            } else if complexity < self.config.deescalate_below && task == TaskType::Technical {
                info!(
                    target: "orchestrator::routing",
                    complexity,
                    "low complexity, using classification tier"
                );
                config = self.catalog.classification.primary.clone();
            }
        }

        debug!(
            target: "orchestrator::routing",
            task = task.as_str(),
            provider = config.provider.as_str(),
            model = %config.model_name,
            "model selected"
        );
        config
    }

    /// Fallback config for `task`, unconditionally.
    pub fn get_fallback(&self, task: TaskType) -> ModelConfig {
        self.catalog.get(task).fallback.clone()
    }

    /// Re-derive a task from free text.
    ///
    /// Each pattern scores 2.0 per whole-word match and 0.5 per match that is
    /// only a substring of a longer word; a task's sum is divided by
    /// `max(1, chars / 100)`. The best task wins only if it beats
    /// `detection_threshold` and strictly beats every other task; otherwise
    /// `current` is kept.
    pub fn detect_task(&self, hint: &str, current: TaskType) -> Option<TaskType> {
        let scores = task_scores(hint);
        let (best, best_score) = scores
            .iter()
            .copied()
            .fold(None::<(TaskType, f64)>, |acc, (task, score)| match acc {
                Some((_, s)) if s >= score => acc,
                _ => Some((task, score)),
            })?;

        if best_score <= self.config.detection_threshold {
            return None;
        }
        let tied = scores
            .iter()
            .any(|(task, score)| *task != best && (*score - best_score).abs() < f64::EPSILON);
        if tied {
            return Some(current);
        }
        Some(best)
    }
}

/// Normalized pattern score per task, in [`TASK_PATTERNS`] order.
fn task_scores(hint: &str) -> Vec<(TaskType, f64)> {
    let lower = hint.to_lowercase();
    let norm = (hint.chars().count() as f64 / 100.0).max(1.0);
    TASK_PATTERNS
        .iter()
        .zip(word_matchers())
        .map(|((task, _), matchers)| {
            let raw: f64 = matchers
                .iter()
                .map(|(word, re)| {
                    let full = re.as_ref().map_or(0, |r| r.find_iter(hint).count());
                    let partial = lower.matches(word.as_str()).count().saturating_sub(full);
                    full as f64 * 2.0 + partial as f64 * 0.5
                })
                .sum();
            (*task, raw / norm)
        })
        .collect()
}
