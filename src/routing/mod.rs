//! # Stage: Model Selection
//!
//! ## Responsibility
//! Decide which concrete model serves each remote call. A task tier
//! (image analysis, classification, technical, integration) maps to a
//! primary and fallback [`ModelConfig`]; content hints, document size and
//! complexity adjust the choice.
//!
//! ## Guarantees
//! - Total: selection never fails; unknown task names resolve to the
//!   technical tier.
//! - Deterministic: the same inputs always select the same config.
//! - Immutable: catalog entries are cloned out, never mutated in place.
//!
//! ## NOT Responsible For
//! - Calling the models (that belongs to `worker` and `resilience`)
//! - Deciding when to use the fallback (that belongs to `resilience::fallback`)

pub mod catalog;
pub mod config;
pub mod scorer;
pub mod selector;

// Re-exports for convenience
pub use catalog::{ModelCatalog, ModelConfig, ModelParams, Provider, TaskModels};
pub use config::SelectionConfig;
pub use scorer::{ComplexityScorer, ScoreBreakdown};
pub use selector::ModelSelector;
