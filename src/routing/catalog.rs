//! Model catalog: which concrete model serves each task tier.
//!
//! Every [`TaskType`] has a `primary` and a `fallback` [`ModelConfig`]. The
//! built-in table mirrors a typical OpenAI + Azure OpenAI deployment and can
//! be overridden per task from the `[models.<task>]` config sections.

use crate::types::TaskType;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Provider that hosts a model. The worker layer dispatches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// api.openai.com
    #[serde(alias = "openai")]
    OpenAi,
    /// Azure OpenAI deployment.
    Azure,
    /// Self-hosted OpenAI-compatible server (llama.cpp, vLLM).
    Local,
}

impl Provider {
    /// Label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Local => "local",
        }
    }
}

/// Generation parameters sent with a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelParams {
    /// Output token budget. `None` leaves it to the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature. `None` for models that reject it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// A concrete model choice. Built once, never mutated; the selector hands
/// out adjusted copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelConfig {
    /// Hosting provider.
    pub provider: Provider,
    /// Model or deployment name.
    pub model_name: String,
    /// Request parameters.
    #[serde(flatten)]
    pub params: ModelParams,
    /// What this model is good at.
    #[serde(default)]
    pub description: String,
}

impl ModelConfig {
    /// A config with no parameters set.
    pub fn new(provider: Provider, model_name: impl Into<String>) -> Self {
        Self {
            provider,
            model_name: model_name.into(),
            params: ModelParams::default(),
            description: String::new(),
        }
    }

    /// Set the output token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.params.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = Some(temperature);
        self
    }

    /// Set the description.
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Primary and fallback model for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskModels {
    /// Tried first.
    pub primary: ModelConfig,
    /// Substituted by the fallback controller.
    pub fallback: ModelConfig,
}

/// Full task → model table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelCatalog {
    /// Vision tier.
    #[serde(default = "default_image_analysis")]
    pub image_analysis: TaskModels,
    /// Classification tier.
    #[serde(default = "default_classification")]
    pub classification: TaskModels,
    /// Technical generation tier.
    #[serde(default = "default_technical")]
    pub technical: TaskModels,
    /// Integration / summary tier.
    #[serde(default = "default_integration")]
    pub integration: TaskModels,
}

impl ModelCatalog {
    /// Models for `task`.
    pub fn get(&self, task: TaskType) -> &TaskModels {
        match task {
            TaskType::ImageAnalysis => &self.image_analysis,
            TaskType::Classification => &self.classification,
            TaskType::Technical => &self.technical,
            TaskType::Integration => &self.integration,
        }
    }

    /// Every configured model, primaries first.
    pub fn iter(&self) -> impl Iterator<Item = (TaskType, &TaskModels)> {
        TaskType::ALL.into_iter().map(move |t| (t, self.get(t)))
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            image_analysis: default_image_analysis(),
            classification: default_classification(),
            technical: default_technical(),
            integration: default_integration(),
        }
    }
}

// ── Default table ─────────────────────────────────────────────────────────

fn default_image_analysis() -> TaskModels {
    TaskModels {
        primary: ModelConfig::new(Provider::OpenAi, "gpt-4o")
            .with_max_tokens(2000)
            .with_temperature(0.3)
            .described("Vision analysis of images, diagrams and screenshots"),
        fallback: ModelConfig::new(Provider::Azure, "gpt-4o")
            .with_max_tokens(2000)
            .with_temperature(0.3)
            .described("Azure-hosted vision analysis"),
    }
}

fn default_classification() -> TaskModels {
    TaskModels {
        primary: ModelConfig::new(Provider::Azure, "o3-mini")
            .with_max_tokens(1000)
            .described("Fast classification and labelling"),
        fallback: ModelConfig::new(Provider::OpenAi, "gpt-3.5-turbo")
            .with_max_tokens(1000)
            .with_temperature(0.1)
            .described("Basic classification"),
    }
}

fn default_technical() -> TaskModels {
    TaskModels {
        primary: ModelConfig::new(Provider::Azure, "o1")
            .with_max_tokens(3000)
            .described("Deep reasoning over technical content and test scenarios"),
        fallback: ModelConfig::new(Provider::Azure, "o3-mini")
            .with_max_tokens(2000)
            .described("Lighter technical analysis"),
    }
}

fn default_integration() -> TaskModels {
    TaskModels {
        primary: ModelConfig::new(Provider::Azure, "gpt-4o-mini")
            .with_max_tokens(2500)
            .with_temperature(0.2)
            .described("Merging and summarizing stage outputs"),
        fallback: ModelConfig::new(Provider::Azure, "o1")
            .with_max_tokens(2000)
            .described("Reasoning-based synthesis"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_covers_every_task() {
        let catalog = ModelCatalog::default();
        for (_, models) in catalog.iter() {
            assert!(!models.primary.model_name.is_empty());
            assert!(!models.fallback.model_name.is_empty());
        }
    }

    #[test]
    fn test_primary_and_fallback_differ_for_every_task() {
        let catalog = ModelCatalog::default();
        for (task, models) in catalog.iter() {
            assert_ne!(models.primary, models.fallback, "task {task}");
        }
    }

    #[test]
    fn test_model_config_toml_round_trip_flattens_params() {
        let cfg = ModelConfig::new(Provider::OpenAi, "gpt-4o").with_max_tokens(10);
        let text = toml::to_string(&cfg).expect("test: serialize");
        assert!(text.contains("max_tokens = 10"));
        let back: ModelConfig = toml::from_str(&text).expect("test: parse");
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_provider_accepts_openai_alias() {
        let p: Provider = serde_json::from_str("\"openai\"").expect("test: parse");
        assert_eq!(p, Provider::OpenAi);
    }
}
