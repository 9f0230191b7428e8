//! Model invocation capability and its implementations.
//!
//! The pipeline only ever talks to models through [`ModelWorker::invoke`].
//! Provided implementations:
//! - [`EchoWorker`]: offline worker returning a canned JSON answer
//! - [`ChatCompletionsWorker`]: OpenAI-compatible chat completions over
//!   HTTP (api.openai.com, Azure OpenAI deployments, local servers)
//! - [`ProviderRouter`]: dispatches by [`ModelConfig::provider`]
//!
//! ## Environment Variables
//!
//! - `OPENAI_API_KEY`: required for [`ChatCompletionsWorker::openai`]
//! - `AZURE_OPENAI_API_KEY`, `AZURE_OPENAI_ENDPOINT`: required for
//!   [`ChatCompletionsWorker::azure`]; `AZURE_OPENAI_API_VERSION` optional
//! - `LOCAL_LLM_URL`: base URL for [`ChatCompletionsWorker::local`]
//!   (default: http://localhost:8080/v1)

use crate::routing::{ModelConfig, Provider};
use crate::types::{ImageSource, StageKind};
use crate::{ModelError, OrchestratorError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What the pipeline sends to a model.
///
/// Text-only when `images` is empty, multimodal otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptPayload {
    /// Stage issuing the call; adapters may use it for logging only.
    pub stage: StageKind,
    /// Instructions for the model.
    pub system: String,
    /// The request body.
    pub user: String,
    /// Images to attach.
    pub images: Vec<ImageSource>,
}

impl PromptPayload {
    /// A text-only prompt.
    pub fn text(stage: StageKind, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            stage,
            system: system.into(),
            user: user.into(),
            images: Vec::new(),
        }
    }

    /// Attach an image.
    pub fn with_image(mut self, image: ImageSource) -> Self {
        self.images.push(image);
        self
    }

    /// `true` when images are attached.
    pub fn is_multimodal(&self) -> bool {
        !self.images.is_empty()
    }

    /// Total prompt length in characters, for logging.
    pub fn len_chars(&self) -> usize {
        self.system.chars().count() + self.user.chars().count()
    }
}

/// A model's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResponse {
    /// Raw text content.
    pub content: String,
    /// Model name as reported by the provider, or as requested.
    pub model: String,
}

/// Trait for model invocation backends.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The trait is object-safe to allow dynamic dispatch via `Arc<dyn ModelWorker>`.
#[async_trait]
pub trait ModelWorker: Send + Sync {
    /// Send `prompt` to the model described by `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelError`] classified so the fallback controller can
    /// decide between retry, model substitution and giving up.
    async fn invoke(
        &self,
        config: &ModelConfig,
        prompt: &PromptPayload,
    ) -> Result<ModelResponse, ModelError>;
}

// ============================================================================
// Echo Worker (offline)
// ============================================================================

/// Offline worker for demos and smoke tests.
///
/// Answers every prompt with one JSON object that parses for every stage:
/// classification fields, an `analysis`, a `summary`, and one scenario
/// describing the request.
pub struct EchoWorker {
    /// Simulated latency.
    pub delay_ms: u64,
}

impl EchoWorker {
    /// An echo worker with 10 ms latency.
    pub fn new() -> Self {
        Self { delay_ms: 10 }
    }

    /// An echo worker with the given latency.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

impl Default for EchoWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelWorker for EchoWorker {
    async fn invoke(
        &self,
        config: &ModelConfig,
        prompt: &PromptPayload,
    ) -> Result<ModelResponse, ModelError> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;

        let stage = prompt.stage.as_str();
        let body = serde_json::json!({
            "document_type": "document",
            "purpose": "offline analysis",
            "key_topics": [],
            "analysis": format!("Offline {stage} of {} prompt characters", prompt.len_chars()),
            "summary": format!("Offline summary produced by {}", config.model_name),
            "scenarios": [{
                "title": format!("Offline {stage} scenario"),
                "description": "Scenario produced without contacting a model",
                "priority": "medium",
                "category": "functional",
                "test_cases": [{
                    "title": "Offline check",
                    "steps": "1. Open the application\n2. Perform the documented action",
                    "expected_results": "The application behaves as documented"
                }]
            }]
        });

        Ok(ModelResponse {
            content: body.to_string(),
            model: config.model_name.clone(),
        })
    }
}

// ============================================================================
// Chat Completions Worker (OpenAI, Azure OpenAI, local servers)
// ============================================================================

/// Default Azure OpenAI API version.
const DEFAULT_AZURE_API_VERSION: &str = "2024-12-01-preview";

/// URL and auth scheme of a chat completions endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFlavor {
    /// `{base}/chat/completions`, bearer auth, model in the body.
    OpenAi,
    /// `{base}/openai/deployments/{model}/chat/completions?api-version=…`,
    /// `api-key` header.
    Azure {
        /// Value of the `api-version` query parameter.
        api_version: String,
    },
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions worker.
///
/// ## Example
///
/// ```no_run
/// use scenario_orchestrator::ChatCompletionsWorker;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), scenario_orchestrator::OrchestratorError> {
/// let worker = ChatCompletionsWorker::openai()?.with_timeout(Duration::from_secs(60));
/// # Ok(()) }
/// ```
pub struct ChatCompletionsWorker {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    flavor: ApiFlavor,
    timeout: Duration,
}

impl ChatCompletionsWorker {
    /// Worker for api.openai.com, keyed from `OPENAI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] if the key is unset or empty.
    pub fn openai() -> Result<Self, OrchestratorError> {
        let key = require_env("OPENAI_API_KEY")?;
        Ok(Self::new("https://api.openai.com/v1", Some(key), ApiFlavor::OpenAi))
    }

    /// Worker for an Azure OpenAI resource, configured from
    /// `AZURE_OPENAI_API_KEY`, `AZURE_OPENAI_ENDPOINT` and optionally
    /// `AZURE_OPENAI_API_VERSION`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] if the key or endpoint is
    /// unset or empty.
    pub fn azure() -> Result<Self, OrchestratorError> {
        let key = require_env("AZURE_OPENAI_API_KEY")?;
        let endpoint = require_env("AZURE_OPENAI_ENDPOINT")?;
        let api_version = std::env::var("AZURE_OPENAI_API_VERSION")
            .unwrap_or_else(|_| DEFAULT_AZURE_API_VERSION.to_string());
        Ok(Self::new(endpoint, Some(key), ApiFlavor::Azure { api_version }))
    }

    /// Worker for a local OpenAI-compatible server at `LOCAL_LLM_URL`.
    pub fn local() -> Self {
        let base = std::env::var("LOCAL_LLM_URL")
            .unwrap_or_else(|_| "http://localhost:8080/v1".to_string());
        Self::new(base, None, ApiFlavor::OpenAi)
    }

    /// Worker with explicit settings.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, flavor: ApiFlavor) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            flavor,
            timeout: Duration::from_secs(120),
        }
    }

    /// Override the base URL (useful for proxies and tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the HTTP request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, model: &str) -> String {
        match &self.flavor {
            ApiFlavor::OpenAi => format!("{}/chat/completions", self.base_url),
            ApiFlavor::Azure { api_version } => format!(
                "{}/openai/deployments/{model}/chat/completions?api-version={api_version}",
                self.base_url
            ),
        }
    }

    fn build_request<'a>(&self, config: &'a ModelConfig, prompt: &PromptPayload) -> ChatRequest<'a> {
        let reasoning = is_reasoning_model(&config.model_name);
        let user_content = if prompt.is_multimodal() {
            let mut parts = vec![ContentPart::Text {
                text: prompt.user.clone(),
            }];
            parts.extend(prompt.images.iter().map(|img| ContentPart::ImageUrl {
                image_url: ImageUrl { url: img.to_url() },
            }));
            MessageContent::Parts(parts)
        } else {
            MessageContent::Text(prompt.user.clone())
        };

        let mut messages = Vec::with_capacity(2);
        if !prompt.system.is_empty() {
            messages.push(ChatMessage {
                role: if reasoning { "developer" } else { "system" },
                content: MessageContent::Text(prompt.system.clone()),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user_content,
        });

        ChatRequest {
            model: match self.flavor {
                ApiFlavor::OpenAi => Some(config.model_name.as_str()),
                ApiFlavor::Azure { .. } => None,
            },
            messages,
            max_tokens: config.params.max_tokens.filter(|_| !reasoning),
            max_completion_tokens: config.params.max_tokens.filter(|_| reasoning),
            temperature: config.params.temperature.filter(|_| !reasoning),
        }
    }
}

#[async_trait]
impl ModelWorker for ChatCompletionsWorker {
    async fn invoke(
        &self,
        config: &ModelConfig,
        prompt: &PromptPayload,
    ) -> Result<ModelResponse, ModelError> {
        let request = self.build_request(config, prompt);
        let mut builder = self
            .client
            .post(self.endpoint(&config.model_name))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = match self.flavor {
                ApiFlavor::OpenAi => builder.header("Authorization", format!("Bearer {key}")),
                ApiFlavor::Azure { .. } => builder.header("api-key", key),
            };
        }

        debug!(
            target: "orchestrator::worker",
            model = %config.model_name,
            stage = prompt.stage.as_str(),
            prompt_chars = prompt.len_chars(),
            images = prompt.images.len(),
            "sending chat completion request"
        );

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Network(format!("request to {} timed out", config.model_name))
            } else {
                ModelError::Network(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::MalformedResponse(format!("undecodable body: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ModelError::MalformedResponse("no content in response".to_string()))?;

        Ok(ModelResponse {
            content,
            model: parsed.model.unwrap_or_else(|| config.model_name.clone()),
        })
    }
}

/// Map a non-success HTTP status to the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> ModelError {
    let detail = format!("{status}: {}", crate::types::truncate_chars(body, 200));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => ModelError::RateLimit(detail),
        StatusCode::REQUEST_TIMEOUT => ModelError::Network(detail),
        s if s.is_server_error() => ModelError::Network(detail),
        _ => ModelError::Validation(detail),
    }
}

/// Reasoning models take `max_completion_tokens` and reject `temperature`.
fn is_reasoning_model(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ["o1", "o3", "o4"].iter().any(|p| lower.starts_with(p))
}

fn require_env(name: &str) -> Result<String, OrchestratorError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(OrchestratorError::ConfigError(format!("{name} not set"))),
    }
}

// ============================================================================
// Provider Router
// ============================================================================

/// Dispatches each call to the worker registered for its provider.
#[derive(Default, Clone)]
pub struct ProviderRouter {
    workers: HashMap<Provider, Arc<dyn ModelWorker>>,
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("providers", &self.workers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRouter {
    /// An empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `worker` for `provider`, replacing any previous one.
    pub fn with(mut self, provider: Provider, worker: Arc<dyn ModelWorker>) -> Self {
        self.workers.insert(provider, worker);
        self
    }

    /// `true` if a worker is registered for `provider`.
    pub fn serves(&self, provider: Provider) -> bool {
        self.workers.contains_key(&provider)
    }
}

#[async_trait]
impl ModelWorker for ProviderRouter {
    async fn invoke(
        &self,
        config: &ModelConfig,
        prompt: &PromptPayload,
    ) -> Result<ModelResponse, ModelError> {
        match self.workers.get(&config.provider) {
            Some(worker) => worker.invoke(config, prompt).await,
            None => Err(ModelError::Validation(format!(
                "no worker registered for provider {}",
                config.provider.as_str()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> ModelConfig {
        ModelConfig::new(Provider::OpenAi, name)
            .with_max_tokens(100)
            .with_temperature(0.2)
    }

    #[tokio::test]
    async fn test_echo_worker_returns_json_object() {
        let w = EchoWorker::with_delay(0);
        let prompt = PromptPayload::text(StageKind::Generation, "sys", "user");
        let resp = w.invoke(&config("gpt-4o"), &prompt).await.expect("test: echo");
        let value: serde_json::Value = serde_json::from_str(&resp.content).expect("test: json");
        assert!(value["scenarios"].is_array());
        assert_eq!(resp.model, "gpt-4o");
    }

    #[test]
    fn test_classify_status_maps_taxonomy() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            ModelError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            ModelError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ModelError::RateLimit(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            ModelError::Network(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, ""),
            ModelError::Validation(_)
        ));
    }

    #[test]
    fn test_reasoning_models_use_completion_tokens_without_temperature() {
        let w = ChatCompletionsWorker::new("http://x", None, ApiFlavor::OpenAi);
        let prompt = PromptPayload::text(StageKind::Generation, "sys", "user");
        let cfg = config("o3-mini");
        let req = w.build_request(&cfg, &prompt);
        assert_eq!(req.max_tokens, None);
        assert_eq!(req.max_completion_tokens, Some(100));
        assert_eq!(req.temperature, None);
        assert_eq!(req.messages[0].role, "developer");
    }

    #[test]
    fn test_chat_models_use_max_tokens_and_temperature() {
        let w = ChatCompletionsWorker::new("http://x", None, ApiFlavor::OpenAi);
        let prompt = PromptPayload::text(StageKind::Generation, "sys", "user");
        let cfg = config("gpt-4o");
        let req = w.build_request(&cfg, &prompt);
        assert_eq!(req.max_tokens, Some(100));
        assert_eq!(req.temperature, Some(0.2));
        assert_eq!(req.model, Some("gpt-4o"));
    }

    #[test]
    fn test_multimodal_prompt_serializes_image_parts() {
        let w = ChatCompletionsWorker::new("http://x", None, ApiFlavor::OpenAi);
        let prompt = PromptPayload::text(StageKind::ImageEnrichment, "", "describe").with_image(
            ImageSource::Base64 {
                media_type: "image/png".into(),
                data: "AAAA".into(),
            },
        );
        let cfg = config("gpt-4o");
        let json = serde_json::to_value(w.build_request(&cfg, &prompt)).expect("test: json");
        assert_eq!(json["messages"].as_array().map(Vec::len), Some(1));
        let parts = &json["messages"][0]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_azure_endpoint_uses_deployment_path() {
        let w = ChatCompletionsWorker::new(
            "https://res.openai.azure.com/",
            Some("k".into()),
            ApiFlavor::Azure {
                api_version: "2024-12-01-preview".into(),
            },
        );
        assert_eq!(
            w.endpoint("o1"),
            "https://res.openai.azure.com/openai/deployments/o1/chat/completions?api-version=2024-12-01-preview"
        );
    }

    #[tokio::test]
    async fn test_router_rejects_unregistered_provider() {
        let router = ProviderRouter::new().with(Provider::Azure, Arc::new(EchoWorker::with_delay(0)));
        let prompt = PromptPayload::text(StageKind::Generation, "", "x");
        let err = router
            .invoke(&config("gpt-4o"), &prompt)
            .await
            .expect_err("test: openai not registered");
        assert!(matches!(err, ModelError::Validation(_)));
        assert!(router.serves(Provider::Azure));
    }
}
