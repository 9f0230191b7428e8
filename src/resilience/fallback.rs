//! Fallback controller: the single path every remote call takes.
//!
//! Per call, in order:
//! 1. Acquire a permit from the shared worker pool.
//! 2. Invoke the model under the per-call timeout (expiry is a
//!    [`ModelError::Network`], so it is retried like any transient error).
//! 3. Retry transient errors with bounded exponential backoff.
//! 4. Parse the answer; a parse failure is [`ModelError::MalformedResponse`].
//! 5. On a substitutable failure, repeat 1–4 once with the fallback config.
//!
//! `Auth` and `Timeout` are never substituted: an auth failure is surfaced
//! as-is and a deadline expiry belongs to the orchestrator.

use super::retry::{retry_if, RetryPolicy};
use crate::metrics;
use crate::routing::ModelConfig;
use crate::worker::{ModelResponse, ModelWorker, PromptPayload};
use crate::ModelError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

/// Outcome of one controlled invocation.
#[derive(Debug)]
pub struct Invocation<T> {
    /// Parsed value or the final error.
    pub result: Result<T, ModelError>,
    /// Last model that was tried (the one that answered, on success).
    pub model_used: Option<String>,
    /// `true` if the fallback config was used.
    pub fell_back: bool,
}

impl<T> Invocation<T> {
    /// Name of the model that produced `result`, if it succeeded.
    pub fn successful_model(&self) -> Option<&str> {
        self.result.as_ref().ok().and(self.model_used.as_deref())
    }
}

/// `true` for errors that justify trying the fallback model.
pub fn should_substitute(error: &ModelError) -> bool {
    matches!(
        error,
        ModelError::MalformedResponse(_)
            | ModelError::Validation(_)
            | ModelError::Network(_)
            | ModelError::RateLimit(_)
    )
}

/// Wraps a [`ModelWorker`] with pooling, timeouts, retries and fallback.
///
/// Cheap to clone; clones share the worker and the pool.
#[derive(Clone)]
pub struct FallbackController {
    worker: Arc<dyn ModelWorker>,
    pool: Arc<Semaphore>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl std::fmt::Debug for FallbackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackController")
            .field("available_permits", &self.pool.available_permits())
            .field("retry", &self.retry)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl FallbackController {
    /// Build a controller. `pool` bounds concurrent remote calls.
    pub fn new(
        worker: Arc<dyn ModelWorker>,
        pool: Arc<Semaphore>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            worker,
            pool,
            retry,
            call_timeout,
        }
    }

    /// Invoke `primary`, substituting `fallback` once on a substitutable
    /// failure, and parse the answer with `parse`.
    pub async fn invoke<T, P>(
        &self,
        primary: &ModelConfig,
        fallback: Option<&ModelConfig>,
        prompt: &PromptPayload,
        parse: P,
    ) -> Invocation<T>
    where
        P: Fn(&str) -> Result<T, ModelError>,
    {
        let first = self.attempt(primary, prompt, &parse).await;
        let error = match first {
            Ok(value) => {
                return Invocation {
                    result: Ok(value),
                    model_used: Some(primary.model_name.clone()),
                    fell_back: false,
                }
            }
            Err(e) => e,
        };

        let stage = prompt.stage.as_str();
        let fallback = match fallback {
            Some(f) if should_substitute(&error) && f != primary => f,
            _ => {
                return Invocation {
                    result: Err(error),
                    model_used: Some(primary.model_name.clone()),
                    fell_back: false,
                }
            }
        };

        warn!(
            target: "orchestrator::pipeline",
            stage = stage,
            primary = %primary.model_name,
            fallback = %fallback.model_name,
            error_kind = error.kind(),
            "primary model failed, substituting fallback"
        );
        metrics::inc_fallback(stage);

        Invocation {
            result: self.attempt(fallback, prompt, &parse).await,
            model_used: Some(fallback.model_name.clone()),
            fell_back: true,
        }
    }

    async fn attempt<T, P>(
        &self,
        config: &ModelConfig,
        prompt: &PromptPayload,
        parse: &P,
    ) -> Result<T, ModelError>
    where
        P: Fn(&str) -> Result<T, ModelError>,
    {
        let response = retry_if(
            &self.retry,
            || self.call_once(config, prompt),
            ModelError::is_retryable,
        )
        .await?;
        parse(&response.content)
    }

    async fn call_once(
        &self,
        config: &ModelConfig,
        prompt: &PromptPayload,
    ) -> Result<ModelResponse, ModelError> {
        let stage = prompt.stage.as_str();
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| ModelError::Network("worker pool closed".to_string()))?;

        let result = match tokio::time::timeout(self.call_timeout, self.worker.invoke(config, prompt)).await {
            Ok(r) => r,
            Err(_) => Err(ModelError::Network(format!(
                "call to {} exceeded {}s",
                config.model_name,
                self.call_timeout.as_secs()
            ))),
        };

        metrics::inc_model_call(stage, result.is_ok());
        if let Err(e) = &result {
            metrics::inc_error(stage, e.kind());
        }
        result
    }
}
