//! # Stage: Classification
//!
//! ## Responsibility
//! Label the document (type, purpose, domain, key topics) from a bounded
//! text sample plus a structure overview.
//!
//! ## Guarantees
//! - One remote call (plus retries and at most one fallback substitution)
//! - Bounded input: at most `max_chars` characters of text are sent
//! - Failure is carried in the result; the pipeline continues without a
//!   classification
//!
//! ## NOT Responsible For
//! - Enrichment of images, tables or diagrams
//! - Choosing what to do when it fails (that belongs to the orchestrator)

use super::{instrumented, parse, prompts, StageContext, StageProcessor};
use crate::types::{
    ContentUnit, DocumentClassification, StageKind, StagePayload, StageResult, TaskType,
};
use async_trait::async_trait;

/// Default text sample size.
pub const DEFAULT_MAX_CHARS: usize = 8000;

/// Document classification stage.
#[derive(Debug, Clone)]
pub struct ClassificationStage {
    ctx: StageContext,
    max_chars: usize,
}

impl ClassificationStage {
    /// Classify with at most `max_chars` characters of text.
    pub fn new(ctx: StageContext, max_chars: usize) -> Self {
        Self { ctx, max_chars }
    }
}

#[async_trait]
impl StageProcessor for ClassificationStage {
    type Input = ContentUnit;

    fn kind(&self) -> StageKind {
        StageKind::Classification
    }

    async fn process(&self, unit: &ContentUnit) -> StageResult {
        instrumented(StageKind::Classification, async {
            let selector = &self.ctx.selector;
            let primary = selector.select_for(TaskType::Classification, None, unit.text_chars(), None);
            let fallback = selector.get_fallback(TaskType::Classification);
            let prompt = prompts::classification(unit, self.max_chars);

            let invocation = self
                .ctx
                .controller
                .invoke(
                    &primary,
                    Some(&fallback),
                    &prompt,
                    parse::json_as::<DocumentClassification>,
                )
                .await;

            match invocation.result {
                Ok(classification) => StageResult::ok(
                    StageKind::Classification,
                    invocation.model_used,
                    StagePayload::Classification(classification),
                    0,
                ),
                Err(e) => {
                    StageResult::failed(StageKind::Classification, invocation.model_used, e, 0)
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{FallbackController, RetryPolicy};
    use crate::routing::{ModelConfig, ModelSelector};
    use crate::worker::{ModelResponse, ModelWorker, PromptPayload};
    use crate::ModelError;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    struct Fixed(Result<&'static str, ModelError>);

    #[async_trait]
    impl ModelWorker for Fixed {
        async fn invoke(
            &self,
            config: &ModelConfig,
            _prompt: &PromptPayload,
        ) -> Result<ModelResponse, ModelError> {
            self.0.clone().map(|c| ModelResponse {
                content: c.to_string(),
                model: config.model_name.clone(),
            })
        }
    }

    fn stage(worker: Fixed) -> ClassificationStage {
        let controller = FallbackController::new(
            Arc::new(worker),
            Arc::new(Semaphore::new(2)),
            RetryPolicy::none(),
            Duration::from_secs(5),
        );
        ClassificationStage::new(
            StageContext::new(controller, Arc::new(ModelSelector::default())),
            DEFAULT_MAX_CHARS,
        )
    }

    #[tokio::test]
    async fn test_classification_parses_camel_case_reply() {
        let s = stage(Fixed(Ok(
            r#"```json
{"documentType": "requirements", "purpose": "login", "keyTopics": ["auth"]}
```"#,
        )));
        let result = s.process(&ContentUnit::from_text("The user logs in.")).await;
        assert!(result.is_ok());
        match result.payload {
            Some(StagePayload::Classification(c)) => {
                assert_eq!(c.document_type.as_deref(), Some("requirements"));
                assert_eq!(c.key_topics, vec!["auth".to_string()]);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_classification_failure_is_recorded_not_raised() {
        let s = stage(Fixed(Err(ModelError::Auth("bad key".into()))));
        let result = s.process(&ContentUnit::default()).await;
        assert!(matches!(result.error, Some(ModelError::Auth(_))));
        assert!(result.payload.is_none());
        assert_eq!(result.stage, StageKind::Classification);
    }
}
