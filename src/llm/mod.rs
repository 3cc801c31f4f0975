//! Generative model abstraction
//!
//! Two call shapes are consumed by the pipeline:
//! - schema-constrained structured generation, decoded into a typed
//!   [`StructuredOutput`] and validated before it is handed back
//! - streaming free text, exposed as a [`TextStream`]

use crate::error::AgentError;
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::pin::Pin;
use tracing::debug;

pub mod gemini;
pub mod scripted;

pub use gemini::GeminiClient;
pub use scripted::{ScriptedModel, ScriptedReply};

/// Lazy, finite, single-consumption sequence of answer fragments.
/// Fragments must be forwarded in the order they arrive.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub system: String,
    pub prompt: String,
}

impl ModelRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
        }
    }
}

/// A shape the model can be asked to produce
pub trait StructuredOutput: DeserializeOwned + Send {
    const NAME: &'static str;

    fn json_schema() -> Value;

    /// Semantic checks beyond what deserialization enforces.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a JSON value conforming to `schema`.
    async fn generate_structured(
        &self,
        request: &ModelRequest,
        schema_name: &'static str,
        schema: &Value,
    ) -> Result<Value>;

    /// Start a streaming free-text generation.
    async fn stream_text(&self, request: &ModelRequest) -> Result<TextStream>;
}

/// Ask for a `T`, decode it and run its validation.
///
/// Decode and validation failures come back as
/// [`AgentError::SchemaValidation`] so callers can feed the message into a
/// re-prompt.
pub async fn generate_object<T: StructuredOutput>(
    model: &dyn LanguageModel,
    request: &ModelRequest,
) -> Result<T> {
    let raw = model
        .generate_structured(request, T::NAME, &T::json_schema())
        .await?;

    debug!(schema = T::NAME, "Structured response received");

    let value: T = serde_json::from_value(raw).map_err(|e| AgentError::SchemaValidation {
        schema: T::NAME,
        message: e.to_string(),
    })?;

    value
        .validate()
        .map_err(|message| AgentError::SchemaValidation {
            schema: T::NAME,
            message,
        })?;

    Ok(value)
}

/// Parse model text that should be a JSON document, tolerating a
/// markdown code fence around it.
pub fn parse_json_text(schema: &'static str, text: &str) -> Result<Value> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(cleaned).map_err(|e| AgentError::SchemaValidation {
        schema,
        message: format!("response is not valid JSON: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionPlan, IsDone};
    use serde_json::json;

    #[test]
    fn test_parse_json_text_strips_fence() {
        let value = parse_json_text("IsDone", "```json\n{\"done\": true}\n```").unwrap();
        assert_eq!(value, json!({ "done": true }));

        let err = parse_json_text("IsDone", "sure, here you go").unwrap_err();
        assert!(matches!(err, AgentError::SchemaValidation { schema: "IsDone", .. }));
    }

    #[tokio::test]
    async fn test_generate_object_decodes_and_validates() {
        let model = ScriptedModel::new();
        model.push_structured("IsDone", json!({ "done": true, "reason": "have data" }));
        model.push_structured("ExecutionPlan", json!({ "tasks": [] }));

        let request = ModelRequest::new("system", "prompt");
        let verdict: IsDone = generate_object(&model, &request).await.unwrap();
        assert!(verdict.done);

        let err = generate_object::<ExecutionPlan>(&model, &request)
            .await
            .unwrap_err();
        match err {
            AgentError::SchemaValidation { schema, message } => {
                assert_eq!(schema, "ExecutionPlan");
                assert_eq!(message, "plan contains no tasks");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_generate_object_rejects_wrong_shape() {
        let model = ScriptedModel::new();
        model.push_structured("IsDone", json!({ "finished": "yes" }));

        let request = ModelRequest::new("system", "prompt");
        let err = generate_object::<IsDone>(&model, &request).await.unwrap_err();
        assert!(matches!(err, AgentError::SchemaValidation { .. }));
    }
}
