//! Pre-programmed model for deterministic runs without API calls.
//!
//! Structured replies are queued per schema name, so interleaved calls
//! (selection, tool choice, completion check) each pull from their own queue.
//! Every request is recorded for later inspection.

use super::{LanguageModel, ModelRequest, TextStream};
use crate::error::AgentError;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this JSON value
    Structured(Value),
    /// Fail the call with an LLM error
    Fail(String),
    /// Stream these chunks, then end
    Stream(Vec<String>),
    /// Stream these chunks, then yield an error
    BrokenStream(Vec<String>, String),
}

#[derive(Default)]
pub struct ScriptedModel {
    structured: Mutex<HashMap<&'static str, VecDeque<ScriptedReply>>>,
    streams: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<(&'static str, ModelRequest)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, schema: &'static str, reply: ScriptedReply) {
        lock(&self.structured)
            .entry(schema)
            .or_default()
            .push_back(reply);
    }

    pub fn push_structured(&self, schema: &'static str, value: Value) {
        self.push(schema, ScriptedReply::Structured(value));
    }

    pub fn push_stream<I, S>(&self, chunks: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks = chunks.into_iter().map(Into::into).collect();
        lock(&self.streams).push_back(ScriptedReply::Stream(chunks));
    }

    pub fn push_stream_reply(&self, reply: ScriptedReply) {
        lock(&self.streams).push_back(reply);
    }

    /// Requests seen so far, tagged with the schema name (`"text"` for streams)
    pub fn requests(&self) -> Vec<(&'static str, ModelRequest)> {
        lock(&self.requests).clone()
    }

    pub fn requests_for(&self, schema: &str) -> Vec<ModelRequest> {
        lock(&self.requests)
            .iter()
            .filter(|(name, _)| *name == schema)
            .map(|(_, request)| request.clone())
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate_structured(
        &self,
        request: &ModelRequest,
        schema_name: &'static str,
        _schema: &Value,
    ) -> Result<Value> {
        lock(&self.requests).push((schema_name, request.clone()));

        let reply = lock(&self.structured)
            .get_mut(schema_name)
            .and_then(VecDeque::pop_front);

        match reply {
            Some(ScriptedReply::Structured(value)) => Ok(value),
            Some(ScriptedReply::Fail(message)) => Err(AgentError::Llm(message)),
            Some(other) => Err(AgentError::Llm(format!(
                "scripted reply {:?} is not structured",
                other
            ))),
            None => Err(AgentError::Llm(format!(
                "no scripted response for {}",
                schema_name
            ))),
        }
    }

    async fn stream_text(&self, request: &ModelRequest) -> Result<TextStream> {
        lock(&self.requests).push(("text", request.clone()));

        let reply = lock(&self.streams).pop_front();

        let items: Vec<Result<String>> = match reply {
            Some(ScriptedReply::Stream(chunks)) => chunks.into_iter().map(Ok).collect(),
            Some(ScriptedReply::BrokenStream(chunks, error)) => chunks
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(AgentError::StreamingGeneration(error))))
                .collect(),
            Some(ScriptedReply::Fail(message)) => {
                return Err(AgentError::StreamingGeneration(message))
            }
            Some(ScriptedReply::Structured(_)) | None => {
                return Err(AgentError::StreamingGeneration(
                    "no scripted stream".to_string(),
                ))
            }
        };

        Ok(Box::pin(futures::stream::iter(items)))
    }
}
