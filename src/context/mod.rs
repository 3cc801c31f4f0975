//! Context store
//!
//! Append-only record of every tool result (or recorded tool failure)
//! produced during a run. Entries are addressed by a sequence id and never
//! mutated or removed, so answer synthesis can be replayed from the store.
//! Relevance selection is delegated to the model, constrained to a caller
//! supplied candidate set.

use crate::error::AgentError;
use crate::llm::{generate_object, LanguageModel, ModelRequest};
use crate::models::{ContextEntry, ContextId, SelectedContexts, ToolOutcome};
use crate::Result;
use chrono::Utc;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::Write;
use tracing::{debug, warn};

/// Upper bound on how much of one payload is rendered into a prompt
const MAX_RENDERED_CHARS: usize = 20_000;

const CONTEXT_SELECTION_SYSTEM_PROMPT: &str = r#"You select which previously retrieved financial data is needed to work on a request.

You are given a list of data entries, each with a numeric id and a short description.
Return the ids of every entry that is relevant. Prefer including an entry when unsure.
Only use ids from the list. Return an empty list if nothing is relevant."#;

/// Everything needed to record a tool call; the store assigns id and time.
#[derive(Debug, Clone)]
pub struct NewContextEntry {
    pub task_id: u32,
    pub subtask_id: u32,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub outcome: ToolOutcome,
    pub attempts: u32,
    pub retry_errors: Vec<String>,
    pub description: String,
}

#[derive(Debug, Default)]
pub struct ContextStore {
    entries: Vec<ContextEntry>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its sequence id.
    pub fn record(&mut self, new: NewContextEntry) -> Result<ContextId> {
        if new.tool_name.trim().is_empty() {
            return Err(AgentError::InvalidToolInput(
                "context entry has no tool name".to_string(),
            ));
        }

        let id = self.entries.len() as ContextId;
        let args_hash = hash_arguments(&new.arguments);

        debug!(
            context_id = id,
            tool = %new.tool_name,
            success = new.outcome.is_success(),
            "Recording context entry"
        );

        self.entries.push(ContextEntry {
            id,
            task_id: new.task_id,
            subtask_id: new.subtask_id,
            tool_name: new.tool_name,
            arguments: new.arguments,
            outcome: new.outcome,
            attempts: new.attempts,
            retry_errors: new.retry_errors,
            description: new.description,
            args_hash,
            recorded_at: Utc::now(),
        });

        Ok(id)
    }

    pub fn get(&self, id: ContextId) -> Option<&ContextEntry> {
        self.entries.get(id as usize)
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all_ids(&self) -> Vec<ContextId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn ids_for_task(&self, task_id: u32) -> Vec<ContextId> {
        self.entries
            .iter()
            .filter(|e| e.task_id == task_id)
            .map(|e| e.id)
            .collect()
    }

    pub fn ids_for_subtask(&self, task_id: u32, subtask_id: u32) -> Vec<ContextId> {
        self.entries
            .iter()
            .filter(|e| e.task_id == task_id && e.subtask_id == subtask_id)
            .map(|e| e.id)
            .collect()
    }

    /// Ask the model which of `candidates` matter for `scope_query`.
    ///
    /// Any id outside `candidates` makes the whole selection invalid
    /// ([`AgentError::ContextSelection`]); callers normally go through
    /// [`ContextStore::select_or_all`].
    pub async fn select(
        &self,
        model: &dyn LanguageModel,
        scope_query: &str,
        candidates: &[ContextId],
    ) -> Result<SelectedContexts> {
        if candidates.is_empty() {
            return Ok(SelectedContexts::default());
        }

        let listing: Vec<String> = candidates
            .iter()
            .filter_map(|id| self.get(*id))
            .map(|entry| {
                let status = if entry.outcome.is_success() { "" } else { " [failed]" };
                format!("{}: {} via {}{}", entry.id, entry.description, entry.tool_name, status)
            })
            .collect();

        let prompt = format!(
            "Request:\n{}\n\nAvailable data entries:\n{}\n\nSelect the relevant entry ids.",
            scope_query,
            listing.join("\n")
        );
        let request = ModelRequest::new(CONTEXT_SELECTION_SYSTEM_PROMPT, prompt);

        let selected: SelectedContexts = generate_object(model, &request)
            .await
            .map_err(|e| AgentError::ContextSelection(e.to_string()))?;

        let allowed: HashSet<ContextId> = candidates.iter().copied().collect();
        if let Some(bad) = selected.context_ids.iter().find(|id| !allowed.contains(id)) {
            return Err(AgentError::ContextSelection(format!(
                "model referenced unknown context id {}",
                bad
            )));
        }

        let mut seen = HashSet::new();
        let context_ids = selected
            .context_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();

        Ok(SelectedContexts { context_ids })
    }

    /// Selection with the fallback policy applied: on any selection failure
    /// every candidate is used. The error, if any, is handed back for
    /// reporting.
    pub async fn select_or_all(
        &self,
        model: &dyn LanguageModel,
        scope_query: &str,
        candidates: &[ContextId],
    ) -> (Vec<ContextId>, Option<AgentError>) {
        match self.select(model, scope_query, candidates).await {
            Ok(selected) => (selected.context_ids, None),
            Err(e) => {
                warn!(error = %e, candidates = candidates.len(), "Context selection failed, using all candidates");
                (candidates.to_vec(), Some(e))
            }
        }
    }

    /// Render the given entries (in id order) for inclusion in a prompt.
    pub fn render(&self, ids: &[ContextId]) -> String {
        let mut ordered: Vec<ContextId> = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut out = String::new();
        for entry in ordered.iter().filter_map(|id| self.get(*id)) {
            out.push_str(&format!("### [{}] {}\n", entry.id, entry.description));
            match &entry.outcome {
                ToolOutcome::Success { data } => {
                    let pretty =
                        serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
                    out.push_str("```json\n");
                    out.push_str(&truncate_chars(&pretty, MAX_RENDERED_CHARS));
                    out.push_str("\n```\n\n");
                }
                ToolOutcome::Failed { error } => {
                    out.push_str(&format!(
                        "Tool {} failed after {} attempt(s): {}\n\n",
                        entry.tool_name, entry.attempts, error
                    ));
                }
            }
            if !entry.retry_errors.is_empty() {
                out.push_str(&format!(
                    "Retried attempts: {}\n\n",
                    entry.retry_errors.join("; ")
                ));
            }
        }
        out
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\n… (truncated)", &text[..idx]),
        None => text.to_string(),
    }
}

/// SHA256 of the serialized arguments, streamed straight into the hasher
pub fn hash_arguments(arguments: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), arguments).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
