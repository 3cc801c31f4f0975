//! Final answer synthesis
//!
//! One query-wide context selection, then a single streaming model call.
//! The returned stream is handed to the orchestrator untouched.

use crate::context::ContextStore;
use crate::error::AgentError;
use crate::events::RunContext;
use crate::llm::{LanguageModel, ModelRequest, TextStream};
use crate::memory::ConversationHistory;
use crate::prompts::answer_system_prompt;
use crate::Result;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

const NO_DATA_NOTICE: &str = "No financial data was retrieved for this query. \
Say so plainly and answer only what can be answered without it.";

pub struct AnswerGenerator {
    model: Arc<dyn LanguageModel>,
    history_window: usize,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            history_window: 10,
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Start streaming the answer to `query` from whatever the run gathered.
    ///
    /// Failures to open the stream, and errors yielded by it, surface as
    /// [`AgentError::StreamingGeneration`].
    pub async fn synthesize(
        &self,
        query: &str,
        history: &ConversationHistory,
        store: &ContextStore,
        ctx: &RunContext,
    ) -> Result<TextStream> {
        ctx.ensure_active()?;

        let data = if store.is_empty() {
            debug!("No context gathered, answering without data");
            NO_DATA_NOTICE.to_string()
        } else {
            let candidates = store.all_ids();
            let (selected, selection_error) = ctx
                .cancellable(async {
                    Ok(store.select_or_all(self.model.as_ref(), query, &candidates).await)
                })
                .await?;
            if let Some(e) = selection_error {
                ctx.events
                    .diagnostic(format!("Answer context selection fell back to all entries: {}", e));
            }
            info!(selected = selected.len(), available = candidates.len(), "Answer context selected");
            if selected.is_empty() {
                NO_DATA_NOTICE.to_string()
            } else {
                store.render(&selected)
            }
        };

        let mut prompt = history.format_recent(self.history_window);
        prompt.push_str(&format!("## Question\n\n{}\n\n## Retrieved data\n\n{}", query, data));

        let request = ModelRequest::new(answer_system_prompt(), prompt);
        let stream = ctx
            .cancellable(self.model.stream_text(&request))
            .await
            .map_err(|e| match e {
                AgentError::Cancelled | AgentError::StreamingGeneration(_) => e,
                other => AgentError::StreamingGeneration(other.to_string()),
            })?;

        let stream = stream.map(|chunk| {
            chunk.map_err(|e| match e {
                AgentError::StreamingGeneration(_) => e,
                other => AgentError::StreamingGeneration(other.to_string()),
            })
        });

        Ok(Box::pin(stream))
    }
}
