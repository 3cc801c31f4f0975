//! Planner trait and the model-backed task planner
//!
//! The planner decomposes a query into an ordered [`ExecutionPlan`]. The
//! model output is schema-checked; a rejected plan is fed back to the model
//! as a correction hint until the attempt budget runs out.

use crate::error::AgentError;
use crate::events::{AgentEvent, RunContext};
use crate::llm::{generate_object, LanguageModel, ModelRequest};
use crate::memory::ConversationHistory;
use crate::models::ExecutionPlan;
use crate::prompts::planning_system_prompt;
use crate::tools::ToolRegistry;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Trait for plan generation (LLM controlled)
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce a validated plan for `query`.
    ///
    /// Implementations emit `tasks-planned` and `subtasks-planned` exactly
    /// once each on success, and nothing plan-shaped on failure.
    async fn plan(
        &self,
        query: &str,
        history: &ConversationHistory,
        ctx: &RunContext,
    ) -> Result<ExecutionPlan>;
}

pub struct TaskPlanner {
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolRegistry>,
    attempts: u32,
    history_window: usize,
}

impl TaskPlanner {
    pub fn new(model: Arc<dyn LanguageModel>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            model,
            tools,
            attempts: 3,
            history_window: 10,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    fn build_request(
        &self,
        query: &str,
        history: &ConversationHistory,
        feedback: Option<&str>,
    ) -> ModelRequest {
        let mut prompt = history.format_recent(self.history_window);
        prompt.push_str(&format!("## Query\n\n{}\n", query));

        if let Some(problem) = feedback {
            prompt.push_str(&format!(
                "\n## Correction\n\nYour previous plan was rejected: {}. \
                 Return a corrected plan.\n",
                problem
            ));
        }

        ModelRequest::new(planning_system_prompt(&self.tools.catalog()), prompt)
    }
}

#[async_trait]
impl Planner for TaskPlanner {
    async fn plan(
        &self,
        query: &str,
        history: &ConversationHistory,
        ctx: &RunContext,
    ) -> Result<ExecutionPlan> {
        if query.trim().is_empty() {
            return Err(AgentError::Planning("query is empty".to_string()));
        }

        let mut feedback: Option<String> = None;

        for attempt in 1..=self.attempts {
            ctx.ensure_active()?;
            ctx.events.status("Planning tasks…");

            let request = self.build_request(query, history, feedback.as_deref());
            debug!(attempt, "Requesting execution plan");

            let outcome = ctx
                .cancellable(generate_object::<ExecutionPlan>(self.model.as_ref(), &request))
                .await;
            ctx.events.status_done();

            match outcome {
                Ok(mut plan) => {
                    plan.reset_progress();
                    info!(
                        attempt,
                        tasks = plan.tasks.len(),
                        subtasks = plan.tasks.iter().map(|t| t.subtasks.len()).sum::<usize>(),
                        "Execution plan accepted"
                    );

                    ctx.events.emit(AgentEvent::TasksPlanned {
                        tasks: plan.task_list(),
                    });
                    ctx.events.emit(AgentEvent::SubtasksPlanned {
                        subtasks: plan.tasks.clone(),
                    });
                    return Ok(plan);
                }
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(AgentError::SchemaValidation { message, .. }) => {
                    warn!(attempt, error = %message, "Plan rejected, re-prompting");
                    ctx.events.diagnostic(format!(
                        "Plan attempt {} rejected: {}",
                        attempt, message
                    ));
                    feedback = Some(message);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Plan request failed");
                    ctx.events
                        .diagnostic(format!("Plan attempt {} failed: {}", attempt, e));
                    feedback = None;
                }
            }
        }

        Err(AgentError::Planning(format!(
            "no valid plan after {} attempt(s)",
            self.attempts
        )))
    }
}
