//! Subtask executor
//!
//! Each subtask runs a bounded select → choose tool → invoke → record →
//! judge loop. Local failures (bad tool choice, exhausted tool retries,
//! selection errors) are absorbed into the loop; only cancellation escapes.

use crate::config::{AgentConfig, RetryPolicy};
use crate::context::{ContextStore, NewContextEntry};
use crate::error::AgentError;
use crate::events::{AgentEvent, RunContext};
use crate::llm::{generate_object, LanguageModel, ModelRequest};
use crate::models::{
    ContextId, IsDone, OptimizedToolArgs, SubTask, SubTaskResult, Task, ToolOutcome,
};
use crate::prompts::{tool_selection_system_prompt, IS_DONE_SYSTEM_PROMPT};
use crate::tools::{ToolRegistry, ToolSpec};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ITERATION_CAP_REASON: &str = "iteration cap exceeded";

/// Outcome of one tool call after retries
#[derive(Debug)]
struct ToolCall {
    outcome: ToolOutcome,
    attempts: u32,
    /// Errors from the attempts before the last one
    retry_errors: Vec<String>,
}

pub struct TaskExecutor {
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolRegistry>,
    max_iterations: u32,
    tool_selection_retries: u32,
    tool_retry: RetryPolicy,
}

impl TaskExecutor {
    pub fn new(model: Arc<dyn LanguageModel>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            model,
            tools,
            max_iterations: 5,
            tool_selection_retries: 1,
            tool_retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(
        model: Arc<dyn LanguageModel>,
        tools: Arc<ToolRegistry>,
        config: &AgentConfig,
    ) -> Self {
        Self::new(model, tools)
            .with_max_iterations(config.max_iterations)
            .with_tool_selection_retries(config.tool_selection_retries)
            .with_retry_policy(config.tool_retry.clone())
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_tool_selection_retries(mut self, retries: u32) -> Self {
        self.tool_selection_retries = retries;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.tool_retry = policy;
        self
    }

    /// Run one subtask to a verdict.
    ///
    /// `subtask-start` is emitted first and `subtask-complete` exactly once
    /// on the way out, cancellation included. `subtask.done` is set only on
    /// success.
    pub async fn execute(
        &self,
        query: &str,
        task: &Task,
        subtask: &mut SubTask,
        store: &mut ContextStore,
        ctx: &RunContext,
    ) -> Result<SubTaskResult> {
        ctx.events.emit(AgentEvent::SubtaskStart {
            task_id: task.id,
            subtask_id: subtask.id,
        });

        let outcome = self.run_loop(query, task, subtask, store, ctx).await;

        let success = matches!(&outcome, Ok(result) if result.success);
        if success {
            subtask.done = true;
        }
        ctx.events.emit(AgentEvent::SubtaskComplete {
            task_id: task.id,
            subtask_id: subtask.id,
            success,
        });

        outcome
    }

    async fn run_loop(
        &self,
        query: &str,
        task: &Task,
        subtask: &SubTask,
        store: &mut ContextStore,
        ctx: &RunContext,
    ) -> Result<SubTaskResult> {
        let scope = format!(
            "{}\nTask: {}\nSubtask: {}",
            query, task.description, subtask.description
        );

        // Rejected tool choices, fed back to later iterations
        let mut rejected: Vec<String> = Vec::new();

        for iteration in 1..=self.max_iterations {
            ctx.ensure_active()?;
            debug!(task_id = task.id, subtask_id = subtask.id, iteration, "Executor iteration");

            // -------------------------------------------------
            // 1. Relevant context
            // -------------------------------------------------
            let candidates = store.all_ids();
            if !candidates.is_empty() {
                ctx.events.status("Selecting relevant data…");
            }
            let selection = ctx
                .cancellable(async {
                    Ok(store.select_or_all(self.model.as_ref(), &scope, &candidates).await)
                })
                .await;
            if !candidates.is_empty() {
                ctx.events.status_done();
            }
            let (selected, selection_error) = selection?;
            if let Some(e) = selection_error {
                ctx.events
                    .diagnostic(format!("Context selection fell back to all entries: {}", e));
            }

            // Work that only reasons over existing data needs no new call.
            if iteration == 1 && !selected.is_empty() {
                if let Some(verdict) = self.judge(task, subtask, store, &selected, ctx).await? {
                    if verdict.done {
                        info!(
                            task_id = task.id,
                            subtask_id = subtask.id,
                            "Subtask satisfied by existing context"
                        );
                        return Ok(SubTaskResult {
                            task_id: task.id,
                            subtask_id: subtask.id,
                            success: true,
                            reason: verdict.reason,
                            iterations: iteration,
                        });
                    }
                }
            }

            // -------------------------------------------------
            // 2. Tool choice
            // -------------------------------------------------
            let rendered = store.render(&selected);
            let mut previous = self.previous_calls(task, subtask, store);
            previous.extend(rejected.iter().cloned());
            let (spec, proposal) = match self
                .choose_tool(query, task, subtask, &rendered, &previous, ctx)
                .await
            {
                Ok(choice) => choice,
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) => {
                    warn!(
                        task_id = task.id,
                        subtask_id = subtask.id,
                        iteration,
                        error = %e,
                        "Tool selection failed"
                    );
                    ctx.events.diagnostic(format!(
                        "Subtask {}.{}: {}",
                        task.id, subtask.id, e
                    ));
                    rejected.push(format!("iteration {} chose no valid tool ({})", iteration, e));
                    continue;
                }
            };

            // -------------------------------------------------
            // 3. Invocation with bounded retries, then record
            // -------------------------------------------------
            let call = self.invoke_with_retry(spec, &proposal, ctx).await?;

            store.record(NewContextEntry {
                task_id: task.id,
                subtask_id: subtask.id,
                tool_name: spec.name.to_string(),
                description: spec.describe_call(&proposal.arguments),
                arguments: proposal.arguments,
                outcome: call.outcome,
                attempts: call.attempts,
                retry_errors: call.retry_errors,
            })?;

            // -------------------------------------------------
            // 4. Completion verdict
            // -------------------------------------------------
            let mut judged = store.ids_for_subtask(task.id, subtask.id);
            judged.extend(selected.iter().copied());

            if let Some(verdict) = self.judge(task, subtask, store, &judged, ctx).await? {
                if verdict.done {
                    info!(
                        task_id = task.id,
                        subtask_id = subtask.id,
                        iteration,
                        "Subtask complete"
                    );
                    return Ok(SubTaskResult {
                        task_id: task.id,
                        subtask_id: subtask.id,
                        success: true,
                        reason: verdict.reason,
                        iterations: iteration,
                    });
                }
                debug!(task_id = task.id, subtask_id = subtask.id, reason = %verdict.reason, "Subtask not done yet");
            }
        }

        warn!(
            task_id = task.id,
            subtask_id = subtask.id,
            max_iterations = self.max_iterations,
            "{}",
            AgentError::IterationCapExceeded(self.max_iterations)
        );

        Ok(SubTaskResult {
            task_id: task.id,
            subtask_id: subtask.id,
            success: false,
            reason: ITERATION_CAP_REASON.to_string(),
            iterations: self.max_iterations,
        })
    }

    fn previous_calls(&self, task: &Task, subtask: &SubTask, store: &ContextStore) -> Vec<String> {
        store
            .ids_for_subtask(task.id, subtask.id)
            .into_iter()
            .filter_map(|id| store.get(id))
            .map(|entry| {
                let status = if entry.outcome.is_success() { "ok" } else { "failed" };
                format!("{} via {} ({})", entry.description, entry.tool_name, status)
            })
            .collect()
    }

    /// Ask for a tool call and check it against the registry, re-prompting
    /// with the rejection reason up to `tool_selection_retries` times.
    async fn choose_tool(
        &self,
        query: &str,
        task: &Task,
        subtask: &SubTask,
        rendered_context: &str,
        previous_calls: &[String],
        ctx: &RunContext,
    ) -> Result<(&ToolSpec, OptimizedToolArgs)> {
        let system = tool_selection_system_prompt(&self.tools.catalog());
        let mut feedback: Option<String> = None;
        let attempts = self.tool_selection_retries + 1;

        for attempt in 1..=attempts {
            let mut prompt = format!(
                "## Query\n\n{}\n\n## Task\n\n{}\n\n## Subtask\n\n{}\n",
                query, task.description, subtask.description
            );
            if !rendered_context.is_empty() {
                prompt.push_str(&format!("\n## Data so far\n\n{}", rendered_context));
            }
            if !previous_calls.is_empty() {
                prompt.push_str(&format!(
                    "\n## Calls already made for this subtask\n\n- {}\n",
                    previous_calls.join("\n- ")
                ));
            }
            if let Some(problem) = &feedback {
                prompt.push_str(&format!(
                    "\n## Correction\n\nYour previous choice was rejected: {}\n",
                    problem
                ));
            }

            let request = ModelRequest::new(system.clone(), prompt);
            ctx.events.status("Choosing a tool…");
            let proposal = ctx
                .cancellable(generate_object::<OptimizedToolArgs>(self.model.as_ref(), &request))
                .await;
            ctx.events.status_done();
            let proposal = proposal.and_then(|proposal| {
                let spec = self.tools.validate(&proposal)?;
                Ok((spec, proposal))
            });

            match proposal {
                Ok(choice) => {
                    debug!(tool = %choice.0.name, attempt, "Tool chosen");
                    return Ok(choice);
                }
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) => {
                    debug!(attempt, error = %e, "Tool choice rejected");
                    feedback = Some(e.to_string());
                }
            }
        }

        Err(AgentError::ToolSelection(format!(
            "no valid tool call after {} attempt(s): {}",
            attempts,
            feedback.unwrap_or_default()
        )))
    }

    async fn invoke_with_retry(
        &self,
        spec: &ToolSpec,
        proposal: &OptimizedToolArgs,
        ctx: &RunContext,
    ) -> Result<ToolCall> {
        let max_attempts = self.tool_retry.max_attempts.max(1);
        let mut attempt = 0;
        let mut retry_errors = Vec::new();

        loop {
            attempt += 1;
            ctx.ensure_active()?;
            ctx.events.status(format!("Running {}…", spec.name));

            let result = ctx.cancellable(self.tools.invoke(proposal)).await;
            ctx.events.status_done();

            let error = match result {
                Ok(data) => {
                    debug!(tool = %spec.name, attempt, "Tool call succeeded");
                    return Ok(ToolCall {
                        outcome: ToolOutcome::Success { data },
                        attempts: attempt,
                        retry_errors,
                    });
                }
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) => e,
            };

            if !is_retryable(&error) || attempt >= max_attempts {
                warn!(tool = %spec.name, attempt, error = %error, "Tool call failed");
                ctx.events.diagnostic(format!(
                    "{} failed after {} attempt(s): {}",
                    spec.name, attempt, error
                ));
                return Ok(ToolCall {
                    outcome: ToolOutcome::Failed {
                        error: error.to_string(),
                    },
                    attempts: attempt,
                    retry_errors,
                });
            }

            let delay = self.tool_retry.delay_for(attempt);
            warn!(
                tool = %spec.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Tool call failed, retrying"
            );
            retry_errors.push(error.to_string());

            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Completion verdict over `ids`. A failed judgement counts as "not done".
    async fn judge(
        &self,
        task: &Task,
        subtask: &SubTask,
        store: &ContextStore,
        ids: &[ContextId],
        ctx: &RunContext,
    ) -> Result<Option<IsDone>> {
        let prompt = format!(
            "## Task\n\n{}\n\n## Subtask\n\n{}\n\n## Data gathered\n\n{}",
            task.description,
            subtask.description,
            store.render(ids)
        );
        let request = ModelRequest::new(IS_DONE_SYSTEM_PROMPT, prompt);

        ctx.events.status("Checking progress…");
        let verdict = ctx
            .cancellable(generate_object::<IsDone>(self.model.as_ref(), &request))
            .await;
        ctx.events.status_done();

        match verdict {
            Ok(verdict) => Ok(Some(verdict)),
            Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
            Err(e) => {
                warn!(task_id = task.id, subtask_id = subtask.id, error = %e, "Completion check failed");
                ctx.events
                    .diagnostic(format!("Completion check for subtask {}.{} failed: {}", task.id, subtask.id, e));
                Ok(None)
            }
        }
    }
}

/// Transport-level failures are worth another attempt; contract violations are not.
fn is_retryable(error: &AgentError) -> bool {
    matches!(
        error,
        AgentError::ToolInvocation(_) | AgentError::Http(_) | AgentError::Io(_)
    )
}
