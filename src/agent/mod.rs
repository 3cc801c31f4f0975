//! Main orchestrator
//!
//! QUERY → PLAN → (TASK → SUBTASK*)* → ANSWER STREAM → COMPLETE
//!
//! One call to [`Agent::run`] handles exactly one query. Progress goes out
//! through the run's [`EventSender`](crate::events::EventSender) in program
//! order; the sequence ends with `run-complete` or a single `error`.

use crate::answer::AnswerGenerator;
use crate::config::AgentConfig;
use crate::context::ContextStore;
use crate::events::{AgentEvent, RunContext};
use crate::execution::TaskExecutor;
use crate::llm::LanguageModel;
use crate::memory::ConversationHistory;
use crate::models::{ContextEntry, ExecutionPlan, SubTaskResult};
use crate::planner::{Planner, TaskPlanner};
use crate::tools::ToolRegistry;
use crate::Result;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub answer: String,
    pub plan: ExecutionPlan,
    pub results: Vec<SubTaskResult>,
    pub contexts: Vec<ContextEntry>,
}

pub struct Agent {
    planner: Box<dyn Planner>,
    executor: TaskExecutor,
    answers: AnswerGenerator,
}

impl Agent {
    pub fn new(planner: Box<dyn Planner>, executor: TaskExecutor, answers: AnswerGenerator) -> Self {
        Self {
            planner,
            executor,
            answers,
        }
    }

    /// Wire the model-backed planner, executor and answer generator.
    pub fn from_config(
        model: Arc<dyn LanguageModel>,
        tools: Arc<ToolRegistry>,
        config: &AgentConfig,
    ) -> Self {
        let planner = TaskPlanner::new(model.clone(), tools.clone())
            .with_attempts(config.planning_attempts)
            .with_history_window(config.history_window);
        let executor = TaskExecutor::from_config(model.clone(), tools, config);
        let answers = AnswerGenerator::new(model).with_history_window(config.history_window);

        Self::new(Box::new(planner), executor, answers)
    }

    /// Run one query to completion.
    ///
    /// The user query and the assistant answer are appended to `history`
    /// only once the answer stream has been fully drained.
    pub async fn run(
        &self,
        query: &str,
        history: &mut ConversationHistory,
        ctx: &RunContext,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("agent_run", %run_id);

        async {
            info!(query = %query, "Agent: starting run");

            match self.run_inner(run_id, query, history, ctx).await {
                Ok(report) => {
                    info!(
                        subtasks = report.results.len(),
                        contexts = report.contexts.len(),
                        answer_chars = report.answer.len(),
                        "Agent: run complete"
                    );
                    ctx.events.emit(AgentEvent::RunComplete {});
                    Ok(report)
                }
                Err(e) => {
                    error!(error = %e, "Agent: run failed");
                    ctx.events.status_done();
                    ctx.events.emit(AgentEvent::Error {
                        message: e.to_string(),
                    });
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        query: &str,
        history: &mut ConversationHistory,
        ctx: &RunContext,
    ) -> Result<RunReport> {
        ctx.events.emit(AgentEvent::QueryReceived {
            query: query.to_string(),
        });

        // === PLAN ===
        let mut plan = self.planner.plan(query, history, ctx).await?;

        // === EXECUTE ===
        let mut store = ContextStore::new();
        let mut results = Vec::new();

        for planned in plan.tasks.iter_mut() {
            ctx.ensure_active()?;
            let task_id = planned.task.id;
            ctx.events.emit(AgentEvent::TaskStart { task_id });

            let mut success = true;
            for subtask in planned.subtasks.iter_mut() {
                let result = match self
                    .executor
                    .execute(query, &planned.task, subtask, &mut store, ctx)
                    .await
                {
                    Ok(result) => result,
                    Err(e) if e.is_run_fatal() => return Err(e),
                    Err(e) => {
                        warn!(task_id, subtask_id = subtask.id, error = %e, "Subtask failed");
                        ctx.events
                            .diagnostic(format!("Subtask {}.{} failed: {}", task_id, subtask.id, e));
                        SubTaskResult {
                            task_id,
                            subtask_id: subtask.id,
                            success: false,
                            reason: e.to_string(),
                            iterations: 0,
                        }
                    }
                };
                success &= result.success;
                results.push(result);
            }

            if planned.all_subtasks_done() {
                planned.task.done = true;
            }

            info!(task_id, success, "Task finished");
            ctx.events.emit(AgentEvent::TaskComplete { task_id, success });
        }

        // === ANSWER ===
        ctx.events.status("Generating answer…");
        let stream = self.answers.synthesize(query, history, &store, ctx).await;
        ctx.events.status_done();
        let mut stream = stream?;

        ctx.events.emit(AgentEvent::AnswerStart {});

        let mut answer = String::new();
        while let Some(chunk) = ctx.cancellable(async { Ok(stream.next().await) }).await? {
            let text = chunk?;
            if text.is_empty() {
                continue;
            }
            answer.push_str(&text);
            ctx.events.emit(AgentEvent::AnswerChunk { text });
        }

        ctx.events.emit(AgentEvent::AnswerEnd {});

        history.add_user_message(query);
        history.add_assistant_message(answer.clone());

        Ok(RunReport {
            run_id,
            answer,
            plan,
            results,
            contexts: store.entries().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::error::AgentError;
    use crate::events::EventSender;
    use crate::llm::{ScriptedModel, ScriptedReply};
    use crate::models::MessageRole;
    use crate::tools::{FinanceTool, ToolBackend, ToolSpec};
    use serde_json::{json, Map, Value};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls to `failing_tool`; everything else succeeds.
    struct MarketBackend {
        failing_tool: &'static str,
        failures: u32,
        calls: AtomicU32,
    }

    impl MarketBackend {
        fn healthy() -> Self {
            Self::failing("none", 0)
        }

        fn failing(failing_tool: &'static str, failures: u32) -> Self {
            Self {
                failing_tool,
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ToolBackend for MarketBackend {
        async fn invoke(&self, tool: &ToolSpec, _arguments: &Map<String, Value>) -> Result<Value> {
            if tool.name == self.failing_tool {
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= self.failures {
                    return Err(AgentError::ToolInvocation(format!("{} timed out", tool.name)));
                }
            }
            match tool.name {
                "get_news" => Ok(json!({ "news": [{ "title": "Acme opens new anvil plant" }] })),
                _ => Ok(json!({
                    "income_statements": [
                        { "report_period": "2026-06-30", "revenue": 145 },
                        { "report_period": "2026-03-31", "revenue": 130 },
                        { "report_period": "2025-12-31", "revenue": 120 },
                        { "report_period": "2025-09-30", "revenue": 110 }
                    ]
                })),
            }
        }
    }

    fn agent(model: Arc<ScriptedModel>, backend: MarketBackend, max_iterations: u32) -> Agent {
        let tools = Arc::new(ToolRegistry::new(FinanceTool::specs(), Arc::new(backend)));
        let config = AgentConfig {
            max_iterations,
            tool_retry: RetryPolicy::immediate(3),
            ..AgentConfig::default()
        };
        Agent::from_config(model, tools, &config)
    }

    fn statements_call() -> Value {
        json!({
            "tool_name": "get_income_statements",
            "arguments": { "ticker": "ACME", "period": "quarterly", "limit": 4 }
        })
    }

    fn single_subtask_plan() -> Value {
        json!({
            "tasks": [{
                "id": 1,
                "description": "Retrieve revenue",
                "subtasks": [{ "id": 1, "description": "Fetch quarterly income statements" }]
            }]
        })
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
        events.iter().map(AgentEvent::kind).collect()
    }

    fn position(events: &[AgentEvent], kind: &str) -> usize {
        events
            .iter()
            .position(|e| e.kind() == kind)
            .unwrap_or_else(|| panic!("no {kind} event"))
    }

    fn task_outcome(events: &[AgentEvent], id: u32) -> bool {
        events
            .iter()
            .find_map(|e| match e {
                AgentEvent::TaskComplete { task_id, success } if *task_id == id => Some(*success),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no task-complete for task {id}"))
    }

    /// Ordering properties every successful run must satisfy.
    fn assert_well_ordered(events: &[AgentEvent]) {
        assert_eq!(events.first().map(AgentEvent::kind), Some("query-received"));
        assert_eq!(events.last().map(AgentEvent::kind), Some("run-complete"));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

        let planned: HashSet<u32> = events
            .iter()
            .find_map(|e| match e {
                AgentEvent::TasksPlanned { tasks } => Some(tasks.iter().map(|t| t.id).collect()),
                _ => None,
            })
            .unwrap_or_default();
        let started: HashSet<u32> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::TaskStart { task_id } => Some(*task_id),
                _ => None,
            })
            .collect();
        assert_eq!(planned, started);

        let mut open_task: Option<u32> = None;
        let mut open_subtask: Option<(u32, u32)> = None;
        for event in events {
            match event {
                AgentEvent::TaskStart { task_id } => {
                    assert!(open_task.is_none());
                    open_task = Some(*task_id);
                }
                AgentEvent::SubtaskStart { task_id, subtask_id } => {
                    assert_eq!(open_task, Some(*task_id));
                    assert!(open_subtask.is_none());
                    open_subtask = Some((*task_id, *subtask_id));
                }
                AgentEvent::SubtaskComplete { task_id, subtask_id, .. } => {
                    assert_eq!(open_subtask.take(), Some((*task_id, *subtask_id)));
                }
                AgentEvent::TaskComplete { task_id, .. } => {
                    assert!(open_subtask.is_none());
                    assert_eq!(open_task.take(), Some(*task_id));
                }
                _ => {}
            }
        }

        let start = position(events, "answer-start");
        let end = position(events, "answer-end");
        assert!(position(events, "task-complete") < start);
        for (i, event) in events.iter().enumerate() {
            if event.kind() == "answer-chunk" {
                assert!(start < i && i < end);
            }
        }
    }

    fn streamed_text(events: &[AgentEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::AnswerChunk { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_revenue_question_end_to_end() {
        let model = Arc::new(ScriptedModel::new());
        model.push_structured(
            "ExecutionPlan",
            json!({
                "tasks": [{
                    "id": 1,
                    "description": "Retrieve and analyze revenue",
                    "subtasks": [
                        { "id": 1, "description": "Fetch quarterly income statements" },
                        { "id": 2, "description": "Compute growth trend" }
                    ]
                }]
            }),
        );
        model.push_structured("OptimizedToolArgs", statements_call());
        model.push_structured("IsDone", json!({ "done": true, "reason": "four quarters retrieved" }));
        model.push_structured("SelectedContexts", json!({ "context_ids": [0] }));
        model.push_structured("IsDone", json!({ "done": true, "reason": "trend computable" }));
        model.push_structured("SelectedContexts", json!({ "context_ids": [0] }));
        model.push_stream([
            "Acme's revenue over the last four quarters rose ",
            "from 110 to 145, ",
            "a 32% increase.",
        ]);

        let backend = MarketBackend::healthy();
        let agent = agent(model.clone(), backend, 5);
        let (sender, mut rx) = EventSender::channel();
        let mut history = ConversationHistory::new();

        let report = agent
            .run(
                "What was Acme's revenue over the last 4 quarters?",
                &mut history,
                &RunContext::new(sender),
            )
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_well_ordered(&events);
        assert!(task_outcome(&events, 1));
        assert!(report.plan.tasks[0].task.done);
        assert!(report.results.iter().all(|r| r.success));
        assert_eq!(report.contexts.len(), 1);

        let streamed = streamed_text(&events);
        assert_eq!(streamed, report.answer);
        assert_eq!(history.len(), 2);
        let last = history.last().unwrap();
        assert_eq!(last.role, MessageRole::Assistant);
        assert_eq!(last.content, streamed);
        assert!(streamed.contains("four quarters"));

        assert_eq!(model.requests_for("OptimizedToolArgs").len(), 1);
    }

    #[tokio::test]
    async fn test_tool_recovers_after_two_failures() {
        let model = Arc::new(ScriptedModel::new());
        model.push_structured("ExecutionPlan", single_subtask_plan());
        model.push_structured("OptimizedToolArgs", statements_call());
        model.push_structured("IsDone", json!({ "done": true, "reason": "ok" }));
        model.push_structured("SelectedContexts", json!({ "context_ids": [0] }));
        model.push_stream(["Revenue was 145."]);

        let backend = MarketBackend::failing("get_income_statements", 2);
        let (sender, mut rx) = EventSender::channel();
        let report = agent(model, backend, 5)
            .run("Acme revenue?", &mut ConversationHistory::new(), &RunContext::new(sender))
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_well_ordered(&events);
        assert!(!kinds(&events).contains(&"error"));
        assert!(task_outcome(&events, 1));
        assert_eq!(report.contexts[0].attempts, 3);
        assert!(report.contexts[0].outcome.is_success());
    }

    #[tokio::test]
    async fn test_malformed_plan_corrected_on_reprompt() {
        let model = Arc::new(ScriptedModel::new());
        model.push_structured(
            "ExecutionPlan",
            json!({
                "tasks": [{
                    "id": 1,
                    "description": "Retrieve revenue",
                    "subtasks": [
                        { "id": 1, "description": "Fetch statements" },
                        { "id": 1, "description": "Fetch statements again" }
                    ]
                }]
            }),
        );
        model.push_structured("ExecutionPlan", single_subtask_plan());
        model.push_structured("OptimizedToolArgs", statements_call());
        model.push_structured("IsDone", json!({ "done": true, "reason": "ok" }));
        model.push_structured("SelectedContexts", json!({ "context_ids": [0] }));
        model.push_stream(["Revenue was 145."]);

        let (sender, mut rx) = EventSender::channel();
        agent(model, MarketBackend::healthy(), 5)
            .run("Acme revenue?", &mut ConversationHistory::new(), &RunContext::new(sender))
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_well_ordered(&events);
        let kinds = kinds(&events);
        assert_eq!(kinds.iter().filter(|k| **k == "tasks-planned").count(), 1);
        assert_eq!(kinds.iter().filter(|k| **k == "subtasks-planned").count(), 1);
        assert!(position(&events, "diagnostic") < position(&events, "tasks-planned"));
    }

    #[tokio::test]
    async fn test_exhausted_tool_fails_task_but_run_answers() {
        let model = Arc::new(ScriptedModel::new());
        model.push_structured(
            "ExecutionPlan",
            json!({
                "tasks": [
                    {
                        "id": 1,
                        "description": "Retrieve revenue",
                        "subtasks": [{ "id": 1, "description": "Fetch income statements" }]
                    },
                    {
                        "id": 2,
                        "description": "Check recent news",
                        "subtasks": [{ "id": 1, "description": "Fetch latest news" }]
                    }
                ]
            }),
        );
        // Task 1: two iterations, every statements call fails
        model.push_structured("OptimizedToolArgs", statements_call());
        model.push_structured("IsDone", json!({ "done": false, "reason": "no data" }));
        model.push_structured("SelectedContexts", json!({ "context_ids": [0] }));
        model.push_structured("OptimizedToolArgs", statements_call());
        model.push_structured("IsDone", json!({ "done": false, "reason": "still no data" }));
        // Task 2: news succeeds
        model.push_structured("SelectedContexts", json!({ "context_ids": [] }));
        model.push_structured(
            "OptimizedToolArgs",
            json!({ "tool_name": "get_news", "arguments": { "ticker": "ACME", "limit": 5 } }),
        );
        model.push_structured("IsDone", json!({ "done": true, "reason": "headline found" }));
        // Answer over partial context
        model.push_structured("SelectedContexts", json!({ "context_ids": [1, 2] }));
        model.push_stream(["Revenue data was unavailable. ", "Acme opened a new plant."]);

        let backend = MarketBackend::failing("get_income_statements", u32::MAX);
        let (sender, mut rx) = EventSender::channel();
        let mut history = ConversationHistory::new();
        let report = agent(model, backend, 2)
            .run("How is Acme doing?", &mut history, &RunContext::new(sender))
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_well_ordered(&events);
        assert!(!task_outcome(&events, 1));
        assert!(task_outcome(&events, 2));
        assert!(!report.plan.tasks[0].task.done);
        assert!(report.plan.tasks[1].task.done);

        let failed = &report.results[0];
        assert!(!failed.success);
        assert_eq!(failed.iterations, 2);
        assert_eq!(report.contexts.len(), 3);
        assert!(!report.contexts[0].outcome.is_success());
        assert_eq!(history.last().unwrap().content, streamed_text(&events));
    }

    #[tokio::test]
    async fn test_planning_failure_is_single_terminal_error() {
        let model = Arc::new(ScriptedModel::new());
        for _ in 0..3 {
            model.push_structured("ExecutionPlan", json!({ "tasks": [] }));
        }

        let (sender, mut rx) = EventSender::channel();
        let mut history = ConversationHistory::new();
        let err = agent(model, MarketBackend::healthy(), 5)
            .run("Acme revenue?", &mut history, &RunContext::new(sender))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Planning(_)));
        let events = drain(&mut rx);
        let kinds = kinds(&events);
        assert_eq!(kinds.last(), Some(&"error"));
        assert_eq!(kinds.iter().filter(|k| **k == "error").count(), 1);
        assert!(!kinds.contains(&"task-start"));
        assert!(!kinds.contains(&"run-complete"));
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_broken_answer_stream_leaves_history_untouched() {
        let model = Arc::new(ScriptedModel::new());
        model.push_structured("ExecutionPlan", single_subtask_plan());
        model.push_structured("OptimizedToolArgs", statements_call());
        model.push_structured("IsDone", json!({ "done": true, "reason": "ok" }));
        model.push_structured("SelectedContexts", json!({ "context_ids": [0] }));
        model.push_stream_reply(ScriptedReply::BrokenStream(
            vec!["Revenue was ".into()],
            "connection reset".into(),
        ));

        let (sender, mut rx) = EventSender::channel();
        let mut history = ConversationHistory::new();
        let err = agent(model, MarketBackend::healthy(), 5)
            .run("Acme revenue?", &mut history, &RunContext::new(sender))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::StreamingGeneration(_)));
        assert!(history.is_empty());
        let kinds = kinds(&drain(&mut rx));
        assert!(kinds.contains(&"answer-chunk"));
        assert!(!kinds.contains(&"answer-end"));
        assert_eq!(kinds.last(), Some(&"error"));
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_error() {
        let model = Arc::new(ScriptedModel::new());
        let (sender, mut rx) = EventSender::channel();
        let ctx = RunContext::new(sender);
        ctx.cancel.cancel();

        let err = agent(model.clone(), MarketBackend::healthy(), 5)
            .run("Acme revenue?", &mut ConversationHistory::new(), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Cancelled));
        assert!(model.requests().is_empty());
        let events = drain(&mut rx);
        assert_eq!(
            events.last(),
            Some(&AgentEvent::Error {
                message: "Run cancelled".to_string()
            })
        );
    }
}
