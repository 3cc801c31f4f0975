//! Progress notifications
//!
//! The orchestrator only ever pushes events into a one-way channel; whoever
//! holds the receiver (HTTP stream, CLI printer, test harness) decides what
//! to do with them. An unbounded mpsc channel preserves emission order.

use serde::Serialize;
use serde_json::json;
use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::Result;

use crate::models::{PlannedTask, Task};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum AgentEvent {
    QueryReceived { query: String },
    TasksPlanned { tasks: Vec<Task> },
    SubtasksPlanned { subtasks: Vec<PlannedTask> },
    #[serde(rename_all = "camelCase")]
    TaskStart { task_id: u32 },
    #[serde(rename_all = "camelCase")]
    TaskComplete { task_id: u32, success: bool },
    #[serde(rename_all = "camelCase")]
    SubtaskStart { task_id: u32, subtask_id: u32 },
    #[serde(rename_all = "camelCase")]
    SubtaskComplete {
        task_id: u32,
        subtask_id: u32,
        success: bool,
    },
    Diagnostic { message: String },
    Status { message: String, active: bool },
    AnswerStart {},
    AnswerChunk { text: String },
    AnswerEnd {},
    RunComplete {},
    Error { message: String },
}

impl AgentEvent {
    /// Wire name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::QueryReceived { .. } => "query-received",
            AgentEvent::TasksPlanned { .. } => "tasks-planned",
            AgentEvent::SubtasksPlanned { .. } => "subtasks-planned",
            AgentEvent::TaskStart { .. } => "task-start",
            AgentEvent::TaskComplete { .. } => "task-complete",
            AgentEvent::SubtaskStart { .. } => "subtask-start",
            AgentEvent::SubtaskComplete { .. } => "subtask-complete",
            AgentEvent::Diagnostic { .. } => "diagnostic",
            AgentEvent::Status { .. } => "status",
            AgentEvent::AnswerStart {} => "answer-start",
            AgentEvent::AnswerChunk { .. } => "answer-chunk",
            AgentEvent::AnswerEnd {} => "answer-end",
            AgentEvent::RunComplete {} => "run-complete",
            AgentEvent::Error { .. } => "error",
        }
    }

    /// JSON payload without the kind tag
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("payload").map(serde_json::Value::take))
            .unwrap_or_else(|| json!({}))
    }

    /// `run-complete` and `error` end the sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::RunComplete {} | AgentEvent::Error { .. })
    }
}

/// Sending half of the progress channel
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl EventSender {
    /// Create a connected sender/receiver pair.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sender nobody listens to.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is watching anymore.
            let _ = tx.send(event);
        }
    }

    pub fn diagnostic(&self, message: impl Into<String>) {
        self.emit(AgentEvent::Diagnostic {
            message: message.into(),
        });
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(AgentEvent::Status {
            message: message.into(),
            active: true,
        });
    }

    pub fn status_done(&self) {
        self.emit(AgentEvent::Status {
            message: String::new(),
            active: false,
        });
    }
}

/// Per-run handles threaded through every pipeline stage: where progress
/// goes, and the signal that aborts the run at its next suspension point.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub events: EventSender,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(events: EventSender, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Fail with [`AgentError::Cancelled`] once cancellation was requested.
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }

    /// Await `fut` unless the run is cancelled first.
    pub async fn cancellable<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_serde_tag() {
        let events = vec![
            AgentEvent::QueryReceived { query: "q".into() },
            AgentEvent::TaskStart { task_id: 1 },
            AgentEvent::SubtaskComplete {
                task_id: 1,
                subtask_id: 2,
                success: false,
            },
            AgentEvent::AnswerStart {},
            AgentEvent::RunComplete {},
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["kind"], event.kind());
        }
    }

    #[test]
    fn test_payload_field_names() {
        let event = AgentEvent::SubtaskComplete {
            task_id: 1,
            subtask_id: 2,
            success: true,
        };
        assert_eq!(
            event.payload(),
            json!({ "taskId": 1, "subtaskId": 2, "success": true })
        );
        assert_eq!(AgentEvent::AnswerEnd {}.payload(), json!({}));
    }

    #[test]
    fn test_channel_preserves_order() {
        let (sender, mut rx) = EventSender::channel();
        sender.emit(AgentEvent::AnswerStart {});
        sender.emit(AgentEvent::AnswerChunk { text: "a".into() });
        sender.emit(AgentEvent::AnswerEnd {});
        drop(sender);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(kinds, vec!["answer-start", "answer-chunk", "answer-end"]);
    }

    #[test]
    fn test_run_context_cancellation() {
        let ctx = RunContext::new(EventSender::disconnected());
        assert!(ctx.ensure_active().is_ok());
        ctx.cancel.cancel();
        assert!(matches!(ctx.ensure_active(), Err(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellable_short_circuits() {
        let ctx = RunContext::new(EventSender::disconnected());
        assert_eq!(ctx.cancellable(async { Ok(7) }).await.unwrap(), 7);

        ctx.cancel.cancel();
        let pending = std::future::pending::<Result<u32>>();
        assert!(matches!(ctx.cancellable(pending).await, Err(AgentError::Cancelled)));
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (sender, rx) = EventSender::channel();
        drop(rx);
        sender.emit(AgentEvent::RunComplete {});
        EventSender::disconnected().diagnostic("ignored");
    }
}
