//! Core data models for the research agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;

use crate::llm::StructuredOutput;

/// Sequence id of a recorded context entry
pub type ContextId = u64;

//
// ================= Plan =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: u32,
    pub description: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubTask {
    pub id: u32,
    pub description: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedTask {
    #[serde(flatten)]
    pub task: Task,
    pub subtasks: Vec<SubTask>,
}

impl PlannedTask {
    /// True once every subtask has been marked done.
    pub fn all_subtasks_done(&self) -> bool {
        self.subtasks.iter().all(|s| s.done)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub tasks: Vec<PlannedTask>,
}

impl ExecutionPlan {
    /// Flattened task list, as announced in `tasks-planned`
    pub fn task_list(&self) -> Vec<Task> {
        self.tasks.iter().map(|t| t.task.clone()).collect()
    }

    /// Reset every `done` flag; a freshly planned run starts with nothing done.
    pub fn reset_progress(&mut self) {
        for planned in &mut self.tasks {
            planned.task.done = false;
            for subtask in &mut planned.subtasks {
                subtask.done = false;
            }
        }
    }

    /// Structural checks the model output must pass before execution.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.tasks.is_empty() {
            return Err("plan contains no tasks".to_string());
        }

        let mut task_ids = HashSet::with_capacity(self.tasks.len());
        for planned in &self.tasks {
            let task = &planned.task;
            if !task_ids.insert(task.id) {
                return Err(format!("duplicate task id {}", task.id));
            }
            if task.description.trim().is_empty() {
                return Err(format!("task {} has an empty description", task.id));
            }
            if planned.subtasks.is_empty() {
                return Err(format!("task {} has no subtasks", task.id));
            }

            let mut subtask_ids = HashSet::with_capacity(planned.subtasks.len());
            for subtask in &planned.subtasks {
                if !subtask_ids.insert(subtask.id) {
                    return Err(format!(
                        "duplicate subtask id {} in task {}",
                        subtask.id, task.id
                    ));
                }
                if subtask.description.trim().is_empty() {
                    return Err(format!(
                        "subtask {} of task {} has an empty description",
                        subtask.id, task.id
                    ));
                }
            }
        }

        Ok(())
    }
}

impl StructuredOutput for ExecutionPlan {
    const NAME: &'static str = "ExecutionPlan";

    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "integer", "minimum": 0 },
                            "description": { "type": "string" },
                            "subtasks": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "id": { "type": "integer", "minimum": 0 },
                                        "description": { "type": "string" }
                                    },
                                    "required": ["id", "description"]
                                }
                            }
                        },
                        "required": ["id", "description", "subtasks"]
                    }
                }
            },
            "required": ["tasks"]
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        self.check()
    }
}

//
// ================= Execution =================
//

/// Model verdict on whether a subtask's goal has been met
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IsDone {
    pub done: bool,
    #[serde(default)]
    pub reason: String,
}

impl StructuredOutput for IsDone {
    const NAME: &'static str = "IsDone";

    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "done": { "type": "boolean" },
                "reason": { "type": "string" }
            },
            "required": ["done", "reason"]
        })
    }
}

/// Tool choice proposed by the model, checked against the tool's contract
/// before any invocation happens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizedToolArgs {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl StructuredOutput for OptimizedToolArgs {
    const NAME: &'static str = "OptimizedToolArgs";

    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "tool_name": { "type": "string" },
                "arguments": { "type": "object" }
            },
            "required": ["tool_name", "arguments"]
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.tool_name.trim().is_empty() {
            return Err("tool_name is empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubTaskResult {
    pub task_id: u32,
    pub subtask_id: u32,
    pub success: bool,
    pub reason: String,
    pub iterations: u32,
}

//
// ================= Context =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutcome {
    Success { data: Value },
    Failed { error: String },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. })
    }
}

/// One recorded tool result (or recorded failure). Never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextEntry {
    pub id: ContextId,
    pub task_id: u32,
    pub subtask_id: u32,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub outcome: ToolOutcome,
    /// Invocation attempts it took to reach `outcome`
    pub attempts: u32,
    /// Errors from the attempts that were retried before `outcome`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_errors: Vec<String>,
    /// Human-readable summary of the call, used in selection prompts
    pub description: String,
    pub args_hash: String,
    pub recorded_at: DateTime<Utc>,
}

/// Ids the model picked as relevant for a decision point
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SelectedContexts {
    pub context_ids: Vec<ContextId>,
}

impl StructuredOutput for SelectedContexts {
    const NAME: &'static str = "SelectedContexts";

    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "context_ids": {
                    "type": "array",
                    "items": { "type": "integer", "minimum": 0 }
                }
            },
            "required": ["context_ids"]
        })
    }
}

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(id: u32, subtask_ids: &[u32]) -> PlannedTask {
        PlannedTask {
            task: Task {
                id,
                description: format!("task {}", id),
                done: false,
            },
            subtasks: subtask_ids
                .iter()
                .map(|&sid| SubTask {
                    id: sid,
                    description: format!("subtask {}", sid),
                    done: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_plan_check_accepts_valid_plan() {
        let plan = ExecutionPlan {
            tasks: vec![planned(1, &[1, 2]), planned(2, &[1])],
        };
        assert!(plan.check().is_ok());
    }

    #[test]
    fn test_plan_check_rejects_duplicates_and_empties() {
        let empty = ExecutionPlan { tasks: vec![] };
        assert!(empty.check().is_err());

        let dup_tasks = ExecutionPlan {
            tasks: vec![planned(1, &[1]), planned(1, &[2])],
        };
        assert_eq!(dup_tasks.check().unwrap_err(), "duplicate task id 1");

        let dup_subtasks = ExecutionPlan {
            tasks: vec![planned(3, &[1, 1])],
        };
        assert_eq!(
            dup_subtasks.check().unwrap_err(),
            "duplicate subtask id 1 in task 3"
        );

        let mut blank = planned(4, &[1]);
        blank.subtasks[0].description = "  ".to_string();
        let blank = ExecutionPlan { tasks: vec![blank] };
        assert!(blank.check().is_err());
    }

    #[test]
    fn test_plan_deserializes_without_done_flags() {
        let raw = json!({
            "tasks": [{
                "id": 0,
                "description": "retrieve revenue",
                "subtasks": [{ "id": 0, "description": "fetch statements" }]
            }]
        });
        let plan: ExecutionPlan = serde_json::from_value(raw).unwrap();
        assert!(!plan.tasks[0].task.done);
        assert!(!plan.tasks[0].all_subtasks_done());
        assert_eq!(plan.task_list()[0].description, "retrieve revenue");
    }

    #[test]
    fn test_tool_outcome_tagging() {
        let failed = ToolOutcome::Failed {
            error: "timeout".to_string(),
        };
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["status"], "failed");
        assert!(!failed.is_success());
    }
}
