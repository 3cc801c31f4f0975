//! Financial Research Agent
//!
//! An autonomous research agent that answers financial questions by:
//! - Decomposing the query into ordered tasks and subtasks
//! - Running each subtask through a bounded tool-calling loop
//! - Recording every tool result in an append-only context store
//! - Streaming a final answer synthesized from the gathered data
//!
//! UNIFIED LOOP:
//! QUERY → PLAN → EXECUTE (SELECT → TOOL → RECORD → JUDGE)* → ANSWER → COMPLETE

pub mod agent;
pub mod answer;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod execution;
pub mod llm;
pub mod memory;
pub mod models;
pub mod planner;
pub mod prompts;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use agent::{Agent, RunReport};
pub use config::{AgentConfig, RetryPolicy};
pub use error::AgentError;
pub use events::{AgentEvent, EventSender, RunContext};
pub use models::*;
