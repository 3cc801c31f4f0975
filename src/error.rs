//! Error types for the research agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Tool selection error: {0}")]
    ToolSelection(String),

    #[error("Tool invocation error: {0}")]
    ToolInvocation(String),

    #[error("Iteration cap exceeded after {0} iterations")]
    IterationCapExceeded(u32),

    #[error("Context selection error: {0}")]
    ContextSelection(String),

    #[error("Answer generation error: {0}")]
    StreamingGeneration(String),

    // =============================
    // Collaborator Errors
    // =============================

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Schema validation failed for {schema}: {message}")]
    SchemaValidation { schema: &'static str, message: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Whether this error ends the run instead of being absorbed by the
    /// subtask or selection step that produced it.
    pub fn is_run_fatal(&self) -> bool {
        !matches!(
            self,
            AgentError::ToolSelection(_)
                | AgentError::ToolInvocation(_)
                | AgentError::IterationCapExceeded(_)
                | AgentError::ContextSelection(_)
                | AgentError::SchemaValidation { .. }
                | AgentError::ToolNotFound(_)
                | AgentError::InvalidToolInput(_)
        )
    }
}
