//! Error types for the fractal agent runtime.

use thiserror::Error;

/// The crate-wide error type. Every variant maps to exactly one wire error
/// kind via [`Error::wire_kind`] so the taxonomy exposed to embedders can
/// never drift from what the Rust type system enforces internally.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid arguments for {tool}: {detail}")]
    InvalidArguments { tool: String, detail: String },

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool {tool} timed out after {timeout_ms}ms")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    #[error("tool {tool} failed: {message}")]
    ToolError { tool: String, message: String },

    #[error("iteration limit ({limit}) reached")]
    IterationLimit { limit: usize },

    #[error("context overflow: {used} tokens over budget {budget}")]
    ContextOverflow { used: usize, budget: usize },

    #[error("fractal depth limit ({limit}) reached")]
    DepthLimit { limit: usize },

    #[error("delegation to {target} timed out after {timeout_ms}ms")]
    DelegationTimeout { target: String, timeout_ms: u64 },

    #[error("subtask {task_id} failed: {reason}")]
    SubtaskFailed { task_id: String, reason: String },

    #[error("llm error: {provider} - {message}")]
    LlmError { provider: String, message: String },

    #[error("no handler registered for action: {0}")]
    NoHandler(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_arguments(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidArguments { tool: tool.into(), detail: detail.into() }
    }

    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound(name.into())
    }

    pub fn tool_timeout(tool: impl Into<String>, timeout_ms: u64) -> Self {
        Self::ToolTimeout { tool: tool.into(), timeout_ms }
    }

    pub fn tool_error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolError { tool: tool.into(), message: message.into() }
    }

    pub fn iteration_limit(limit: usize) -> Self {
        Self::IterationLimit { limit }
    }

    pub fn context_overflow(used: usize, budget: usize) -> Self {
        Self::ContextOverflow { used, budget }
    }

    pub fn depth_limit(limit: usize) -> Self {
        Self::DepthLimit { limit }
    }

    pub fn delegation_timeout(target: impl Into<String>, timeout_ms: u64) -> Self {
        Self::DelegationTimeout { target: target.into(), timeout_ms }
    }

    pub fn subtask_failed(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SubtaskFailed { task_id: task_id.into(), reason: reason.into() }
    }

    pub fn llm_error(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmError { provider: provider.into(), message: message.into() }
    }

    pub fn no_handler(action: impl Into<String>) -> Self {
        Self::NoHandler(action.into())
    }

    pub fn session_not_found(key: impl Into<String>) -> Self {
        Self::SessionNotFound(key.into())
    }

    pub fn skill_not_found(id: impl Into<String>) -> Self {
        Self::SkillNotFound(id.into())
    }

    /// The stable wire identifier for this error, used by CloudEvent/Task
    /// serialisation so the error taxonomy stays fixed across versions.
    pub fn wire_kind(&self) -> &'static str {
        match self {
            Error::InvalidArguments { .. } => "invalid_arguments",
            Error::ToolNotFound(_) => "tool_not_found",
            Error::ToolTimeout { .. } => "tool_timeout",
            Error::ToolError { .. } => "tool_error",
            Error::IterationLimit { .. } => "iteration_limit",
            Error::ContextOverflow { .. } => "context_overflow",
            Error::DepthLimit { .. } => "depth_limit",
            Error::DelegationTimeout { .. } => "delegation_timeout",
            Error::SubtaskFailed { .. } => "subtask_failed",
            Error::LlmError { .. } => "llm_error",
            Error::NoHandler(_) => "no_handler",
            Error::Cancelled => "cancelled",
            Error::SessionNotFound(_) => "session_not_found",
            Error::SkillNotFound(_) => "skill_not_found",
            Error::ConfigError(_) => "config_error",
            Error::IoError(_) => "io_error",
            Error::JsonError(_) => "json_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether a tool-executor retry loop should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ToolTimeout { .. } | Error::IoError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_kind_matches_taxonomy() {
        assert_eq!(Error::tool_not_found("bash").wire_kind(), "tool_not_found");
        assert_eq!(Error::iteration_limit(10).wire_kind(), "iteration_limit");
        assert_eq!(Error::Cancelled.wire_kind(), "cancelled");
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::tool_timeout("bash", 5000).is_retryable());
        assert!(!Error::tool_not_found("bash").is_retryable());
        assert!(!Error::invalid_arguments("bash", "missing field").is_retryable());
    }
}
