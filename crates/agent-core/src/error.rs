//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Provider process unreachable, handshake failed, or session dropped
    #[error("Connection error ({provider}): {message}")]
    Connection { provider: String, message: String },

    /// Operation attempted on a provider that is not connected
    #[error("Provider '{0}' is not connected")]
    NotConnected(String),

    /// Model requested a tool that no provider registered
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Provider reported a failure while running a tool
    #[error("Tool '{tool}' failed: {payload}")]
    ToolExecution { tool: String, payload: String },

    /// Two providers advertise the same tool name
    #[error("Duplicate tool '{tool}': already provided by '{existing}', rejected from '{incoming}'")]
    DuplicateTool {
        tool: String,
        existing: String,
        incoming: String,
    },

    /// Tool arguments are not a JSON object
    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    /// Tool call exceeded its deadline
    #[error("Tool '{tool}' timed out after {timeout_ms}ms")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    /// LLM backend returned a non-success response or could not be reached
    #[error("Backend error{}: {body}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Backend { status: Option<u16>, body: String },

    /// Reply looked like a tool call but nothing valid could be extracted
    #[error("Malformed tool call: {0}")]
    MalformedToolCall(String),

    /// Session error
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Shorthand for a connection error
    pub fn connection(provider: impl Into<String>, message: impl std::fmt::Display) -> Self {
        AgentError::Connection {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Connection { .. } | AgentError::ToolTimeout { .. } | AgentError::Io(_) => {
                true
            }
            AgentError::Backend { status, .. } => {
                status.map_or(true, |s| s == 429 || s >= 500)
            }
            _ => false,
        }
    }

    /// Stable snake_case tag, used in structured tool error text
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Connection { .. } => "connection",
            AgentError::NotConnected(_) => "not_connected",
            AgentError::UnknownTool(_) => "unknown_tool",
            AgentError::ToolExecution { .. } => "tool_execution",
            AgentError::DuplicateTool { .. } => "duplicate_tool",
            AgentError::InvalidArguments { .. } => "invalid_arguments",
            AgentError::ToolTimeout { .. } => "tool_timeout",
            AgentError::Backend { .. } => "backend",
            AgentError::MalformedToolCall(_) => "malformed_tool_call",
            AgentError::Session(_) => "session",
            AgentError::Config(_) => "config",
            AgentError::Io(_) => "io",
            AgentError::Json(_) => "json",
            AgentError::Other(_) => "other",
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Backend { status: Some(status), body } => {
                format!("Error: the model backend returned status {}: {}", status, body)
            }
            AgentError::Backend { status: None, body } => {
                format!("Error: could not reach the model backend: {}", body)
            }
            AgentError::Connection { provider, .. } => {
                format!("The tool provider '{}' is unavailable.", provider)
            }
            AgentError::NotConnected(provider) => {
                format!("The tool provider '{}' is not connected.", provider)
            }
            AgentError::UnknownTool(name) => format!("The tool '{}' is not available.", name),
            AgentError::ToolExecution { tool, payload } => {
                format!("Tool '{}' failed: {}", tool, payload)
            }
            AgentError::ToolTimeout { tool, .. } => format!("Tool '{}' took too long.", tool),
            AgentError::Session(msg) => format!("Session error: {}", msg),
            _ => "An unexpected error occurred.".into(),
        }
    }
}
