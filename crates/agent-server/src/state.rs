//! Application State

use std::sync::Arc;

use agent_core::{Agent, LlmProvider, SessionManager, ToolRegistry};
use agent_runtime::AgentRuntime;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The agent every request runs through
    pub agent: Arc<Agent>,

    /// Conversations keyed by `session_id`
    pub sessions: Arc<SessionManager>,

    /// Tools registered at startup
    pub registry: Arc<ToolRegistry>,

    /// LLM backend (Ollama, etc.)
    pub backend: Arc<dyn LlmProvider>,
}

impl From<&AgentRuntime> for AppState {
    fn from(runtime: &AgentRuntime) -> Self {
        Self {
            agent: Arc::clone(&runtime.agent),
            sessions: Arc::clone(&runtime.sessions),
            registry: Arc::clone(&runtime.registry),
            backend: Arc::clone(&runtime.backend),
        }
    }
}
