//! # agent-runtime
//!
//! Concrete collaborators for the agent loop.
//!
//! ## Components
//!
//! - **mcp**: tool providers as child processes speaking JSON-RPC over stdio
//! - **ollama** (default feature): LLM backend over Ollama's chat API
//! - **config**: JSON configuration with environment overrides
//! - **bootstrap**: connect providers and assemble the shared agent
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{AgentRuntime, ClientConfig, OllamaConfig, OllamaProvider};
//!
//! let config = ClientConfig::load("config.json")?;
//! let backend = OllamaProvider::from_config(OllamaConfig::from_backend(&config.backend))?;
//! let runtime = AgentRuntime::start(&config, Arc::new(backend)).await?;
//! let answer = runtime.agent.chat(&runtime.sessions, Some("demo"), "What files are here?").await;
//! runtime.shutdown().await;
//! ```

pub mod bootstrap;
pub mod config;
pub mod mcp;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use bootstrap::{AgentRuntime, connect_providers, register_providers};
pub use config::{BackendConfig, ClientConfig, ConfigError, McpServerConfig};
pub use mcp::McpConnection;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};

// Re-export core types for convenience
pub use agent_core::{
    Agent, AgentError, Conversation, LlmProvider, Result, SessionManager, ToolProvider, ToolRegistry,
};
