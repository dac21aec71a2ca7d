//! # agent-core
//!
//! Core agent logic: the conversation model, the tool registry that routes
//! calls to external tool providers, and the reasoning loop that ties them
//! to an LLM backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Agent                              │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │  Reasoning  │  │ ToolRegistry │  │    LlmProvider      │  │
//! │  │    Loop     │──│  (providers) │──│    (Strategy)       │  │
//! │  └─────────────┘  └──────────────┘  └─────────────────────┘  │
//! │         │                                                    │
//! │  ┌─────────────┐  ┌──────────────┐                           │
//! │  │ Conversation│  │ResponseParser│                           │
//! │  └─────────────┘  └──────────────┘                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in this crate performs I/O. Tool providers and backends are
//! traits; concrete implementations live in `agent-runtime`.

pub mod error;
pub mod message;
pub mod parser;
pub mod provider;
pub mod reasoning;
pub mod session;
pub mod tool;

#[cfg(test)]
mod testing;

pub use error::{AgentError, Result};
pub use message::{Conversation, Role, ToolCallRequest, Turn};
pub use parser::{ResponseParser, ToolCallMode, ToolIntent};
pub use provider::{GenerationOptions, LlmProvider, ModelResponse};
pub use reasoning::{Agent, AgentBuilder, AgentConfig, LoopState};
pub use session::{Session, SessionId, SessionManager};
pub use tool::{CollisionPolicy, FunctionSchema, RegisteredTool, ToolProvider, ToolRegistry, ToolResult, ToolSpec};
