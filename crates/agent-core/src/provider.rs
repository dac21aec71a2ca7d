//! Model Backends
//!
//! Defines a common interface for LLM backends so the agent loop never
//! depends on a particular inference server.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{LlmProvider, GenerationOptions};
//!
//! let provider = OllamaProvider::from_env()?;
//! let response = provider.complete(conversation.snapshot_for_model(), Some(&schemas), &options).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{ToolCallRequest, Turn};
use crate::tool::FunctionSchema;

/// Sampling settings sent with every completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "llama3.2", "qwen2.5")
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Cap on generated tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 2048 }
fn default_top_p() -> f32 { 0.9 }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            stop_sequences: Vec::new(),
        }
    }
}

/// Response from one backend round-trip
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Assistant text
    pub content: String,

    /// Structured tool calls, in the order the model returned them
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Model name echoed by the backend
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub usage: Option<TokenUsage>,

    /// Finish reason
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

impl ModelResponse {
    /// Plain text reply without tool calls
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        }
    }

    /// Reply carrying structured tool calls
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            finish_reason: Some(FinishReason::ToolUse),
            ..Default::default()
        }
    }
}

/// Prompt and completion token counts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Why the backend stopped generating
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
}

/// Provider metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider name (e.g., "Ollama")
    pub name: String,

    /// Available models
    pub models: Vec<ModelInfo>,

    /// Whether structured tool/function calling is supported
    pub supports_tools: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

/// An LLM backend the agent loop can drive
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend name, known models and tool support
    async fn info(&self) -> Result<ProviderInfo>;

    /// `true` when the backend answers
    async fn health_check(&self) -> Result<bool>;

    /// Run one completion over the transcript.
    ///
    /// `tools` is `None` when the caller wants a plain natural-language
    /// answer; failures surface as [`AgentError::Backend`](crate::AgentError::Backend).
    async fn complete(
        &self,
        turns: &[Turn],
        tools: Option<&[FunctionSchema]>,
        options: &GenerationOptions,
    ) -> Result<ModelResponse>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Whether the backend returns tool calls as structured fields
    fn supports_native_tools(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert_eq!(opts.temperature, 0.7);
        assert_eq!(opts.max_tokens, 2048);
        assert_eq!(opts.model, "llama3.2");
    }

    #[test]
    fn test_response_constructors() {
        let plain = ModelResponse::text("done");
        assert!(plain.tool_calls.is_empty());
        assert_eq!(plain.finish_reason, Some(FinishReason::Stop));

        let calls = ModelResponse::with_tool_calls(
            "",
            vec![ToolCallRequest::generated("search", serde_json::json!({}))],
        );
        assert_eq!(calls.tool_calls.len(), 1);
        assert!(calls.tool_calls[0].id.starts_with("call_"));
    }
}
