//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for Ollama's `/api/chat` endpoint with
//! function calling. Chat requests go through `reqwest` so that failures
//! keep the raw status and body; health checks and model listing use
//! `ollama-rs`.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Role, ToolCallRequest, Turn, generate_call_id},
    provider::{
        FinishReason, GenerationOptions, LlmProvider, ModelInfo, ModelResponse, ProviderInfo,
        TokenUsage,
    },
    tool::FunctionSchema,
};
use async_trait::async_trait;
use ollama_rs::Ollama;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::BackendConfig;

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Bearer token for proxied deployments
    pub api_key: Option<String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 120,
            api_key: None,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST")
            .unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self {
            host,
            port,
            api_key: std::env::var("OLLAMA_API_KEY").ok(),
            ..Default::default()
        }
    }

    /// Settings from the `backend` config section.
    ///
    /// A `base_url` wins over `host`/`port`; any path on it is ignored.
    pub fn from_backend(backend: &BackendConfig) -> Self {
        let (host, port) = backend
            .base_url
            .as_deref()
            .and_then(split_base_url)
            .unwrap_or_else(|| (backend.host.clone(), backend.port));

        Self {
            host,
            port,
            timeout_secs: backend.timeout_secs,
            api_key: backend.api_key.clone(),
        }
    }

    /// Root URL of the API, e.g. `http://localhost:11434`
    pub fn base_url(&self) -> String {
        format!("{}:{}", self.host.trim_end_matches('/'), self.port)
    }
}

fn split_base_url(raw: &str) -> Option<(String, u16)> {
    let url = Url::parse(raw).ok()?;
    let host = format!("{}://{}", url.scheme(), url.host_str()?);
    Some((host, url.port_or_known_default()?))
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
    http: Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client: Ollama::new(&config.host, config.port),
            http,
            config,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OllamaConfig::from_env())
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.base_url())
    }

    /// Convert agent turns to Ollama messages
    fn convert_turns(turns: &[Turn]) -> Vec<ChatMessage<'_>> {
        turns
            .iter()
            .map(|turn| ChatMessage {
                role: turn.role(),
                content: turn.content(),
                tool_calls: turn
                    .tool_calls()
                    .iter()
                    .map(|c| WireToolCall {
                        function: WireFunction {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect(),
                tool_name: match turn {
                    Turn::Tool { tool_name, .. } => Some(tool_name.as_str()),
                    _ => None,
                },
            })
            .collect()
    }

    /// Convert Ollama response to agent response
    fn convert_response(response: ChatResponse) -> ModelResponse {
        let tool_calls: Vec<ToolCallRequest> = response
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCallRequest::new(generate_call_id(), tc.function.name, tc.function.arguments))
            .collect();

        let finish_reason = if !tool_calls.is_empty() {
            FinishReason::ToolUse
        } else if response.done_reason.as_deref() == Some("length") {
            FinishReason::Length
        } else {
            FinishReason::Stop
        };

        let usage = match (response.prompt_eval_count, response.eval_count) {
            (Some(prompt), Some(completion)) => Some(TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt.saturating_add(completion),
            }),
            _ => None,
        };

        ModelResponse {
            content: response.message.content,
            tool_calls,
            model: response.model,
            usage,
            finish_reason: Some(finish_reason),
        }
    }

    /// Build Ollama generation options
    fn build_options(opts: &GenerationOptions) -> ChatOptions<'_> {
        ChatOptions {
            temperature: opts.temperature,
            top_p: opts.top_p,
            num_predict: opts.max_tokens,
            stop: (!opts.stop_sequences.is_empty()).then_some(opts.stop_sequences.as_slice()),
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [FunctionSchema]>,
    stream: bool,
    options: ChatOptions<'a>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: Role,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
struct ChatOptions<'a> {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    message: ResponseMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        let models = self.list_models().await.unwrap_or_default();

        Ok(ProviderInfo {
            name: "Ollama".into(),
            models,
            supports_tools: true,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        turns: &[Turn],
        tools: Option<&[FunctionSchema]>,
        options: &GenerationOptions,
    ) -> Result<ModelResponse> {
        let request = ChatRequest {
            model: &options.model,
            messages: Self::convert_turns(turns),
            tools,
            stream: false,
            options: Self::build_options(options),
        };

        let url = self.chat_url();
        tracing::debug!(
            url = %url,
            model = %options.model,
            turns = turns.len(),
            tools = tools.map_or(0, <[FunctionSchema]>::len),
            "Sending chat request"
        );

        let mut builder = self.http.post(&url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| AgentError::Backend {
            status: None,
            body: if e.is_connect() {
                format!("cannot connect to Ollama at {}: {}", self.config.base_url(), e)
            } else {
                e.to_string()
            },
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AgentError::Backend {
            status: Some(status.as_u16()),
            body: format!("failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(AgentError::Backend {
                status: Some(status.as_u16()),
                body,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(error = %e, "Undecodable chat response");
            AgentError::Backend {
                status: Some(status.as_u16()),
                body: body.clone(),
            }
        })?;

        Ok(Self::convert_response(parsed))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self.client
            .list_local_models()
            .await
            .map_err(|e| AgentError::Backend {
                status: None,
                body: e.to_string(),
            })?;

        Ok(models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
            })
            .collect())
    }
}
