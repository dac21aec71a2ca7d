//! Reasoning Loop
//!
//! Drives one request through the model and the tool providers:
//!
//! ```text
//! AwaitingUserInput -> ModelRequested -> (ToolCallsPending -> ToolExecuting -> ModelRequested)* -> Done
//! ```
//!
//! Tool calls of a round run one after another in the order the model
//! returned them. A failing tool never aborts the run; its error is written
//! into the Tool turn so the model can react to it. Backend failures end the
//! run and leave the conversation as it was at that point.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AgentError, Result};
use crate::message::{Conversation, ToolCallRequest, Turn};
use crate::parser::{ResponseParser, ToolCallMode};
use crate::provider::{GenerationOptions, LlmProvider};
use crate::session::{SessionId, SessionManager};
use crate::tool::{FunctionSchema, ToolRegistry};

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// System prompt template
    pub system_prompt: String,

    /// Generation options
    pub generation: GenerationOptions,

    /// How tool calls are read from model replies
    pub tool_call_mode: ToolCallMode,

    /// Tool rounds per run before the schema-free final answer
    pub max_tool_rounds: usize,

    /// Deadline for a single tool call
    pub tool_timeout: Duration,

    /// Whether to append tool descriptions to system prompt
    pub inject_tool_descriptions: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            generation: GenerationOptions::default(),
            tool_call_mode: ToolCallMode::default(),
            max_tool_rounds: 1,
            tool_timeout: Duration::from_secs(60),
            inject_tool_descriptions: true,
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant with access to external tools.
Use a tool only when it is needed to answer the user. If you can answer directly, do so.
After receiving tool results, use them to give a concise, accurate answer.";

/// Where a run currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    AwaitingUserInput,
    ModelRequested,
    ToolCallsPending,
    ToolExecuting,
    Done,
}

impl LoopState {
    fn advance(&mut self, next: LoopState, round: usize) {
        tracing::debug!(from = ?*self, to = ?next, round, "Agent loop transition");
        *self = next;
    }
}

/// The main Agent struct
///
/// Built once at startup and shared (behind `Arc`) by every caller.
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    parser: ResponseParser,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent.
    ///
    /// `Auto` mode falls back to text parsing when the backend reports no
    /// native tool support.
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        let mode = config.tool_call_mode.resolve(provider.supports_native_tools());
        Self {
            provider,
            tools,
            parser: ResponseParser::new(mode),
            config,
        }
    }

    /// Create with default configuration
    pub fn with_defaults(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self::new(provider, tools, AgentConfig::default())
    }

    /// Build the full system prompt including tool descriptions
    pub fn build_system_prompt(&self) -> String {
        let mut prompt = self.config.system_prompt.clone();

        if self.config.inject_tool_descriptions && !self.tools.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&self.tools.generate_prompt_section(self.parser.mode()));
        }

        prompt
    }

    /// Answer `query`, continuing `state` when given.
    ///
    /// Never fails: a backend error becomes the returned text, and the
    /// conversation comes back as it stood when the error occurred.
    pub async fn run(&self, query: &str, state: Option<Conversation>) -> (String, Conversation) {
        let mut conversation = state.unwrap_or_default();
        let answer = self.answer_or_report(query, &mut conversation).await;
        (answer, conversation)
    }

    /// Answer `query` within a session.
    ///
    /// Without a session id the query runs in a fresh conversation that is
    /// discarded afterwards. With one, the session's conversation is locked
    /// for the whole run and carried into the next call.
    pub async fn chat(&self, sessions: &SessionManager, session_id: Option<&str>, query: &str) -> String {
        let Some(id) = session_id else {
            return self.run(query, None).await.0;
        };

        let mut session = sessions.acquire(&SessionId::from_string(id)).await;
        let answer = self.answer_or_report(query, &mut session.conversation).await;
        session.touch();
        answer
    }

    async fn answer_or_report(&self, query: &str, conversation: &mut Conversation) -> String {
        match self.try_run(query, conversation).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!(error = %e, kind = e.kind(), "Agent run failed");
                e.user_message()
            }
        }
    }

    /// Run the loop, returning the final assistant text or the backend error
    pub async fn try_run(&self, query: &str, conversation: &mut Conversation) -> Result<String> {
        let mut state = LoopState::AwaitingUserInput;

        if conversation.is_empty() {
            conversation.append(Turn::system(self.build_system_prompt()));
        }
        conversation.append(Turn::user(query));

        let schema = self.tool_schema();
        let mut round = 0;

        loop {
            let may_call_tools = round < self.config.max_tool_rounds;
            let tools = if may_call_tools { schema.as_deref() } else { None };

            state.advance(LoopState::ModelRequested, round);
            let response = self
                .provider
                .complete(conversation.snapshot_for_model(), tools, &self.config.generation)
                .await?;

            let calls = if may_call_tools {
                self.parser.tool_calls(&response)
            } else {
                Vec::new()
            };

            if calls.is_empty() {
                conversation.append(Turn::assistant(response.content.clone()));
                state.advance(LoopState::Done, round);
                return Ok(response.content);
            }

            state.advance(LoopState::ToolCallsPending, round);
            conversation.append(Turn::assistant_with_calls(response.content, calls.clone()));

            state.advance(LoopState::ToolExecuting, round);
            for call in &calls {
                let content = self.execute_call(call, round).await;
                conversation.append(Turn::tool(&call.id, &call.name, content));
            }

            round += 1;
        }
    }

    fn tool_schema(&self) -> Option<Vec<FunctionSchema>> {
        (self.parser.mode().sends_schema() && !self.tools.is_empty())
            .then(|| self.tools.schema_for_model())
    }

    /// Execute one call, rendering any failure as the tool's output
    async fn execute_call(&self, call: &ToolCallRequest, round: usize) -> String {
        tracing::debug!(tool = %call.name, call_id = %call.id, round, "Executing tool");

        let deadline = self.config.tool_timeout;
        let outcome = match tokio::time::timeout(deadline, self.tools.invoke(call)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::ToolTimeout {
                tool: call.name.clone(),
                timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match outcome {
            Ok(result) => result.text,
            Err(e) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool call failed");
                tool_error_text(&e)
            }
        }
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Get configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

/// Tool turn content for a failed call
pub fn tool_error_text(error: &AgentError) -> String {
    json!({
        "error": {
            "kind": error.kind(),
            "message": error.to_string(),
        }
    })
    .to_string()
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: Arc::new(ToolRegistry::new()),
            config: AgentConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    pub fn tool_call_mode(mut self, mode: ToolCallMode) -> Self {
        self.config.tool_call_mode = mode;
        self
    }

    pub fn max_tool_rounds(mut self, rounds: usize) -> Self {
        self.config.max_tool_rounds = rounds;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self.provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        if self.config.max_tool_rounds == 0 {
            return Err(AgentError::Config("max_tool_rounds must be at least 1".into()));
        }

        Ok(Agent::new(provider, self.tools, self.config))
    }
}
