//! Scripted fakes for unit tests

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{AgentError, Result};
use crate::message::Turn;
use crate::provider::{GenerationOptions, LlmProvider, ModelInfo, ModelResponse, ProviderInfo};
use crate::tool::{FunctionSchema, ToolProvider, ToolResult, ToolSpec};

/// One `complete` call as the backend saw it
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub turns: Vec<Turn>,
    pub tool_names: Option<Vec<String>>,
}

/// Backend that replays canned responses in order
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ModelResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    native_tools: bool,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<ModelResponse>) -> Self {
        Self::with_results(replies.into_iter().map(Ok).collect())
    }

    pub fn with_results(replies: Vec<Result<ModelResponse>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            native_tools: true,
        }
    }

    /// Report no structured tool-call support
    pub fn without_native_tools(mut self) -> Self {
        self.native_tools = false;
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        Ok(ProviderInfo {
            name: "Scripted".into(),
            models: self.list_models().await?,
            supports_tools: self.native_tools,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(
        &self,
        turns: &[Turn],
        tools: Option<&[FunctionSchema]>,
        _options: &GenerationOptions,
    ) -> Result<ModelResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            turns: turns.to_vec(),
            tool_names: tools.map(|t| t.iter().map(|s| s.function.name.clone()).collect()),
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::Other("script exhausted".into())))
    }

    fn supports_native_tools(&self) -> bool {
        self.native_tools
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "scripted".into(),
            name: "scripted".into(),
        }])
    }
}

#[derive(Clone)]
enum Behavior {
    Reply(String),
    Fail(String),
    Delay(Duration),
}

/// Tool provider with a fixed tool list and scripted outcomes
pub struct StaticToolProvider {
    name: String,
    tools: Vec<ToolSpec>,
    behavior: HashMap<String, Behavior>,
    calls: Mutex<Vec<(String, Value)>>,
    closed: AtomicBool,
    close_log: Option<Arc<Mutex<Vec<String>>>>,
    close_delay: Option<Duration>,
}

impl StaticToolProvider {
    pub fn new(name: &str, tools: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tools: tools
                .iter()
                .map(|t| {
                    ToolSpec::new(
                        *t,
                        format!("{} tool from {}", t, name),
                        json!({"type": "object", "properties": {}}),
                    )
                })
                .collect(),
            behavior: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_log: None,
            close_delay: None,
        }
    }

    pub fn with_reply(mut self, tool: &str, text: &str) -> Self {
        self.behavior.insert(tool.into(), Behavior::Reply(text.into()));
        self
    }

    pub fn with_failure(mut self, tool: &str, payload: &str) -> Self {
        self.behavior.insert(tool.into(), Behavior::Fail(payload.into()));
        self
    }

    pub fn with_delay(mut self, tool: &str, delay: Duration) -> Self {
        self.behavior.insert(tool.into(), Behavior::Delay(delay));
        self
    }

    /// Push the provider name onto `log` when closed
    pub fn with_close_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.close_log = Some(log);
        self
    }

    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolProvider for StaticToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolResult> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), Value::Object(arguments)));

        match self.behavior.get(name).cloned() {
            Some(Behavior::Reply(text)) => Ok(ToolResult::new(text)),
            Some(Behavior::Fail(payload)) => Err(AgentError::ToolExecution {
                tool: name.to_string(),
                payload,
            }),
            Some(Behavior::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(ToolResult::new(format!("{} finished late", name)))
            }
            None => Ok(ToolResult::new(format!("{} ok", name))),
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(log) = &self.close_log {
            log.lock().unwrap().push(self.name.clone());
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
