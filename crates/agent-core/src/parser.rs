//! Response Parsing
//!
//! Turns a raw [`ModelResponse`] into the ordered list of tool calls the
//! agent loop should execute. Backends with function calling return calls
//! as structured fields; for everything else the assistant text is scanned
//! for a JSON tool-call block.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::error::{AgentError, Result};
use crate::message::{ToolCallRequest, generate_call_id};
use crate::provider::ModelResponse;

/// Fenced code block with an optional language tag
static FENCED_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```[\w-]*\s*(.*?)\s*```").ok());

/// How tool calls are obtained from the backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallMode {
    /// Structured tool calls only; schemas are sent with every request
    Native,
    /// Schemas are not sent; calls are parsed out of the reply text
    Fallback,
    /// Schemas are sent; text is parsed only when no structured call came back
    #[default]
    Auto,
}

impl ToolCallMode {
    /// Whether requests should carry the function-calling schema
    pub fn sends_schema(self) -> bool {
        !matches!(self, ToolCallMode::Fallback)
    }

    /// Whether tool calls may be read from the reply text
    pub fn parses_text(self) -> bool {
        !matches!(self, ToolCallMode::Native)
    }

    /// Settle `Auto` for a backend: without native tool support it is `Fallback`
    pub fn resolve(self, native_tools: bool) -> Self {
        match self {
            ToolCallMode::Auto if !native_tools => ToolCallMode::Fallback,
            mode => mode,
        }
    }
}

impl std::str::FromStr for ToolCallMode {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(ToolCallMode::Native),
            "fallback" => Ok(ToolCallMode::Fallback),
            "auto" => Ok(ToolCallMode::Auto),
            other => Err(AgentError::Config(format!("unknown tool call mode '{}'", other))),
        }
    }
}

/// A tool invocation recovered from free text
#[derive(Clone, Debug, PartialEq)]
pub struct ToolIntent {
    pub tool: String,
    pub parameters: Map<String, Value>,
}

impl ToolIntent {
    /// Promote to a request with a generated call id
    pub fn into_request(self) -> ToolCallRequest {
        ToolCallRequest::new(generate_call_id(), self.tool, Value::Object(self.parameters))
    }
}

/// Extracts tool calls from model replies
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseParser {
    mode: ToolCallMode,
}

impl ResponseParser {
    pub fn new(mode: ToolCallMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ToolCallMode {
        self.mode
    }

    /// Tool calls to execute for this response, in model order.
    ///
    /// Structured calls with a missing or repeated id get a generated one,
    /// so every call can be answered exactly once.
    pub fn tool_calls(&self, response: &ModelResponse) -> Vec<ToolCallRequest> {
        let mut seen = HashSet::new();
        let structured: Vec<ToolCallRequest> = response
            .tool_calls
            .iter()
            .cloned()
            .map(|mut call| {
                if call.id.is_empty() || !seen.insert(call.id.clone()) {
                    call.id = generate_call_id();
                }
                call
            })
            .collect();

        match self.mode {
            ToolCallMode::Native => structured,
            ToolCallMode::Auto if !structured.is_empty() => structured,
            ToolCallMode::Auto | ToolCallMode::Fallback => match Self::parse(&response.content) {
                Ok(intents) => intents.into_iter().map(ToolIntent::into_request).collect(),
                Err(e) => {
                    tracing::debug!(error = %e, "Treating reply as plain text");
                    Vec::new()
                }
            },
        }
    }

    /// Parse tool intents out of assistant text.
    ///
    /// The whole text is tried first as a single `{tool, parameters}` object,
    /// then every fenced block in order. Returns `MalformedToolCall` when
    /// fenced blocks were present but none held a valid intent.
    pub fn parse(text: &str) -> Result<Vec<ToolIntent>> {
        if let Some(intent) = whole_text_intent(text) {
            return Ok(vec![intent]);
        }

        let blocks = fenced_blocks(text);
        if blocks.is_empty() {
            return Ok(Vec::new());
        }

        let intents: Vec<ToolIntent> = blocks.iter().filter_map(|b| block_intent(b)).collect();
        if intents.is_empty() {
            return Err(AgentError::MalformedToolCall(format!(
                "{} fenced block(s), none a valid tool call",
                blocks.len()
            )));
        }
        Ok(intents)
    }

    /// Like [`parse`](Self::parse) but malformed input yields no intents
    pub fn extract_intents(text: &str) -> Vec<ToolIntent> {
        Self::parse(text).unwrap_or_default()
    }
}

fn whole_text_intent(text: &str) -> Option<ToolIntent> {
    let Value::Object(obj) = serde_json::from_str::<Value>(text.trim()).ok()? else {
        return None;
    };
    if !obj.contains_key("parameters") && !obj.contains_key("arguments") {
        return None;
    }
    intent_from_object(obj)
}

fn block_intent(block: &str) -> Option<ToolIntent> {
    match serde_json::from_str::<Value>(block).ok()? {
        Value::Object(obj) => intent_from_object(obj),
        _ => None,
    }
}

fn intent_from_object(mut obj: Map<String, Value>) -> Option<ToolIntent> {
    let tool = match obj.remove("tool")? {
        Value::String(name) if !name.trim().is_empty() => name,
        _ => return None,
    };

    let params = obj.remove("parameters").or_else(|| obj.remove("arguments"));
    let parameters = match params {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return None,
    };

    Some(ToolIntent { tool, parameters })
}

fn fenced_blocks(text: &str) -> Vec<&str> {
    let Some(re) = FENCED_BLOCK.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}
