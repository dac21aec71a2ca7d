//! Conversation Turns
//!
//! The transcript model shared by the agent loop and every backend.
//! A [`Conversation`] only ever grows: turns are appended, never edited
//! or removed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A tool invocation requested by the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlates the call with its Tool turn
    pub id: String,

    /// Tool name as the model used it
    pub name: String,

    /// Arguments as JSON (expected to be an object)
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Create a request with a freshly generated id
    pub fn generated(name: impl Into<String>, arguments: Value) -> Self {
        Self::new(generate_call_id(), name, arguments)
    }
}

/// Generate a tool-call id for calls that arrive without one
pub fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// A single turn in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Turn {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        tool_call_id: String,
        tool_name: String,
        content: String,
    },
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Turn::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Turn::User {
            content: content.into(),
        }
    }

    /// Assistant turn without tool calls
    pub fn assistant(content: impl Into<String>) -> Self {
        Turn::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Turn::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Turn::Tool {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Turn::System { .. } => Role::System,
            Turn::User { .. } => Role::User,
            Turn::Assistant { .. } => Role::Assistant,
            Turn::Tool { .. } => Role::Tool,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Turn::System { content }
            | Turn::User { content }
            | Turn::Assistant { content, .. }
            | Turn::Tool { content, .. } => content,
        }
    }

    /// Tool calls carried by an assistant turn (empty for other roles)
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Turn::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// Ordered, append-only transcript (the conversation state)
///
/// Cloning a conversation forks it; the copies evolve independently.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let mut conv = Self::new();
        conv.append(Turn::system(prompt));
        conv
    }

    /// Append a turn.
    ///
    /// # Panics
    ///
    /// Panics if the turn breaks transcript ordering: a system turn anywhere
    /// but first, or a tool turn that does not answer an open call of the
    /// nearest preceding assistant turn. Both indicate a bug in the caller.
    pub fn append(&mut self, turn: Turn) {
        if let Err(violation) = self.check_append(&turn) {
            panic!("transcript invariant violated: {violation}");
        }
        self.turns.push(turn);
    }

    fn check_append(&self, turn: &Turn) -> std::result::Result<(), String> {
        match turn {
            Turn::System { .. } if !self.turns.is_empty() => {
                Err("system turn must be the first turn".into())
            }
            Turn::Tool { tool_call_id, .. } => {
                let answered: Vec<&str> = self
                    .turns
                    .iter()
                    .rev()
                    .take_while(|t| t.role() == Role::Tool)
                    .filter_map(|t| match t {
                        Turn::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
                        _ => None,
                    })
                    .collect();

                let requester = self.turns.iter().rev().find(|t| t.role() != Role::Tool);
                let Some(Turn::Assistant { tool_calls, .. }) = requester else {
                    return Err(format!(
                        "tool result '{tool_call_id}' does not follow an assistant turn"
                    ));
                };

                if !tool_calls.iter().any(|c| &c.id == tool_call_id) {
                    return Err(format!(
                        "tool result '{tool_call_id}' matches no call of the preceding assistant turn"
                    ));
                }
                if answered.contains(&tool_call_id.as_str()) {
                    return Err(format!("tool call '{tool_call_id}' answered twice"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Turns in the exact order the backend receives them
    pub fn snapshot_for_model(&self) -> &[Turn] {
        &self.turns
    }

    /// Get the last turn
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn has_system_prompt(&self) -> bool {
        matches!(self.turns.first(), Some(Turn::System { .. }))
    }

    /// Tool calls of the last assistant turn that have no Tool turn yet
    pub fn pending_tool_calls(&self) -> Vec<&ToolCallRequest> {
        let answered: Vec<&str> = self
            .turns
            .iter()
            .rev()
            .take_while(|t| t.role() == Role::Tool)
            .filter_map(|t| match t {
                Turn::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect();

        match self.turns.iter().rev().find(|t| t.role() != Role::Tool) {
            Some(Turn::Assistant { tool_calls, .. }) => tool_calls
                .iter()
                .filter(|c| !answered.contains(&c.id.as_str()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Number of turns
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
