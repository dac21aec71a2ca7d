//! Tool System
//!
//! Tools live in external provider processes. A [`ToolProvider`] is one
//! connection to such a process; the [`ToolRegistry`] flattens the tools of
//! every registered provider into a single namespace, renders them for the
//! model, and routes each invocation back to the provider that owns it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::message::ToolCallRequest;
use crate::parser::ToolCallMode;

/// Tool definition advertised by a provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    #[serde(default)]
    pub description: String,

    /// JSON Schema of the arguments object
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Textual output of a tool, fed verbatim into the next Tool turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub text: String,
}

impl ToolResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Function-calling schema handed to the backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl FunctionSchema {
    fn from_spec(spec: &ToolSpec) -> Self {
        Self {
            kind: "function".into(),
            function: FunctionDefinition {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        }
    }
}

/// One connection to a tool-provider process
///
/// `list_tools` and `call_tool` require a successful `connect`; `close` is
/// idempotent. Implementations must tolerate concurrent callers, either by
/// queueing or by multiplexing requests.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Provider name (unique per deployment)
    fn name(&self) -> &str;

    /// Start the underlying session
    async fn connect(&self) -> Result<()>;

    /// Tools currently advertised by the provider
    async fn list_tools(&self) -> Result<Vec<ToolSpec>>;

    /// Invoke a tool by its provider-local name
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolResult>;

    /// Tear down the session and transport
    async fn close(&self) -> Result<()>;
}

/// What to do when two providers advertise the same tool name
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Reject the later registration with `DuplicateTool`
    #[default]
    Reject,
    /// Expose every tool as `<provider>.<tool>`
    Namespace,
}

/// Registry entry: a tool and the provider that owns it
#[derive(Clone)]
pub struct RegisteredTool {
    /// Spec as exposed to the model (name may be namespaced)
    pub spec: ToolSpec,

    /// Name the provider knows the tool by
    pub remote_name: String,

    provider: Arc<dyn ToolProvider>,
}

impl RegisteredTool {
    pub fn provider(&self) -> &Arc<dyn ToolProvider> {
        &self.provider
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Invoke the tool on its owning provider
    pub async fn invoke(&self, arguments: Map<String, Value>) -> Result<ToolResult> {
        self.provider.call_tool(&self.remote_name, arguments).await
    }
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("spec", &self.spec)
            .field("remote_name", &self.remote_name)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// Registry for available tools
///
/// Written only while providers register at startup, read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
    providers: Vec<Arc<dyn ToolProvider>>,
    policy: CollisionPolicy,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: CollisionPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Register every tool of a connected provider.
    ///
    /// Registration is all-or-nothing: on a name collision nothing from this
    /// provider is inserted. Returns the number of tools added.
    pub async fn register(&mut self, provider: Arc<dyn ToolProvider>) -> Result<usize> {
        let specs = provider.list_tools().await?;
        let incoming = provider.name().to_string();

        let mut staged = Vec::with_capacity(specs.len());
        let mut seen = HashSet::new();

        for spec in specs {
            let remote_name = spec.name.clone();
            let exposed = match self.policy {
                CollisionPolicy::Reject => remote_name.clone(),
                CollisionPolicy::Namespace => format!("{}.{}", incoming, remote_name),
            };

            if let Some(&idx) = self.index.get(&exposed) {
                return Err(AgentError::DuplicateTool {
                    tool: exposed,
                    existing: self.entries[idx].provider_name().to_string(),
                    incoming,
                });
            }
            if !seen.insert(exposed.clone()) {
                return Err(AgentError::DuplicateTool {
                    tool: exposed,
                    existing: incoming.clone(),
                    incoming,
                });
            }

            staged.push(RegisteredTool {
                spec: ToolSpec { name: exposed, ..spec },
                remote_name,
                provider: Arc::clone(&provider),
            });
        }

        let added = staged.len();
        for entry in staged {
            self.index.insert(entry.spec.name.clone(), self.entries.len());
            self.entries.push(entry);
        }
        self.providers.push(provider);

        tracing::info!(provider = %incoming, tools = added, "Registered provider");
        Ok(added)
    }

    /// Resolve a tool name to its registry entry
    pub fn resolve(&self, name: &str) -> Result<&RegisteredTool> {
        self.index
            .get(name)
            .map(|&idx| &self.entries[idx])
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    /// Resolve and run a tool call.
    ///
    /// Unknown names and malformed arguments fail before any provider is
    /// contacted.
    pub async fn invoke(&self, call: &ToolCallRequest) -> Result<ToolResult> {
        let tool = self.resolve(&call.name)?;
        let arguments = arguments_object(&call.name, &call.arguments)?;

        tracing::debug!(
            tool = %call.name,
            call_id = %call.id,
            provider = %tool.provider_name(),
            "Dispatching tool call"
        );
        tool.invoke(arguments).await
    }

    /// Function-calling schemas in registration order
    pub fn schema_for_model(&self) -> Vec<FunctionSchema> {
        self.entries.iter().map(|t| FunctionSchema::from_spec(&t.spec)).collect()
    }

    /// All entries in registration order
    pub fn tools(&self) -> &[RegisteredTool] {
        &self.entries
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|t| t.spec.name.as_str()).collect()
    }

    /// Providers that registered successfully
    pub fn providers(&self) -> &[Arc<dyn ToolProvider>] {
        &self.providers
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Generate system prompt section describing available tools.
    ///
    /// The fenced-JSON call format is only explained when `mode` reads tool
    /// calls from text.
    pub fn generate_prompt_section(&self, mode: ToolCallMode) -> String {
        let mut prompt = String::from("You can use the following tools:\n");

        for tool in &self.entries {
            let params = serde_json::to_string_pretty(&tool.spec.parameters)
                .unwrap_or_else(|_| tool.spec.parameters.to_string());
            prompt.push_str(&format!("- {}: {}\n", tool.spec.name, tool.spec.description));
            prompt.push_str(&format!("  Parameters: {}\n\n", params));
        }

        if mode.parses_text() {
            prompt.push_str(TOOL_CALL_INSTRUCTIONS);
        }
        prompt
    }

    /// Close every registered provider, one after another in registration order
    pub async fn close_all(&self) {
        for provider in &self.providers {
            if let Err(e) = provider.close().await {
                tracing::warn!(provider = %provider.name(), error = %e, "Failed to close provider");
            }
        }
    }
}

const TOOL_CALL_INSTRUCTIONS: &str = "\nTo use a tool, respond with exactly this format:\n```json\n{\"tool\": \"tool_name\", \"parameters\": {\"param1\": \"value1\"}}\n```\nAfter a tool runs you will be shown its result, then you can continue the conversation.";

/// Normalise tool arguments into a JSON object.
///
/// `null` means no arguments; a string is accepted when it holds a JSON
/// object (some backends send arguments pre-encoded).
pub fn arguments_object(tool: &str, arguments: &Value) -> Result<Map<String, Value>> {
    let invalid = |message: String| AgentError::InvalidArguments {
        tool: tool.to_string(),
        message,
    };

    match arguments {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(invalid(format!("expected a JSON object, got string {:?}", raw))),
        },
        other => Err(invalid(format!("expected a JSON object, got {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticToolProvider;
    use serde_json::json;
    use std::time::Duration;

    fn provider(name: &str, tools: &[&str]) -> Arc<StaticToolProvider> {
        Arc::new(StaticToolProvider::new(name, tools))
    }

    #[tokio::test]
    async fn test_resolve_every_registered_name() {
        let web = provider("web", &["search", "fetch"]);
        let fs = provider("fs", &["read_file"]);

        let mut registry = ToolRegistry::new();
        assert_eq!(registry.register(web.clone()).await.unwrap(), 2);
        assert_eq!(registry.register(fs.clone()).await.unwrap(), 1);

        for name in ["search", "fetch"] {
            assert_eq!(registry.resolve(name).unwrap().provider_name(), "web");
        }
        assert_eq!(registry.resolve("read_file").unwrap().provider_name(), "fs");
        assert!(matches!(
            registry.resolve("write_file"),
            Err(AgentError::UnknownTool(name)) if name == "write_file"
        ));
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected_without_overwrite() {
        let first = provider("alpha", &["x"]);
        let second = provider("beta", &["y", "x"]);

        let mut registry = ToolRegistry::new();
        registry.register(first).await.unwrap();

        let err = registry.register(second).await.unwrap_err();
        match err {
            AgentError::DuplicateTool { tool, existing, incoming } => {
                assert_eq!(tool, "x");
                assert_eq!(existing, "alpha");
                assert_eq!(incoming, "beta");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(registry.resolve("x").unwrap().provider_name(), "alpha");
        assert!(registry.resolve("y").is_err(), "rejected provider must not leak tools");
        assert_eq!(registry.providers().len(), 1);
    }

    #[tokio::test]
    async fn test_namespace_policy_avoids_collisions() {
        let mut registry = ToolRegistry::with_policy(CollisionPolicy::Namespace);
        registry.register(provider("alpha", &["x"])).await.unwrap();
        registry.register(provider("beta", &["x"])).await.unwrap();

        assert_eq!(registry.names(), vec!["alpha.x", "beta.x"]);
        let entry = registry.resolve("beta.x").unwrap();
        assert_eq!(entry.remote_name, "x");
    }

    #[tokio::test]
    async fn test_namespaced_invoke_uses_remote_name() {
        let beta = provider("beta", &["x"]);
        let mut registry = ToolRegistry::with_policy(CollisionPolicy::Namespace);
        registry.register(beta.clone()).await.unwrap();

        let call = ToolCallRequest::new("c1", "beta.x", json!({"k": 1}));
        registry.invoke(&call).await.unwrap();
        assert_eq!(beta.calls(), vec![("x".to_string(), json!({"k": 1}))]);
    }

    #[tokio::test]
    async fn test_schema_keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(provider("b", &["zeta", "alpha"])).await.unwrap();
        registry.register(provider("a", &["mid"])).await.unwrap();

        let names: Vec<String> = registry
            .schema_for_model()
            .into_iter()
            .map(|s| s.function.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);

        let schema = serde_json::to_value(&registry.schema_for_model()[0]).unwrap();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "zeta");
    }

    #[tokio::test]
    async fn test_unknown_tool_never_reaches_provider() {
        let web = provider("web", &["search"]);
        let mut registry = ToolRegistry::new();
        registry.register(web.clone()).await.unwrap();

        let call = ToolCallRequest::new("c1", "missing", json!({}));
        assert!(matches!(registry.invoke(&call).await, Err(AgentError::UnknownTool(_))));
        assert!(web.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_arguments_short_circuit() {
        let web = provider("web", &["search"]);
        let mut registry = ToolRegistry::new();
        registry.register(web.clone()).await.unwrap();

        let call = ToolCallRequest::new("c1", "search", json!([1, 2]));
        assert!(matches!(
            registry.invoke(&call).await,
            Err(AgentError::InvalidArguments { .. })
        ));
        assert!(web.calls().is_empty());
    }

    #[test]
    fn test_arguments_object_variants() {
        assert!(arguments_object("t", &Value::Null).unwrap().is_empty());
        assert_eq!(
            arguments_object("t", &json!("{\"q\": \"foo\"}")).unwrap()["q"],
            json!("foo")
        );
        assert!(arguments_object("t", &json!("not json")).is_err());
        assert!(arguments_object("t", &json!(3)).is_err());
    }

    #[tokio::test]
    async fn test_prompt_section_lists_tools_and_format() {
        let mut registry = ToolRegistry::new();
        registry.register(provider("web", &["search"])).await.unwrap();

        let section = registry.generate_prompt_section(ToolCallMode::Auto);
        assert!(section.contains("- search: search tool from web"));
        assert!(section.contains("Parameters:"));
        assert!(section.contains("\"tool\": \"tool_name\""));
    }

    #[tokio::test]
    async fn test_native_prompt_section_omits_text_format() {
        let mut registry = ToolRegistry::new();
        registry.register(provider("web", &["search"])).await.unwrap();

        let section = registry.generate_prompt_section(ToolCallMode::Native);
        assert!(section.contains("- search: search tool from web"));
        assert!(!section.contains("```json"));
    }

    #[tokio::test]
    async fn test_close_all_closes_providers() {
        let web = provider("web", &["search"]);
        let mut registry = ToolRegistry::new();
        registry.register(web.clone()).await.unwrap();

        registry.close_all().await;
        assert!(web.is_closed());
    }

    #[tokio::test]
    async fn test_close_all_follows_registration_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let slow = Arc::new(
            StaticToolProvider::new("slow", &["a"])
                .with_close_log(Arc::clone(&log))
                .with_close_delay(Duration::from_millis(30)),
        );
        let fast = Arc::new(StaticToolProvider::new("fast", &["b"]).with_close_log(Arc::clone(&log)));

        let mut registry = ToolRegistry::new();
        registry.register(slow).await.unwrap();
        registry.register(fast).await.unwrap();

        registry.close_all().await;
        assert_eq!(*log.lock().unwrap(), vec!["slow", "fast"]);
    }
}
