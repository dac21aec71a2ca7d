//! Startup and Shutdown
//!
//! Connects every configured tool provider, registers their tools, and
//! assembles the shared [`Agent`]. A provider that fails to start or
//! collides with an earlier one is logged and left out; the rest of the
//! runtime comes up without it.

use std::sync::Arc;

use agent_core::{
    error::Result,
    reasoning::{Agent, AgentBuilder},
    session::SessionManager,
    tool::{CollisionPolicy, ToolProvider, ToolRegistry},
    LlmProvider,
};

use crate::config::ClientConfig;
use crate::mcp::McpConnection;

/// Connect all providers concurrently, then register them in order.
///
/// Registration order (and so tool order in the model schema) follows the
/// order of `providers`, not connection speed.
pub async fn register_providers(
    providers: Vec<Arc<dyn ToolProvider>>,
    policy: CollisionPolicy,
) -> ToolRegistry {
    let connected = futures::future::join_all(providers.iter().map(|p| p.connect())).await;

    let mut registry = ToolRegistry::with_policy(policy);
    for (provider, outcome) in providers.into_iter().zip(connected) {
        if let Err(e) = outcome {
            tracing::warn!(provider = %provider.name(), error = %e, "Skipping tool provider");
            continue;
        }

        if let Err(e) = registry.register(Arc::clone(&provider)).await {
            tracing::warn!(provider = %provider.name(), error = %e, "Rejected tool provider");
            if let Err(e) = provider.close().await {
                tracing::warn!(provider = %provider.name(), error = %e, "Failed to close rejected provider");
            }
        }
    }

    registry
}

/// Connect the providers listed in `config.mcp_servers`
pub async fn connect_providers(config: &ClientConfig) -> ToolRegistry {
    let providers = config
        .mcp_servers
        .iter()
        .map(|server| {
            Arc::new(McpConnection::with_timeout(server.clone(), config.connect_timeout()))
                as Arc<dyn ToolProvider>
        })
        .collect();

    register_providers(providers, config.backend.collision_policy).await
}

/// Everything a front end needs to serve requests
#[derive(Clone)]
pub struct AgentRuntime {
    pub agent: Arc<Agent>,
    pub registry: Arc<ToolRegistry>,
    pub backend: Arc<dyn LlmProvider>,
    pub sessions: Arc<SessionManager>,
}

impl AgentRuntime {
    /// Bring up providers from `config` and wire them to `backend`
    pub async fn start(config: &ClientConfig, backend: Arc<dyn LlmProvider>) -> Result<Self> {
        let registry = connect_providers(config).await;
        Self::assemble(config, backend, registry)
    }

    /// Build the runtime around an already populated registry
    pub fn assemble(
        config: &ClientConfig,
        backend: Arc<dyn LlmProvider>,
        registry: ToolRegistry,
    ) -> Result<Self> {
        let registry = Arc::new(registry);
        tracing::info!(
            providers = registry.providers().len(),
            tools = registry.len(),
            "Tool registry ready"
        );

        let agent = AgentBuilder::new()
            .provider(Arc::clone(&backend))
            .tools(Arc::clone(&registry))
            .config(config.agent_config())
            .build()?;

        Ok(Self {
            agent: Arc::new(agent),
            registry,
            backend,
            sessions: Arc::new(config.session_manager()),
        })
    }

    /// Close every provider connection
    pub async fn shutdown(&self) {
        tracing::info!(providers = self.registry.providers().len(), "Closing tool providers");
        self.registry.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::error::AgentError;
    use agent_core::message::Turn;
    use agent_core::provider::{GenerationOptions, ModelInfo, ModelResponse, ProviderInfo};
    use agent_core::tool::{FunctionSchema, ToolResult, ToolSpec};
    use async_trait::async_trait;
    use serde_json::{Map, Value, json};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeProvider {
        name: &'static str,
        tools: Vec<&'static str>,
        reachable: bool,
        closed: AtomicBool,
    }

    impl FakeProvider {
        fn new(name: &'static str, tools: Vec<&'static str>, reachable: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                tools,
                reachable,
                closed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ToolProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn connect(&self) -> Result<()> {
            if self.reachable {
                Ok(())
            } else {
                Err(AgentError::connection(self.name, "spawn failed"))
            }
        }

        async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
            Ok(self.tools.iter().map(|t| ToolSpec::new(*t, "", json!({}))).collect())
        }

        async fn call_tool(&self, name: &str, _arguments: Map<String, Value>) -> Result<ToolResult> {
            Ok(ToolResult::new(format!("{}:{}", self.name, name)))
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dyns(providers: &[&Arc<FakeProvider>]) -> Vec<Arc<dyn ToolProvider>> {
        providers
            .iter()
            .map(|p| Arc::clone(*p) as Arc<dyn ToolProvider>)
            .collect()
    }

    struct EchoBackend;

    #[async_trait]
    impl LlmProvider for EchoBackend {
        async fn info(&self) -> Result<ProviderInfo> {
            Ok(ProviderInfo { name: "echo".into(), models: vec![], supports_tools: true })
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(
            &self,
            turns: &[Turn],
            _tools: Option<&[FunctionSchema]>,
            _options: &GenerationOptions,
        ) -> Result<ModelResponse> {
            Ok(ModelResponse::text(turns.last().map(Turn::content).unwrap_or_default()))
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_skipped() {
        let good = FakeProvider::new("good", vec!["a"], true);
        let bad = FakeProvider::new("bad", vec!["b"], false);

        let registry = register_providers(dyns(&[&bad, &good]), CollisionPolicy::Reject).await;
        assert_eq!(registry.names(), vec!["a"]);
        assert_eq!(registry.providers().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_provider_is_rejected_and_closed() {
        let first = FakeProvider::new("first", vec!["x", "y"], true);
        let second = FakeProvider::new("second", vec!["x"], true);

        let registry = register_providers(dyns(&[&first, &second]), CollisionPolicy::Reject).await;

        assert_eq!(registry.resolve("x").unwrap().provider_name(), "first");
        assert!(second.closed.load(Ordering::SeqCst));
        assert!(!first.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_registration_follows_config_order() {
        let a = FakeProvider::new("a", vec!["one"], true);
        let b = FakeProvider::new("b", vec!["two"], true);

        let registry = register_providers(dyns(&[&b, &a]), CollisionPolicy::Namespace).await;
        assert_eq!(registry.names(), vec!["b.two", "a.one"]);
    }

    #[tokio::test]
    async fn test_runtime_runs_and_shuts_down() {
        let provider = FakeProvider::new("p", vec!["t"], true);
        let registry = register_providers(dyns(&[&provider]), CollisionPolicy::Reject).await;

        let runtime = AgentRuntime::assemble(&ClientConfig::default(), Arc::new(EchoBackend), registry).unwrap();
        let answer = runtime.agent.chat(&runtime.sessions, None, "ping").await;
        assert_eq!(answer, "ping");

        runtime.shutdown().await;
        assert!(provider.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_binaries_leave_empty_registry() {
        let config = ClientConfig::from_json(
            r#"{"mcp_servers": [{"name": "ghost", "command": "/nonexistent/provider-binary"}]}"#,
        )
        .unwrap();

        let registry = connect_providers(&config).await;
        assert!(registry.is_empty());
    }
}
