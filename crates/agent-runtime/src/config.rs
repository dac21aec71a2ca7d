//! Client Configuration
//!
//! Loaded from a JSON file (default `config.json`), then overridden from the
//! environment. Both the structured form
//!
//! ```json
//! {
//!   "mcp_servers": [{"name": "fs", "command": "npx", "args": ["-y", "@modelcontextprotocol/server-filesystem", "."]}],
//!   "backend": {"model": "llama3.2", "host": "http://localhost", "port": 11434}
//! }
//! ```
//!
//! and the flat form with top-level `model` and `base_url` are accepted.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use agent_core::parser::ToolCallMode;
use agent_core::reasoning::{AgentConfig, DEFAULT_SYSTEM_PROMPT};
use agent_core::session::{DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_IDLE, SessionManager};
use agent_core::tool::CollisionPolicy;

/// Default configuration file name
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One tool-provider process definition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// LLM backend settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub model: String,
    pub host: String,
    pub port: u16,

    /// Full endpoint URL; takes precedence over `host` and `port`
    pub base_url: Option<String>,

    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub tool_call_mode: ToolCallMode,
    pub max_tool_rounds: usize,
    pub tool_timeout_secs: u64,
    pub collision_policy: CollisionPolicy,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            host: "http://localhost".into(),
            port: 11434,
            base_url: None,
            api_key: None,
            timeout_secs: 120,
            system_prompt: None,
            temperature: None,
            tool_call_mode: ToolCallMode::default(),
            max_tool_rounds: 1,
            tool_timeout_secs: 60,
            collision_policy: CollisionPolicy::default(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 { 15 }
fn default_session_idle_secs() -> u64 { DEFAULT_SESSION_IDLE.as_secs() }
fn default_max_sessions() -> usize { DEFAULT_MAX_SESSIONS }

/// Whole client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,

    #[serde(default)]
    pub backend: BackendConfig,

    /// Bound on starting one provider and completing its handshake
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Idle time after which a session may be dropped
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,

    /// Cap on sessions kept in memory
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Flat-form model name
    #[serde(default, skip_serializing)]
    model: Option<String>,

    /// Flat-form endpoint URL
    #[serde(default, skip_serializing)]
    base_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mcp_servers: Vec::new(),
            backend: BackendConfig::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            session_idle_secs: default_session_idle_secs(),
            max_sessions: default_max_sessions(),
            model: None,
            base_url: None,
        }
    }
}

impl ClientConfig {
    /// Config path from the command line, `AGENT_CONFIG`, or the default
    pub fn resolve_path(cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| std::env::var_os("AGENT_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Read, normalise and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_json(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        tracing::info!(
            path = %path.display(),
            servers = config.mcp_servers.len(),
            model = %config.backend.model,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        tracing::warn!(path = %path.display(), "Config file not found, running without tool providers");
        Ok(Self::default())
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.fold_flat_form();
        config.validate()?;
        Ok(config)
    }

    fn fold_flat_form(&mut self) {
        if let Some(model) = self.model.take() {
            self.backend.model = model;
        }
        if let Some(base_url) = self.base_url.take() {
            self.backend.base_url = Some(base_url);
        }
    }

    /// Apply `OLLAMA_HOST`, `OLLAMA_PORT`, `AGENT_MODEL` and `OLLAMA_API_KEY`
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.backend.host = host;
            self.backend.base_url = None;
        }
        if let Some(port) = lookup("OLLAMA_PORT") {
            match port.parse() {
                Ok(port) => {
                    self.backend.port = port;
                    self.backend.base_url = None;
                }
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid OLLAMA_PORT"),
            }
        }
        if let Some(model) = lookup("AGENT_MODEL") {
            self.backend.model = model;
        }
        if let Some(key) = lookup("OLLAMA_API_KEY") {
            self.backend.api_key = Some(key);
        }
    }

    /// Check the invariants the rest of the runtime relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for server in &self.mcp_servers {
            if server.name.trim().is_empty() {
                return Err(ConfigError::Invalid("mcp server with empty name".into()));
            }
            if server.command.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "mcp server '{}' has an empty command",
                    server.name
                )));
            }
            if !names.insert(server.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "mcp server '{}' is defined twice",
                    server.name
                )));
            }
        }

        if self.backend.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid("backend.max_tool_rounds must be at least 1".into()));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be at least 1".into()));
        }
        if self.backend.model.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.model must not be empty".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Empty session table honouring the configured limits
    pub fn session_manager(&self) -> SessionManager {
        SessionManager::with_limits(Duration::from_secs(self.session_idle_secs), self.max_sessions)
    }

    /// Agent settings derived from the backend section
    pub fn agent_config(&self) -> AgentConfig {
        let backend = &self.backend;
        let mut config = AgentConfig {
            system_prompt: backend
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            tool_call_mode: backend.tool_call_mode,
            max_tool_rounds: backend.max_tool_rounds,
            tool_timeout: Duration::from_secs(backend.tool_timeout_secs),
            ..AgentConfig::default()
        };
        config.generation.model = backend.model.clone();
        if let Some(temperature) = backend.temperature {
            config.generation.temperature = temperature;
        }
        config
    }
}
