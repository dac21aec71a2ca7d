//! Stdio connection to one MCP tool provider
//!
//! The provider is a child process speaking line-delimited JSON-RPC on its
//! stdin/stdout. A connection carries at most one request at a time: the
//! session lock is held from writing the request until its response has
//! been read, so callers sharing a provider queue behind each other.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use agent_core::error::{AgentError, Result};
use agent_core::tool::{ToolProvider, ToolResult, ToolSpec};

use super::protocol::{
    CallToolParams, CallToolResult, IncomingMessage, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcReply, JsonRpcRequest, ListToolsResult, METHOD_NOT_FOUND,
};
use crate::config::McpServerConfig;

/// Default bound on process start plus handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Time a provider gets to exit after its stdin closes
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Largest accepted response line (1 MiB)
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Upper bound on `tools/list` pages
const MAX_LIST_PAGES: usize = 64;

struct Session {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    /// A write was cancelled midway and left an unterminated line behind
    partial_write: bool,
}

/// Failure inside one request/response exchange
enum Exchange {
    /// No live session
    NotConnected,
    /// Transport broke or the provider misbehaved
    Transport(String),
    /// Provider answered with a JSON-RPC error
    Rpc(JsonRpcError),
}

/// Connection to a tool provider process
pub struct McpConnection {
    config: McpServerConfig,
    connect_timeout: Duration,
    session: Mutex<Option<Session>>,
    closed: AtomicBool,
    next_id: AtomicI64,
}

impl McpConnection {
    pub fn new(config: McpServerConfig) -> Self {
        Self::with_timeout(config, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeout(config: McpServerConfig, connect_timeout: Duration) -> Self {
        Self {
            config,
            connect_timeout,
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    /// Whether a handshake completed and `close` has not run
    pub async fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.session.lock().await.is_some()
    }

    fn spawn(&self) -> Result<Session> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            AgentError::connection(
                &self.config.name,
                format!("failed to start '{}': {}", self.config.command, e),
            )
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::connection(&self.config.name, "failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::connection(&self.config.name, "failed to capture stdout"))?;

        Ok(Session {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            partial_write: false,
        })
    }

    async fn handshake(&self, session: &mut Session) -> Result<InitializeResult> {
        let result: InitializeResult = self
            .exchange(session, "initialize", Some(InitializeParams::default()))
            .await
            .map_err(|e| self.connection_error("initialize", e))?;

        write_message(session, &JsonRpcRequest::notification("notifications/initialized"))
            .await
            .map_err(|e| AgentError::connection(&self.config.name, e))?;

        Ok(result)
    }

    fn next_request_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send one request and wait for the response carrying its id.
    ///
    /// Notifications, stale responses of abandoned requests, and stray
    /// non-JSON output are skipped. Requests from the provider are answered
    /// in place.
    async fn exchange<P, R>(
        &self,
        session: &mut Session,
        method: &str,
        params: Option<P>,
    ) -> std::result::Result<R, Exchange>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = params
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| Exchange::Transport(format!("cannot encode params: {}", e)))?;

        let id = self.next_request_id();
        write_message(session, &JsonRpcRequest::request(id, method, params))
            .await
            .map_err(Exchange::Transport)?;

        loop {
            let line = read_line(&mut session.stdout).await.map_err(Exchange::Transport)?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message = match serde_json::from_str::<IncomingMessage>(trimmed) {
                Ok(message) => message,
                Err(_) => {
                    tracing::debug!(provider = %self.config.name, "Skipping non JSON-RPC output");
                    continue;
                }
            };

            if message.answers(id) {
                let value = message.into_result().map_err(Exchange::Rpc)?;
                return serde_json::from_value(value)
                    .map_err(|e| Exchange::Transport(format!("unexpected {} result: {}", method, e)));
            }

            match (&message.method, &message.id) {
                (Some(request), Some(request_id)) => {
                    self.answer_provider_request(session, request, request_id.clone())
                        .await
                        .map_err(Exchange::Transport)?;
                }
                (Some(notification), None) => {
                    tracing::trace!(provider = %self.config.name, method = %notification, "Provider notification");
                }
                _ => {
                    tracing::debug!(
                        provider = %self.config.name,
                        id = ?message.id,
                        expected = id,
                        "Discarding stale response"
                    );
                }
            }
        }
    }

    async fn answer_provider_request(
        &self,
        session: &mut Session,
        method: &str,
        id: Value,
    ) -> std::result::Result<(), String> {
        let reply = if method == "ping" {
            JsonRpcReply {
                jsonrpc: "2.0",
                id,
                result: Some(Value::Object(Map::new())),
                error: None,
            }
        } else {
            tracing::debug!(provider = %self.config.name, method, "Rejecting provider request");
            JsonRpcReply {
                jsonrpc: "2.0",
                id,
                result: None,
                error: Some(JsonRpcError {
                    code: METHOD_NOT_FOUND,
                    message: format!("method '{}' is not supported by this client", method),
                    data: None,
                }),
            }
        };
        write_message(session, &reply).await
    }

    /// Run one exchange on the live session
    async fn request<P, R>(&self, method: &str, params: Option<P>) -> std::result::Result<R, Exchange>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let mut guard = self.session.lock().await;
        match guard.as_mut() {
            Some(session) if !self.closed.load(Ordering::SeqCst) => {
                self.exchange(session, method, params).await
            }
            _ => Err(Exchange::NotConnected),
        }
    }

    fn connection_error(&self, method: &str, error: Exchange) -> AgentError {
        match error {
            Exchange::NotConnected => AgentError::NotConnected(self.config.name.clone()),
            Exchange::Transport(msg) => AgentError::connection(&self.config.name, msg),
            Exchange::Rpc(err) => {
                AgentError::connection(&self.config.name, format!("{} rejected: {}", method, err))
            }
        }
    }
}

#[async_trait]
impl ToolProvider for McpConnection {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn connect(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AgentError::NotConnected(self.config.name.clone()));
        }

        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut session = self.spawn()?;
        let info = tokio::time::timeout(self.connect_timeout, self.handshake(&mut session))
            .await
            .map_err(|_| {
                AgentError::connection(
                    &self.config.name,
                    format!("handshake timed out after {:?}", self.connect_timeout),
                )
            })??;

        let server = info.server_info.as_ref();
        tracing::info!(
            provider = %self.config.name,
            server = server.map_or("unknown", |s| s.name.as_str()),
            version = server.and_then(|s| s.version.as_deref()).unwrap_or("-"),
            protocol = info.protocol_version.as_deref().unwrap_or("-"),
            "Connected to tool provider"
        );

        *guard = Some(session);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        let mut specs = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let page: ListToolsResult = tokio::time::timeout(
                self.connect_timeout,
                self.request("tools/list", params),
            )
            .await
            .map_err(|_| AgentError::connection(&self.config.name, "tools/list timed out"))?
            .map_err(|e| self.connection_error("tools/list", e))?;

            specs.extend(page.tools.into_iter().map(|t| ToolSpec {
                name: t.name,
                description: t.description.unwrap_or_default(),
                parameters: t
                    .input_schema
                    .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        tracing::debug!(provider = %self.config.name, tools = specs.len(), "Listed tools");
        Ok(specs)
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolResult> {
        let params = CallToolParams {
            name,
            arguments: &arguments,
        };

        let result: CallToolResult = self.request("tools/call", Some(params)).await.map_err(|e| match e {
            Exchange::Rpc(err) => AgentError::ToolExecution {
                tool: name.to_string(),
                payload: err.to_string(),
            },
            other => self.connection_error("tools/call", other),
        })?;

        if result.is_error {
            return Err(AgentError::ToolExecution {
                tool: name.to_string(),
                payload: result.text(),
            });
        }

        Ok(ToolResult::new(result.text()))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(mut session) = self.session.lock().await.take() else {
            return Ok(());
        };

        drop(session.stdin.take());
        match tokio::time::timeout(CLOSE_GRACE, session.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(provider = %self.config.name, %status, "Tool provider exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(provider = %self.config.name, error = %e, "Failed to reap tool provider");
            }
            Err(_) => {
                tracing::warn!(provider = %self.config.name, "Tool provider did not exit, killing");
                session.child.kill().await?;
            }
        }

        Ok(())
    }
}

/// Write one message as a single line.
///
/// If an earlier write was dropped halfway (its caller timed out), the
/// fragment is first terminated so the provider sees it as one malformed
/// line instead of a prefix of this message.
async fn write_message<T: Serialize>(session: &mut Session, message: &T) -> std::result::Result<(), String> {
    let mut line = serde_json::to_vec(message).map_err(|e| e.to_string())?;
    line.push(b'\n');

    let stdin = session.stdin.as_mut().ok_or_else(|| "stdin already closed".to_string())?;

    if session.partial_write {
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| format!("write failed: {}", e))?;
        session.partial_write = false;
    }

    session.partial_write = true;
    stdin
        .write_all(&line)
        .await
        .map_err(|e| format!("write failed: {}", e))?;
    session.partial_write = false;

    stdin.flush().await.map_err(|e| format!("write failed: {}", e))
}

/// Read one line, rejecting lines above [`MAX_LINE_BYTES`].
///
/// An oversized line is drained so the next read starts on a fresh message.
async fn read_line(stdout: &mut BufReader<ChildStdout>) -> std::result::Result<String, String> {
    let mut line = String::new();
    let limit = MAX_LINE_BYTES as u64 + 1;

    let read = (&mut *stdout)
        .take(limit)
        .read_line(&mut line)
        .await
        .map_err(|e| format!("read failed: {}", e))?;

    if read == 0 {
        return Err("provider closed its output".into());
    }
    if line.len() > MAX_LINE_BYTES && !line.ends_with('\n') {
        let mut discard = Vec::new();
        stdout
            .read_until(b'\n', &mut discard)
            .await
            .map_err(|e| format!("read failed: {}", e))?;
        return Err(format!("response line exceeds {} bytes", MAX_LINE_BYTES));
    }

    Ok(line)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Minimal provider written in POSIX sh.
    ///
    /// Answers with fixed ids: the client numbers requests from 1, so
    /// `initialize` is 1, `tools/list` is 2 and calls follow.
    fn script_provider(name: &str, script: &str) -> McpConnection {
        McpConnection::with_timeout(
            McpServerConfig {
                name: name.to_string(),
                command: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                env: HashMap::new(),
            },
            Duration::from_secs(5),
        )
    }

    const HANDSHAKE: &str = r#"
read line
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"fake","version":"0.1"}}}'
read line
"#;

    fn with_handshake(rest: &str) -> String {
        format!("{}{}", HANDSHAKE, rest)
    }

    #[tokio::test]
    async fn test_connect_list_and_call() {
        let conn = script_provider(
            "fake",
            &with_handshake(
                r#"
read line
echo '{"jsonrpc":"2.0","method":"notifications/message","params":{}}'
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"search","description":"Search things","inputSchema":{"type":"object","properties":{"query":{"type":"string"}}}},{"name":"bare"}]}}'
read line
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"bar"}]}}'
read line
"#,
            ),
        );

        conn.connect().await.unwrap();
        assert!(conn.is_connected().await);

        let tools = conn.list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "search");
        assert_eq!(tools[0].description, "Search things");
        assert_eq!(tools[1].description, "");
        assert_eq!(tools[1].parameters["type"], "object");

        let mut args = Map::new();
        args.insert("query".into(), Value::from("foo"));
        let result = conn.call_tool("search", args).await.unwrap();
        assert_eq!(result.text, "bar");

        conn.close().await.unwrap();
        assert!(!conn.is_connected().await);
    }

    #[tokio::test]
    async fn test_is_error_becomes_tool_execution() {
        let conn = script_provider(
            "fake",
            &with_handshake(
                r#"
read line
echo '{"jsonrpc":"2.0","id":2,"result":{"isError":true,"content":[{"type":"text","text":"disk full"}]}}'
read line
echo '{"jsonrpc":"2.0","id":3,"error":{"code":-32602,"message":"Invalid params"}}'
read line
"#,
            ),
        );
        conn.connect().await.unwrap();

        match conn.call_tool("write", Map::new()).await {
            Err(AgentError::ToolExecution { tool, payload }) => {
                assert_eq!(tool, "write");
                assert_eq!(payload, "disk full");
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.text)),
        }

        assert!(matches!(
            conn.call_tool("write", Map::new()).await,
            Err(AgentError::ToolExecution { payload, .. }) if payload.contains("Invalid params")
        ));
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_response_is_skipped() {
        let conn = script_provider(
            "fake",
            &with_handshake(
                r#"
read line
echo 'provider log line on stdout'
echo '{"jsonrpc":"2.0","id":99,"result":{"content":[{"type":"text","text":"old"}]}}'
echo '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"fresh"}]}}'
read line
"#,
            ),
        );
        conn.connect().await.unwrap();

        let result = conn.call_tool("search", Map::new()).await.unwrap();
        assert_eq!(result.text, "fresh");
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_line_is_rejected_and_drained() {
        let conn = script_provider(
            "fake",
            &with_handshake(
                r#"
read line
head -c 1100000 /dev/zero | tr '\000' x
echo
echo '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"late"}]}}'
read line
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"after"}]}}'
read line
"#,
            ),
        );
        conn.connect().await.unwrap();

        assert!(matches!(
            conn.call_tool("dump", Map::new()).await,
            Err(AgentError::Connection { message, .. }) if message.contains("exceeds")
        ));

        let result = conn.call_tool("dump", Map::new()).await.unwrap();
        assert_eq!(result.text, "after");
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_provider_ping_is_answered() {
        let conn = script_provider(
            "fake",
            &with_handshake(
                r#"
read line
echo '{"jsonrpc":"2.0","id":"p1","method":"ping"}'
read reply
case "$reply" in
  *'"id":"p1"'*'"result"'*) text=answered ;;
  *) text=ignored ;;
esac
echo "{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"$text\"}]}}"
read line
"#,
            ),
        );
        conn.connect().await.unwrap();

        let result = conn.call_tool("search", Map::new()).await.unwrap();
        assert_eq!(result.text, "answered");
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_connection() {
        let conn = Arc::new(script_provider(
            "fake",
            &with_handshake(
                r#"
i=2
while read line; do
  echo "{\"jsonrpc\":\"2.0\",\"id\":$i,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"r$i\"}]}}"
  i=$((i+1))
done
"#,
            ),
        ));
        conn.connect().await.unwrap();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let conn = Arc::clone(&conn);
                tokio::spawn(async move { conn.call_tool("search", Map::new()).await })
            })
            .collect();

        let mut texts = Vec::new();
        for handle in handles {
            texts.push(handle.await.unwrap().unwrap().text);
        }
        texts.sort();
        assert_eq!(texts, vec!["r2", "r3", "r4", "r5", "r6"]);
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_call_after_cancelled_write_stays_aligned() {
        let conn = script_provider(
            "fake",
            &with_handshake(
                r#"
sleep 1
read line
echo '{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}'
read line
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"recovered"}]}}'
read line
"#,
            ),
        );
        conn.connect().await.unwrap();

        // Larger than a pipe buffer, so the write is cut off while the provider sleeps
        let mut args = Map::new();
        args.insert("blob".into(), Value::from("x".repeat(MAX_LINE_BYTES)));
        let cancelled = tokio::time::timeout(Duration::from_millis(200), conn.call_tool("upload", args)).await;
        assert!(cancelled.is_err());

        let result = tokio::time::timeout(Duration::from_secs(10), conn.call_tool("upload", Map::new()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.text, "recovered");
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_provider_exit_is_connection_error() {
        let conn = script_provider("fake", &with_handshake("read line\n"));
        conn.connect().await.unwrap();

        assert!(matches!(
            conn.call_tool("search", Map::new()).await,
            Err(AgentError::Connection { provider, .. }) if provider == "fake"
        ));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let conn = McpConnection::with_timeout(
            McpServerConfig {
                name: "silent".into(),
                command: "sh".into(),
                args: vec!["-c".into(), "sleep 5".into()],
                env: HashMap::new(),
            },
            Duration::from_millis(100),
        );

        match conn.connect().await {
            Err(AgentError::Connection { message, .. }) => assert!(message.contains("timed out")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_connection_error() {
        let conn = McpConnection::new(McpServerConfig {
            name: "ghost".into(),
            command: "/nonexistent/tool-provider".into(),
            args: vec![],
            env: HashMap::new(),
        });
        assert!(matches!(conn.connect().await, Err(AgentError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_env_overrides_reach_provider() {
        let mut env = HashMap::new();
        env.insert("GREETING".to_string(), "hello from env".to_string());
        let conn = McpConnection::with_timeout(
            McpServerConfig {
                name: "env".into(),
                command: "sh".into(),
                args: vec![
                    "-c".into(),
                    with_handshake(
                        r#"
read line
echo "{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"$GREETING\"}]}}"
read line
"#,
                    ),
                ],
                env,
            },
            Duration::from_secs(5),
        );
        conn.connect().await.unwrap();
        assert_eq!(conn.call_tool("greet", Map::new()).await.unwrap().text, "hello from env");
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_not_connected_before_connect_and_after_close() {
        let conn = script_provider("fake", HANDSHAKE);
        assert!(matches!(conn.list_tools().await, Err(AgentError::NotConnected(_))));

        conn.connect().await.unwrap();
        conn.close().await.unwrap();
        conn.close().await.unwrap();

        assert!(matches!(
            conn.call_tool("x", Map::new()).await,
            Err(AgentError::NotConnected(_))
        ));
        assert!(matches!(conn.connect().await, Err(AgentError::NotConnected(_))));
    }
}
