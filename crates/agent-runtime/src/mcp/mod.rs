//! MCP tool providers over stdio
//!
//! ```rust,ignore
//! use agent_runtime::mcp::McpConnection;
//!
//! let conn = Arc::new(McpConnection::new(server_config));
//! conn.connect().await?;
//! registry.register(conn).await?;
//! ```

mod connection;
pub mod protocol;

pub use connection::{CLOSE_GRACE, DEFAULT_CONNECT_TIMEOUT, MAX_LINE_BYTES, McpConnection};
