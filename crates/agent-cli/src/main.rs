//! Agent CLI
//!
//! Interactive chat, one-shot questions, and tool inspection against the
//! same config the HTTP server uses.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{Agent, SessionId, SessionManager, ToolRegistry};
use agent_runtime::{AgentRuntime, ClientConfig, OllamaConfig, OllamaProvider};

#[derive(Parser)]
#[command(name = "agent-cli")]
#[command(about = "Chat with an LLM that can call MCP tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the JSON config file (falls back to AGENT_CONFIG, then ./config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Session to continue (a fresh one by default)
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Ask a single question and print the answer
    Ask {
        /// The question
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// List the tools registered from the configured providers
    Tools,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let runtime = start_runtime(cli.config).await?;

    let outcome = match cli.command {
        Some(Commands::Chat { session }) => cmd_chat(&runtime, session).await,
        None => cmd_chat(&runtime, None).await,
        Some(Commands::Ask { query }) => cmd_ask(&runtime, &query.join(" ")).await,
        Some(Commands::Tools) => cmd_tools(&runtime.registry),
    };

    runtime.shutdown().await;
    outcome
}

async fn start_runtime(config_path: Option<PathBuf>) -> anyhow::Result<AgentRuntime> {
    let mut config = match config_path {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::load_or_default(ClientConfig::resolve_path(None))?,
    };
    config.apply_env();
    config.validate()?;

    let backend = OllamaProvider::from_config(OllamaConfig::from_backend(&config.backend))?;
    let runtime = AgentRuntime::start(&config, Arc::new(backend)).await?;

    tracing::info!(
        model = %config.backend.model,
        providers = config.mcp_servers.len(),
        tools = runtime.registry.len(),
        "Runtime ready"
    );
    Ok(runtime)
}

async fn cmd_chat(runtime: &AgentRuntime, session: Option<String>) -> anyhow::Result<()> {
    let session = session.map_or_else(SessionId::new, SessionId::from_string);

    println!("agent v{}", env!("CARGO_PKG_VERSION"));
    println!("Session ID: {}", session);
    println!("Tools: {}", runtime.registry.len());
    println!("Type 'quit' or Ctrl+D to exit.\n");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    chat_loop(&runtime.agent, &runtime.sessions, &session, stdin, &mut stdout).await?;

    println!("\nSession ended.");
    Ok(())
}

/// Read queries line by line until `quit`, `exit` or end of input
async fn chat_loop<R, W>(
    agent: &Agent,
    sessions: &SessionManager,
    session: &SessionId,
    input: R,
    output: &mut W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query == "quit" || query == "exit" {
            break;
        }

        tracing::debug!(session = %session, chars = query.len(), "Sending query");
        let answer = agent.chat(sessions, Some(session.as_str()), query).await;
        output.write_all(format!("\n{}\n\n", answer).as_bytes()).await?;
    }

    output.flush().await
}

async fn cmd_ask(runtime: &AgentRuntime, query: &str) -> anyhow::Result<()> {
    let (answer, conversation) = runtime.agent.run(query, None).await;
    tracing::debug!(turns = conversation.len(), "Query finished");
    println!("{}", answer);
    Ok(())
}

fn cmd_tools(registry: &ToolRegistry) -> anyhow::Result<()> {
    if registry.is_empty() {
        println!("No tools registered.");
        return Ok(());
    }

    println!("{:<32}  {:<16}  DESCRIPTION", "TOOL", "PROVIDER");
    println!("{}", "-".repeat(80));
    for tool in registry.tools() {
        println!(
            "{:<32}  {:<16}  {}",
            tool.spec.name,
            tool.provider_name(),
            tool.spec.description
        );
        println!("{}", serde_json::to_string_pretty(&tool.spec.parameters)?);
    }
    Ok(())
}
