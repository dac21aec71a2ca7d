//! Agent HTTP Server
//!
//! Axum-based server exposing the tool-using agent over REST.
//!
//! Tool providers listed in the config file are started at boot and
//! closed again after a Ctrl-C shutdown.

mod handlers;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::LlmProvider;
use agent_runtime::{AgentRuntime, ClientConfig, OllamaConfig, OllamaProvider};

use crate::handlers::{health_check, list_models, list_tools, process_message, structured_request};
use crate::state::AppState;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";

#[derive(Parser, Debug)]
#[command(name = "agent-server", version, about = "HTTP front end for the tool-using agent")]
struct Args {
    /// Path to the JSON config file (falls back to AGENT_CONFIG, then ./config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides BIND_ADDR)
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::load_or_default(ClientConfig::resolve_path(None))?,
    };
    config.apply_env();
    config.validate()?;

    // Initialize LLM backend
    let backend = Arc::new(OllamaProvider::from_config(OllamaConfig::from_backend(&config.backend))?);

    match backend.health_check().await {
        Ok(true) => {
            tracing::info!("✓ Connected to Ollama at {}", backend.config().base_url());
            if let Ok(models) = backend.list_models().await {
                for model in models {
                    tracing::info!("  Model: {}", model.id);
                }
            }
        }
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ Ollama not available at {}", backend.config().base_url());
            tracing::warn!("  Make sure Ollama is running: ollama serve");
        }
    }

    // Start tool providers and assemble the agent
    let runtime = AgentRuntime::start(&config, backend).await?;
    tracing::info!("Registered {} tools:", runtime.registry.len());
    for name in runtime.registry.names() {
        tracing::info!("  • {}", name);
    }

    let app = router(AppState::from(&runtime));

    let addr = args
        .bind
        .or_else(|| std::env::var("BIND_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Agent server running on http://{}", addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health           - Health check");
    tracing::info!("  GET  /api/tools        - Registered tools");
    tracing::info!("  GET  /api/models       - Backend models");
    tracing::info!("  POST /process_message  - Send a message");
    tracing::info!("  POST /api/             - Structured request");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    runtime.shutdown().await;
    served?;

    Ok(())
}

/// Build the router around shared state
fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/tools", get(list_tools))
        .route("/api/models", get(list_models))
        // Agent API
        .route("/process_message", post(process_message))
        .route("/process_message/", post(process_message))
        .route("/api", post(structured_request))
        .route("/api/", post(structured_request))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
