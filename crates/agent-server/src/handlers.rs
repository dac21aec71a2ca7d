//! HTTP Handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub backend_connected: bool,
    pub tools: usize,
}

#[derive(Debug, Deserialize)]
pub struct ProcessMessageRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub provider: String,
    pub parameters: Value,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: &str, code: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let backend_connected = state.backend.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        backend_connected,
        tools: state.registry.len(),
    })
}

/// Registered tools with their owning provider
pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolInfo>> {
    Json(
        state
            .registry
            .tools()
            .iter()
            .map(|t| ToolInfo {
                name: t.spec.name.clone(),
                description: t.spec.description.clone(),
                provider: t.provider_name().to_string(),
                parameters: t.spec.parameters.clone(),
            })
            .collect(),
    )
}

/// Models available on the backend
pub async fn list_models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, ApiError> {
    let models = state.backend.list_models().await.map_err(|e| {
        tracing::warn!("Model listing failed: {}", e);
        (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: e.user_message(),
                code: "BACKEND_UNAVAILABLE".into(),
            }),
        )
    })?;

    Ok(Json(ModelsResponse {
        models: models.into_iter().map(|m| m.id).collect(),
    }))
}

/// Free-text message, optionally threaded through a session
pub async fn process_message(
    State(state): State<AppState>,
    Json(payload): Json<ProcessMessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let message = payload
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| bad_request("Message is required", "MISSING_MESSAGE"))?;

    tracing::info!(session = payload.session_id.as_deref().unwrap_or("-"), "Processing message");
    let response = state
        .agent
        .chat(&state.sessions, payload.session_id.as_deref(), &message)
        .await;

    Ok(Json(MessageResponse { response }))
}

/// Structured request `{name, ...fields}` turned into an instruction
pub async fn structured_request(
    State(state): State<AppState>,
    Json(mut payload): Json<Map<String, Value>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let name = take_name(&mut payload)
        .ok_or_else(|| bad_request("Field 'name' is required", "MISSING_NAME"))?;

    let instruction = build_instruction(&name, &payload);
    tracing::info!(request = %name, fields = payload.len(), "Processing structured request");

    let response = state.agent.chat(&state.sessions, None, &instruction).await;
    Ok(Json(MessageResponse { response }))
}

/// Remove `name` from the request, keeping the other fields in order
fn take_name(payload: &mut Map<String, Value>) -> Option<String> {
    match payload.shift_remove("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => Some(name),
        _ => None,
    }
}

/// `name` on the first line, then one `- key: value` line per field.
///
/// Strings are inserted bare; other values as compact JSON.
pub fn build_instruction(name: &str, fields: &Map<String, Value>) -> String {
    let mut instruction = name.to_string();
    for (key, value) in fields {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        instruction.push_str(&format!("\n- {}: {}", key, rendered));
    }
    instruction
}
