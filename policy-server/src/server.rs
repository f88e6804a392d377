use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use policy_rag::{AskRequest, AskResponse, PolicyAssistant, RagError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

const SERVICE: &str = "policy-assistant";

#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<PolicyAssistant>,
}

impl AppState {
    pub fn new(assistant: Arc<PolicyAssistant>) -> Self {
        Self { assistant }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Body of `POST /ask`. A missing session id starts a new session.
#[derive(Debug, Clone, Deserialize)]
pub struct AskBody {
    pub question: String,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub top_k_per_index: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorBody { error: message.into() }))
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ask", post(ask))
        .route("/sessions/{session_id}", delete(clear_session))
        .route("/admin/reload", post(reload))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn run_server(config: ServerConfig, assistant: Arc<PolicyAssistant>) -> anyhow::Result<()> {
    let app = app_router(AppState::new(Arc::clone(&assistant)));
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| "invalid host/port for policy-assistant server")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let banks = assistant.available_banks().await;
    info!(banks = ?banks, "policy-assistant listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let sessions = assistant.sessions().len().await;
    assistant.sessions().clear_all().await;
    info!(sessions, "policy-assistant stopped; sessions cleared");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn index(State(state): State<AppState>) -> impl IntoResponse {
    let banks = state.assistant.available_banks().await;
    Json(json!({
        "message": "Bank Policy Assistant API is running.",
        "available_banks": banks,
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status":"ok","service":SERVICE}))
}

async fn ask(
    State(state): State<AppState>,
    Json(body): Json<AskBody>,
) -> Result<Json<AskResponse>, ApiError> {
    let session_id = body
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let request = AskRequest {
        question: body.question,
        bank: body.bank,
        session_id,
        top_k_per_index: body.top_k_per_index,
    };

    match state.assistant.ask(request).await {
        Ok(response) => Ok(Json(response)),
        Err(RagError::InvalidRequest(message)) => Err(api_error(StatusCode::BAD_REQUEST, message)),
        Err(e) => {
            error!(error = %e, "failed to answer question");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to answer question"))
        }
    }
}

async fn clear_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let cleared = state.assistant.sessions().clear(&session_id).await;
    info!(session_id = %session_id, cleared, "cleared session");
    Json(json!({"session_id": session_id, "cleared": cleared}))
}

async fn reload(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    match state.assistant.reload().await {
        Ok(collections) => {
            info!(collection_count = collections.len(), "reloaded indexes");
            Ok(Json(json!({"collections": collections})))
        }
        Err(e) => {
            error!(error = %e, "failed to reload indexes");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
