//! HTTP and WebSocket gateway for OpenCodex.
//!
//! Endpoints:
//!
//! - `GET  /health`: liveness probe
//! - `POST /v1/chats`: create a chat session
//! - `GET  /v1/chats/{id}`: a session and its content blocks
//! - `GET  /v1/chats/{id}/stream`: WebSocket for running the agent
//!
//! Built on Axum. The WebSocket protocol lives in [`stream`].

pub mod active_runs;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt, future};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use opencodex_agent::{ReactAgent, StreamEvent};
use opencodex_config::AppConfig;
use opencodex_core::session::{ChatSession, ContentBlock};
use opencodex_core::store::SessionStore;
use opencodex_storage::{InMemoryStore, SqliteStore};
use opencodex_tools::{LocalSandbox, Workspace};

pub use active_runs::{ActiveRuns, RunGuard};
pub use stream::{ClientMessage, StreamSession, parse_client_message};

/// Outbound frames buffered per connection.
const OUTBOUND_BUFFER: usize = 256;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub store: Arc<dyn SessionStore>,
    pub agent: ReactAgent,
    pub active_runs: ActiveRuns,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(config: AppConfig, store: Arc<dyn SessionStore>, agent: ReactAgent) -> Self {
        Self {
            config,
            store,
            agent,
            active_runs: ActiveRuns::new(),
        }
    }

    /// Build storage, provider, tools and agent from configuration.
    pub async fn from_config(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = open_store(&config).await?;
        let provider = opencodex_providers::factory::build_from_config(&config)?;

        let root = config.sandbox.resolved_workspace_root();
        tokio::fs::create_dir_all(&root).await?;
        let sandbox = if config.sandbox.enabled {
            LocalSandbox::new(&root)
        } else {
            LocalSandbox::stopped(&root)
        };
        let workspace = Workspace::new(&root, Arc::new(sandbox));
        let tools = Arc::new(opencodex_tools::default_registry(
            workspace,
            Duration::from_secs(config.sandbox.command_timeout_secs),
        ));

        let mut agent = ReactAgent::new(provider, &config.default_model, tools)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_max_iterations(config.agent.max_iterations);
        if let Some(prompt) = &config.agent.system_prompt {
            agent = agent.with_system_prompt(prompt);
        }

        info!(
            provider = %config.default_provider,
            model = %config.default_model,
            store = store.name(),
            workspace = %root.display(),
            "Gateway state ready"
        );
        Ok(Self::new(config, store, agent))
    }
}

/// Open the configured session store.
pub async fn open_store(
    config: &AppConfig,
) -> Result<Arc<dyn SessionStore>, Box<dyn std::error::Error>> {
    match config.storage.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        _ => {
            let url = config.storage.resolved_database_url();
            if let Some(path) = url.strip_prefix("sqlite://")
                && let Some(parent) = std::path::Path::new(path).parent()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            Ok(Arc::new(SqliteStore::new(&url).await?))
        }
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chats", post(create_chat_handler))
        .route("/v1/chats/{session_id}", get(get_chat_handler))
        .route("/v1/chats/{session_id}/stream", get(stream_handler))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(GatewayState::from_config(config).await?);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct CreateChatRequest {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    environment: Option<serde_json::Value>,
}

async fn create_chat_handler(
    State(state): State<SharedState>,
    Json(req): Json<CreateChatRequest>,
) -> Response {
    let mut session = ChatSession::new(
        req.project_id.unwrap_or_else(|| "default".into()),
        req.name.unwrap_or_else(|| "New chat".into()),
    );
    if let Some(environment) = req.environment {
        session = session.with_environment(environment);
    }

    match state.store.create_session(session).await {
        Ok(session) => {
            info!(session_id = %session.id, "Chat session created");
            (StatusCode::CREATED, Json(session)).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Serialize)]
struct ChatResponse {
    session: ChatSession,
    blocks: Vec<ContentBlock>,
}

async fn get_chat_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Response {
    let session = match state.store.get_session(&session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Chat session not found"),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    match state.store.list_blocks(&session_id).await {
        Ok(blocks) => Json(ChatResponse { session, blocks }).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `GET /v1/chats/{id}/stream`: upgrade to the session's WebSocket.
///
/// Unknown sessions get a 404 before any upgrade happens.
async fn stream_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match state.store.get_session(&session_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Chat session not found"),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }

    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, session_id))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_socket(socket: WebSocket, state: SharedState, session_id: String) {
    let (mut sink, stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(json.into())).await.is_err() {
                debug!("Client disconnected, stopping writer");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let inbound = stream
        .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, WsMessage::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(WsMessage::Text(text)) => Some(text.as_str().to_owned()),
                _ => None,
            })
        });

    StreamSession::new(state, session_id, tx)
        .serve(Box::pin(inbound))
        .await;

    if let Err(e) = writer.await {
        warn!(error = %e, "Writer task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use opencodex_agent::test_helpers::ScriptedProvider;
    use opencodex_core::tool::ToolRegistry;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let agent = ReactAgent::new(provider, "gpt-4o", Arc::new(ToolRegistry::new()));
        Arc::new(GatewayState::new(
            AppConfig::default(),
            Arc::new(InMemoryStore::new()),
            agent,
        ))
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state());
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn create_then_get_chat() {
        let state = test_state();
        let app = build_router(state.clone());
        let req = Request::builder()
            .method("POST")
            .uri("/v1/chats")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"project_id":"p1","name":"Refactor"}"#))
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let session: ChatSession = serde_json::from_slice(&body).unwrap();
        assert_eq!(session.project_id, "p1");

        let req = Request::builder()
            .uri(format!("/v1/chats/{}", session.id))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["session"]["name"], "Refactor");
        assert_eq!(json["blocks"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn stream_unknown_session_is_404() {
        let app = build_router(test_state());
        let req = Request::builder()
            .uri("/v1/chats/does-not-exist/stream")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_known_session_requires_upgrade() {
        let state = test_state();
        let session = state
            .store
            .create_session(ChatSession::new("p", "n"))
            .await
            .unwrap();
        let app = build_router(state);
        let req = Request::builder()
            .uri(format!("/v1/chats/{}/stream", session.id))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn open_memory_store_from_config() {
        let mut config = AppConfig::default();
        config.storage.backend = "memory".into();
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn open_sqlite_store_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.database_url = Some(format!(
            "sqlite://{}",
            dir.path().join("nested/opencodex.db").display()
        ));
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.name(), "sqlite");
    }
}
