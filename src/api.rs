//! HTTP transport for the research agent
//!
//! `POST /api/chat` runs one query and streams every progress event back as
//! server-sent events (event name = kind, data = JSON payload). Dropping the
//! response cancels the run.

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::events::{AgentEvent, EventSender, RunContext};
use crate::memory::ConversationHistory;
use crate::models::MessageRole;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub message_history: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Rebuild the conversation the client has seen so far.
    pub fn history(&self) -> ConversationHistory {
        let mut history = ConversationHistory::new();
        for message in &self.message_history {
            match message.role {
                MessageRole::User => history.add_user_message(message.content.clone()),
                MessageRole::Assistant => history.add_assistant_message(message.content.clone()),
            }
        }
        history
    }
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<Agent>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<ApiResponse> {
    Json(ApiResponse::success(serde_json::json!({ "status": "healthy" })))
}

/// =============================
/// Chat Endpoint
/// =============================

fn to_sse(event: &AgentEvent) -> Event {
    Event::default()
        .event(event.kind())
        .json_data(event.payload())
        .unwrap_or_else(|e| {
            warn!(error = %e, kind = event.kind(), "Failed to encode event payload");
            Event::default().event(event.kind()).data("{}")
        })
}

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> Response {
    if req.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("query must not be empty".into())),
        )
            .into_response();
    }

    info!(
        query = %req.query,
        history = req.message_history.len(),
        "Received chat request"
    );

    let (events, rx) = EventSender::channel();
    let cancel = CancellationToken::new();
    let ctx = RunContext::with_cancellation(events, cancel.clone());

    let agent = state.agent.clone();
    let mut history = req.history();
    let query = req.query;

    tokio::spawn(async move {
        // The run reports its own failures on the event stream.
        let _ = agent.run(&query, &mut history, &ctx).await;
    });

    // Cancels the run once the client goes away and the stream is dropped.
    let guard = cancel.drop_guard();
    let stream = UnboundedReceiverStream::new(rx).map(move |event| {
        let _ = &guard;
        Ok::<Event, std::convert::Infallible>(to_sse(&event))
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// =============================
/// Router
/// =============================

pub fn create_router(agent: Arc<Agent>) -> Router {
    let state = ApiState { agent };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    agent: Arc<Agent>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(agent);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
