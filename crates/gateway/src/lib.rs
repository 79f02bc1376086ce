//! HTTP API gateway for Promptweave.
//!
//! Exposes the chat surface over the dispatch engine:
//! - `GET  /health`            — liveness check
//! - `POST /v1/chat/completions` — run a flow, return the full answer as JSON
//! - `POST /v1/chat/stream`      — run a flow, stream frames as named SSE events
//!
//! Built on Axum. Validation failures are rejected with a structured JSON
//! error before any byte is streamed; failures after streaming starts
//! arrive as a terminal `error` frame on the stream itself.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use promptweave_config::AppConfig;
use promptweave_core::error::{DispatchError, Error};
use promptweave_core::event::FlowStreamEvent;
use promptweave_core::message::{ChatTurn, ConversationId};
use promptweave_core::node::{FlowGraph, InputPort, NodeKind, NodeTemplate, OutputPort};
use promptweave_core::quote::QuoteItem;
use promptweave_core::record::NodeResponse;
use promptweave_dispatch::{
    BranchFailurePolicy, FlowDispatcher, FlowRequest, RunPolicy, StreamEmitter,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub dispatcher: Arc<FlowDispatcher>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chat/completions", post(chat_handler))
        .route("/v1/chat/stream", post(chat_stream_handler))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn serve(state: SharedState) -> std::io::Result<()> {
    let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, router).await
}

// ── Payloads ────────────────────────────────────────────────────────────────

/// One prior turn as sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnPayload {
    pub question: String,
    pub answer: String,
}

/// The chat request body, shared by both endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatPayload {
    /// Resumes an existing conversation when present.
    #[serde(default)]
    pub conversation_id: Option<String>,

    pub message: String,

    #[serde(default)]
    pub history: Vec<TurnPayload>,

    /// Retrieval partitions this caller may search. Empty = no retrieval,
    /// the question goes straight to the model.
    #[serde(default)]
    pub partitions: Vec<String>,

    /// Quotes carried over from the previous turn.
    #[serde(default)]
    pub fixed_quotes: Vec<QuoteItem>,

    #[serde(default)]
    pub variables: HashMap<String, String>,
}

/// The non-streaming response body.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub answer: String,
    pub total_tokens: u32,
    pub cited_quotes: Vec<QuoteItem>,
    pub response_data: Vec<NodeResponse>,
}

/// A structured (non-stream) error response.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn from_core(err: Error) -> Self {
        let status = match &err {
            Error::Dispatch(DispatchError::MissingParam(_))
            | Error::Dispatch(DispatchError::InvalidGraph(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// ── Handlers ────────────────────────────────────────────────────────────────

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `POST /v1/chat/completions` — run the flow to quiescence, return JSON.
async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<ChatResponse>, ApiError> {
    let graph = build_chat_graph(&state.config, &payload.partitions);
    let request = to_flow_request(payload);

    let outcome = state
        .dispatcher
        .run(&graph, request, StreamEmitter::disabled())
        .await
        .map_err(ApiError::from_core)?;

    if let Some(failure) = outcome.failure {
        return Err(ApiError::new(StatusCode::BAD_GATEWAY, failure));
    }

    let record = outcome.record;
    Ok(Json(ChatResponse {
        conversation_id: record.conversation_id.to_string(),
        answer: record.answer_text,
        total_tokens: record.total_tokens,
        cited_quotes: record.cited_quotes,
        response_data: record.response_data,
    }))
}

/// `POST /v1/chat/stream` — run the flow, streaming named SSE events.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    // Reject before the stream opens so validation failures stay
    // structured responses.
    if payload.message.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "message must not be empty",
        ));
    }

    info!("v1/chat/stream SSE request");

    let graph = build_chat_graph(&state.config, &payload.partitions);
    let request = to_flow_request(payload);
    let (emitter, rx) = StreamEmitter::channel(64);

    let dispatcher = state.dispatcher.clone();
    let task_emitter = emitter.clone();
    tokio::spawn(async move {
        if let Err(e) = dispatcher.run(&graph, request, task_emitter.clone()).await {
            task_emitter
                .send(FlowStreamEvent::Error {
                    message: e.to_string(),
                })
                .await;
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let event_type = event.event_type();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event_type).data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_flow_request(payload: ChatPayload) -> FlowRequest {
    FlowRequest {
        conversation_id: payload
            .conversation_id
            .as_deref()
            .map(ConversationId::from),
        question: payload.message,
        history: payload
            .history
            .into_iter()
            .map(|t| ChatTurn::new(t.question, t.answer))
            .collect(),
        fixed_quotes: payload.fixed_quotes,
        variables: payload.variables,
    }
}

// ── Graph construction ──────────────────────────────────────────────────────

/// Build the chat graph for one request: retrieval feeding the model when
/// partitions are given, a bare model completion otherwise.
pub fn build_chat_graph(config: &AppConfig, partitions: &[String]) -> FlowGraph {
    let model_node = |entry: bool| {
        let mut node = NodeTemplate::new("model", "Model completion", NodeKind::ModelCompletion)
            .input(InputPort::required("userChatInput"))
            .config_value("model", json!(config.provider.model))
            .output(OutputPort::new("answerText").answer_fragment())
            .output(OutputPort::new("finishReason").response_visible())
            .output(OutputPort::new("totalTokens").response_visible());
        if entry {
            node = node.entry();
        } else {
            node = node.input(InputPort::required("quotePrompt"));
        }
        node
    };

    if partitions.is_empty() {
        return FlowGraph::new(vec![model_node(true)]);
    }

    let retrieval = &config.retrieval;
    let mut kb = NodeTemplate::new("kb", "Knowledge search", NodeKind::ContextAssembly)
        .entry()
        .input(InputPort::required("userChatInput"))
        .input(InputPort::optional("fixedQuotes"))
        .config_value("partitions", json!(partitions))
        .config_value("similarity", json!(retrieval.similarity))
        .config_value("limit", json!(retrieval.limit))
        .config_value("maxContextTokens", json!(retrieval.max_context_tokens))
        .config_value("quoteLabel", json!(retrieval.quote_label))
        .output(OutputPort::new("quotePrompt").target("model", "quotePrompt"))
        .output(OutputPort::new("userChatInput").target("model", "userChatInput"))
        .output(OutputPort::new("quoteList").response_visible())
        .output(OutputPort::new("quoteCount").response_visible());
    if let Some(empty_text) = &retrieval.empty_text {
        kb = kb.config_value("emptyText", json!(empty_text));
    }

    FlowGraph::new(vec![kb, model_node(false)])
}

/// Map the config policy string onto the dispatcher policy.
pub fn run_policy(config: &AppConfig) -> RunPolicy {
    RunPolicy {
        branch_failure: match config.dispatch.branch_failure.as_str() {
            "isolate" => BranchFailurePolicy::IsolateBranch,
            _ => BranchFailurePolicy::AbortRun,
        },
        max_node_runs: config.dispatch.max_node_runs,
    }
}
