//! HTTP chat server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Answer a question given the conversation so far |
//! | `POST` | `/api/chat/stream` | Same, streamed as server-sent events |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Both chat endpoints take
//!
//! ```json
//! { "messages": [{ "role": "user", "content": "..." }], "input": "..." }
//! ```
//!
//! where `messages` may be omitted. `/api/chat` replies with
//! `{ "answer": { "role": "system", "content": "...", "sources": [...] } }`.
//!
//! `/api/chat/stream` emits one `sources` event (JSON array), then a
//! `token` event per text chunk (JSON string), then `done`. If generation
//! fails after the stream has started, or the model's reply turns out to be
//! blank, an `error` event carrying the error object replaces `done`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "retrieval_unavailable", "message": "..." } }
//! ```
//!
//! Error codes: `invalid_request` (400), `retrieval_unavailable` (503),
//! `generation_unavailable` (502).

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use essay_rag_core::{ChatMessage, RagError, RagPipeline};

use crate::app::AppContext;
use crate::config::Config;

/// Start the server on `server.bind` and run until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ctx = AppContext::from_config(config).await?;
    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    serve(listener, ctx.pipeline).await
}

/// Serve the chat API on an already-bound listener.
pub async fn serve(listener: TcpListener, pipeline: Arc<RagPipeline>) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "chat server listening");
    println!("Chat server listening on http://{}", addr);
    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

/// The chat API routes.
pub fn router(pipeline: Arc<RagPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/chat/stream", post(handle_chat_stream))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(pipeline)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            code: self.code.clone(),
            message: self.message.clone(),
        }
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match err {
            RagError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RagError::RetrievalUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RagError::GenerationUnavailable(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            warn!(code = err.code(), error = %err, "chat request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        RagError::invalid(rejection.body_text()).into()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ POST /api/chat ============

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    messages: Vec<ChatMessage>,
    input: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    answer: ChatMessage,
}

async fn handle_chat(
    State(pipeline): State<Arc<RagPipeline>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(req) = body?;
    let answer = pipeline.answer(&req.messages, &req.input).await?;
    Ok(Json(ChatResponse {
        answer: answer.into_message(),
    }))
}

// ============ POST /api/chat/stream ============

async fn handle_chat_stream(
    State(pipeline): State<Arc<RagPipeline>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(req) = body?;
    // Everything up to the first token fails as a plain JSON error.
    let answer = pipeline.answer_stream(&req.messages, &req.input).await?;

    let events = stream::unfold(
        (Some(answer.sources), answer.tokens, false),
        |(sources, mut tokens, finished)| async move {
            if finished {
                return None;
            }
            if let Some(sources) = sources {
                return Some((json_event("sources", &sources), (None, tokens, false)));
            }
            match tokens.next().await {
                Some(Ok(text)) => Some((json_event("token", &text), (None, tokens, false))),
                Some(Err(e)) => {
                    let err = AppError::from(RagError::generation(e.context("answer stream failed")));
                    Some((json_event("error", &err.detail()), (None, tokens, true)))
                }
                None => Some((
                    Event::default().event("done").data("[DONE]"),
                    (None, tokens, true),
                )),
            }
        },
    );

    Ok(Sse::new(events.map(Ok)).keep_alive(KeepAlive::default()))
}

fn json_event<T: Serialize>(name: &str, data: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|_| Event::default().event(name).data("null"))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
