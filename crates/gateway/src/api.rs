//! HTTP routes.
//!
//! Endpoints:
//!
//! - `GET    /`: Plain health message
//! - `GET    /health`: Liveness probe with version
//! - `POST   /AgentInvoke`: One conversational exchange
//! - `GET    /AgentInvoke?prompt=`: One single-shot answer, no session
//! - `GET    /conversation/{id}`: Session history
//! - `DELETE /conversation/{id}`: Clear a session
//!
//! Unknown session ids on the conversation endpoints are a soft error:
//! `200 {"error": "Session not found"}`.

use axum::{
    Router,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use convrag_core::error::Error;
use convrag_core::message::Turn;

use crate::SharedState;

pub const ROOT_MESSAGE: &str = "HTTP Endpoint for AgentRAG DGT with Memory";
const SESSION_NOT_FOUND: &str = "Session not found";
const RETRIEVAL_FAILED: &str = "Retrieval failed";
const GENERATION_FAILED: &str = "Generation failed";

// ── Router ────────────────────────────────────────────────────────────────

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/AgentInvoke", get(ask_handler).post(invoke_handler))
        .route(
            "/conversation/{session_id}",
            get(get_conversation_handler).delete(delete_conversation_handler),
        )
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct InvokeRequest {
    question: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct InvokeResponse {
    pub answer: String,
    pub session_id: String,
    pub conversation_history: Vec<Turn>,
}

#[derive(Deserialize)]
struct AskParams {
    prompt: String,
}

#[derive(Serialize, Deserialize)]
pub struct ConversationResponse {
    pub session_id: String,
    pub conversation_history: Vec<Turn>,
}

#[derive(Serialize, Deserialize)]
pub struct ClearedResponse {
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            retryable: false,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

// ── Errors ────────────────────────────────────────────────────────────────

/// Maps the error taxonomy onto HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            Error::Validation(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse::new(self.0.to_string()),
            ),
            Error::SessionNotFound(_) => (StatusCode::OK, ErrorResponse::new(SESSION_NOT_FOUND)),
            Error::Retrieval(_) => {
                error!(error = %self.0, "Retrieval failed");
                (StatusCode::BAD_GATEWAY, ErrorResponse::new(RETRIEVAL_FAILED))
            }
            Error::Generation(_) => {
                error!(error = %self.0, "Generation failed");
                (StatusCode::BAD_GATEWAY, ErrorResponse::new(GENERATION_FAILED))
            }
            Error::CommitConflict(_) => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: self.0.to_string(),
                    retryable: true,
                },
            ),
            Error::Config { .. } | Error::Serialization(_) | Error::Internal(_) => {
                error!(error = %self.0, "Request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn root_handler() -> Json<&'static str> {
    Json(ROOT_MESSAGE)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn invoke_handler(
    State(state): State<SharedState>,
    payload: Result<Json<InvokeRequest>, JsonRejection>,
) -> Result<Json<InvokeResponse>, ApiError> {
    let Json(req) = payload?;
    info!(
        question_len = req.question.len(),
        session_id = req.session_id.as_deref().unwrap_or("<new>"),
        "AgentInvoke request"
    );

    let exchange = state
        .pipeline
        .run(&req.question, req.session_id.as_deref())
        .await?;

    Ok(Json(InvokeResponse {
        answer: exchange.answer,
        session_id: exchange.session_id.to_string(),
        conversation_history: exchange.history,
    }))
}

async fn ask_handler(
    State(state): State<SharedState>,
    params: Result<Query<AskParams>, QueryRejection>,
) -> Result<Json<String>, ApiError> {
    let Query(params) = params?;
    let answer = state.pipeline.ask(&params.prompt).await?;
    Ok(Json(answer.text))
}

async fn get_conversation_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.pipeline.sessions().get(&session_id).await {
        Some(history) => Json(ConversationResponse {
            session_id,
            conversation_history: history,
        })
        .into_response(),
        None => ApiError(Error::SessionNotFound(session_id)).into_response(),
    }
}

async fn delete_conversation_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Response {
    if state.pipeline.sessions().clear(&session_id).await {
        info!(session_id = %session_id, "Conversation cleared");
        Json(ClearedResponse {
            message: format!("Conversation {session_id} cleared"),
        })
        .into_response()
    } else {
        ApiError(Error::SessionNotFound(session_id)).into_response()
    }
}
