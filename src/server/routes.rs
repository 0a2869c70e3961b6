//! HTTP route handlers for the relay API.
//!
//! Every route answers 200. Malformed bodies are read as "no question" or
//! "default conversation" rather than rejected.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conversation::SessionId;
use crate::relay::EMPTY_QUESTION_ANSWER;

use super::state::AppState;

/// Answer for a session id that is not a UUID.
pub const INVALID_SESSION_ANSWER: &str = "Invalid session id.";

/// Plain-text liveness string served at `/`.
pub const LIVENESS_TEXT: &str = "Great Websoft assistant relay is running.";

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/session", post(new_session))
        .route("/ask", post(ask))
        .route("/clear", post(clear))
        .with_state(state)
}

/// Liveness endpoint.
async fn index() -> &'static str {
    LIVENESS_TEXT
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "websoft-relay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Question request.
#[derive(Debug, Default, Deserialize)]
pub struct AskRequest {
    /// The user's question.
    #[serde(default)]
    pub question: Option<String>,
    /// Optional isolated conversation.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Question response.
#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    /// The assistant's answer.
    pub answer: String,
}

/// Clear request.
#[derive(Debug, Default, Deserialize)]
pub struct ClearRequest {
    /// Optional isolated conversation.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Clear response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    /// Whether the conversation was cleared.
    pub success: bool,
}

/// Fresh session response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    /// Identifier to send with later requests.
    pub session_id: SessionId,
}

/// Issue an identifier for a new isolated conversation.
async fn new_session() -> Json<SessionResponse> {
    Json(SessionResponse {
        session_id: SessionId::new(),
    })
}

/// Relay a question.
async fn ask(State(state): State<Arc<AppState>>, body: Bytes) -> Json<AskResponse> {
    let request: AskRequest = parse_body(&body);

    let Ok(session) = parse_session(request.session_id.as_deref()) else {
        return Json(AskResponse {
            answer: INVALID_SESSION_ANSWER.to_string(),
        });
    };

    let Some(question) = request.question else {
        return Json(AskResponse {
            answer: EMPTY_QUESTION_ANSWER.to_string(),
        });
    };

    let turn = state.relay.ask(session, &question).await;
    Json(AskResponse {
        answer: turn.content,
    })
}

/// Clear a conversation.
async fn clear(State(state): State<Arc<AppState>>, body: Bytes) -> Json<ClearResponse> {
    let request: ClearRequest = parse_body(&body);

    let Ok(session) = parse_session(request.session_id.as_deref()) else {
        return Json(ClearResponse { success: false });
    };

    state.relay.clear(session).await;
    Json(ClearResponse { success: true })
}

fn parse_body<T>(body: &[u8]) -> T
where
    T: for<'de> Deserialize<'de> + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return T::default();
    }
    serde_json::from_slice(body).unwrap_or_else(|err| {
        debug!("Unreadable request body: {err}");
        T::default()
    })
}

fn parse_session(raw: Option<&str>) -> Result<Option<SessionId>, uuid::Error> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(id) => id.parse().map(Some),
    }
}
