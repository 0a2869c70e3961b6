//! HTTP server for the relay API.
//!
//! Provides endpoints for:
//! - Liveness (`/`, `/health`)
//! - Questions (`/ask`)
//! - Clearing history (`/clear`)
//! - Issuing session ids (`/session`)

pub mod invocation;
pub mod routes;
pub mod state;

pub use invocation::{handle_request, run_invocation};
pub use routes::create_router;
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::ServerConfig;

/// Build the CORS policy from the configured origins.
#[must_use]
pub fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if config.allows_any_origin() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("Ignoring unusable CORS origin {origin}: {err}");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// Router with CORS and request tracing applied.
pub fn create_app(state: Arc<AppState>, config: &ServerConfig) -> Router {
    create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(config)),
    )
}

/// Start the HTTP server with graceful shutdown support.
///
/// The server will stop accepting new connections when `shutdown_signal` completes.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn run_server_with_shutdown<F>(
    app: Router,
    port: u16,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Relay listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::conversation::{SessionId, SessionRegistry, Turn};
    use crate::llm::provider::{
        ChatMessage, CompletionProvider, ProviderError, ProviderFuture, ProviderResult,
    };
    use crate::relay::{EMPTY_QUESTION_ANSWER, PROVIDER_FAILURE_ANSWER, RelayService};
    use crate::server::routes::{INVALID_SESSION_ANSWER, LIVENESS_TEXT};

    struct FixedProvider(Option<&'static str>);

    impl CompletionProvider for FixedProvider {
        fn complete<'a>(
            &'a self,
            _model: &'a str,
            _messages: Vec<ChatMessage>,
        ) -> ProviderFuture<'a, ProviderResult<String>> {
            let reply = self.0.map(str::to_string).ok_or(ProviderError::EmptyReply);
            Box::pin(async move { reply })
        }
    }

    async fn build_app(dir: &TempDir, reply: Option<&'static str>, config: &ServerConfig) -> (Router, Arc<AppState>) {
        let sessions =
            SessionRegistry::open(dir.path().join("tempChats.json"), dir.path().join("sessions")).await;
        let relay = RelayService::new(sessions, Arc::new(FixedProvider(reply)), "gpt-4o-mini", "rules");
        let state = AppState::with_relay(relay);
        (create_app(Arc::clone(&state), config), state)
    }

    async fn post_json(app: &Router, path: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::post(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_ask_and_clear_round() {
        let dir = TempDir::new().unwrap();
        let (app, state) = build_app(&dir, Some("stub-reply"), &ServerConfig::default()).await;

        let (status, body) =
            post_json(&app, "/ask", r#"{"question":"What services do you offer?"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "answer": "stub-reply" }));
        assert_eq!(
            state.relay.history(None).await,
            vec![
                Turn::user("What services do you offer?"),
                Turn::assistant("stub-reply")
            ]
        );

        let (status, body) = post_json(&app, "/clear", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));
        assert!(state.relay.history(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_question_is_answered() {
        let dir = TempDir::new().unwrap();
        let (app, state) = build_app(&dir, Some("unused"), &ServerConfig::default()).await;

        for body in ["", "{}", r#"{"question":"   "}"#, "not json"] {
            let (status, reply) = post_json(&app, "/ask", body).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(reply, json!({ "answer": EMPTY_QUESTION_ANSWER }));
        }
        assert!(state.relay.history(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_is_still_200() {
        let dir = TempDir::new().unwrap();
        let (app, state) = build_app(&dir, None, &ServerConfig::default()).await;

        let (status, body) = post_json(&app, "/ask", r#"{"question":"hello"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "answer": PROVIDER_FAILURE_ANSWER }));
        assert_eq!(state.relay.history(None).await, vec![Turn::user("hello")]);
    }

    #[tokio::test]
    async fn test_session_routing() {
        let dir = TempDir::new().unwrap();
        let (app, state) = build_app(&dir, Some("ok"), &ServerConfig::default()).await;

        let (_, issued) = post_json(&app, "/session", "").await;
        let session: SessionId = issued["session_id"].as_str().unwrap().parse().unwrap();

        let body = json!({ "question": "private", "session_id": session.to_string() }).to_string();
        post_json(&app, "/ask", &body).await;
        assert_eq!(state.relay.history(Some(session)).await.len(), 2);
        assert!(state.relay.history(None).await.is_empty());

        let (_, reply) = post_json(&app, "/ask", r#"{"question":"x","session_id":"nope"}"#).await;
        assert_eq!(reply, json!({ "answer": INVALID_SESSION_ANSWER }));
        let (_, cleared) = post_json(&app, "/clear", r#"{"session_id":"nope"}"#).await;
        assert_eq!(cleared, json!({ "success": false }));

        let body = json!({ "session_id": session.to_string() }).to_string();
        let (_, cleared) = post_json(&app, "/clear", &body).await;
        assert_eq!(cleared, json!({ "success": true }));
        assert!(state.relay.history(Some(session)).await.is_empty());
    }

    #[tokio::test]
    async fn test_index_is_plain_text() {
        let dir = TempDir::new().unwrap();
        let (app, _) = build_app(&dir, Some("ok"), &ServerConfig::default()).await;

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], LIVENESS_TEXT.as_bytes());
    }

    #[tokio::test]
    async fn test_cors_restricts_origins() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            allowed_origins: vec!["https://www.greatwebsoft.in".to_string()],
            ..ServerConfig::default()
        };
        let (app, _) = build_app(&dir, Some("ok"), &config).await;

        let allowed = app
            .clone()
            .oneshot(
                Request::get("/health")
                    .header(header::ORIGIN, "https://www.greatwebsoft.in")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            allowed.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("https://www.greatwebsoft.in"))
        );

        let denied = app
            .oneshot(
                Request::get("/health")
                    .header(header::ORIGIN, "https://elsewhere.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(denied.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_cors_any_origin_by_default() {
        let dir = TempDir::new().unwrap();
        let (app, _) = build_app(&dir, Some("ok"), &ServerConfig::default()).await;

        let response = app
            .oneshot(
                Request::get("/health")
                    .header(header::ORIGIN, "https://anywhere.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("*"))
        );
    }
}
