//! OpenAI-compatible chat-completion client.
//!
//! Behaviour:
//! - `POST {base_url}/chat/completions` with a bearer credential.
//! - Body `{ "model": ..., "messages": [{ "role", "content" }, ...] }`, no streaming.
//! - The reply is `choices[0].message.content`.
//! - Every call is bounded by the configured timeout; expiry is a `ProviderError::Http`.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProviderConfig;
use crate::llm::provider::{
    ChatMessage, CompletionProvider, ProviderError, ProviderFuture, ProviderResult,
};

/// Longest slice of an error body kept for logs.
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// Async client for an OpenAI-compatible endpoint.
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiProvider {
    /// Build a client from provider settings.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        })
    }

    /// Full completion endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post_completion(&self, model: &str, messages: &[ChatMessage]) -> ProviderResult<String> {
        debug!("Requesting completion from {} with {} messages", self.endpoint, messages.len());

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest { model, messages })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        parse_reply(&body)
    }
}

impl CompletionProvider for OpenAiProvider {
    fn complete<'a>(
        &'a self,
        model: &'a str,
        messages: Vec<ChatMessage>,
    ) -> ProviderFuture<'a, ProviderResult<String>> {
        Box::pin(async move { self.post_completion(model, &messages).await })
    }
}

fn parse_reply(body: &str) -> ProviderResult<String> {
    let response: CompletionResponse = serde_json::from_str(body)
        .map_err(|err| ProviderError::MalformedResponse(err.to_string()))?;
    response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("no choices".to_string()))?
        .message
        .content
        .ok_or(ProviderError::EmptyReply)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    type Captured = Arc<Mutex<Option<(Option<String>, Value)>>>;

    async fn spawn_mock(status: StatusCode, reply: Value) -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(None));
        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(
                    move |State(captured): State<Captured>, headers: HeaderMap, Json(body): Json<Value>| {
                        let reply = reply.clone();
                        async move {
                            let auth = headers
                                .get("authorization")
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string);
                            if let Ok(mut slot) = captured.lock() {
                                *slot = Some((auth, body));
                            }
                            (status, Json(reply))
                        }
                    },
                ),
            )
            .with_state(Arc::clone(&captured));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/v1"), captured)
    }

    fn provider_config(base_url: String) -> ProviderConfig {
        ProviderConfig {
            base_url,
            api_key: "sk-test".to_string(),
            request_timeout: Duration::from_secs(5),
            ..ProviderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_complete_sends_payload_and_reads_reply() {
        let (base_url, captured) = spawn_mock(
            StatusCode::OK,
            json!({ "choices": [{ "message": { "role": "assistant", "content": "Hello from India" } }] }),
        )
        .await;
        let provider = OpenAiProvider::new(&provider_config(base_url)).unwrap();

        let messages = vec![ChatMessage::system("rules"), ChatMessage::from(&crate::conversation::Turn::user("hi"))];
        let reply = provider.complete("gpt-4o-mini", messages).await.unwrap();

        assert_eq!(reply, "Hello from India");
        let (auth, body) = captured.lock().unwrap().clone().unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
        assert_eq!(
            body,
            json!({
                "model": "gpt-4o-mini",
                "messages": [
                    { "role": "system", "content": "rules" },
                    { "role": "user", "content": "hi" }
                ]
            })
        );
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let (base_url, _) = spawn_mock(
            StatusCode::TOO_MANY_REQUESTS,
            json!({ "error": { "message": "rate limited" } }),
        )
        .await;
        let provider = OpenAiProvider::new(&provider_config(base_url)).unwrap();

        let result = provider.complete("gpt-4o-mini", vec![ChatMessage::system("rules")]).await;

        assert!(matches!(result, Err(ProviderError::Status { status: 429, .. })));
    }

    #[test]
    fn test_parse_reply_shapes() {
        assert!(matches!(parse_reply("not json"), Err(ProviderError::MalformedResponse(_))));
        assert!(matches!(
            parse_reply(r#"{"choices":[]}"#),
            Err(ProviderError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"choices":[{"message":{"content":null}}]}"#),
            Err(ProviderError::EmptyReply)
        ));
        assert_eq!(
            parse_reply(r#"{"choices":[{"message":{"content":"ok"}}]}"#).unwrap(),
            "ok"
        );
    }

    #[test]
    fn test_parse_reply_accepts_empty_content() {
        assert_eq!(
            parse_reply(r#"{"choices":[{"message":{"role":"assistant","content":""}}]}"#).unwrap(),
            ""
        );
        assert!(matches!(
            parse_reply(r#"{"choices":[{"message":{"role":"assistant"}}]}"#),
            Err(ProviderError::EmptyReply)
        ));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let provider = OpenAiProvider::new(&provider_config("https://api.example.com/v1/".to_string())).unwrap();
        assert_eq!(provider.endpoint(), "https://api.example.com/v1/chat/completions");
    }
}
