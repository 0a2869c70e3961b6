//! Single-invocation request handling for platform-managed deployments.
//!
//! In handler mode the platform starts the process once per request, CGI
//! style: the request line and headers arrive as environment variables, the
//! body on stdin, and the response is written to stdout as a `Status:` line,
//! headers, a blank line and the body. The same router as the listener
//! serves the request.

use std::collections::HashMap;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderName, HeaderValue, Method, Request};
use axum::response::Response;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tower::ServiceExt;
use tracing::debug;

/// Largest request or response body handled in one invocation.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Errors while running one invocation.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// Reading stdin or writing stdout failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The invocation variables do not describe a request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Building the request failed.
    #[error("http error: {0}")]
    Http(#[from] axum::http::Error),
    /// Collecting the response body failed.
    #[error("body error: {0}")]
    Body(#[from] axum::Error),
}

/// Request line and headers of one invocation.
#[derive(Debug)]
pub struct Invocation {
    method: Method,
    uri: String,
    content_length: Option<usize>,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl Invocation {
    /// Read the request from CGI variables.
    ///
    /// `REQUEST_METHOD` defaults to `GET` and `PATH_INFO` to `/`.
    /// `CONTENT_TYPE` and every `HTTP_*` variable become request headers.
    ///
    /// # Errors
    /// Returns an error if the method is not a valid HTTP method.
    pub fn from_cgi_vars<I>(vars: I) -> Result<Self, InvocationError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let method_raw = vars.get("REQUEST_METHOD").map_or("GET", String::as_str);
        let method = Method::from_bytes(method_raw.trim().as_bytes())
            .map_err(|_| InvocationError::InvalidRequest(format!("method {method_raw}")))?;

        let path = vars
            .get("PATH_INFO")
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .unwrap_or("/");
        let mut uri = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        if let Some(query) = vars.get("QUERY_STRING").filter(|q| !q.is_empty()) {
            uri.push('?');
            uri.push_str(query);
        }

        let content_length = vars
            .get("CONTENT_LENGTH")
            .and_then(|len| len.trim().parse().ok());

        let mut headers = Vec::new();
        for (key, value) in &vars {
            let name = if key == "CONTENT_TYPE" {
                "content-type".to_string()
            } else if let Some(rest) = key.strip_prefix("HTTP_") {
                rest.to_ascii_lowercase().replace('_', "-")
            } else {
                continue;
            };
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => headers.push((name, value)),
                _ => debug!("Skipping unusable header variable {key}"),
            }
        }

        Ok(Self {
            method,
            uri,
            content_length,
            headers,
        })
    }

    /// Declared body length, if any.
    #[must_use]
    pub const fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Request path and query.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Attach `body` and build the request.
    ///
    /// # Errors
    /// Returns an error if the URI is invalid.
    pub fn into_request(self, body: Vec<u8>) -> Result<Request<Body>, InvocationError> {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        Ok(builder.body(Body::from(body))?)
    }
}

/// Read at most `content_length` bytes (capped at [`MAX_BODY_BYTES`]).
///
/// An absent length means there is no body; stdin is not read at all.
///
/// # Errors
/// Returns an error if the reader fails.
pub async fn read_body<R>(reader: R, content_length: Option<usize>) -> Result<Vec<u8>, InvocationError>
where
    R: AsyncRead + Unpin,
{
    let limit = content_length.unwrap_or(0).min(MAX_BODY_BYTES);
    if limit == 0 {
        return Ok(Vec::new());
    }
    let mut body = Vec::with_capacity(limit.min(8 * 1024));
    reader
        .take(u64::try_from(limit).unwrap_or(u64::MAX))
        .read_to_end(&mut body)
        .await?;
    Ok(body)
}

/// Run one request through the router.
pub async fn handle_request(app: Router, request: Request<Body>) -> Response {
    let Ok(response) = app.oneshot(request).await;
    response
}

/// Write `response` in CGI form.
///
/// # Errors
/// Returns an error if the body cannot be collected or the writer fails.
pub async fn write_response<W>(writer: &mut W, response: Response) -> Result<(), InvocationError>
where
    W: AsyncWrite + Unpin,
{
    let (parts, body) = response.into_parts();
    let body = to_bytes(body, MAX_BODY_BYTES).await?;

    let mut head = match parts.status.canonical_reason() {
        Some(reason) => format!("Status: {} {reason}\r\n", parts.status.as_u16()),
        None => format!("Status: {}\r\n", parts.status.as_u16()),
    };
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            head.push_str(name.as_str());
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
    }
    head.push_str("\r\n");

    writer.write_all(head.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Serve exactly one invocation from the process environment, stdin and stdout.
///
/// # Errors
/// Returns an error if the request cannot be read or the response written.
pub async fn run_invocation(app: Router) -> Result<(), InvocationError> {
    let vars = std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));
    let invocation = Invocation::from_cgi_vars(vars)?;
    debug!("Handling {} {}", invocation.method(), invocation.uri());

    let body = read_body(tokio::io::stdin(), invocation.content_length()).await?;
    let response = handle_request(app, invocation.into_request(body)?).await;
    write_response(&mut tokio::io::stdout(), response).await
}
