//! HTTP client seam for the expense tracker backend
//!
//! The session crates never talk to `reqwest` directly. They go through the
//! `HttpClient` trait, which reduces a round trip to "status code + JSON
//! body" so callers can classify 400/401/404 responses themselves, and
//! reserves `TransportError` for failures where no response arrived at all.
//!
//! `ReqwestHttpClient` is the production implementation; tests substitute a
//! stub that records calls and replays canned responses.

pub mod reqwest_client;

pub use reqwest_client::ReqwestHttpClient;

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by `HttpClient` methods.
///
/// `Pin<Box<dyn Future>>` keeps the trait dyn-compatible so the session
/// crates can hold an `Arc<dyn HttpClient>`.
pub type ResponseFuture<'a> = Pin<Box<dyn Future<Output = Result<JsonResponse>> + Send + 'a>>;

/// A completed HTTP exchange. Non-2xx statuses land here, not in an error.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonResponse {
    pub status: u16,
    /// Parsed JSON body. A body that is not JSON is kept as a string value;
    /// an empty body is `Null`.
    pub data: serde_json::Value,
}

impl JsonResponse {
    pub fn new(status: u16, data: serde_json::Value) -> Self {
        Self { status, data }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The `detail` field used by the backend's framework-level errors.
    pub fn detail(&self) -> Option<&str> {
        self.data.get("detail").and_then(|v| v.as_str())
    }

    /// The `error` field used by the backend's hand-written auth views.
    pub fn error_message(&self) -> Option<&str> {
        self.data.get("error").and_then(|v| v.as_str())
    }

    /// Best human-readable description of a failed response, for logs.
    pub fn describe(&self) -> String {
        match (self.detail(), self.error_message()) {
            (Some(detail), _) => format!("{}: {detail}", self.status),
            (None, Some(error)) => format!("{}: {error}", self.status),
            (None, None) => format!("{}: {}", self.status, self.data),
        }
    }
}

/// Network-level failures: no HTTP response was received.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Minimal JSON-over-HTTP client the session crates depend on.
///
/// `bearer` adds an `Authorization: Bearer <token>` header when present.
pub trait HttpClient: Send + Sync {
    /// POST `body` as JSON to `url`.
    fn post_json<'a>(
        &'a self,
        url: &'a str,
        body: &'a serde_json::Value,
        bearer: Option<&'a str>,
    ) -> ResponseFuture<'a>;

    /// GET `url`, expecting a JSON body.
    fn get_json<'a>(&'a self, url: &'a str, bearer: Option<&'a str>) -> ResponseFuture<'a>;
}
