//! Test doubles shared by this crate and `session-refresh`
//!
//! Enabled for this crate's own tests and, for downstream crates, through
//! the `test-util` feature.

use std::collections::VecDeque;
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http_client::{HttpClient, JsonResponse, ResponseFuture, TransportError};

use crate::error::{Error, Result};
use crate::store::TokenStore;

/// Build an unsigned compact JWT whose payload carries `exp` (seconds).
pub fn mint_token(exp_secs: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({"token_type": "access", "exp": exp_secs, "user_id": 1})
            .to_string()
            .as_bytes(),
    );
    format!("{header}.{payload}.signature")
}

/// Mint an access token expiring at `expires_at_millis` (epoch ms, truncated to seconds).
pub fn token_expiring_at(expires_at_millis: u64) -> String {
    mint_token(expires_at_millis / 1000)
}

/// One request seen by `StubHttpClient`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub url: String,
    pub body: Option<serde_json::Value>,
    pub bearer: Option<String>,
}

/// Replays queued responses in order and records every call.
///
/// When the queue runs dry, calls fail with a transport error so a test
/// that triggers an unexpected request notices.
#[derive(Debug, Default)]
pub struct StubHttpClient {
    responses: Mutex<VecDeque<std::result::Result<JsonResponse, TransportError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl StubHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, status: u16, data: serde_json::Value) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(JsonResponse::new(status, data)));
    }

    pub fn push_transport_error(&self, error: TransportError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn respond(&self, call: RecordedCall) -> std::result::Result<JsonResponse, TransportError> {
        let url = call.url.clone();
        self.calls.lock().unwrap().push(call);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connect(format!("no stub response for {url}"))))
    }
}

impl HttpClient for StubHttpClient {
    fn post_json<'a>(
        &'a self,
        url: &'a str,
        body: &'a serde_json::Value,
        bearer: Option<&'a str>,
    ) -> ResponseFuture<'a> {
        let result = self.respond(RecordedCall {
            method: "POST",
            url: url.to_string(),
            body: Some(body.clone()),
            bearer: bearer.map(str::to_string),
        });
        Box::pin(async move { result })
    }

    fn get_json<'a>(&'a self, url: &'a str, bearer: Option<&'a str>) -> ResponseFuture<'a> {
        let result = self.respond(RecordedCall {
            method: "GET",
            url: url.to_string(),
            body: None,
            bearer: bearer.map(str::to_string),
        });
        Box::pin(async move { result })
    }
}

/// Store whose reads succeed from a fixed pair but whose writes always fail,
/// standing in for a full disk or a revoked sandbox permission.
#[derive(Debug)]
pub struct ReadOnlyStore {
    access: Option<String>,
    refresh: Option<String>,
}

impl ReadOnlyStore {
    pub fn new(access: Option<&str>, refresh: Option<&str>) -> Self {
        Self {
            access: access.map(str::to_string),
            refresh: refresh.map(str::to_string),
        }
    }
}

impl TokenStore for ReadOnlyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(match key {
            crate::ACCESS_TOKEN_KEY => self.access.clone(),
            crate::REFRESH_TOKEN_KEY => self.refresh.clone(),
            _ => None,
        })
    }

    fn set(&self, key: &str, _value: &str) -> Result<()> {
        Err(Error::Storage(format!("quota exceeded writing {key}")))
    }

    fn remove(&self, key: &str) -> Result<()> {
        Err(Error::Storage(format!("permission denied removing {key}")))
    }
}
