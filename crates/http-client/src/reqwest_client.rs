//! `reqwest`-backed implementation of `HttpClient`

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use tracing::debug;

use crate::{HttpClient, JsonResponse, ResponseFuture, Result, TransportError};

/// Production client. Every request carries the configured timeout; a
/// timeout surfaces as `TransportError::Timeout`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestHttpClient {
    /// Build a client with its own connection pool.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("building HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    /// Wrap an existing `reqwest::Client`, applying `timeout` per request.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<JsonResponse> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(classify_reqwest_error)?;
        let data = parse_body(&bytes);
        debug!(url, status, "backend responded");
        Ok(JsonResponse { status, data })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn post_json<'a>(
        &'a self,
        url: &'a str,
        body: &'a serde_json::Value,
        bearer: Option<&'a str>,
    ) -> ResponseFuture<'a> {
        Box::pin(async move {
            let mut request = self.client.post(url).json(body);
            if let Some(token) = bearer {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            self.send(request, url).await
        })
    }

    fn get_json<'a>(&'a self, url: &'a str, bearer: Option<&'a str>) -> ResponseFuture<'a> {
        Box::pin(async move {
            let mut request = self.client.get(url);
            if let Some(token) = bearer {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            self.send(request, url).await
        })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

fn parse_body(bytes: &[u8]) -> serde_json::Value {
    if bytes.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or_else(|_| {
        serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use serde_json::json;
    use tokio::net::TcpListener;

    /// Start a fake backend exposing the routes these tests need.
    async fn start_fake_backend() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{addr}");

        let handle = tokio::spawn(async move {
            let app = axum::Router::new()
                .route(
                    "/echo",
                    post(|headers: HeaderMap, body: axum::Json<serde_json::Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        axum::Json(json!({"received": body.0, "authorization": auth}))
                    }),
                )
                .route(
                    "/missing",
                    post(|| async {
                        (
                            StatusCode::NOT_FOUND,
                            axum::Json(json!({"detail": "nope"})),
                        )
                    }),
                )
                .route("/plain", get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }))
                .route("/empty", get(|| async { StatusCode::NO_CONTENT }))
                .route(
                    "/slow",
                    get(|| async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        "late"
                    }),
                );
            axum::serve(listener, app).await.unwrap();
        });

        (url, handle)
    }

    #[tokio::test]
    async fn post_sends_json_and_bearer() {
        let (base, _server) = start_fake_backend().await;
        let client = ReqwestHttpClient::new(Duration::from_secs(5)).unwrap();

        let body = json!({"refresh": "rt_1"});
        let resp = client
            .post_json(&format!("{base}/echo"), &body, Some("at_1"))
            .await
            .unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.data["received"]["refresh"], "rt_1");
        assert_eq!(resp.data["authorization"], "Bearer at_1");
    }

    #[tokio::test]
    async fn non_success_status_is_a_response_not_an_error() {
        let (base, _server) = start_fake_backend().await;
        let client = ReqwestHttpClient::new(Duration::from_secs(5)).unwrap();

        let resp = client
            .post_json(&format!("{base}/missing"), &json!({}), None)
            .await
            .unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.detail(), Some("nope"));
    }

    #[tokio::test]
    async fn non_json_body_is_kept_as_string() {
        let (base, _server) = start_fake_backend().await;
        let client = ReqwestHttpClient::new(Duration::from_secs(5)).unwrap();

        let resp = client.get_json(&format!("{base}/plain"), None).await.unwrap();
        assert_eq!(resp.status, 502);
        assert_eq!(resp.data, json!("upstream down"));

        let resp = client.get_json(&format!("{base}/empty"), None).await.unwrap();
        assert_eq!(resp.status, 204);
        assert!(resp.data.is_null());
    }

    #[tokio::test]
    async fn slow_backend_maps_to_timeout() {
        let (base, _server) = start_fake_backend().await;
        let client = ReqwestHttpClient::new(Duration::from_millis(200)).unwrap();

        let err = client
            .get_json(&format!("{base}/slow"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn dead_backend_is_a_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ReqwestHttpClient::new(Duration::from_secs(2)).unwrap();
        let result = client
            .post_json(&format!("http://{addr}/api/auth/token/refresh/"), &json!({}), None)
            .await;
        assert!(result.is_err(), "unreachable backend must fail at transport level");
    }
}
