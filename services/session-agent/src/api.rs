//! Local control API
//!
//! Lets a desktop shell or an operator inspect and drive the session over
//! loopback HTTP. Responses describe the session; token values never leave
//! the process.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use session_refresh::Session;
use tracing::{info, warn};

use crate::metrics;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(session: Arc<Session>, prometheus: PrometheusHandle) -> Self {
        Self {
            session,
            prometheus,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Build the axum router with all routes and shared state.
///
/// A concurrency limit keeps a misbehaving local client from piling up
/// login requests against the backend.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/session", get(session_handler))
        .route("/session/user", get(user_handler))
        .route("/session/login", post(login_handler))
        .route("/session/register", post(register_handler))
        .route("/session/logout", post(logout_handler))
        .route("/session/resolve", post(resolve_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn respond<T: Serialize>(route: &'static str, status: StatusCode, body: T) -> Response {
    metrics::record_request(route, status.as_u16());
    (status, Json(body)).into_response()
}

fn error_status(err: &session_auth::Error) -> StatusCode {
    use session_auth::Error;
    match err {
        Error::InvalidCredentials(_)
        | Error::NotAuthenticated
        | Error::NoRefreshToken
        | Error::UserNotFound
        | Error::InvalidOrExpiredRefreshToken(_) => StatusCode::UNAUTHORIZED,
        Error::TransientNetwork(_) => StatusCode::BAD_GATEWAY,
        Error::MalformedToken(_) | Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(route: &'static str, err: &session_auth::Error) -> Response {
    respond(
        route,
        error_status(err),
        json!({ "error": err.label(), "message": err.to_string() }),
    )
}

/// Always 200 while the process is up; `authenticated` reports the session.
async fn health_handler(State(state): State<AppState>) -> Response {
    let authenticated = state.session.is_token_valid().unwrap_or(false);
    respond(
        "/health",
        StatusCode::OK,
        json!({
            "status": "healthy",
            "authenticated": authenticated,
            "scheduler": state.session.scheduler().state().label(),
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        }),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

fn session_snapshot(session: &Session) -> session_auth::Result<serde_json::Value> {
    let scheduler = session.scheduler();
    Ok(json!({
        "scheduler": scheduler.state().label(),
        "generation": scheduler.generation(),
        "pending_timer": scheduler.has_pending_timer(),
        "token_valid": session.is_token_valid()?,
        "access_expires_at_ms": session.access_expires_at()?,
        "has_refresh_token": session.store().refresh_token()?.is_some(),
    }))
}

async fn session_handler(State(state): State<AppState>) -> Response {
    match session_snapshot(&state.session) {
        Ok(snapshot) => respond("/session", StatusCode::OK, snapshot),
        Err(e) => error_response("/session", &e),
    }
}

async fn user_handler(State(state): State<AppState>) -> Response {
    match state.session.current_user().await {
        Ok(user) => respond("/session/user", StatusCode::OK, user),
        Err(e) => error_response("/session/user", &e),
    }
}

async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Response {
    match state
        .session
        .login(&request.identifier, &request.password)
        .await
    {
        Ok(status) => {
            info!("login via control API");
            metrics::set_authenticated(true);
            respond(
                "/session/login",
                StatusCode::OK,
                json!({ "status": status.label() }),
            )
        }
        Err(e) => {
            warn!(error = %e, "login via control API failed");
            error_response("/session/login", &e)
        }
    }
}

async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    match state
        .session
        .register(&request.username, &request.email, &request.password)
        .await
    {
        Ok(status) => {
            info!(username = %request.username, "registered via control API");
            metrics::set_authenticated(true);
            respond(
                "/session/register",
                StatusCode::CREATED,
                json!({ "status": status.label() }),
            )
        }
        Err(e) => {
            warn!(error = %e, "registration via control API failed");
            error_response("/session/register", &e)
        }
    }
}

async fn logout_handler(State(state): State<AppState>) -> Response {
    match state.session.logout().await {
        Ok(()) => {
            metrics::set_authenticated(false);
            respond(
                "/session/logout",
                StatusCode::OK,
                json!({ "status": "logged_out" }),
            )
        }
        Err(e) => error_response("/session/logout", &e),
    }
}

async fn resolve_handler(State(state): State<AppState>) -> Response {
    match state.session.resolve().await {
        Ok(status) => {
            metrics::set_authenticated(status.is_authenticated());
            respond(
                "/session/resolve",
                StatusCode::OK,
                json!({
                    "status": status.label(),
                    "authenticated": status.is_authenticated(),
                }),
            )
        }
        Err(e) => error_response("/session/resolve", &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use session_auth::testing::{StubHttpClient, token_expiring_at};
    use session_auth::{Endpoints, ManualClock, MemoryTokenStore, TokenStore};
    use session_refresh::RefreshPolicy;
    use tower::ServiceExt;

    const NOW: u64 = 1_750_000_000_000;

    /// PrometheusHandle without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    fn test_app(client: Arc<StubHttpClient>, store: Arc<MemoryTokenStore>) -> (Router, Arc<Session>) {
        let session = Arc::new(Session::new(
            client,
            store,
            Endpoints::new("http://backend.test"),
            Arc::new(ManualClock::new(NOW)),
            RefreshPolicy::default(),
        ));
        let state = AppState::new(session.clone(), test_prometheus_handle());
        (build_router(state, 16), session)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_reports_session_state() {
        let (app, _) = test_app(
            Arc::new(StubHttpClient::new()),
            Arc::new(MemoryTokenStore::new()),
        );

        let response = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["authenticated"], false);
        assert_eq!(json["scheduler"], "idle");
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn session_status_never_contains_tokens() {
        let access = token_expiring_at(NOW + 600_000);
        let store = Arc::new(MemoryTokenStore::with_pair(&access, "refresh-secret"));
        let (app, session) = test_app(Arc::new(StubHttpClient::new()), store);
        session.scheduler().arm().unwrap();

        let response = app.oneshot(get("/session")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(!text.contains("refresh-secret"), "got: {text}");
        assert!(!text.contains(&access), "got: {text}");

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["scheduler"], "armed");
        assert_eq!(json["token_valid"], true);
        assert_eq!(json["has_refresh_token"], true);
        assert_eq!(json["pending_timer"], true);
        assert_eq!(json["access_expires_at_ms"], NOW + 600_000);
    }

    #[tokio::test]
    async fn login_stores_tokens_and_arms() {
        let client = Arc::new(StubHttpClient::new());
        client.push_response(
            200,
            serde_json::json!({"access": token_expiring_at(NOW + 600_000), "refresh": "rt"}),
        );
        let store = Arc::new(MemoryTokenStore::new());
        let (app, session) = test_app(client.clone(), store.clone());

        let response = app
            .oneshot(post_json(
                "/session/login",
                serde_json::json!({"identifier": "alice", "password": "pw"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "authenticated");
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("rt"));
        assert_eq!(session.scheduler().state().label(), "armed");
        assert_eq!(client.calls()[0].url, "http://backend.test/api/auth/login/");
    }

    #[tokio::test]
    async fn bad_credentials_are_401() {
        let client = Arc::new(StubHttpClient::new());
        client.push_response(
            401,
            serde_json::json!({"error": "Invalid username/email or password"}),
        );
        let (app, _) = test_app(client, Arc::new(MemoryTokenStore::new()));

        let response = app
            .oneshot(post_json(
                "/session/login",
                serde_json::json!({"identifier": "alice", "password": "nope"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_credentials");
        assert!(
            json["message"]
                .as_str()
                .unwrap()
                .contains("Invalid username/email or password")
        );
    }

    #[tokio::test]
    async fn unreachable_backend_is_502() {
        // Empty stub queue behaves like a refused connection.
        let (app, _) = test_app(
            Arc::new(StubHttpClient::new()),
            Arc::new(MemoryTokenStore::new()),
        );

        let response = app
            .oneshot(post_json(
                "/session/login",
                serde_json::json!({"identifier": "alice", "password": "pw"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["error"], "transient_network");
    }

    #[tokio::test]
    async fn register_returns_201() {
        let client = Arc::new(StubHttpClient::new());
        client.push_response(
            201,
            serde_json::json!({"access": token_expiring_at(NOW + 600_000), "refresh": "rt"}),
        );
        let (app, _) = test_app(client, Arc::new(MemoryTokenStore::new()));

        let response = app
            .oneshot(post_json(
                "/session/register",
                serde_json::json!({"username": "alice", "email": "alice@example.com", "password": "pw"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn logout_clears_store() {
        let client = Arc::new(StubHttpClient::new());
        client.push_response(200, serde_json::json!({"message": "Successfully logged out."}));
        let store = Arc::new(MemoryTokenStore::with_pair(
            &token_expiring_at(NOW + 600_000),
            "rt",
        ));
        let (app, session) = test_app(client, store.clone());

        let response = app.oneshot(post_json("/session/logout", serde_json::json!({}))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "logged_out");
        assert_eq!(store.access_token().unwrap(), None);
        assert_eq!(store.refresh_token().unwrap(), None);
        assert_eq!(session.scheduler().state().label(), "idle");
    }

    #[tokio::test]
    async fn resolve_on_empty_store_reports_no_session() {
        let client = Arc::new(StubHttpClient::new());
        let (app, _) = test_app(client.clone(), Arc::new(MemoryTokenStore::new()));

        let response = app
            .oneshot(post_json("/session/resolve", serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "no_session");
        assert_eq!(json["authenticated"], false);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn user_without_session_is_401() {
        let (app, _) = test_app(
            Arc::new(StubHttpClient::new()),
            Arc::new(MemoryTokenStore::new()),
        );

        let response = app.oneshot(get("/session/user")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "not_authenticated");
    }

    #[tokio::test]
    async fn user_returns_profile() {
        let client = Arc::new(StubHttpClient::new());
        client.push_response(
            200,
            serde_json::json!({
                "id": 3,
                "username": "alice",
                "email": "alice@example.com",
                "date_joined": "2024-01-02T03:04:05+00:00"
            }),
        );
        let store = Arc::new(MemoryTokenStore::with_pair("at", "rt"));
        let (app, _) = test_app(client, store);

        let response = app.oneshot(get("/session/user")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["username"], "alice");
        assert_eq!(json["id"], 3);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text() {
        let (app, _) = test_app(
            Arc::new(StubHttpClient::new()),
            Arc::new(MemoryTokenStore::new()),
        );

        let response = app.oneshot(get("/metrics")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[axum::http::header::CONTENT_TYPE]
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (app, _) = test_app(
            Arc::new(StubHttpClient::new()),
            Arc::new(MemoryTokenStore::new()),
        );

        let response = app.oneshot(get("/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
