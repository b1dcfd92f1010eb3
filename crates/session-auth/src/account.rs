//! Account endpoints: login, register, logout, current user
//!
//! Login and register mint the first credential pair of a session; logout
//! blacklists the refresh token server-side. None of these touch the token
//! store. The session facade decides what to persist.

use std::sync::Arc;

use http_client::{HttpClient, JsonResponse};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::endpoints::Endpoints;
use crate::error::{Error, Result};
use crate::store::CredentialPair;

/// The authenticated user as reported by `GET /api/auth/me/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// ISO-8601 timestamp
    pub date_joined: String,
    /// ISO-8601 timestamp, absent before the first login
    #[serde(default)]
    pub last_login: Option<String>,
}

/// Client for the account endpoints of the backend.
pub struct AccountClient {
    client: Arc<dyn HttpClient>,
    endpoints: Endpoints,
}

impl AccountClient {
    pub fn new(client: Arc<dyn HttpClient>, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    /// Log in with a username or email plus password.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<CredentialPair> {
        let body = serde_json::json!({ "identifier": identifier, "password": password });
        let response = self
            .client
            .post_json(&self.endpoints.login(), &body, None)
            .await?;
        let pair = pair_or_error(&response)?;
        info!("logged in");
        Ok(pair)
    }

    /// Create an account; the backend logs the new user in immediately.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<CredentialPair> {
        let body = serde_json::json!({
            "username": username,
            "password": password,
            "email": email,
        });
        let response = self
            .client
            .post_json(&self.endpoints.register(), &body, None)
            .await?;
        let pair = pair_or_error(&response)?;
        info!(username, "registered new user");
        Ok(pair)
    }

    /// Blacklist `pair.refresh` on the backend.
    ///
    /// Best effort: failures are logged and swallowed, because the local
    /// session is torn down regardless of what the backend says.
    pub async fn logout(&self, pair: &CredentialPair) {
        let body = serde_json::json!({ "refresh": pair.refresh.expose() });
        match self
            .client
            .post_json(&self.endpoints.logout(), &body, Some(pair.access.expose()))
            .await
        {
            Ok(response) if response.is_success() => debug!("backend logout accepted"),
            Ok(response) => warn!(response = %response.describe(), "backend logout rejected"),
            Err(e) => warn!(error = %e, "backend logout failed"),
        }
    }

    /// Fetch the user behind `access_token`.
    pub async fn me(&self, access_token: &str) -> Result<UserProfile> {
        let response = self
            .client
            .get_json(&self.endpoints.me(), Some(access_token))
            .await?;

        match response.status {
            200 => serde_json::from_value(response.data)
                .map_err(|e| Error::TransientNetwork(format!("unexpected user response: {e}"))),
            401 | 403 => Err(Error::InvalidCredentials(response.describe())),
            _ => Err(Error::TransientNetwork(format!(
                "user lookup returned {}",
                response.describe()
            ))),
        }
    }
}

/// Login/register responses: 2xx carries a pair, 400/401 carry `{"error"}`.
fn pair_or_error(response: &JsonResponse) -> Result<CredentialPair> {
    match response.status {
        200..=299 => CredentialPair::from_response(&response.data),
        400 | 401 => Err(Error::InvalidCredentials(
            response
                .error_message()
                .map(str::to_string)
                .unwrap_or_else(|| response.describe()),
        )),
        _ => Err(Error::TransientNetwork(response.describe())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubHttpClient;
    use http_client::TransportError;
    use serde_json::json;

    fn account(client: Arc<StubHttpClient>) -> AccountClient {
        AccountClient::new(client, Endpoints::new("http://backend.test"))
    }

    #[tokio::test]
    async fn login_returns_pair() {
        let client = Arc::new(StubHttpClient::new());
        client.push_response(200, json!({"access": "at", "refresh": "rt"}));

        let pair = account(client.clone()).login("alice@example.com", "pw").await.unwrap();

        assert_eq!(pair, CredentialPair::new("at", "rt"));
        let call = &client.calls()[0];
        assert_eq!(call.url, "http://backend.test/api/auth/login/");
        assert_eq!(
            call.body,
            Some(json!({"identifier": "alice@example.com", "password": "pw"}))
        );
    }

    #[tokio::test]
    async fn login_surfaces_backend_error_message() {
        let client = Arc::new(StubHttpClient::new());
        client.push_response(401, json!({"error": "Invalid username/email or password"}));

        let err = account(client).login("alice", "wrong").await.unwrap_err();
        assert_eq!(
            err,
            Error::InvalidCredentials("Invalid username/email or password".into())
        );
    }

    #[tokio::test]
    async fn register_accepts_201() {
        let client = Arc::new(StubHttpClient::new());
        client.push_response(201, json!({"access": "at", "refresh": "rt"}));

        let pair = account(client.clone())
            .register("alice", "alice@example.com", "pw")
            .await
            .unwrap();

        assert_eq!(pair.refresh.expose(), "rt");
        assert_eq!(client.calls()[0].url, "http://backend.test/api/auth/register/");
    }

    #[tokio::test]
    async fn register_duplicate_username_is_invalid_credentials() {
        let client = Arc::new(StubHttpClient::new());
        client.push_response(400, json!({"error": "Username already exists"}));

        let err = account(client)
            .register("alice", "alice@example.com", "pw")
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidCredentials("Username already exists".into()));
    }

    #[tokio::test]
    async fn logout_sends_refresh_with_bearer_and_swallows_errors() {
        let client = Arc::new(StubHttpClient::new());
        client.push_response(400, json!({"error": "Invalid token or token not provided."}));
        client.push_transport_error(TransportError::Connect("refused".into()));
        let account = account(client.clone());
        let pair = CredentialPair::new("at", "rt");

        account.logout(&pair).await;
        account.logout(&pair).await;

        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].url, "http://backend.test/api/auth/logout/");
        assert_eq!(calls[0].body, Some(json!({"refresh": "rt"})));
        assert_eq!(calls[0].bearer.as_deref(), Some("at"));
    }

    #[tokio::test]
    async fn me_parses_profile() {
        let client = Arc::new(StubHttpClient::new());
        client.push_response(
            200,
            json!({
                "id": 7,
                "username": "alice",
                "email": "alice@example.com",
                "first_name": "Alice",
                "last_name": "Liddell",
                "date_joined": "2024-01-02T03:04:05+00:00",
                "last_login": null
            }),
        );

        let user = account(client.clone()).me("at").await.unwrap();

        assert_eq!(user.id, 7);
        assert_eq!(user.username, "alice");
        assert_eq!(user.last_login, None);
        assert_eq!(client.calls()[0].method, "GET");
        assert_eq!(client.calls()[0].bearer.as_deref(), Some("at"));
    }

    #[tokio::test]
    async fn me_with_stale_token_is_invalid_credentials() {
        let client = Arc::new(StubHttpClient::new());
        client.push_response(401, json!({"detail": "Given token not valid for any token type"}));

        let err = account(client).me("at").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)), "got {err:?}");
    }
}
