//! Refresh token exchange
//!
//! POSTs the stored refresh token to `/api/auth/token/refresh/` and, on
//! success, writes the rotated pair back to the store. The backend answers
//! failures in three shapes that callers must tell apart:
//!
//! - 404 with the "user ... does not exist" detail: the account is gone
//! - 401 or 400: the refresh token is blacklisted, expired or garbage
//! - anything else: the backend or network is unwell, try again later

use std::sync::Arc;

use common::Secret;
use http_client::{HttpClient, JsonResponse};
use tracing::{debug, info, warn};

use crate::constants::USER_NOT_FOUND_DETAIL;
use crate::endpoints::Endpoints;
use crate::error::{Error, Result};
use crate::store::{CredentialPair, TokenStore};

/// Exchanges refresh tokens for new credential pairs.
pub struct RefreshExecutor {
    client: Arc<dyn HttpClient>,
    store: Arc<dyn TokenStore>,
    endpoints: Endpoints,
}

impl RefreshExecutor {
    pub fn new(client: Arc<dyn HttpClient>, store: Arc<dyn TokenStore>, endpoints: Endpoints) -> Self {
        Self {
            client,
            store,
            endpoints,
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Refresh the stored pair and return the new access token.
    ///
    /// Fails fast with `NoRefreshToken` (no request sent) when the store has
    /// no refresh token. Both new tokens are written in one `set_pair` call.
    pub async fn refresh(&self) -> Result<Secret<String>> {
        let refresh = self.stored_refresh_token()?;
        let pair = self.exchange(refresh.expose()).await?;
        self.commit(&pair)?;
        Ok(pair.access)
    }

    /// The current refresh token, or `NoRefreshToken`.
    pub fn stored_refresh_token(&self) -> Result<Secret<String>> {
        match self.store.refresh_token()? {
            Some(token) => Ok(Secret::new(token)),
            None => {
                warn!("no refresh token available");
                Err(Error::NoRefreshToken)
            }
        }
    }

    /// Network half of a refresh: one request, no store writes.
    pub async fn exchange(&self, refresh: &str) -> Result<CredentialPair> {
        let url = self.endpoints.refresh();
        let body = serde_json::json!({ "refresh": refresh });

        debug!(url, "requesting token refresh");
        let response = self.client.post_json(&url, &body, None).await?;

        if !response.is_success() {
            let err = classify_refresh_failure(&response);
            warn!(status = response.status, error = %err, "token refresh rejected");
            return Err(err);
        }

        let pair = CredentialPair::from_response(&response.data)?;
        info!("token refreshed successfully");
        Ok(pair)
    }

    /// Store half of a refresh.
    pub fn commit(&self, pair: &CredentialPair) -> Result<()> {
        self.store.set_pair(pair)
    }
}

/// Map a non-2xx refresh response onto the error taxonomy.
///
/// Only a 404 carrying the backend's user-not-found detail is treated as
/// `UserNotFound`; any other 404 is assumed to be a routing problem.
pub fn classify_refresh_failure(response: &JsonResponse) -> Error {
    match response.status {
        404 if response
            .detail()
            .is_some_and(|detail| detail.starts_with(USER_NOT_FOUND_DETAIL)) =>
        {
            Error::UserNotFound
        }
        400 | 401 => Error::InvalidOrExpiredRefreshToken(response.describe()),
        _ => Error::TransientNetwork(format!("token refresh returned {}", response.describe())),
    }
}
