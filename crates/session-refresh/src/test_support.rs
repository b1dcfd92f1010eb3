//! Test doubles local to this crate

use http_client::{HttpClient, ResponseFuture};
use session_auth::testing::StubHttpClient;
use tokio::sync::Semaphore;

/// Holds every request until the test releases a permit.
pub(crate) struct GatedClient {
    pub(crate) inner: StubHttpClient,
    gate: Semaphore,
}

impl GatedClient {
    pub(crate) fn new() -> Self {
        Self {
            inner: StubHttpClient::new(),
            gate: Semaphore::new(0),
        }
    }

    pub(crate) fn release(&self) {
        self.gate.add_permits(1);
    }
}

impl HttpClient for GatedClient {
    fn post_json<'a>(
        &'a self,
        url: &'a str,
        body: &'a serde_json::Value,
        bearer: Option<&'a str>,
    ) -> ResponseFuture<'a> {
        Box::pin(async move {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.inner.post_json(url, body, bearer).await
        })
    }

    fn get_json<'a>(&'a self, url: &'a str, bearer: Option<&'a str>) -> ResponseFuture<'a> {
        Box::pin(async move {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.inner.get_json(url, bearer).await
        })
    }
}
