//! Session facade
//!
//! Owns the store, executor, scheduler and account client of one signed-in
//! user. Every path that replaces or removes the stored pair cancels the
//! scheduler first, so a refresh already in flight lands on a stale
//! generation and is dropped.

use std::sync::Arc;

use common::Secret;
use http_client::HttpClient;
use session_auth::{
    AccountClient, Clock, CredentialPair, Endpoints, Error, RefreshExecutor, Result, TokenStore,
    UserProfile, decode_expiry, is_expired,
};
use tokio::sync::broadcast;
use tracing::info;

use crate::resolver::{self, AuthStatus};
use crate::scheduler::{EndReason, RefreshPolicy, RefreshScheduler, SessionEvent};

pub struct Session {
    executor: Arc<RefreshExecutor>,
    scheduler: RefreshScheduler,
    account: AccountClient,
    clock: Arc<dyn Clock>,
}

impl Session {
    pub fn new(
        client: Arc<dyn HttpClient>,
        store: Arc<dyn TokenStore>,
        endpoints: Endpoints,
        clock: Arc<dyn Clock>,
        policy: RefreshPolicy,
    ) -> Self {
        let executor = Arc::new(RefreshExecutor::new(
            Arc::clone(&client),
            store,
            endpoints.clone(),
        ));
        let scheduler = RefreshScheduler::new(Arc::clone(&executor), Arc::clone(&clock), policy);
        Self {
            executor,
            scheduler,
            account: AccountClient::new(client, endpoints),
            clock,
        }
    }

    /// Establish the auth state from whatever the store holds.
    pub async fn resolve(&self) -> Result<AuthStatus> {
        resolver::resolve(&self.executor, &self.scheduler, self.clock.as_ref()).await
    }

    /// Log in and start the refresh cycle for the new pair.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<AuthStatus> {
        let pair = self.account.login(identifier, password).await?;
        self.install(&pair)
    }

    /// Register a new account; the backend signs it in straight away.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthStatus> {
        let pair = self.account.register(username, email, password).await?;
        self.install(&pair)
    }

    fn install(&self, pair: &CredentialPair) -> Result<AuthStatus> {
        self.scheduler.cancel();
        self.store().set_pair(pair)?;
        self.scheduler.arm()?;
        Ok(AuthStatus::Authenticated)
    }

    /// End the session. Safe to call with nothing stored, and twice.
    pub async fn logout(&self) -> Result<()> {
        self.scheduler.cancel();

        let store = self.store();
        let access = store.access_token()?;
        let refresh = store.refresh_token()?;
        let had_session = access.is_some() || refresh.is_some();

        if let (Some(access), Some(refresh)) = (access, refresh) {
            self.account
                .logout(&CredentialPair::new(access, refresh))
                .await;
        }

        store.clear()?;
        if had_session {
            info!("logged out");
            self.scheduler.emit(SessionEvent::SessionEnded {
                reason: EndReason::LoggedOut,
            });
        }
        Ok(())
    }

    /// Profile of the signed-in user.
    pub async fn current_user(&self) -> Result<UserProfile> {
        let access = self.store().access_token()?.ok_or(Error::NotAuthenticated)?;
        let access = Secret::new(access);
        self.account.me(access.expose()).await
    }

    /// Whether the stored access token is present and not yet expired.
    pub fn is_token_valid(&self) -> Result<bool> {
        Ok(self
            .store()
            .access_token()?
            .is_some_and(|token| !is_expired(&token, self.clock.now_millis())))
    }

    /// Expiry of the stored access token in epoch milliseconds.
    pub fn access_expires_at(&self) -> Result<Option<u64>> {
        Ok(self
            .store()
            .access_token()?
            .and_then(|token| decode_expiry(&token).ok()))
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.scheduler.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        self.executor.store()
    }
}
