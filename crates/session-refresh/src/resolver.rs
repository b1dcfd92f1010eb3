//! Startup authentication check
//!
//! Answers "is the user logged in?" once, at application start or whenever
//! the auth state has to be re-established, and leaves the session in a
//! consistent resting state: scheduler armed when the answer is yes, store
//! cleared when the answer is a definitive no, and untouched when the
//! backend simply could not be reached.

use session_auth::{Clock, Error, FailureKind, RefreshExecutor, Result, is_expired};
use tracing::{debug, info, warn};

use crate::scheduler::{EndReason, RefreshScheduler};
use crate::state::SchedulerState;

/// Why the user is not authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotAuthenticatedReason {
    /// No refresh token stored; nobody ever logged in, or they logged out.
    NoSession,
    /// The stored pair was rejected and has been cleared.
    SessionEnded(EndReason),
    /// The backend could not be reached; tokens were kept for a later try.
    BackendUnavailable,
}

/// Outcome of `resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Authenticated,
    NotAuthenticated { reason: NotAuthenticatedReason },
}

impl AuthStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthStatus::Authenticated)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AuthStatus::Authenticated => "authenticated",
            AuthStatus::NotAuthenticated {
                reason: NotAuthenticatedReason::NoSession,
            } => "no_session",
            AuthStatus::NotAuthenticated {
                reason: NotAuthenticatedReason::SessionEnded(_),
            } => "session_ended",
            AuthStatus::NotAuthenticated {
                reason: NotAuthenticatedReason::BackendUnavailable,
            } => "backend_unavailable",
        }
    }
}

fn not_authenticated(reason: NotAuthenticatedReason) -> AuthStatus {
    AuthStatus::NotAuthenticated { reason }
}

/// Resolve the current authentication state.
///
/// 1. No refresh token → `NoSession`, no request sent.
/// 2. Access token still valid → arm the scheduler, `Authenticated`.
/// 3. Otherwise refresh once: success arms the scheduler; a terminal
///    failure clears the store; a transient one keeps it. A scheduled
///    refresh already in flight is awaited instead of duplicated.
///
/// Only storage failures are returned as `Err`.
pub async fn resolve(
    executor: &RefreshExecutor,
    scheduler: &RefreshScheduler,
    clock: &dyn Clock,
) -> Result<AuthStatus> {
    let _resolving = scheduler.begin_resolve().await;
    let store = executor.store();

    // A scheduled refresh already in flight owns the refresh token; wait
    // for it to land and decide again from what it left in the store.
    let generation = loop {
        if store.refresh_token()?.is_none() {
            debug!("no refresh token stored");
            scheduler.cancel();
            return Ok(not_authenticated(NotAuthenticatedReason::NoSession));
        }

        if let Some(access) = store.access_token()? {
            if !is_expired(&access, clock.now_millis()) {
                scheduler.arm()?;
                info!("access token still valid, session resumed");
                return Ok(AuthStatus::Authenticated);
            }
        }

        match scheduler.claim_refresh() {
            Some(generation) => break generation,
            None => wait_for_scheduled_refresh(scheduler).await,
        }
    };

    debug!("access token missing, expired or malformed; refreshing");
    // A login or logout while the request is in flight bumps the
    // generation; the stale outcome must not overwrite what it stored.
    let outcome = match executor.stored_refresh_token() {
        Ok(token) => executor.exchange(token.expose()).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(pair) => {
            if !scheduler.commit_if_current(generation, &pair)? {
                debug!("session changed during refresh, result discarded");
                return settled_status(executor);
            }
            scheduler.arm()?;
            info!("session resumed after refresh");
            Ok(AuthStatus::Authenticated)
        }
        Err(e @ Error::Storage(_)) => Err(e),
        Err(e) if e.kind() == FailureKind::Terminal => {
            if !scheduler.clear_if_current(generation)? {
                debug!("session changed during refresh, rejection ignored");
                return settled_status(executor);
            }
            warn!(error = %e, "stored session rejected, tokens cleared");
            scheduler.cancel();
            let reason = EndReason::from_error(&e).unwrap_or(EndReason::RefreshTokenRejected);
            Ok(not_authenticated(NotAuthenticatedReason::SessionEnded(reason)))
        }
        Err(e) => {
            warn!(error = %e, "could not refresh session, keeping tokens");
            Ok(not_authenticated(NotAuthenticatedReason::BackendUnavailable))
        }
    }
}

async fn wait_for_scheduled_refresh(scheduler: &RefreshScheduler) {
    debug!("scheduled refresh in flight, waiting for it to land");
    let mut states = scheduler.watch_state();
    // The sender lives as long as the scheduler.
    let _ = states
        .wait_for(|state| !matches!(state, SchedulerState::Refreshing { .. }))
        .await;
}

/// Status after someone else settled the session mid-refresh.
fn settled_status(executor: &RefreshExecutor) -> Result<AuthStatus> {
    if executor.store().refresh_token()?.is_some() {
        Ok(AuthStatus::Authenticated)
    } else {
        Ok(not_authenticated(NotAuthenticatedReason::NoSession))
    }
}
