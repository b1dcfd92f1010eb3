//! Proactive refresh timer
//!
//! One `RefreshScheduler` per session owns the single pending refresh
//! timer. `arm()` reads the access token, computes how long to wait, and
//! spawns a timer task; arming again aborts the previous task first. When
//! the timer fires the scheduler asks the executor for a new pair, commits
//! it and re-arms from the new expiry. Failures end the cycle: terminal
//! ones clear the store, transient ones leave it alone. Nothing retries on
//! its own.
//!
//! All bookkeeping sits behind one `std::sync::Mutex` that is never held
//! across an `.await`. The generation check and the store write of a
//! refreshed pair happen under that lock in one step, and `cancel()` bumps
//! the generation under the same lock, so a refresh that lands after a
//! logout cannot resurrect the cleared tokens.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use session_auth::{Clock, CredentialPair, Error, RefreshExecutor, Result, decode_expiry};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::state::{SchedulerAction, SchedulerEvent, SchedulerState, handle_event};

/// Refresh this long before the access token expires.
pub const DEFAULT_LEAD_TIME: Duration = Duration::from_secs(60);

/// Never schedule a refresh of a still-valid token sooner than this.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(10);

/// Capacity of the session event channel. Slow subscribers lag, they do
/// not block the scheduler.
const EVENT_CAPACITY: usize = 16;

/// Timing policy for proactive refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub lead_time: Duration,
    pub min_delay: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            lead_time: DEFAULT_LEAD_TIME,
            min_delay: DEFAULT_MIN_DELAY,
        }
    }
}

impl RefreshPolicy {
    /// Delay before refreshing a token that expires at `expires_at_ms`.
    ///
    /// `max(expires_at - now - lead_time, min_delay)` for a token that is
    /// still valid; zero for one that already expired.
    pub fn delay_until(&self, expires_at_ms: u64, now_ms: u64) -> Duration {
        if expires_at_ms <= now_ms {
            return Duration::ZERO;
        }
        let remaining = Duration::from_millis(expires_at_ms - now_ms);
        remaining.saturating_sub(self.lead_time).max(self.min_delay)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The backend no longer knows the user behind the refresh token
    UserNotFound,
    /// The refresh token was rejected as invalid, expired or blacklisted
    RefreshTokenRejected,
    /// There was no refresh token left to use
    NoRefreshToken,
    /// The user logged out
    LoggedOut,
}

impl EndReason {
    /// The end reason for a terminal refresh failure, `None` otherwise.
    pub fn from_error(error: &Error) -> Option<Self> {
        match error {
            Error::UserNotFound => Some(EndReason::UserNotFound),
            Error::InvalidOrExpiredRefreshToken(_) => Some(EndReason::RefreshTokenRejected),
            Error::NoRefreshToken => Some(EndReason::NoRefreshToken),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EndReason::UserNotFound => "user_not_found",
            EndReason::RefreshTokenRejected => "refresh_token_rejected",
            EndReason::NoRefreshToken => "no_refresh_token",
            EndReason::LoggedOut => "logged_out",
        }
    }
}

/// Notifications for whoever owns the UI. `SessionEnded` means the user
/// must authenticate again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new pair was stored; the next refresh is already armed.
    Refreshed { expires_at_ms: Option<u64> },
    /// A refresh failed but the stored pair was kept.
    RefreshFailed { error: Error },
    /// The stored pair was cleared.
    SessionEnded { reason: EndReason },
}

impl SessionEvent {
    pub fn label(&self) -> &'static str {
        match self {
            SessionEvent::Refreshed { .. } => "refreshed",
            SessionEvent::RefreshFailed { .. } => "refresh_failed",
            SessionEvent::SessionEnded { .. } => "session_ended",
        }
    }
}

struct Inner {
    state: SchedulerState,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl Inner {
    fn abort_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    executor: Arc<RefreshExecutor>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    events: broadcast::Sender<SessionEvent>,
    state_tx: watch::Sender<SchedulerState>,
    /// Held for a whole resolve so concurrent resolves refresh at most once.
    resolving: tokio::sync::Mutex<()>,
}

/// Owner of the single pending refresh timer. Cheap to clone; clones share
/// the same timer.
#[derive(Clone)]
pub struct RefreshScheduler {
    shared: Arc<Shared>,
}

impl RefreshScheduler {
    pub fn new(executor: Arc<RefreshExecutor>, clock: Arc<dyn Clock>, policy: RefreshPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SchedulerState::Idle,
                    generation: 0,
                    timer: None,
                }),
                executor,
                clock,
                policy,
                events,
                state_tx,
                resolving: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Arm the refresh timer from the stored access token.
    ///
    /// Replaces any pending timer. Returns the scheduled delay, or `None`
    /// when a refresh is already in flight (it re-arms when it lands).
    /// Must be called from within a tokio runtime.
    pub fn arm(&self) -> Result<Option<Duration>> {
        let mut inner = self.shared.lock();
        self.shared.arm_locked(&mut inner, Duration::ZERO)
    }

    /// Cancel the pending timer, if any, and return to `Idle`.
    ///
    /// Idempotent. A refresh already in flight is not aborted, but its
    /// result is discarded when it lands.
    pub fn cancel(&self) {
        let mut inner = self.shared.lock();
        inner.abort_timer();
        inner.generation += 1;
        let (state, _) = handle_event(inner.state, SchedulerEvent::Cancel);
        self.shared.set_state(&mut inner, state);
        debug!(generation = inner.generation, "refresh scheduler cancelled");
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.lock().state
    }

    /// Current generation; bumped by every arm and cancel.
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    /// Whether a timer task is waiting to fire.
    pub fn has_pending_timer(&self) -> bool {
        self.shared
            .lock()
            .timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.shared.policy
    }

    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Publish an event on behalf of the session (e.g. logout).
    pub(crate) fn emit(&self, event: SessionEvent) {
        self.shared.emit(event);
    }

    /// Serialize resolves; the second one sees what the first stored.
    pub(crate) async fn begin_resolve(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.shared.resolving.lock().await
    }

    /// Take refreshing over from the timer.
    ///
    /// Returns `None` while a scheduled refresh is in flight; the caller
    /// waits for it to land instead of sending a second request with the
    /// same refresh token. Otherwise drops the pending timer, returns to
    /// `Idle` and hands back the generation the caller's result must be
    /// committed under.
    pub(crate) fn claim_refresh(&self) -> Option<u64> {
        let mut inner = self.shared.lock();
        if matches!(inner.state, SchedulerState::Refreshing { .. }) {
            return None;
        }
        inner.abort_timer();
        inner.generation += 1;
        let (state, _) = handle_event(inner.state, SchedulerEvent::Cancel);
        self.shared.set_state(&mut inner, state);
        Some(inner.generation)
    }

    /// Store `pair` unless an arm or cancel happened since `generation`
    /// was read. Returns whether the pair was written.
    pub(crate) fn commit_if_current(&self, generation: u64, pair: &CredentialPair) -> Result<bool> {
        let inner = self.shared.lock();
        if inner.generation != generation {
            return Ok(false);
        }
        self.shared.executor.commit(pair)?;
        Ok(true)
    }

    /// Clear the store unless an arm or cancel happened since `generation`
    /// was read. Returns whether the store was cleared.
    pub(crate) fn clear_if_current(&self, generation: u64) -> Result<bool> {
        let inner = self.shared.lock();
        if inner.generation != generation {
            return Ok(false);
        }
        self.shared.executor.store().clear()?;
        Ok(true)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Inner holds no invariants a panicking holder could break halfway.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, state: SchedulerState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Delay derived from the stored access token. Absent, expired and
    /// undecodable tokens all refresh immediately.
    fn compute_delay(&self) -> Result<Duration> {
        let Some(token) = self.executor.store().access_token()? else {
            debug!("no access token stored, refreshing immediately");
            return Ok(Duration::ZERO);
        };
        match decode_expiry(&token) {
            Ok(expires_at) => Ok(self
                .policy
                .delay_until(expires_at, self.clock.now_millis())),
            Err(e) => {
                debug!(error = %e, "access token undecodable, refreshing immediately");
                Ok(Duration::ZERO)
            }
        }
    }

    /// Arm from the stored access token, waiting at least `floor`.
    fn arm_locked(self: &Arc<Self>, inner: &mut Inner, floor: Duration) -> Result<Option<Duration>> {
        let delay = self.compute_delay()?.max(floor);
        let (state, action) = handle_event(
            inner.state,
            SchedulerEvent::Arm {
                generation: inner.generation + 1,
                delay,
            },
        );

        let SchedulerAction::StartTimer { generation, delay } = action else {
            debug!("refresh in flight, arm deferred to its completion");
            return Ok(None);
        };

        inner.abort_timer();
        inner.generation = generation;
        let shared = Arc::clone(self);
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.fire(generation).await;
        }));
        self.set_state(inner, state);

        info!(
            generation,
            delay_secs = delay.as_secs(),
            "token refresh scheduled"
        );
        Ok(Some(delay))
    }

    async fn fire(self: Arc<Self>, generation: u64) {
        let refresh_token = {
            let mut inner = self.lock();
            let (state, action) = handle_event(inner.state, SchedulerEvent::TimerFired { generation });
            if action != SchedulerAction::RunRefresh {
                debug!(generation, "stale refresh timer ignored");
                return;
            }
            // Detach our own handle so a re-arm cannot abort this task.
            inner.timer.take();
            self.set_state(&mut inner, state);
            self.executor.stored_refresh_token()
        };

        debug!(generation, "refresh timer fired");
        let outcome = match refresh_token {
            Ok(token) => self.executor.exchange(token.expose()).await,
            Err(e) => Err(e),
        };
        self.complete(generation, outcome);
    }

    fn complete(self: &Arc<Self>, generation: u64, outcome: Result<CredentialPair>) {
        let mut inner = self.lock();
        let event = match &outcome {
            Ok(_) => SchedulerEvent::RefreshSucceeded { generation },
            Err(e) => SchedulerEvent::RefreshFailed {
                generation,
                kind: e.kind(),
            },
        };
        let (state, action) = handle_event(inner.state, event);
        self.set_state(&mut inner, state);

        match (action, outcome) {
            (SchedulerAction::CommitAndRearm, Ok(pair)) => {
                if let Err(e) = self.executor.commit(&pair) {
                    warn!(error = %e, "failed to persist refreshed tokens");
                    record_refresh("transient");
                    self.emit(SessionEvent::RefreshFailed { error: e });
                    return;
                }
                record_refresh("success");
                let expires_at_ms = decode_expiry(pair.access.expose()).ok();
                // A freshly issued token that is already unusable must not
                // trigger back-to-back refreshes.
                match self.arm_locked(&mut inner, self.policy.min_delay) {
                    Ok(_) => self.emit(SessionEvent::Refreshed { expires_at_ms }),
                    Err(e) => {
                        warn!(error = %e, "failed to re-arm after refresh");
                        self.emit(SessionEvent::RefreshFailed { error: e });
                    }
                }
            }
            (SchedulerAction::ClearTokens, Err(e)) => {
                warn!(error = %e, "refresh failed permanently, ending session");
                record_refresh("terminal");
                if let Err(clear_err) = self.executor.store().clear() {
                    warn!(error = %clear_err, "failed to clear tokens after terminal refresh failure");
                }
                let reason = EndReason::from_error(&e).unwrap_or(EndReason::RefreshTokenRejected);
                self.emit(SessionEvent::SessionEnded { reason });
            }
            (SchedulerAction::ReportFailure, Err(e)) => {
                warn!(error = %e, "refresh failed, keeping tokens until next attempt");
                record_refresh("transient");
                self.emit(SessionEvent::RefreshFailed { error: e });
            }
            (SchedulerAction::Discard, _) => {
                debug!(generation, "refresh result from cancelled generation discarded");
                record_refresh("stale");
            }
            (action, _) => {
                debug!(?action, "no-op refresh completion");
            }
        }
    }
}

fn record_refresh(outcome: &'static str) {
    metrics::counter!("session_refresh_total", "outcome" => outcome).increment(1);
}
