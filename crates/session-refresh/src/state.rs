//! Refresh scheduler state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! The scheduler driver performs the I/O each action implies (spawning the
//! timer, calling the executor, writing or clearing the store).
//!
//! Every event that comes back from asynchronous work carries the
//! generation it was started under. An event whose generation no longer
//! matches the current state is stale (a cancel or re-arm happened while it
//! was in flight) and is discarded without touching the store.

use std::time::Duration;

use session_auth::FailureKind;

/// Scheduler states.
///
/// Transitions:
/// - Idle → Armed (arm)
/// - Armed → Armed (re-arm replaces the pending timer)
/// - Armed → Refreshing (timer fired)
/// - Refreshing → Idle → Armed (refresh succeeded, re-armed in the same step)
/// - Refreshing → Idle (refresh failed)
/// - any → Idle (cancel)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No timer pending
    Idle,
    /// Timer counting down to a refresh
    Armed { generation: u64, delay: Duration },
    /// Refresh request in flight
    Refreshing { generation: u64 },
}

impl SchedulerState {
    /// State label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Armed { .. } => "armed",
            SchedulerState::Refreshing { .. } => "refreshing",
        }
    }

    pub fn generation(&self) -> Option<u64> {
        match self {
            SchedulerState::Idle => None,
            SchedulerState::Armed { generation, .. } | SchedulerState::Refreshing { generation } => {
                Some(*generation)
            }
        }
    }
}

/// Events that drive scheduler transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// `arm()` computed a delay and reserved a new generation
    Arm { generation: u64, delay: Duration },
    /// A timer armed under `generation` elapsed
    TimerFired { generation: u64 },
    /// The refresh started under `generation` returned a new pair
    RefreshSucceeded { generation: u64 },
    /// The refresh started under `generation` failed
    RefreshFailed { generation: u64, kind: FailureKind },
    /// `cancel()` or logout
    Cancel,
}

/// Actions the driver executes after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerAction {
    /// Spawn a timer task for `generation` that fires after `delay`
    StartTimer { generation: u64, delay: Duration },
    /// Call the refresh executor
    RunRefresh,
    /// Persist the new pair and arm again from its expiry
    CommitAndRearm,
    /// Terminal failure: clear the store and report the session over
    ClearTokens,
    /// Transient failure: keep the store, report the failure
    ReportFailure,
    /// Stale event from a cancelled generation; ignore its result
    Discard,
    /// No-op
    None,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(
    state: SchedulerState,
    event: SchedulerEvent,
) -> (SchedulerState, SchedulerAction) {
    match (state, event) {
        // A refresh in flight re-arms itself when it lands.
        (SchedulerState::Refreshing { .. }, SchedulerEvent::Arm { .. }) => {
            (state, SchedulerAction::None)
        }

        (_, SchedulerEvent::Arm { generation, delay }) => (
            SchedulerState::Armed { generation, delay },
            SchedulerAction::StartTimer { generation, delay },
        ),

        // --- Armed ---
        (SchedulerState::Armed { generation: current, .. }, SchedulerEvent::TimerFired { generation })
            if current == generation =>
        {
            (
                SchedulerState::Refreshing { generation },
                SchedulerAction::RunRefresh,
            )
        }

        // --- Refreshing ---
        (
            SchedulerState::Refreshing { generation: current },
            SchedulerEvent::RefreshSucceeded { generation },
        ) if current == generation => (SchedulerState::Idle, SchedulerAction::CommitAndRearm),

        (
            SchedulerState::Refreshing { generation: current },
            SchedulerEvent::RefreshFailed {
                generation,
                kind: FailureKind::Terminal,
            },
        ) if current == generation => (SchedulerState::Idle, SchedulerAction::ClearTokens),

        (
            SchedulerState::Refreshing { generation: current },
            SchedulerEvent::RefreshFailed { generation, .. },
        ) if current == generation => (SchedulerState::Idle, SchedulerAction::ReportFailure),

        // --- Cancel ---
        (_, SchedulerEvent::Cancel) => (SchedulerState::Idle, SchedulerAction::None),

        // Timer or refresh outcome from a generation that was cancelled
        (
            state,
            SchedulerEvent::TimerFired { .. }
            | SchedulerEvent::RefreshSucceeded { .. }
            | SchedulerEvent::RefreshFailed { .. },
        ) => (state, SchedulerAction::Discard),
    }
}
