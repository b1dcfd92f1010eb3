//! Session refresh scheduling for the expense tracker client
//!
//! Decides *when* the refresh executor from `session-auth` runs. A single
//! `RefreshScheduler` owns the one pending refresh timer, re-arms itself
//! after every successful refresh and stops on the first failure. The
//! resolver answers "is the user logged in?" at startup and leaves the
//! scheduler armed or the store cleared accordingly.
//!
//! Session lifecycle:
//! 1. `Session::resolve()` at startup → `Authenticated` arms the scheduler
//! 2. Timer fires `lead_time` before expiry → executor refreshes → re-arm
//! 3. Refresh token rejected → store cleared, `SessionEvent::SessionEnded`
//! 4. Backend unreachable → tokens kept, `SessionEvent::RefreshFailed`
//! 5. `Session::logout()` → scheduler cancelled, then store cleared

pub mod resolver;
pub mod scheduler;
pub mod session;
pub mod state;

#[cfg(test)]
mod test_support;

pub use resolver::{AuthStatus, NotAuthenticatedReason, resolve};
pub use scheduler::{EndReason, RefreshPolicy, RefreshScheduler, SessionEvent};
pub use session::Session;
pub use state::{SchedulerAction, SchedulerEvent, SchedulerState, handle_event};
