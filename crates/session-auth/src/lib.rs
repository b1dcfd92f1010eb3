//! Session credentials for the expense tracker client
//!
//! Everything needed to hold and renew a JWT access/refresh pair without a
//! scheduler: the token store, the expiry decoder, the refresh executor and
//! the account endpoints that mint a pair in the first place. Timing
//! decisions live in the `session-refresh` crate.
//!
//! Credential flow:
//! 1. `AccountClient::login()` / `register()` returns a `CredentialPair`
//! 2. The pair is written with `TokenStore::set_pair()`
//! 3. `decode::decode_expiry()` tells the caller when the access token dies
//! 4. `RefreshExecutor::refresh()` trades the refresh token for a new pair
//! 5. `AccountClient::logout()` blacklists the refresh token server-side

pub mod account;
pub mod clock;
pub mod constants;
pub mod decode;
pub mod endpoints;
pub mod error;
pub mod store;
pub mod token;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use account::{AccountClient, UserProfile};
pub use clock::{Clock, ManualClock, SystemClock};
pub use constants::*;
pub use decode::{decode_expiry, is_expired};
pub use endpoints::Endpoints;
pub use error::{Error, FailureKind, Result};
pub use store::{CredentialPair, FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::{RefreshExecutor, classify_refresh_failure};
