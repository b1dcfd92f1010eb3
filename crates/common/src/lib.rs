//! Types shared by the session crates and the session agent

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
