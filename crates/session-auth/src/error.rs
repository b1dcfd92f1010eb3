//! Error taxonomy for session credential operations
//!
//! Refresh failures are split by what the caller must do next: terminal
//! kinds mean the stored pair can never work again and the user has to log
//! in, transient kinds mean the pair may still be good and the attempt can
//! be repeated later.

use http_client::TransportError;

/// Errors from token decoding, storage and the auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("no refresh token available, please log in")]
    NoRefreshToken,

    #[error("user associated with refresh token no longer exists")]
    UserNotFound,

    #[error("refresh token is invalid or expired: {0}")]
    InvalidOrExpiredRefreshToken(String),

    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("token storage error: {0}")]
    Storage(String),
}

/// How a failure affects the stored credential pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The pair is dead: clear it and force a new login.
    Terminal,
    /// The pair may still be valid: keep it, stop this cycle.
    Transient,
    /// Not a refresh outcome (decode, login or precondition failures).
    Other,
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::NoRefreshToken | Error::UserNotFound | Error::InvalidOrExpiredRefreshToken(_) => {
                FailureKind::Terminal
            }
            Error::TransientNetwork(_) | Error::Storage(_) => FailureKind::Transient,
            Error::MalformedToken(_) | Error::InvalidCredentials(_) | Error::NotAuthenticated => {
                FailureKind::Other
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind() == FailureKind::Terminal
    }

    /// Stable snake_case label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Error::MalformedToken(_) => "malformed_token",
            Error::NoRefreshToken => "no_refresh_token",
            Error::UserNotFound => "user_not_found",
            Error::InvalidOrExpiredRefreshToken(_) => "invalid_refresh_token",
            Error::TransientNetwork(_) => "transient_network",
            Error::InvalidCredentials(_) => "invalid_credentials",
            Error::NotAuthenticated => "not_authenticated",
            Error::Storage(_) => "storage",
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::TransientNetwork(e.to_string())
    }
}

/// Result alias for session credential operations.
pub type Result<T> = std::result::Result<T, Error>;
