//! Backend URL construction

use crate::constants::{LOGIN_PATH, LOGOUT_PATH, ME_PATH, REFRESH_PATH, REGISTER_PATH};

/// Absolute URLs for the auth endpoints, derived from a configured base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base_url: String,
}

impl Endpoints {
    /// `base_url` is scheme + host (+ port); a trailing `/` is ignored.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn refresh(&self) -> String {
        format!("{}{REFRESH_PATH}", self.base_url)
    }

    pub fn login(&self) -> String {
        format!("{}{LOGIN_PATH}", self.base_url)
    }

    pub fn register(&self) -> String {
        format!("{}{REGISTER_PATH}", self.base_url)
    }

    pub fn logout(&self) -> String {
        format!("{}{LOGOUT_PATH}", self.base_url)
    }

    pub fn me(&self) -> String {
        format!("{}{ME_PATH}", self.base_url)
    }
}
