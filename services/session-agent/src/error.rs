//! Service-specific error types

use std::net::SocketAddr;

use thiserror::Error;

/// Session agent startup errors.
///
/// Per-request failures are turned into HTTP responses by the API handlers
/// and never propagate as Rust errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = Error::Bind {
            addr: "127.0.0.1:9091".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        };
        assert_eq!(
            err.to_string(),
            "failed to bind 127.0.0.1:9091: address in use"
        );
        assert!(
            Error::Metrics("recorder already set".into())
                .to_string()
                .contains("recorder already set")
        );
    }

    #[test]
    fn bind_error_keeps_its_source() {
        let err = Error::Bind {
            addr: "127.0.0.1:9091".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "denied");
    }
}
