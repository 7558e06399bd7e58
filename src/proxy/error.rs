//! Error types for proxy operations.
//!
//! This module defines structured error types for both proxies:
//! - Server errors (binding, accept)
//! - Client protocol errors (malformed request heads, SOCKS5 handshakes)
//! - Upstream errors (connect failures and timeouts)
//!
//! Client-facing HTTP errors map to a status code via [`ProxyError::status`].

use hyper::StatusCode;
use thiserror::Error;

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to bind a listener, even on an ephemeral port.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// The address we tried to bind.
        addr: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Malformed request line or request target.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Invalid CONNECT target.
    #[error("Invalid CONNECT request: {0}")]
    InvalidConnect(String),

    /// Method other than CONNECT or a supported absolute-URI method.
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// The request head exceeded the configured limit.
    #[error("Request head exceeds {limit} bytes")]
    HeaderTooLarge {
        /// Configured maximum.
        limit: usize,
    },

    /// The client did not finish its request head in time.
    #[error("Timed out waiting for request head")]
    HeaderTimeout,

    /// SOCKS5 protocol violation.
    #[error("SOCKS5 protocol error: {0}")]
    Socks(String),

    /// The client stalled during the SOCKS5 handshake.
    #[error("Timed out during SOCKS5 handshake")]
    HandshakeTimeout,

    /// Every connect attempt to the upstream timed out.
    #[error("Timed out connecting to upstream '{addr}'")]
    UpstreamTimeout {
        /// The address we tried to connect to.
        addr: String,
    },

    /// Failed to connect to upstream server.
    #[error("Failed to connect to upstream '{addr}': {message}")]
    UpstreamConnect {
        /// The address we tried to connect to.
        addr: String,
        /// Error message.
        message: String,
    },
}

impl ProxyError {
    /// HTTP status to send the client for this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProxyError::BadRequest(_) | ProxyError::InvalidConnect(_) => {
                Some(StatusCode::BAD_REQUEST)
            }
            ProxyError::MethodNotAllowed(_) => Some(StatusCode::METHOD_NOT_ALLOWED),
            ProxyError::HeaderTooLarge { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            ProxyError::HeaderTimeout => Some(StatusCode::REQUEST_TIMEOUT),
            ProxyError::UpstreamTimeout { .. } => Some(StatusCode::GATEWAY_TIMEOUT),
            ProxyError::UpstreamConnect { .. } => Some(StatusCode::BAD_GATEWAY),
            _ => None,
        }
    }

    /// Whether this is an ordinary disconnect not worth a warning.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProxyError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_error_display() {
        let err = ProxyError::InvalidConnect("missing port".to_string());
        assert!(err.to_string().contains("missing port"));
    }

    #[test]
    fn test_upstream_connect_error() {
        let err = ProxyError::UpstreamConnect {
            addr: "api.example.com:443".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("api.example.com:443"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::HeaderTimeout.status(),
            Some(StatusCode::REQUEST_TIMEOUT)
        );
        assert_eq!(
            ProxyError::HeaderTooLarge { limit: 10 }.status(),
            Some(StatusCode::PAYLOAD_TOO_LARGE)
        );
        assert_eq!(
            ProxyError::MethodNotAllowed("PROPFIND".into()).status(),
            Some(StatusCode::METHOD_NOT_ALLOWED)
        );
        assert_eq!(
            ProxyError::UpstreamTimeout { addr: "a:1".into() }.status(),
            Some(StatusCode::GATEWAY_TIMEOUT)
        );
        assert_eq!(
            ProxyError::UpstreamConnect {
                addr: "a:1".into(),
                message: "refused".into()
            }
            .status(),
            Some(StatusCode::BAD_GATEWAY)
        );
        assert_eq!(ProxyError::HandshakeTimeout.status(), None);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let proxy_err: ProxyError = io_err.into();
        assert!(matches!(proxy_err, ProxyError::Io(_)));
        assert!(proxy_err.is_disconnect());
    }
}
