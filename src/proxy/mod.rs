//! Network proxies that enforce the destination policy.
//!
//! This module provides two admission-control proxies sharing one policy
//! engine and one audit logger:
//! - an HTTP proxy handling `CONNECT` tunnels and absolute-URI requests
//! - a SOCKS5 proxy (RFC 1928, no-auth, `CONNECT` only)
//!
//! Every request is decided before any upstream socket is opened. Allowed
//! traffic is relayed opaquely; TLS is never terminated.
//!
//! # Architecture
//!
//! ```text
//!   browser / app
//!        │  CONNECT host:443         SOCKS5 CONNECT
//!        ▼                                ▼
//!  ┌─────────────┐                 ┌─────────────┐
//!  │ HTTP proxy  │                 │ SOCKS5 proxy│
//!  └──────┬──────┘                 └──────┬──────┘
//!         └──────────┬────────────────────┘
//!                    ▼
//!            PolicyEngine::decide ──► AuditLogger
//!                    │
//!          BLOCK ◄───┴───► ALLOW: connect_upstream + relay
//! ```
//!
//! # Example
//!
//! ```ignore
//! use focus_guard::proxy::{bind_with_fallback, ProxyConfig, ProxyKind, ProxyServer};
//!
//! let listener = bind_with_fallback(host, 3128, "HTTP proxy").await?;
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = ProxyServer::new(ProxyKind::Http, listener, config, shutdown_rx);
//! server.run().await?;
//! ```

pub mod connect;
pub mod error;
pub mod listener;
pub mod policy;
pub mod relay;
pub mod request;
pub mod server;
pub mod socks5;

use std::time::Duration;

// Re-export main types for convenient access
pub use error::ProxyError;
pub use listener::bind_with_fallback;
pub use policy::{Decision, PolicyEngine};
pub use relay::{ConnectPolicy, RelayLimits};
pub use server::{ProxyConfig, ProxyKind, ProxyServer};

/// Data-path limits shared by both proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyLimits {
    /// Largest accepted HTTP request head.
    pub max_header_bytes: usize,
    /// Time allowed to receive a complete HTTP request head.
    pub header_timeout: Duration,
    /// Per-read timeout during the SOCKS5 handshake.
    pub handshake_timeout: Duration,
    /// Upstream connect policy.
    pub connect: ConnectPolicy,
    /// Relay timeouts.
    pub relay: RelayLimits,
}

impl Default for ProxyLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            header_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            connect: ConnectPolicy::default(),
            relay: RelayLimits::default(),
        }
    }
}
