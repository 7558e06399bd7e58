//! Proxy accept loop.
//!
//! This module provides the server that:
//! - Accepts TCP connections on an already-bound listener
//! - Spawns one task per connection running the HTTP or SOCKS5 handler
//! - Stops accepting and closes open sessions when shutdown is signalled
//!
//! # Example
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = ProxyServer::new(ProxyKind::Socks5, listener, config, shutdown_rx);
//! let handle = tokio::spawn(server.run());
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::ProxyError;
use super::policy::PolicyEngine;
use super::{ProxyLimits, connect, socks5};
use crate::telemetry::AuditLogger;

/// Shared state handed to every connection handler.
#[derive(Clone)]
pub struct ProxyConfig {
    /// Policy engine for destination evaluation.
    pub policy: Arc<PolicyEngine>,
    /// Reference to the audit logger.
    pub audit: Arc<AuditLogger>,
    /// Timeouts and size limits.
    pub limits: ProxyLimits,
}

/// Which protocol a server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// HTTP proxy (`CONNECT` and absolute-URI requests).
    Http,
    /// SOCKS5 proxy.
    Socks5,
}

impl ProxyKind {
    fn name(self) -> &'static str {
        match self {
            ProxyKind::Http => "HTTP proxy",
            ProxyKind::Socks5 => "SOCKS5 proxy",
        }
    }
}

/// A proxy server bound to one listener.
pub struct ProxyServer {
    kind: ProxyKind,
    listener: TcpListener,
    config: ProxyConfig,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    /// Create a new proxy server.
    ///
    /// # Arguments
    ///
    /// * `kind` - Protocol to speak on accepted connections.
    /// * `listener` - Bound listener (see [`super::bind_with_fallback`]).
    /// * `config` - Shared policy, audit and limits.
    /// * `shutdown_rx` - Receiver for shutdown signal.
    pub fn new(
        kind: ProxyKind,
        listener: TcpListener,
        config: ProxyConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            kind,
            listener,
            config,
            shutdown_rx,
        }
    }

    /// Address the server is accepting on.
    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop.
    ///
    /// Returns when the shutdown signal is received or the sender is dropped.
    pub async fn run(self) -> Result<(), ProxyError> {
        let addr = self.local_addr()?;
        info!("{} accepting on {}", self.kind.name(), addr);

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!("{} accepted connection from {}", self.kind.name(), peer);
                            self.spawn_connection_handler(stream);
                        }
                        Err(e) => {
                            warn!("{} failed to accept connection: {}", self.kind.name(), e);
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("{} shutting down", self.kind.name());
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Spawn a task to handle a single connection.
    ///
    /// The session is dropped (closing both sockets) on shutdown.
    fn spawn_connection_handler(&self, stream: TcpStream) {
        let kind = self.kind;
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let session = async {
                match kind {
                    ProxyKind::Http => connect::handle_client(stream, &config).await,
                    ProxyKind::Socks5 => socks5::handle_client(stream, &config).await,
                }
            };

            tokio::select! {
                result = session => {
                    if let Err(e) = result {
                        // Don't log connection resets as errors - they're common
                        if e.is_disconnect() {
                            debug!("Connection ended: {}", e);
                        } else {
                            warn!("{} connection error: {}", kind.name(), e);
                        }
                    }
                }
                _ = shutdown_rx.wait_for(|stop| *stop) => {
                    debug!("{} closing session on shutdown", kind.name());
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Ruleset;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start(kind: ProxyKind) -> (SocketAddr, watch::Sender<bool>, tokio::task::JoinHandle<Result<(), ProxyError>>) {
        let ruleset = Ruleset::from_json(r#"{"blocked": ["blocked.com"]}"#).unwrap();
        let config = ProxyConfig {
            policy: Arc::new(PolicyEngine::from_ruleset(&ruleset).unwrap()),
            audit: Arc::new(AuditLogger::new_null()),
            limits: ProxyLimits::default(),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = watch::channel(false);
        let server = ProxyServer::new(kind, listener, config, rx);
        let addr = server.local_addr().unwrap();
        (addr, tx, tokio::spawn(server.run()))
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let (_, tx, handle) = start(ProxyKind::Http).await;

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_server_stops_when_sender_dropped() {
        let (_, tx, handle) = start(ProxyKind::Socks5).await;

        drop(tx);
        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_sessions() {
        let (addr, tx, handle) = start(ProxyKind::Http).await;

        // Connect but never send a head: the session is waiting on us
        let mut client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut buf))
            .await
            .unwrap();
        assert_eq!(read.unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn test_blocked_connect_through_server() {
        let (addr, _tx, _handle) = start(ProxyKind::Http).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"CONNECT blocked.com:443 HTTP/1.1\r\nHost: blocked.com:443\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 403"));
    }
}
