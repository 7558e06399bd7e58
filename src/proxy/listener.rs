//! Listener binding with ephemeral-port fallback.

use std::net::{IpAddr, SocketAddr};

use tokio::net::TcpListener;
use tracing::{info, warn};

use super::error::ProxyError;

/// Bind `host:port`, falling back to an OS-assigned port if that fails.
///
/// `name` only labels log lines. The caller reads the bound port from
/// `TcpListener::local_addr`.
pub async fn bind_with_fallback(
    host: IpAddr,
    port: u16,
    name: &str,
) -> Result<TcpListener, ProxyError> {
    let requested = SocketAddr::new(host, port);

    match TcpListener::bind(requested).await {
        Ok(listener) => {
            info!("{} listening on {}", name, local_addr_or(&listener, requested));
            Ok(listener)
        }
        Err(e) if port != 0 => {
            warn!(
                "{} could not bind {}: {}; falling back to an ephemeral port",
                name, requested, e
            );
            let fallback = SocketAddr::new(host, 0);
            let listener = TcpListener::bind(fallback)
                .await
                .map_err(|source| ProxyError::Bind {
                    addr: fallback.to_string(),
                    source,
                })?;
            info!("{} listening on {}", name, local_addr_or(&listener, fallback));
            Ok(listener)
        }
        Err(source) => Err(ProxyError::Bind {
            addr: requested.to_string(),
            source,
        }),
    }
}

fn local_addr_or(listener: &TcpListener, fallback: SocketAddr) -> SocketAddr {
    listener.local_addr().unwrap_or(fallback)
}
