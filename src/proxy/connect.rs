//! HTTP proxy session handling.
//!
//! The flow for each client connection is:
//!
//! 1. Read the request head (bounded size and time)
//! 2. Parse the request line into a [`Target`]
//! 3. Evaluate policy for the destination host and audit the decision
//! 4. If blocked: return `403 Forbidden` and close
//! 5. If allowed: connect upstream, then either answer
//!    `200 Connection Established` (CONNECT) or replay the buffered request
//!    (absolute-URI), and relay bytes in both directions
//!
//! No upstream socket is opened before step 3 has been logged.

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::error::ProxyError;
use super::relay::{connect_upstream, relay};
use super::request::{
    BufferedHead, Target, error_response, forbidden_response, parse_request_line, read_head,
    resolve_target,
};
use super::server::ProxyConfig;
use crate::telemetry::EntryKind;

/// Response that opens a CONNECT tunnel.
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Audit decision for a failed upstream connect.
pub const UPSTREAM_FAIL: &str = "UPSTREAM-FAIL";

/// Handle one HTTP proxy client connection.
pub async fn handle_client(mut client: TcpStream, config: &ProxyConfig) -> Result<(), ProxyError> {
    let limits = &config.limits;

    let head = match read_head(&mut client, limits.max_header_bytes, limits.header_timeout).await {
        Ok(Some(head)) => head,
        Ok(None) => {
            debug!("Client closed before completing request head");
            return Ok(());
        }
        Err(e) => return reject(&mut client, e).await,
    };

    let target = match parse_request_line(&head.bytes).and_then(|line| resolve_target(&line)) {
        Ok(target) => target,
        Err(e) => return reject(&mut client, e).await,
    };

    let (kind, host, port) = match &target {
        Target::Tunnel { host, port } => (EntryKind::Connect, host.as_str(), *port),
        Target::Forward { host, port } => (EntryKind::Http, host.as_str(), *port),
    };

    let decision = config.policy.decide(host);
    config
        .audit
        .record(kind, host, u32::from(port), decision.label(), &decision.reason);

    if decision.blocked {
        info!("Blocking {} {}:{} ({})", kind, host, port, decision.reason);
        client
            .write_all(&forbidden_response(host, &decision.reason))
            .await?;
        let _ = client.shutdown().await;
        return Ok(());
    }

    debug!("Allowing {} {}:{} ({})", kind, host, port, decision.reason);

    let mut upstream = match connect_upstream(host, port, &limits.connect).await {
        Ok(upstream) => upstream,
        Err(e) => {
            config
                .audit
                .record(kind, host, u32::from(port), UPSTREAM_FAIL, &failure_detail(&e));
            return reject(&mut client, e).await;
        }
    };

    open_session(&mut client, &mut upstream, &target, &head).await?;
    relay(client, upstream, &limits.relay).await;
    Ok(())
}

/// Send whatever must precede the relay.
async fn open_session(
    client: &mut TcpStream,
    upstream: &mut TcpStream,
    target: &Target,
    head: &BufferedHead,
) -> Result<(), ProxyError> {
    match target {
        Target::Tunnel { .. } => {
            client.write_all(CONNECT_ESTABLISHED).await?;
            if !head.leftover().is_empty() {
                upstream.write_all(head.leftover()).await?;
            }
        }
        Target::Forward { .. } => {
            upstream.write_all(&head.bytes).await?;
        }
    }
    Ok(())
}

/// Answer with the error's status code (if it has one) and close.
async fn reject(client: &mut TcpStream, error: ProxyError) -> Result<(), ProxyError> {
    let Some(status) = error.status() else {
        return Err(error);
    };

    debug!("Rejecting client with {}: {}", status, error);
    client
        .write_all(&error_response(status, &error.to_string()))
        .await?;
    let _ = client.shutdown().await;
    Ok(())
}

/// Short rule annotation for an upstream failure.
pub(crate) fn failure_detail(error: &ProxyError) -> String {
    match error {
        ProxyError::UpstreamTimeout { .. } => "timeout".to_string(),
        ProxyError::UpstreamConnect { message, .. } => {
            format!("error={}", message.split_whitespace().collect::<Vec<_>>().join("_"))
        }
        other => other.to_string(),
    }
}
