//! SOCKS5 proxy session handling (RFC 1928).
//!
//! Only the no-authentication method and the `CONNECT` command are
//! supported. Every handshake read is bounded by the handshake timeout, and
//! the policy decision is logged before any upstream connect.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::connect::{UPSTREAM_FAIL, failure_detail};
use super::error::ProxyError;
use super::policy::is_valid_host;
use super::relay::{connect_upstream, relay};
use super::server::ProxyConfig;
use crate::telemetry::EntryKind;

/// Protocol version byte.
pub const SOCKS_VERSION: u8 = 0x05;

/// Authentication methods.
pub mod method {
    /// No authentication required.
    pub const NO_AUTH: u8 = 0x00;
    /// No acceptable methods.
    pub const NO_ACCEPTABLE: u8 = 0xFF;
}

/// Commands.
pub mod command {
    /// Open a TCP connection.
    pub const CONNECT: u8 = 0x01;
}

/// Address types.
pub mod atype {
    /// IPv4 address (4 bytes).
    pub const IPV4: u8 = 0x01;
    /// Domain name (length-prefixed).
    pub const DOMAIN_NAME: u8 = 0x03;
    /// IPv6 address (16 bytes).
    pub const IPV6: u8 = 0x04;
}

/// Reply codes.
pub mod reply {
    /// Succeeded.
    pub const SUCCEEDED: u8 = 0x00;
    /// General SOCKS server failure.
    pub const GENERAL_FAILURE: u8 = 0x01;
    /// Connection not allowed by ruleset.
    pub const NOT_ALLOWED: u8 = 0x02;
    /// Command not supported.
    pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;
    /// Address type not supported.
    pub const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
}

/// Requested destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Domain name or IP literal (without brackets).
    pub host: String,
    /// Destination port.
    pub port: u16,
}

/// Handle one SOCKS5 client connection.
pub async fn handle_client(mut client: TcpStream, config: &ProxyConfig) -> Result<(), ProxyError> {
    let timeout = config.limits.handshake_timeout;

    let Some(destination) = negotiate(&mut client, timeout).await? else {
        return Ok(());
    };
    let Destination { host, port } = &destination;

    let decision = config.policy.decide(host);
    config.audit.record(
        EntryKind::Socks5,
        host,
        u32::from(*port),
        decision.label(),
        &decision.reason,
    );

    if decision.blocked {
        info!("Blocking SOCKS5 {}:{} ({})", host, port, decision.reason);
        send_reply(&mut client, reply::NOT_ALLOWED).await?;
        return Ok(());
    }

    debug!("Allowing SOCKS5 {}:{} ({})", host, port, decision.reason);

    let upstream = match connect_upstream(host, *port, &config.limits.connect).await {
        Ok(upstream) => upstream,
        Err(e) => {
            config.audit.record(
                EntryKind::Socks5,
                host,
                u32::from(*port),
                UPSTREAM_FAIL,
                &failure_detail(&e),
            );
            send_reply(&mut client, reply::GENERAL_FAILURE).await?;
            return Err(e);
        }
    };

    send_reply(&mut client, reply::SUCCEEDED).await?;
    relay(client, upstream, &config.limits.relay).await;
    Ok(())
}

/// Run the greeting and request phases.
///
/// Returns `Ok(None)` when the handshake ended with a failure reply that has
/// already been sent.
pub async fn negotiate<S>(stream: &mut S, timeout: Duration) -> Result<Option<Destination>, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Greeting: VER NMETHODS METHODS...
    let [version, nmethods] = read_array::<_, 2>(stream, timeout).await?;
    if version != SOCKS_VERSION {
        return Err(ProxyError::Socks(format!("unsupported version {}", version)));
    }
    let mut methods = vec![0u8; nmethods as usize];
    read_exact(stream, &mut methods, timeout).await?;

    if !methods.contains(&method::NO_AUTH) {
        stream
            .write_all(&[SOCKS_VERSION, method::NO_ACCEPTABLE])
            .await?;
        debug!("SOCKS5 client offered no acceptable auth method");
        return Ok(None);
    }
    stream.write_all(&[SOCKS_VERSION, method::NO_AUTH]).await?;

    // Request: VER CMD RSV ATYP
    let [version, cmd, _rsv, addr_type] = read_array::<_, 4>(stream, timeout).await?;
    if version != SOCKS_VERSION {
        return Err(ProxyError::Socks(format!("unsupported version {}", version)));
    }
    if cmd != command::CONNECT {
        send_reply(stream, reply::COMMAND_NOT_SUPPORTED).await?;
        debug!("SOCKS5 command 0x{:02x} not supported", cmd);
        return Ok(None);
    }

    let host = match addr_type {
        atype::IPV4 => Ipv4Addr::from(read_array::<_, 4>(stream, timeout).await?).to_string(),
        atype::IPV6 => Ipv6Addr::from(read_array::<_, 16>(stream, timeout).await?).to_string(),
        atype::DOMAIN_NAME => {
            let [len] = read_array::<_, 1>(stream, timeout).await?;
            let mut name = vec![0u8; len as usize];
            read_exact(stream, &mut name, timeout).await?;
            match String::from_utf8(name) {
                Ok(name) if is_valid_host(&name) => name,
                _ => {
                    send_reply(stream, reply::GENERAL_FAILURE).await?;
                    return Err(ProxyError::Socks("invalid domain name".into()));
                }
            }
        }
        other => {
            send_reply(stream, reply::ADDRESS_TYPE_NOT_SUPPORTED).await?;
            debug!("SOCKS5 address type 0x{:02x} not supported", other);
            return Ok(None);
        }
    };

    let port = u16::from_be_bytes(read_array::<_, 2>(stream, timeout).await?);
    Ok(Some(Destination { host, port }))
}

/// Write `VER REP RSV ATYP=IPv4 0.0.0.0:0`.
async fn send_reply<W>(stream: &mut W, code: u8) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    stream
        .write_all(&[SOCKS_VERSION, code, 0x00, atype::IPV4, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}

async fn read_exact<R>(stream: &mut R, buf: &mut [u8], timeout: Duration) -> Result<(), ProxyError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(timeout, stream.read_exact(buf))
        .await
        .map_err(|_| ProxyError::HandshakeTimeout)??;
    Ok(())
}

async fn read_array<R, const N: usize>(stream: &mut R, timeout: Duration) -> Result<[u8; N], ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; N];
    read_exact(stream, &mut buf, timeout).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Ruleset;
    use crate::proxy::{PolicyEngine, ProxyLimits};
    use crate::telemetry::{AuditCapture, AuditLogger};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn test_config() -> (ProxyConfig, AuditCapture) {
        let ruleset = Ruleset::from_json(r#"{"blocked": ["blocked.com"]}"#).unwrap();
        let (audit, capture) = AuditLogger::capture();
        let config = ProxyConfig {
            policy: Arc::new(PolicyEngine::from_ruleset(&ruleset).unwrap()),
            audit: Arc::new(audit),
            limits: ProxyLimits::default(),
        };
        (config, capture)
    }

    async fn spawn_session(config: ProxyConfig) -> (TcpStream, tokio::task::JoinHandle<Result<(), ProxyError>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_client(stream, &config).await
        });
        (TcpStream::connect(addr).await.unwrap(), server)
    }

    fn domain_request(host: &str, port: u16) -> Vec<u8> {
        let mut req = vec![SOCKS_VERSION, command::CONNECT, 0x00, atype::DOMAIN_NAME, host.len() as u8];
        req.extend_from_slice(host.as_bytes());
        req.extend_from_slice(&port.to_be_bytes());
        req
    }

    #[tokio::test]
    async fn test_negotiate_domain_request() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0x05, 0x02, 0x02, 0x00]).await.unwrap();
        client.write_all(&domain_request("example.com", 443)).await.unwrap();

        let dest = negotiate(&mut server, TIMEOUT).await.unwrap().unwrap();
        assert_eq!(
            dest,
            Destination {
                host: "example.com".into(),
                port: 443
            }
        );

        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();
        assert_eq!(method_reply, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_negotiate_ipv4_and_ipv6() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        client
            .write_all(&[0x05, 0x01, 0x00, atype::IPV4, 203, 0, 113, 5, 0x01, 0xBB])
            .await
            .unwrap();
        let dest = negotiate(&mut server, TIMEOUT).await.unwrap().unwrap();
        assert_eq!(dest.host, "203.0.113.5");
        assert_eq!(dest.port, 443);

        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut req = vec![0x05, 0x01, 0x00, atype::IPV6];
        req.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        req.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&req).await.unwrap();
        let dest = negotiate(&mut server, TIMEOUT).await.unwrap().unwrap();
        assert_eq!(dest.host, "::1");
        assert_eq!(dest.port, 80);
    }

    #[tokio::test]
    async fn test_no_acceptable_method() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();

        assert!(negotiate(&mut server, TIMEOUT).await.unwrap().is_none());
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0xFF]);
    }

    #[tokio::test]
    async fn test_wrong_version_rejected() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

        let result = negotiate(&mut server, TIMEOUT).await;
        assert!(matches!(result, Err(ProxyError::Socks(_))));
    }

    #[tokio::test]
    async fn test_unsupported_command_replies_07() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        client
            .write_all(&[0x05, 0x02, 0x00, atype::IPV4, 1, 2, 3, 4, 0, 80])
            .await
            .unwrap();

        assert!(negotiate(&mut server, TIMEOUT).await.unwrap().is_none());
        let mut replies = [0u8; 12];
        client.read_exact(&mut replies).await.unwrap();
        assert_eq!(&replies[2..4], &[0x05, reply::COMMAND_NOT_SUPPORTED]);
    }

    #[tokio::test]
    async fn test_unsupported_address_type_replies_08() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00, 0x09]).await.unwrap();

        assert!(negotiate(&mut server, TIMEOUT).await.unwrap().is_none());
        let mut replies = [0u8; 12];
        client.read_exact(&mut replies).await.unwrap();
        assert_eq!(replies[3], reply::ADDRESS_TYPE_NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0x05]).await.unwrap();

        let result = negotiate(&mut server, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ProxyError::HandshakeTimeout)));
    }

    #[tokio::test]
    async fn test_blocked_destination_replies_02_and_closes() {
        let (config, capture) = test_config();
        let (mut client, server) = spawn_session(config).await;

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        client.write_all(&domain_request("Blocked.com", 443)).await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        server.await.unwrap().unwrap();

        assert_eq!(response, [0x05, 0x00, 0x05, 0x02, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        let entries = capture.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Socks5);
        assert_eq!(entries[0].decision, "BLOCK");
        assert_eq!(entries[0].rule, "exact:blocked.com");
    }

    #[tokio::test]
    async fn test_domain_with_line_break_is_rejected_unlogged() {
        let (config, capture) = test_config();
        let (mut client, server) = spawn_session(config).await;

        let forged = "evil.com 0 X\n2026-01-01 00:00:00 CONNECT forged.com:443 ALLOW none";
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        // Stop before the port: the server rejects right after the name
        let request = domain_request(forged, 443);
        client.write_all(&request[..request.len() - 2]).await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let result = server.await.unwrap();

        assert!(matches!(result, Err(ProxyError::Socks(_))));
        assert_eq!(response, [0x05, 0x00, 0x05, reply::GENERAL_FAILURE, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        assert!(capture.entries().is_empty());
    }

    #[tokio::test]
    async fn test_domain_with_control_or_space_replies_01() {
        for name in ["bad\tname.com", "bad name.com", "bad\u{0}.com"] {
            let (mut client, mut server) = tokio::io::duplex(256);
            client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
            client.write_all(&domain_request(name, 443)).await.unwrap();

            assert!(negotiate(&mut server, TIMEOUT).await.is_err());
            let mut replies = [0u8; 12];
            client.read_exact(&mut replies).await.unwrap();
            assert_eq!(replies[3], reply::GENERAL_FAILURE);
        }
    }

    #[tokio::test]
    async fn test_allowed_destination_relays() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_port = origin.local_addr().unwrap().port();
        let origin_task = tokio::spawn(async move {
            let (mut stream, _) = origin.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(b"world").await.unwrap();
            buf
        });

        let (config, capture) = test_config();
        let (mut client, server) = spawn_session(config).await;

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut req = vec![0x05, 0x01, 0x00, atype::IPV4, 127, 0, 0, 1];
        req.extend_from_slice(&origin_port.to_be_bytes());
        client.write_all(&req).await.unwrap();

        let mut replies = [0u8; 12];
        client.read_exact(&mut replies).await.unwrap();
        assert_eq!(replies[3], reply::SUCCEEDED);

        client.write_all(b"hello").await.unwrap();
        let mut answer = [0u8; 5];
        client.read_exact(&mut answer).await.unwrap();
        assert_eq!(&answer, b"world");
        assert_eq!(&origin_task.await.unwrap(), b"hello");

        drop(client);
        server.await.unwrap().unwrap();
        assert_eq!(capture.count_decision("ALLOW"), 1);
    }
}
