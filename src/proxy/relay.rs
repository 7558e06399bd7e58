//! Upstream connection and bidirectional relay.
//!
//! Both proxies share these pieces once a destination has been allowed:
//! [`connect_upstream`] opens the origin socket under a retry policy, and
//! [`relay`] copies bytes in both directions until either side is done.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::debug;

use super::error::ProxyError;

/// Copy buffer size per direction.
const RELAY_BUFFER: usize = 16 * 1024;

/// Upstream connect retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Additional attempts after the first.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Relay timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayLimits {
    /// Maximum wait for any single read or write.
    pub idle_timeout: Duration,
    /// Maximum lifetime of a relay session.
    pub session_max: Duration,
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            session_max: Duration::from_secs(3600),
        }
    }
}

/// Bytes moved by a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to upstream.
    pub sent: u64,
    /// Upstream to client.
    pub received: u64,
}

/// How a relay session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// Both directions reached EOF.
    Closed,
    /// A direction failed or went idle; the other was aborted.
    Aborted,
    /// The session hit its lifetime cap.
    Expired,
}

/// Connect to `host:port`, retrying on failure.
///
/// The error reflects the last attempt: a timeout becomes
/// [`ProxyError::UpstreamTimeout`], anything else
/// [`ProxyError::UpstreamConnect`].
pub async fn connect_upstream(
    host: &str,
    port: u16,
    policy: &ConnectPolicy,
) -> Result<TcpStream, ProxyError> {
    let addr = if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };

    let attempts = policy.retries.saturating_add(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.backoff).await;
        }

        match tokio::time::timeout(policy.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                }
                debug!("Connected to upstream {} (attempt {})", addr, attempt);
                return Ok(stream);
            }
            Ok(Err(e)) => {
                debug!("Connect to {} failed (attempt {}/{}): {}", addr, attempt, attempts, e);
                last_error = Some(ProxyError::UpstreamConnect {
                    addr: addr.clone(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                debug!("Connect to {} timed out (attempt {}/{})", addr, attempt, attempts);
                last_error = Some(ProxyError::UpstreamTimeout { addr: addr.clone() });
            }
        }
    }

    Err(last_error.unwrap_or(ProxyError::UpstreamConnect {
        addr,
        message: "no connect attempts made".to_string(),
    }))
}

/// Relay bytes between client and upstream until both sides finish.
///
/// Each direction runs as its own task. EOF on one side half-closes the
/// other and lets the opposite direction drain. An error or idle timeout in
/// either direction aborts both. Both sockets are closed on return.
pub async fn relay(
    client: TcpStream,
    upstream: TcpStream,
    limits: &RelayLimits,
) -> (RelayStats, RelayEnd) {
    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();
    let idle = limits.idle_timeout;

    let mut tasks = JoinSet::new();
    tasks.spawn(async move { (Direction::Sent, pipe(client_read, upstream_write, idle).await) });
    tasks.spawn(async move {
        (
            Direction::Received,
            pipe(upstream_read, client_write, idle).await,
        )
    });

    let mut stats = RelayStats::default();
    let joined = tokio::time::timeout(limits.session_max, async {
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok((direction, Ok(bytes))) => direction.record(&mut stats, bytes),
                Ok((direction, Err(e))) => {
                    debug!("Relay {:?} ended: {}", direction, e);
                    return RelayEnd::Aborted;
                }
                Err(e) => {
                    debug!("Relay task failed: {}", e);
                    return RelayEnd::Aborted;
                }
            }
        }
        RelayEnd::Closed
    })
    .await;

    tasks.abort_all();

    let end = joined.unwrap_or(RelayEnd::Expired);
    debug!(
        "Relay finished ({:?}): {} bytes sent, {} bytes received",
        end, stats.sent, stats.received
    );
    (stats, end)
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Sent,
    Received,
}

impl Direction {
    fn record(self, stats: &mut RelayStats, bytes: u64) {
        match self {
            Direction::Sent => stats.sent = bytes,
            Direction::Received => stats.received = bytes,
        }
    }
}

/// Copy until EOF, then shut down the writer.
async fn pipe<R, W>(mut reader: R, mut writer: W, idle: Duration) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER];
    let mut total = 0u64;

    loop {
        let n = tokio::time::timeout(idle, reader.read(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "relay read idle"))??;

        if n == 0 {
            let _ = writer.shutdown().await;
            return Ok(total);
        }

        tokio::time::timeout(idle, writer.write_all(&buf[..n]))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "relay write stalled"))??;
        total += n as u64;
    }
}
