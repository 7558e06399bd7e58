//! HTTP proxy request head handling.
//!
//! The proxy never re-encodes a request. It buffers the head as raw bytes,
//! parses only the request line, and either tunnels (CONNECT) or replays the
//! buffered bytes verbatim to the origin (absolute-URI requests).

use std::time::Duration;

use hyper::{Method, StatusCode, Uri};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::ProxyError;
use super::policy::is_valid_host;

/// Read granularity for the request head.
const READ_CHUNK: usize = 4096;

/// Methods forwarded in absolute-URI form.
pub const FORWARD_METHODS: [Method; 8] = [
    Method::GET,
    Method::POST,
    Method::HEAD,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
    Method::PATCH,
    Method::TRACE,
];

/// Raw bytes read from the client up to (and possibly past) the head.
#[derive(Debug, Clone)]
pub struct BufferedHead {
    /// Everything read so far.
    pub bytes: Vec<u8>,
    /// Length of the head including the terminating blank line.
    pub head_len: usize,
}

impl BufferedHead {
    /// Bytes the client sent after the head.
    pub fn leftover(&self) -> &[u8] {
        &self.bytes[self.head_len..]
    }
}

/// Parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// Request method.
    pub method: Method,
    /// Request target exactly as sent.
    pub target: String,
}

/// What the client asked the proxy to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `CONNECT host:port`.
    Tunnel {
        /// Destination host (IPv6 brackets stripped).
        host: String,
        /// Destination port.
        port: u16,
    },
    /// Absolute-URI request to replay upstream.
    Forward {
        /// Destination host (IPv6 brackets stripped).
        host: String,
        /// Destination port.
        port: u16,
    },
}

impl Target {
    /// Destination host.
    pub fn host(&self) -> &str {
        match self {
            Target::Tunnel { host, .. } | Target::Forward { host, .. } => host,
        }
    }

    /// Destination port.
    pub fn port(&self) -> u16 {
        match self {
            Target::Tunnel { port, .. } | Target::Forward { port, .. } => *port,
        }
    }
}

/// Read until the end of the request head.
///
/// Returns `Ok(None)` if the client closes before completing the head.
/// The whole read is bounded by `timeout`.
pub async fn read_head<R>(
    stream: &mut R,
    max_bytes: usize,
    timeout: Duration,
) -> Result<Option<BufferedHead>, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let read = async {
        let mut bytes = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }

            // Rescan only the tail that could complete a terminator
            let scan_from = bytes.len().saturating_sub(3);
            bytes.extend_from_slice(&chunk[..n]);

            if let Some(pos) = find_terminator(&bytes[scan_from..]) {
                let head_len = scan_from + pos + 4;
                if head_len > max_bytes {
                    return Err(ProxyError::HeaderTooLarge { limit: max_bytes });
                }
                return Ok(Some(BufferedHead { bytes, head_len }));
            }

            if bytes.len() > max_bytes {
                return Err(ProxyError::HeaderTooLarge { limit: max_bytes });
            }
        }
    };

    tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| ProxyError::HeaderTimeout)?
}

fn find_terminator(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse `METHOD TARGET HTTP/x.y` from the start of the head.
pub fn parse_request_line(head: &[u8]) -> Result<RequestLine, ProxyError> {
    let end = head
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(head.len());
    let line = std::str::from_utf8(&head[..end])
        .map_err(|_| ProxyError::BadRequest("request line is not UTF-8".into()))?;

    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ProxyError::BadRequest(format!("malformed request line: {:?}", line)));
    };

    if method.is_empty() || target.is_empty() || !version.starts_with("HTTP/") {
        return Err(ProxyError::BadRequest(format!("malformed request line: {:?}", line)));
    }

    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| ProxyError::BadRequest(format!("invalid method: {}", method)))?;

    Ok(RequestLine {
        method,
        target: target.to_string(),
    })
}

/// Decide what a parsed request line asks for.
pub fn resolve_target(line: &RequestLine) -> Result<Target, ProxyError> {
    if line.method == Method::CONNECT {
        let (host, port) = parse_host_port(&line.target)?;
        return Ok(Target::Tunnel { host, port });
    }

    if !FORWARD_METHODS.contains(&line.method) {
        return Err(ProxyError::MethodNotAllowed(line.method.to_string()));
    }

    let uri: Uri = line
        .target
        .parse()
        .map_err(|_| ProxyError::BadRequest(format!("invalid request target: {}", line.target)))?;

    let host = uri
        .host()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ProxyError::BadRequest("missing host in request URI".into()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();

    let port = match uri.port_u16() {
        Some(port) => port,
        None => match uri.scheme_str() {
            Some("https") => 443,
            _ => 80,
        },
    };

    Ok(Target::Forward { host, port })
}

/// Parse a `host:port` CONNECT authority.
///
/// Examples:
/// - `api.example.com:443` -> ("api.example.com", 443)
/// - `[::1]:8443` -> ("::1", 8443)
///
/// A missing port, port 0, or an empty host or one containing whitespace or
/// control characters is rejected.
pub fn parse_host_port(authority: &str) -> Result<(String, u16), ProxyError> {
    let (host, port_str) = authority
        .rsplit_once(':')
        .ok_or_else(|| ProxyError::InvalidConnect(format!("missing port in {}", authority)))?;

    let host = if host.starts_with('[') && host.ends_with(']') && host.len() >= 2 {
        &host[1..host.len() - 1]
    } else if host.contains(':') {
        // Unbracketed IPv6 is ambiguous
        return Err(ProxyError::InvalidConnect(format!(
            "IPv6 target must be bracketed: {}",
            authority
        )));
    } else {
        host
    };

    if host.is_empty() {
        return Err(ProxyError::InvalidConnect(format!("empty host in {}", authority)));
    }
    if !is_valid_host(host) {
        return Err(ProxyError::InvalidConnect(format!(
            "invalid host in {}",
            authority.escape_debug()
        )));
    }

    let port = port_str
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ProxyError::InvalidConnect(format!("Invalid port: {}", port_str)))?;

    Ok((host.to_string(), port))
}

/// Build a complete error response with a short text body.
pub fn error_response(status: StatusCode, message: &str) -> Vec<u8> {
    let body = format!("{}\n", message);
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body.len(),
        body
    )
    .into_bytes()
}

/// Create a 403 Forbidden response.
pub fn forbidden_response(host: &str, reason: &str) -> Vec<u8> {
    error_response(
        StatusCode::FORBIDDEN,
        &format!("Blocked by focus-guard: {} ({})", host, reason),
    )
}
