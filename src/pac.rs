//! Proxy auto-config (PAC) responder.
//!
//! Serves a single script at `/proxy.pac` telling browsers to send all
//! non-local traffic through the HTTP proxy, with the SOCKS5 proxy as a
//! fallback. Plain hostnames, `localhost`, loopback and RFC 1918 ranges go
//! direct.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{ALLOW, CACHE_CONTROL, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::proxy::ProxyError;

/// Path the script is served at.
pub const PAC_PATH: &str = "/proxy.pac";

/// MIME type browsers expect for PAC files.
pub const PAC_CONTENT_TYPE: &str = "application/x-ns-proxy-autoconfig";

/// Time allowed to receive a request head.
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Render the PAC script for the given proxy endpoints.
pub fn render_script(proxy_host: &str, http_port: u16, socks_port: u16) -> String {
    format!(
        r#"function FindProxyForURL(url, host) {{
  if (isPlainHostName(host) ||
      shExpMatch(host, "localhost") ||
      isInNet(host, "127.0.0.0", "255.0.0.0") ||
      isInNet(host, "10.0.0.0", "255.0.0.0") ||
      isInNet(host, "172.16.0.0", "255.240.0.0") ||
      isInNet(host, "192.168.0.0", "255.255.0.0"))
    return "DIRECT";
  return "PROXY {host}:{http}; SOCKS5 {host}:{socks}";
}}
"#,
        host = proxy_host,
        http = http_port,
        socks = socks_port
    )
}

/// Host clients should use to reach a listener bound to `ip`.
///
/// A wildcard bind is reachable on loopback.
pub fn advertised_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) if v4.is_unspecified() => Ipv4Addr::LOCALHOST.to_string(),
        IpAddr::V6(v6) if v6.is_unspecified() => format!("[{}]", Ipv6Addr::LOCALHOST),
        IpAddr::V6(v6) => format!("[{}]", v6),
        IpAddr::V4(v4) => v4.to_string(),
    }
}

/// URL of the script served by a PAC listener bound to `addr`.
pub fn pac_url(addr: SocketAddr) -> String {
    format!("http://{}:{}{}", advertised_host(addr.ip()), addr.port(), PAC_PATH)
}

/// HTTP server for the PAC script.
pub struct PacServer {
    listener: TcpListener,
    script: Bytes,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl PacServer {
    /// Create a PAC server that advertises the given proxy addresses.
    pub fn new(
        listener: TcpListener,
        http_proxy: SocketAddr,
        socks_proxy: SocketAddr,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let script = render_script(
            &advertised_host(http_proxy.ip()),
            http_proxy.port(),
            socks_proxy.port(),
        );
        Self {
            listener,
            script: Bytes::from(script),
            shutdown_rx,
        }
    }

    /// Address the server is accepting on.
    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop until shutdown.
    pub async fn run(self) -> Result<(), ProxyError> {
        info!("PAC responder serving {}", pac_url(self.local_addr()?));

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => self.spawn_connection_handler(stream),
                        Err(e) => warn!("PAC responder failed to accept connection: {}", e),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("PAC responder shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    fn spawn_connection_handler(&self, stream: TcpStream) {
        let script = self.script.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let script = script.clone();
                async move { Ok::<_, Infallible>(respond(&req, &script)) }
            });

            let connection = http1::Builder::new()
                .timer(TokioTimer::new())
                .header_read_timeout(HEADER_READ_TIMEOUT)
                .serve_connection(TokioIo::new(stream), service);

            tokio::select! {
                result = connection => {
                    if let Err(e) = result {
                        debug!("PAC connection ended: {}", e);
                    }
                }
                _ = shutdown_rx.wait_for(|stop| *stop) => {}
            }
        });
    }
}

/// Build the response for one PAC request.
fn respond<B>(req: &Request<B>, script: &Bytes) -> Response<Full<Bytes>> {
    if req.uri().path() != PAC_PATH {
        return plain(StatusCode::NOT_FOUND, "not found\n");
    }

    if req.method() != Method::GET && req.method() != Method::HEAD {
        let mut response = plain(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
        response
            .headers_mut()
            .insert(ALLOW, hyper::header::HeaderValue::from_static("GET, HEAD"));
        return response;
    }

    // hyper omits the body for HEAD but keeps Content-Length
    let mut response = Response::new(Full::new(script.clone()));
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(PAC_CONTENT_TYPE),
    );
    headers.insert(
        CACHE_CONTROL,
        hyper::header::HeaderValue::from_static("no-store"),
    );
    response
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start() -> (SocketAddr, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = watch::channel(false);
        let server = PacServer::new(
            listener,
            "127.0.0.1:3128".parse().unwrap(),
            "127.0.0.1:1080".parse().unwrap(),
            rx,
        );
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        (addr, tx)
    }

    async fn fetch(addr: SocketAddr, request_line: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("{}\r\nHost: localhost\r\nConnection: close\r\n\r\n", request_line);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[test]
    fn test_render_script() {
        let script = render_script("127.0.0.1", 3128, 1080);
        assert!(script.starts_with("function FindProxyForURL(url, host) {"));
        assert!(script.contains(r#"return "PROXY 127.0.0.1:3128; SOCKS5 127.0.0.1:1080";"#));
        assert!(script.contains(r#"isInNet(host, "192.168.0.0", "255.255.0.0")"#));
        assert!(script.contains(r#"return "DIRECT";"#));
    }

    #[test]
    fn test_advertised_host() {
        assert_eq!(advertised_host("0.0.0.0".parse().unwrap()), "127.0.0.1");
        assert_eq!(advertised_host("::".parse().unwrap()), "[::1]");
        assert_eq!(advertised_host("192.168.1.2".parse().unwrap()), "192.168.1.2");
        assert_eq!(
            pac_url("127.0.0.1:18080".parse().unwrap()),
            "http://127.0.0.1:18080/proxy.pac"
        );
    }

    #[tokio::test]
    async fn test_get_pac() {
        let (addr, _tx) = start().await;
        let response = fetch(addr, "GET /proxy.pac?cachebust=1 HTTP/1.1").await;
        let lower = response.to_ascii_lowercase();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(lower.contains("content-type: application/x-ns-proxy-autoconfig"));
        assert!(lower.contains("cache-control: no-store"));
        assert!(response.contains("PROXY 127.0.0.1:3128; SOCKS5 127.0.0.1:1080"));
    }

    #[tokio::test]
    async fn test_head_pac_has_no_body() {
        let (addr, _tx) = start().await;
        let response = fetch(addr, "HEAD /proxy.pac HTTP/1.1").await;

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(!response.contains("FindProxyForURL"));
    }

    #[tokio::test]
    async fn test_other_path_404() {
        let (addr, _tx) = start().await;
        let response = fetch(addr, "GET /wpad.dat HTTP/1.1").await;
        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn test_other_method_405() {
        let (addr, _tx) = start().await;
        let response = fetch(addr, "POST /proxy.pac HTTP/1.1").await;
        assert!(response.starts_with("HTTP/1.1 405"));
        assert!(response.to_ascii_lowercase().contains("allow: get, head"));
    }
}
