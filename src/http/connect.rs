//! HTTP listener & CONNECT bridge (component H): accepts HTTP/1.1 on the
//! intercepting proxy port. `CONNECT` requests get tunneled straight into
//! the TLS listener's per-connection handler (component G); anything
//! else goes to the reverse handler (component I).

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace, warn, Instrument};

use crate::error::{ProxyError, Result};
use crate::http::reverse::{self, HttpAction};
use crate::rule::suffix::SuffixRouter;
use crate::tls::listener::{self, TlsAction};

const MAX_REQUEST_HEADER_BYTES: usize = 16 * 1024;
const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;
const MAX_HEADER_COUNT: usize = 64;

/// A parsed HTTP/1.1 request with `path` normalized to an origin-form
/// path (`/foo?bar`) and `host` split out of either the absolute-form
/// request target or the `Host` header.
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub host: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub https_target: bool,
}

impl ParsedRequest {
    /// `proxy_pass` must never be used for an HTTPS target through this
    /// handler (it would break SNI by rewriting `URL.Host` to a bare IP).
    /// `https_target` is set when the absolute-form request target itself
    /// carried an `https://` scheme.
    pub fn is_https_target(&self) -> bool {
        self.https_target
    }
}

pub struct HttpListener {
    listener: TcpListener,
    tls_router: Arc<SuffixRouter<TlsAction>>,
    http_router: Arc<SuffixRouter<HttpAction>>,
}

impl HttpListener {
    pub async fn bind(
        addr: &str,
        tls_router: Arc<SuffixRouter<TlsAction>>,
        http_router: Arc<SuffixRouter<HttpAction>>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, tls_router, http_router })
    }

    pub async fn run(self) -> io::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let tls_router = Arc::clone(&self.tls_router);
                    let http_router = Arc::clone(&self.http_router);
                    tokio::spawn(
                        async move {
                            if let Err(e) = handle_connection(stream, &tls_router, &http_router).await {
                                debug!(error = %e, "HTTP connection error");
                            }
                        }
                        .instrument(tracing::info_span!("http_connection", peer = %peer)),
                    );
                }
                Err(e) => {
                    warn!(error = %e, "HTTP accept error");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection(
    mut client: TcpStream,
    tls_router: &SuffixRouter<TlsAction>,
    http_router: &SuffixRouter<HttpAction>,
) -> Result<()> {
    let header_bytes = read_request_head(&mut client).await?;

    let mut headers_buf = [httparse::EMPTY_HEADER; MAX_HEADER_COUNT];
    let mut parsed = httparse::Request::new(&mut headers_buf);
    let status = parsed
        .parse(&header_bytes)
        .map_err(|e| ProxyError::Protocol(format!("malformed HTTP request: {e}")))?;
    if status.is_partial() {
        return Err(ProxyError::Protocol("incomplete HTTP request headers".into()));
    }

    let method = parsed.method.unwrap_or("").to_string();
    let target = parsed.path.unwrap_or("").to_string();

    if method.eq_ignore_ascii_case("CONNECT") {
        return handle_connect(client, &target, tls_router).await;
    }

    let headers: Vec<(String, String)> = parsed
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let body = if content_length > 0 {
        if content_length > MAX_REQUEST_BODY_BYTES {
            return Err(ProxyError::Protocol("request body exceeds maximum size".into()));
        }
        let mut body = vec![0u8; content_length];
        client.read_exact(&mut body).await.map_err(ProxyError::Network)?;
        body
    } else {
        Vec::new()
    };

    let https_target = target.starts_with("https://");
    let (host, path) = split_authority(&target, &headers);

    let req = ParsedRequest { method, path, host: host.clone(), headers, body, https_target };

    let action = match http_router.lookup(&host) {
        Some(a) => a,
        None => {
            trace!(host = %host, "no HTTP rule match, dropping");
            return Ok(());
        }
    };

    let response = reverse::handle_request(&action, &req).await?;
    client.write_all(&response.to_bytes()).await.map_err(ProxyError::Network)?;
    Ok(())
}

/// `CONNECT host:port HTTP/1.1` establishes a tunnel: reply with the
/// canonical one-line success response, then hand the raw socket to the
/// TLS listener's connection handler, which reads the ClientHello that
/// follows and dispatches it the same way a direct TLS-port connection
/// would be.
async fn handle_connect(mut client: TcpStream, _authority: &str, tls_router: &SuffixRouter<TlsAction>) -> Result<()> {
    client
        .write_all(b"HTTP/1.0 200 Connection established\r\n\r\n")
        .await
        .map_err(ProxyError::Network)?;
    listener::handle_connection(client, tls_router).await
}

/// Split a request target (absolute-form `http://host:port/path` or
/// origin-form `/path` with a `Host` header) into `(host-without-port,
/// path)`.
fn split_authority(target: &str, headers: &[(String, String)]) -> (String, String) {
    if let Ok(uri) = target.parse::<http::Uri>() {
        if let Some(authority) = uri.authority() {
            let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/").to_string();
            return (authority.host().to_string(), path);
        }
    }

    let host = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("host"))
        .map(|(_, v)| v.split(':').next().unwrap_or(v).to_string())
        .unwrap_or_default();

    (host, target.to_string())
}

/// Reads one byte at a time until the terminating `\r\n\r\n`, bounded by
/// `MAX_REQUEST_HEADER_BYTES`. Mirrors the CONNECT-response reader on the
/// `proxy_pass` side of the forwarding engine.
async fn read_request_head(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if buf.len() >= MAX_REQUEST_HEADER_BYTES {
            return Err(ProxyError::Protocol("HTTP request headers exceeded size limit".into()));
        }
        let n = stream.read(&mut byte).await.map_err(ProxyError::Network)?;
        if n == 0 {
            return Err(ProxyError::Protocol("client closed before request headers completed".into()));
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            return Ok(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_authority_prefers_absolute_form() {
        let (host, path) = split_authority("http://example.com:8080/foo?bar", &[]);
        assert_eq!(host, "example.com");
        assert_eq!(path, "/foo?bar");
    }

    #[test]
    fn split_authority_falls_back_to_host_header() {
        let headers = vec![("Host".to_string(), "example.com:80".to_string())];
        let (host, path) = split_authority("/foo", &headers);
        assert_eq!(host, "example.com");
        assert_eq!(path, "/foo");
    }
}
