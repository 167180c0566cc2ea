//! `proxy_pass` via HTTP CONNECT: dial an upstream HTTP proxy, issue a
//! CONNECT for the SNI host, then splice.

use std::time::Duration;

use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ProxyError, Result};
use crate::forward::splice_bidirectional;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Consume the upstream's status line/headers until CRLFCRLF rather than
/// trusting a single `read` call to contain the whole response.
const MAX_RESPONSE_HEADER_BYTES: usize = 8192;

#[derive(Clone)]
pub struct ConnectProxyTarget {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectProxyTarget {
    pub async fn run(&self, mut src: TcpStream, sni_host: &str, hello_bytes: &[u8]) -> Result<()> {
        let upstream_addr = (self.host.as_str(), self.port);
        let mut dst = timeout(DIAL_TIMEOUT, TcpStream::connect(upstream_addr))
            .await
            .map_err(|_| {
                ProxyError::Network(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "proxy_pass (CONNECT) dial timed out",
                ))
            })?
            .map_err(ProxyError::Network)?;

        let mut request = format!("CONNECT {sni_host}:443 HTTP/1.1\r\n");
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            let creds = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
            request.push_str(&format!("Proxy-Authorization: Basic {creds}\r\n"));
        }
        request.push_str("\r\n");

        dst.write_all(request.as_bytes()).await.map_err(ProxyError::Network)?;

        read_until_double_crlf(&mut dst).await?;

        debug!(upstream = %self.host, sni = %sni_host, "CONNECT established");

        dst.write_all(hello_bytes).await.map_err(ProxyError::Network)?;

        let _ = src.set_nodelay(true);
        splice_bidirectional(src, dst).await
    }
}

/// Reads and discards the upstream's CONNECT response until the
/// terminating blank line, bounded at `MAX_RESPONSE_HEADER_BYTES` to
/// avoid an unbounded buffer if the upstream never terminates headers.
async fn read_until_double_crlf(stream: &mut TcpStream) -> Result<()> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if buf.len() >= MAX_RESPONSE_HEADER_BYTES {
            return Err(ProxyError::Protocol(
                "CONNECT response headers exceeded size limit".into(),
            ));
        }
        let n = stream.read(&mut byte).await.map_err(ProxyError::Network)?;
        if n == 0 {
            return Err(ProxyError::Protocol("upstream closed before CONNECT response completed".into()));
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reads_until_blank_line_and_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"HTTP/1.1 200 Connection established\r\nX-Foo: bar\r\n\r\nextra")
                .await
                .unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        read_until_double_crlf(&mut client).await.unwrap();
        server.await.unwrap();
    }
}
