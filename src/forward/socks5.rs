//! `proxy_pass` via SOCKS5: dial the SNI host through an upstream SOCKS5
//! proxy, then splice.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

use crate::error::{ProxyError, Result};
use crate::forward::splice_bidirectional;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Socks5Target {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Socks5Target {
    pub async fn run(&self, mut src: TcpStream, sni_host: &str, hello_bytes: &[u8]) -> Result<()> {
        let proxy_addr = format!("{}:{}", self.host, self.port);
        let target = format!("{}:443", sni_host);

        let connect = async {
            match (&self.username, &self.password) {
                (Some(user), Some(pass)) => {
                    Socks5Stream::connect_with_password(proxy_addr.as_str(), target.as_str(), user, pass)
                        .await
                }
                _ => Socks5Stream::connect(proxy_addr.as_str(), target.as_str()).await,
            }
        };

        let socks_stream = timeout(DIAL_TIMEOUT, connect)
            .await
            .map_err(|_| ProxyError::Network(std::io::Error::new(std::io::ErrorKind::TimedOut, "SOCKS5 dial timed out")))?
            .map_err(|e| ProxyError::Network(std::io::Error::other(e)))?;

        debug!(proxy = %proxy_addr, target = %target, "SOCKS5 tunnel established");

        let mut dst = socks_stream.into_inner();
        use tokio::io::AsyncWriteExt;
        dst.write_all(hello_bytes).await.map_err(ProxyError::Network)?;

        let _ = src.set_nodelay(true);
        splice_bidirectional(src, dst).await
    }
}
