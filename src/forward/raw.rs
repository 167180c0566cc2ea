//! `raw_pass`: dial the resolved destination directly and splice.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::dns::resolver::Resolve;
use crate::error::{ProxyError, Result};
use crate::forward::splice_bidirectional;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Compiled `raw_pass` target: an optional fixed `host`/`port` override,
/// falling back to the sniffed SNI host and port 443.
#[derive(Clone)]
pub struct RawPassTarget {
    pub host: Option<String>,
    pub port: u16,
    pub resolve: Arc<Resolve>,
}

impl RawPassTarget {
    pub fn new(host: Option<String>, port: u16, resolve: Arc<Resolve>) -> Self {
        Self { host, port, resolve }
    }

    pub async fn run(&self, mut src: TcpStream, sni_host: &str, hello_bytes: &[u8]) -> Result<()> {
        let target_host = self.host.as_deref().unwrap_or(sni_host);
        let ip = self.resolve.resolve(target_host).await?;

        let dst_addr = (ip, self.port);
        let mut dst = timeout(DIAL_TIMEOUT, TcpStream::connect(dst_addr))
            .await
            .map_err(|_| ProxyError::Network(std::io::Error::new(std::io::ErrorKind::TimedOut, "raw_pass dial timed out")))?
            .map_err(ProxyError::Network)?;

        debug!(target = %target_host, dst = %format!("{}:{}", ip, self.port), "raw_pass dialed");

        dst.write_all(hello_bytes).await.map_err(ProxyError::Network)?;

        // The client half (`src`) needs to be handed off whole; shutting
        // it down on error is the caller's responsibility once this
        // returns.
        let _ = src.set_nodelay(true);
        splice_bidirectional(src, dst).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_defaults_to_sni_host_when_no_override() {
        let target = RawPassTarget {
            host: None,
            port: 443,
            resolve: Arc::new(Resolve::new(
                Arc::new(crate::dns::overlay::StaticOverlay::new()),
                Arc::new(NoopResolver),
            )),
        };
        assert_eq!(target.host.as_deref().unwrap_or("sni.example"), "sni.example");
    }

    struct NoopResolver;

    #[async_trait::async_trait]
    impl crate::dns::resolver::Resolver for NoopResolver {
        async fn resolve_a(&self, _name: &str) -> Result<Vec<std::net::Ipv4Addr>> {
            Err(ProxyError::Resolution("noop".into()))
        }
    }
}
