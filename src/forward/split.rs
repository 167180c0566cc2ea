//! `split_pass`: fragment the ClientHello across multiple single-byte
//! writes with linear inter-byte pacing, retrying up to three times with
//! linearly increasing read deadlines. Intended to break DPI that matches
//! the SNI as a contiguous keyword in one TCP segment.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, timeout, Instant};
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};
use crate::forward::splice_bidirectional;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const TOTAL_ATTEMPTS: u32 = 3;
const INTER_BYTE_STEP: Duration = Duration::from_millis(3);

#[derive(Clone)]
pub struct SplitPassTarget;

impl SplitPassTarget {
    pub async fn run(&self, mut src: TcpStream, sni_host: &str, hello_bytes: &[u8]) -> Result<()> {
        let target = format!("{sni_host}:443");

        for retry in 0..TOTAL_ATTEMPTS {
            match self.attempt(&target, hello_bytes, retry).await {
                Ok((dst, prefetched)) => {
                    let _ = src.set_nodelay(true);
                    src.write_all(&prefetched).await.map_err(ProxyError::Network)?;
                    return splice_bidirectional(src, dst).await;
                }
                Err(e) => {
                    debug!(attempt = retry, error = %e, "split_pass attempt failed");
                }
            }
        }

        warn!(sni = %sni_host, "split_pass exhausted all retries");
        Err(ProxyError::Network(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "split_pass exhausted all retries",
        )))
    }

    /// One attempt: dial, fragment-write `hello_bytes` with a `retry *
    /// 3ms` inter-byte gap scheduled on absolute deadlines (so jitter
    /// from one write doesn't accumulate into the next), then wait up to
    /// `(retry+1)` seconds for the first response bytes. On success the
    /// already-read response bytes are replayed into the client before
    /// the caller splices the rest bidirectionally.
    async fn attempt(&self, target: &str, hello_bytes: &[u8], retry: u32) -> Result<(TcpStream, Vec<u8>)> {
        let mut dst = timeout(DIAL_TIMEOUT, TcpStream::connect(target))
            .await
            .map_err(|_| ProxyError::Network(std::io::Error::new(std::io::ErrorKind::TimedOut, "split_pass dial timed out")))?
            .map_err(ProxyError::Network)?;

        // Nagle's algorithm would coalesce the per-byte writes below back
        // into a single segment, defeating the fragmentation this verb
        // exists to do.
        dst.set_nodelay(true).map_err(ProxyError::Network)?;

        let delay = INTER_BYTE_STEP * retry;
        let t0 = Instant::now();

        for (i, byte) in hello_bytes.iter().enumerate() {
            if delay > Duration::ZERO {
                let deadline = t0 + delay * i as u32;
                time::sleep_until(deadline).await;
            }
            dst.write_all(std::slice::from_ref(byte)).await.map_err(ProxyError::Network)?;
        }

        let read_timeout = Duration::from_secs((retry + 1) as u64);
        let mut buf = vec![0u8; 8192];
        let n = timeout(read_timeout, dst.read(&mut buf))
            .await
            .map_err(|_| ProxyError::Network(std::io::Error::new(std::io::ErrorKind::TimedOut, "split_pass server response timed out")))?
            .map_err(ProxyError::Network)?;

        if n == 0 {
            return Err(ProxyError::Network(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "split_pass upstream closed before responding",
            )));
        }

        buf.truncate(n);
        Ok((dst, buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inter_byte_delay_is_linear_in_retry() {
        assert_eq!(INTER_BYTE_STEP * 0, Duration::ZERO);
        assert_eq!(INTER_BYTE_STEP * 1, Duration::from_millis(3));
        assert_eq!(INTER_BYTE_STEP * 2, Duration::from_millis(6));
    }
}
