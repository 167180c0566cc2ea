//! Forwarding engine (component F): `raw_pass`, `proxy_pass` (HTTP CONNECT
//! or SOCKS5 upstream chaining), and `split_pass` (TCP-level fragmentation
//! to dodge SNI-keyword DPI).
//!
//! Every strategy is handed the already-sniffed `hello_bytes` plus the
//! client socket and returns only once both halves of the bidirectional
//! copy have finished — matching the ingress proxy's splice shape, just
//! with the destination resolved a different way per verb.

pub mod connect_proxy;
pub mod raw;
pub mod socks5;
pub mod split;

pub use connect_proxy::ConnectProxyTarget;
pub use raw::RawPassTarget;
pub use socks5::Socks5Target;
pub use split::SplitPassTarget;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::Result;

/// Splice two already-connected TCP streams bidirectionally, consuming
/// both. `src → dst` runs on a spawned task; `dst → src` is copied
/// inline. Returns once either half hits EOF or an error — the deferred
/// shutdown on the other stream unblocks whichever half is still
/// running, so this always returns once both sides have terminated.
pub async fn splice_bidirectional(src: TcpStream, dst: TcpStream) -> Result<()> {
    let (mut src_read, src_write) = src.into_split();
    let (dst_read, mut dst_write) = dst.into_split();

    let client_to_dst = tokio::spawn(async move {
        let mut buf = vec![0u8; 8192];
        loop {
            match src_read.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if dst_write.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = dst_write.shutdown().await;
    });

    let mut dst_read = dst_read;
    let mut src_write = src_write;
    let mut buf = vec![0u8; 8192];
    loop {
        match dst_read.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if src_write.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = src_write.shutdown().await;

    // The inline half (dst -> src) has finished; the spawned half may
    // still be blocked reading from a client that never closes its
    // write side. Abort it so the connection's resources are freed as
    // soon as one direction is done, matching the deferred-close
    // behavior of the reference splice.
    client_to_dst.abort();

    Ok(())
}
