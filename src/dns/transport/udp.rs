//! Plain UDP/53 upstream transport.
//!
//! Builds a standard DNS query (`RD=1`, one `A` question), dials UDP to
//! `server:53`, and parses the answer. No retry — failure bubbles up to
//! the caller.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::dns::resolver::Resolver;
use crate::dns::wire;
use crate::error::{ProxyError, Result};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct UdpResolver {
    server: String,
}

impl UdpResolver {
    pub fn new(server: impl Into<String>) -> Self {
        Self { server: server.into() }
    }

    fn server_addr(&self) -> String {
        if self.server.contains(':') {
            self.server.clone()
        } else {
            format!("{}:53", self.server)
        }
    }
}

#[async_trait]
impl Resolver for UdpResolver {
    async fn resolve_a(&self, name: &str) -> Result<Vec<Ipv4Addr>> {
        let query = wire::build_a_query(&format!("{}.", name.trim_end_matches('.')), rand_id())?;

        let exchange = async {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect(self.server_addr()).await?;
            socket.send(&query).await?;

            let mut buf = [0u8; 512];
            let n = socket.recv(&mut buf).await?;
            Ok::<Vec<u8>, std::io::Error>(buf[..n].to_vec())
        };

        let answer = timeout(DIAL_TIMEOUT, exchange)
            .await
            .map_err(|_| ProxyError::Resolution(format!("UDP DNS query to '{}' timed out", self.server)))?
            .map_err(ProxyError::Network)?;

        wire::parse_a_answers(&answer)
    }
}

fn rand_id() -> u16 {
    rand::random()
}
