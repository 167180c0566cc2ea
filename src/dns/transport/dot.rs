//! DNS-over-TLS (RFC 7858) upstream transport.
//!
//! Same DNS wire format as UDP, but carried over a TLS-wrapped TCP
//! connection to `server:853`, length-prefixed per the TCP DNS framing
//! (`RFC 1035 §4.2.2`).

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{rustls, TlsConnector};

use crate::dns::resolver::Resolver;
use crate::dns::wire;
use crate::error::{ProxyError, Result};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DotResolver {
    server: String,
    sni: String,
    connector: TlsConnector,
}

impl DotResolver {
    pub fn new(server: impl Into<String>, sni: impl Into<String>) -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            server: server.into(),
            sni: sni.into(),
            connector: TlsConnector::from(Arc::new(config)),
        }
    }

    fn server_addr(&self) -> String {
        if self.server.contains(':') {
            self.server.clone()
        } else {
            format!("{}:853", self.server)
        }
    }
}

#[async_trait]
impl Resolver for DotResolver {
    async fn resolve_a(&self, name: &str) -> Result<Vec<Ipv4Addr>> {
        let query = wire::build_a_query(&format!("{}.", name.trim_end_matches('.')), rand::random())?;

        let exchange = async {
            let tcp = TcpStream::connect(self.server_addr()).await?;
            let server_name = ServerName::try_from(self.sni.clone())
                .map_err(|_| std::io::Error::other("invalid DoT SNI hostname"))?;
            let mut tls = self
                .connector
                .connect(server_name, tcp)
                .await?;

            let len = (query.len() as u16).to_be_bytes();
            tls.write_all(&len).await?;
            tls.write_all(&query).await?;

            let mut len_buf = [0u8; 2];
            tls.read_exact(&mut len_buf).await?;
            let resp_len = u16::from_be_bytes(len_buf) as usize;
            let mut resp = vec![0u8; resp_len];
            tls.read_exact(&mut resp).await?;
            Ok::<Vec<u8>, std::io::Error>(resp)
        };

        let answer = timeout(DIAL_TIMEOUT, exchange)
            .await
            .map_err(|_| ProxyError::Resolution(format!("DoT query to '{}' timed out", self.server)))?
            .map_err(ProxyError::Network)?;

        wire::parse_a_answers(&answer)
    }
}
