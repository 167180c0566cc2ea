//! TLS listener (component G): accept loop, ClientHello sniff, suffix
//! dispatch into the forwarding engine. Every accepted connection runs
//! in its own task; this module never terminates TLS itself.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace, warn, Instrument};

use crate::error::Result;
use crate::forward::{ConnectProxyTarget, RawPassTarget, Socks5Target, SplitPassTarget};
use crate::rule::compiler::ProxyPassSpec;
use crate::rule::suffix::SuffixRouter;
use crate::tls::hello::{self, DEFAULT_MAX_SNIFF_BYTES, DEFAULT_SNIFF_TIMEOUT};

/// A compiled TLS rule action, ready to run against an accepted
/// connection once its SNI has been sniffed.
#[derive(Clone)]
pub enum TlsAction {
    RawPass(RawPassTarget),
    ConnectProxy(ConnectProxyTarget),
    Socks5(Socks5Target),
    Split(SplitPassTarget),
}

impl TlsAction {
    pub fn raw_pass(host: Option<String>, port: u16, resolve: Arc<crate::dns::resolver::Resolve>) -> Self {
        TlsAction::RawPass(RawPassTarget::new(host, port, resolve))
    }

    pub fn split_pass() -> Self {
        TlsAction::Split(SplitPassTarget)
    }

    pub fn from_proxy_pass(spec: ProxyPassSpec) -> Self {
        if spec.socks5 {
            TlsAction::Socks5(Socks5Target {
                host: spec.host,
                port: spec.port,
                username: spec.username,
                password: spec.password,
            })
        } else {
            TlsAction::ConnectProxy(ConnectProxyTarget {
                host: spec.host,
                port: spec.port,
                username: spec.username,
                password: spec.password,
            })
        }
    }

    pub async fn run(&self, src: TcpStream, sni_host: &str, hello_bytes: &[u8]) -> Result<()> {
        match self {
            TlsAction::RawPass(t) => t.run(src, sni_host, hello_bytes).await,
            TlsAction::ConnectProxy(t) => t.run(src, sni_host, hello_bytes).await,
            TlsAction::Socks5(t) => t.run(src, sni_host, hello_bytes).await,
            TlsAction::Split(t) => t.run(src, sni_host, hello_bytes).await,
        }
    }
}

pub struct TlsListener {
    listener: TcpListener,
    router: Arc<SuffixRouter<TlsAction>>,
}

impl TlsListener {
    pub async fn bind(addr: &str, router: Arc<SuffixRouter<TlsAction>>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(bind_addr = %listener.local_addr()?, "TLS listener bound");
        Ok(Self { listener, router })
    }

    pub async fn run(self) -> io::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let router = Arc::clone(&self.router);
                    tokio::spawn(
                        async move {
                            if let Err(e) = handle_connection(stream, &router).await {
                                debug!(error = %e, "TLS connection error");
                            }
                        }
                        .instrument(tracing::info_span!("tls_connection", peer = %peer)),
                    );
                }
                Err(e) => {
                    warn!(error = %e, "TLS accept error");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Shared by the TLS listener and the HTTP CONNECT bridge (component H),
/// which hands over an already-hijacked byte stream at this exact point.
pub async fn handle_connection(mut client: TcpStream, router: &SuffixRouter<TlsAction>) -> Result<()> {
    let hello_bytes = hello::read_client_hello(&mut client, DEFAULT_MAX_SNIFF_BYTES, DEFAULT_SNIFF_TIMEOUT).await?;
    let sni = hello::parse_sni(&hello_bytes);

    if sni.is_empty() {
        debug!("no SNI in ClientHello, closing");
        return Ok(());
    }

    let action = match router.lookup(&sni) {
        Some(a) => a,
        None => {
            trace!(sni = %sni, "no TLS rule match, closing");
            return Ok(());
        }
    };

    action.run(client, &sni, &hello_bytes).await
}
