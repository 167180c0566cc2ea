//! DNS listener: binds `dns.listen` (UDP) and answers queries per the
//! same suffix-rule model used by the TLS/HTTP listeners.

use std::net::Ipv4Addr;
use std::sync::Arc;

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;
use rand::seq::IndexedRandom;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::dns::resolver::Resolve;
use crate::dns::wire;
use crate::rule::suffix::SuffixRouter;

/// A compiled DNS rule action: answer from a fixed address pool directly
/// (the suffix router has already matched the queried domain to this
/// rule, so no further lookup is needed), or forward to the configured
/// upstream resolver.
#[derive(Clone)]
pub enum DnsAction {
    Static(Arc<Vec<Ipv4Addr>>),
    Forward(Arc<Resolve>),
}

pub struct DnsListener {
    socket: Arc<UdpSocket>,
    router: Arc<SuffixRouter<DnsAction>>,
}

impl DnsListener {
    pub async fn bind(
        addr: &str,
        router: Arc<SuffixRouter<DnsAction>>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            router,
        })
    }

    pub async fn run(self) -> std::io::Result<()> {
        let mut buf = vec![0u8; 4096];
        loop {
            let (n, peer) = self.socket.recv_from(&mut buf).await?;
            let query = buf[..n].to_vec();
            let router = Arc::clone(&self.router);
            let socket = Arc::clone(&self.socket);

            // Each query is answered independently; nothing here blocks
            // the accept loop on a slow upstream.
            tokio::spawn(async move {
                let response = handle_query(&router, &query).await;
                if let Some(resp) = response {
                    if let Err(e) = socket.send_to(&resp, peer).await {
                        warn!(peer = %peer, error = %e, "failed to send DNS response");
                    }
                }
            });
        }
    }
}

async fn handle_query(router: &SuffixRouter<DnsAction>, query: &[u8]) -> Option<Vec<u8>> {
    let (id, qname, qtype) = match wire::peek_query_name(query) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "malformed DNS query");
            return Some(wire::build_error_response(0, ResponseCode::FormErr));
        }
    };

    let domain = qname.trim_end_matches('.');

    // This resolver only ever answers A records; AAAA gets an empty
    // NOERROR rather than NXDOMAIN, since the name isn't absent, it just
    // has no IPv6 address here.
    if qtype == RecordType::AAAA {
        trace!(name = %domain, "AAAA query, answering empty (IPv4-only)");
        return wire::build_empty_response(&qname, id, qtype).ok();
    }

    let action = match router.lookup(domain) {
        Some(a) => a,
        None => {
            trace!(name = %domain, "no DNS rule match");
            return Some(wire::build_error_response(id, ResponseCode::NXDomain));
        }
    };

    let addrs: Vec<Ipv4Addr> = match action {
        DnsAction::Static(pool) => match pool.choose(&mut rand::rng()) {
            Some(addr) => vec![*addr],
            None => return Some(wire::build_error_response(id, ResponseCode::NXDomain)),
        },
        DnsAction::Forward(resolve) => match resolve.resolve(domain).await {
            Ok(addr) => vec![addr],
            Err(e) => {
                warn!(name = %domain, error = %e, "DNS resolution failed");
                return Some(wire::build_error_response(id, ResponseCode::ServFail));
            }
        },
    };

    wire::build_a_response(&qname, id, &addrs, 300).ok()
}
