//! End-to-end scenarios: static overlay precedence over upstream
//! resolution, and DoH POST resolution against a (local, stand-in)
//! DNS-over-HTTPS endpoint speaking the RFC 8484 wire format.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use pnproxy::dns::overlay::StaticOverlay;
use pnproxy::dns::resolver::{Resolve, Resolver};
use pnproxy::dns::transport::DohPostResolver;
use pnproxy::dns::wire;

struct AlwaysFails;

#[async_trait::async_trait]
impl Resolver for AlwaysFails {
    async fn resolve_a(&self, name: &str) -> pnproxy::Result<Vec<Ipv4Addr>> {
        Err(pnproxy::ProxyError::Resolution(format!("no upstream reachable for '{name}' in test")))
    }
}

#[tokio::test]
async fn static_overlay_wins_on_closest_registered_suffix() {
    let overlay = Arc::new(StaticOverlay::new());
    overlay.register("github.com", vec![Ipv4Addr::new(1, 2, 3, 4)]);
    let resolve = Resolve::new(overlay, Arc::new(AlwaysFails));

    // api.github.com is not registered itself, but falls within the
    // registered ".github.com." suffix, so the overlay answers directly
    // and the (failing) upstream is never consulted.
    let ip = resolve.resolve("api.github.com").await.unwrap();
    assert_eq!(ip, Ipv4Addr::new(1, 2, 3, 4));
}

#[tokio::test]
async fn unregistered_domain_falls_through_to_upstream() {
    let overlay = Arc::new(StaticOverlay::new());
    overlay.register("github.com", vec![Ipv4Addr::new(1, 2, 3, 4)]);
    let resolve = Resolve::new(overlay, Arc::new(AlwaysFails));

    let err = resolve.resolve("totally-unrelated.example").await.unwrap_err();
    assert!(matches!(err, pnproxy::ProxyError::Resolution(_)));
}

/// Minimal RFC 8484 POST endpoint: reads one request, decodes the
/// dns-message body just enough to learn the query id, and replies with
/// a synthetic `A` answer for whatever name it was asked about.
async fn run_mock_doh_server(listener: TcpListener, addr: Ipv4Addr) {
    let (mut conn, _) = listener.accept().await.unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        conn.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") {
            break;
        }
    }

    let head_text = String::from_utf8_lossy(&head);
    let content_length: usize = head_text
        .lines()
        .find_map(|l| l.to_ascii_lowercase().starts_with("content-length:").then(|| l.split(':').nth(1).unwrap().trim().parse().unwrap()))
        .unwrap_or(0);

    let mut query_body = vec![0u8; content_length];
    conn.read_exact(&mut query_body).await.unwrap();
    let (id, qname, _qtype) = wire::peek_query_name(&query_body).unwrap();

    let answer = wire::build_a_response(&qname, id, &[addr], 300).unwrap();

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/dns-message\r\nContent-Length: {}\r\n\r\n",
        answer.len()
    );
    conn.write_all(response.as_bytes()).await.unwrap();
    conn.write_all(&answer).await.unwrap();
}

#[tokio::test]
async fn doh_post_resolver_decodes_wire_format_answer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let expected = Ipv4Addr::new(140, 82, 112, 3);

    let server = tokio::spawn(run_mock_doh_server(listener, expected));

    let resolver = DohPostResolver::new(format!("http://{addr}/dns-query"));
    let answers = resolver.resolve_a("github.com").await.unwrap();

    assert_eq!(answers, vec![expected]);
    server.await.unwrap();
}
