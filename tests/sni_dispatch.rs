//! End-to-end scenario: a real ClientHello carrying `server_name =
//! example.com` arrives on the TLS listener's accept loop, gets matched
//! against a `raw_pass` rule, and the exact ClientHello bytes land on the
//! mock backend before transparent splicing takes over.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use pnproxy::dns::overlay::StaticOverlay;
use pnproxy::dns::resolver::{Resolve, Resolver};
use pnproxy::rule::suffix::SuffixRouter;
use pnproxy::tls::listener::{handle_connection, TlsAction};

const EXAMPLE_CLIENT_HELLO: &[u8] = &[
    0x16, 0x03, 0x01, 0x00, 0x5f, 0x01, 0x00, 0x00, 0x5b, 0x03, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x2f, 0x01,
    0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x10, 0x00, 0x0e, 0x00, 0x00, 0x0b, b'e', b'x', b'a', b'm',
    b'p', b'l', b'e', b'.', b'c', b'o', b'm', 0x00, 0x15, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

struct AlwaysFails;

#[async_trait::async_trait]
impl Resolver for AlwaysFails {
    async fn resolve_a(&self, _name: &str) -> pnproxy::Result<Vec<Ipv4Addr>> {
        Err(pnproxy::ProxyError::Resolution("no upstream in test".into()))
    }
}

#[tokio::test]
async fn raw_pass_dispatches_by_sni_and_forwards_hello_bytes_unchanged() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let overlay = Arc::new(StaticOverlay::new());
    overlay.register("example.com", vec![Ipv4Addr::LOCALHOST]);
    let resolve = Arc::new(Resolve::new(overlay, Arc::new(AlwaysFails)));

    let router: Arc<SuffixRouter<TlsAction>> = Arc::new(SuffixRouter::new());
    router.register(
        "example.com",
        TlsAction::raw_pass(None, backend_addr.port(), Arc::clone(&resolve)),
    );

    let backend_task = tokio::spawn(async move {
        let (mut conn, _) = backend.accept().await.unwrap();
        let mut received = vec![0u8; EXAMPLE_CLIENT_HELLO.len()];
        conn.read_exact(&mut received).await.unwrap();
        conn.write_all(b"ok").await.unwrap();
        received
    });

    let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client_addr = client_listener.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let (stream, _) = client_listener.accept().await.unwrap();
        handle_connection(stream, &router).await
    });

    let mut client = TcpStream::connect(client_addr).await.unwrap();
    client.write_all(EXAMPLE_CLIENT_HELLO).await.unwrap();

    let mut echoed = [0u8; 2];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ok");

    let received = backend_task.await.unwrap();
    assert_eq!(received, EXAMPLE_CLIENT_HELLO);

    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn unmatched_sni_with_no_default_closes_silently() {
    let router: Arc<SuffixRouter<TlsAction>> = Arc::new(SuffixRouter::new());

    let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client_addr = client_listener.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let (stream, _) = client_listener.accept().await.unwrap();
        handle_connection(stream, &router).await
    });

    let mut client = TcpStream::connect(client_addr).await.unwrap();
    client.write_all(EXAMPLE_CLIENT_HELLO).await.unwrap();
    drop(client);

    server_task.await.unwrap().unwrap();
}
