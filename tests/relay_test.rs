use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_relay::client::{ChatClient, ClientExit};
use chat_relay::common::config::ServerConfig;
use chat_relay::common::messages::{ClientId, REJECTION_NOTICE};
use chat_relay::server::{ChatServer, ConnectionRegistry, InMemoryRegistry, PeerHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

fn loopback_config(max_clients: Option<usize>) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.address = "127.0.0.1:0".to_string();
    config.server.max_clients = max_clients;
    config
}

async fn serve_in_background(server: &ChatServer) -> (u16, JoinHandle<()>) {
    let listener = server.bind().await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let serving = server.clone();
    let handle = tokio::spawn(async move { serving.serve(listener).await });
    (port, handle)
}

async fn start_server(max_clients: Option<usize>) -> (ChatServer, u16, JoinHandle<()>) {
    let server = ChatServer::new(loopback_config(max_clients));
    let (port, handle) = serve_in_background(&server).await;
    (server, port, handle)
}

/// Registry that counts how the server uses it.
#[derive(Default)]
struct RecordingRegistry {
    inner: InMemoryRegistry,
    adds: AtomicUsize,
    removes: AtomicUsize,
    snapshots: AtomicUsize,
}

impl ConnectionRegistry for RecordingRegistry {
    fn add(&self, peer: Arc<PeerHandle>) -> chat_relay::error::Result<()> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.inner.add(peer)
    }

    fn remove(&self, id: ClientId) -> Option<Arc<PeerHandle>> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(id)
    }

    fn snapshot(&self, excluding: ClientId) -> Vec<Arc<PeerHandle>> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        self.inner.snapshot(excluding)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

async fn wait_for_connections(server: &ChatServer, expected: usize) {
    for _ in 0..200 {
        if server.connection_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} connections, server has {}",
        expected,
        server.connection_count()
    );
}

/// Connect and wait until the server has registered the new connection.
async fn join(server: &ChatServer, port: u16) -> TcpStream {
    let before = server.connection_count();
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    wait_for_connections(server, before + 1).await;
    stream
}

async fn expect_message(stream: &mut (impl AsyncReadExt + Unpin), expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for broadcast")
        .unwrap();
    assert_eq!(
        String::from_utf8_lossy(&buf),
        String::from_utf8_lossy(expected)
    );
}

async fn expect_silence(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_millis(100), stream.read(&mut buf)).await;
    assert!(read.is_err(), "unexpected data: {:?}", read);
}

#[tokio::test]
async fn test_message_reaches_peer_but_not_sender() {
    let (server, port, _handle) = start_server(None).await;
    let mut a = join(&server, port).await;
    let mut b = join(&server, port).await;

    a.write_all(b"hello").await.unwrap();

    expect_message(&mut b, b"[Client 1]: hello").await;
    expect_silence(&mut a).await;
}

#[tokio::test]
async fn test_client_session_end_to_end() {
    let (server, port, _handle) = start_server(None).await;
    let mut c1 = join(&server, port).await;

    let c2 = ChatClient::connect("127.0.0.1", port).await.unwrap();
    wait_for_connections(&server, 2).await;

    let (mut keyboard, input) = tokio::io::duplex(256);
    let (output, mut screen) = tokio::io::duplex(256);
    let c2_task = tokio::spawn(c2.run(BufReader::new(input), output));

    c1.write_all(b"hello").await.unwrap();
    expect_message(&mut screen, b"[Client 1]: hello\n").await;

    keyboard.write_all(b"exit\n").await.unwrap();
    let exit = tokio::time::timeout(Duration::from_secs(2), c2_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(exit, ClientExit::UserExit);
    wait_for_connections(&server, 1).await;

    // C1 keeps working with a newcomer
    let mut c3 = join(&server, port).await;
    c1.write_all(b"still here").await.unwrap();
    expect_message(&mut c3, b"[Client 1]: still here").await;
}

#[tokio::test]
async fn test_abrupt_disconnect_does_not_block_others() {
    let (server, port, _handle) = start_server(None).await;
    let mut a = join(&server, port).await;
    let b = join(&server, port).await;
    let mut c = join(&server, port).await;

    drop(b);
    a.write_all(b"ping").await.unwrap();

    expect_message(&mut c, b"[Client 1]: ping").await;
    wait_for_connections(&server, 2).await;
}

#[tokio::test]
async fn test_full_server_rejects_explicitly() {
    let (server, port, _handle) = start_server(Some(1)).await;
    let mut a = join(&server, port).await;

    let mut rejected = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), rejected.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, REJECTION_NOTICE);
    assert_eq!(server.connection_count(), 1);

    // A freed slot is usable again
    a.shutdown().await.unwrap();
    drop(a);
    wait_for_connections(&server, 0).await;
    let mut x = join(&server, port).await;
    let mut y = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut notice = Vec::new();
    y.read_to_end(&mut notice).await.unwrap();
    assert_eq!(notice, REJECTION_NOTICE);
    expect_silence(&mut x).await;
}

#[tokio::test]
async fn test_identities_are_distinct() {
    let (server, port, _handle) = start_server(None).await;
    let mut a = join(&server, port).await;
    let mut b = join(&server, port).await;
    let mut c = join(&server, port).await;

    a.write_all(b"from a").await.unwrap();
    expect_message(&mut c, b"[Client 1]: from a").await;
    expect_message(&mut b, b"[Client 1]: from a").await;

    b.write_all(b"from b").await.unwrap();
    expect_message(&mut c, b"[Client 2]: from b").await;
    expect_message(&mut a, b"[Client 2]: from b").await;
}

#[tokio::test]
async fn test_servers_are_independent() {
    let (first, first_port, _h1) = start_server(None).await;
    let (second, second_port, _h2) = start_server(None).await;

    let mut a = join(&first, first_port).await;
    let mut b = join(&second, second_port).await;
    let mut b2 = join(&second, second_port).await;

    assert_eq!(first.connection_count(), 1);
    assert_eq!(second.connection_count(), 2);

    b.write_all(b"second only").await.unwrap();
    expect_message(&mut b2, b"[Client 1]: second only").await;
    expect_silence(&mut a).await;
}

#[tokio::test]
async fn test_shutdown_closes_every_session() {
    let (server, port, handle) = start_server(None).await;
    let mut a = join(&server, port).await;
    let mut b = join(&server, port).await;

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("serve did not return after shutdown")
        .unwrap();

    assert_eq!(server.connection_count(), 0);
    for stream in [&mut a, &mut b] {
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}

#[tokio::test]
async fn test_injected_registry_drives_broadcasts() {
    let registry = Arc::new(RecordingRegistry::default());
    let server = ChatServer::with_registry(loopback_config(None), registry.clone());
    let (port, _handle) = serve_in_background(&server).await;

    let mut a = join(&server, port).await;
    let mut b = join(&server, port).await;
    assert_eq!(registry.adds.load(Ordering::SeqCst), 2);

    a.write_all(b"through the registry").await.unwrap();
    expect_message(&mut b, b"[Client 1]: through the registry").await;
    assert_eq!(registry.snapshots.load(Ordering::SeqCst), 1);

    drop(b);
    wait_for_connections(&server, 1).await;
    assert_eq!(registry.removes.load(Ordering::SeqCst), 1);
    expect_silence(&mut a).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_with_peer_that_never_reads() {
    let (server, port, handle) = start_server(None).await;
    let mut flooder = join(&server, port).await;
    let _idle = join(&server, port).await;

    // Fill every buffer between the server and the idle peer
    let chunk = [b'z'; 1024];
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        while flooder.write_all(&chunk).await.is_ok() {}
    })
    .await;

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("serve did not return while a broadcast was stalled")
        .unwrap();
    assert_eq!(server.connection_count(), 0);
}
