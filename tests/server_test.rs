//! End-to-end tests against a bound server

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use pylon::config::Config;
use pylon::handlers::{Echo, KvHandler, MemoryStore, StaticFiles, Store};
use pylon::http::{Handler, Method, PathMatcher, Router};
use pylon::server::{LifecycleState, Server, ServerReport, ShutdownHandle};

struct TestServer {
    addr: SocketAddr,
    handle: ShutdownHandle,
    task: JoinHandle<pylon::Result<ServerReport>>,
    store: Arc<MemoryStore>,
    _root: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(Config::default()).await
    }

    async fn start_with(mut config: Config) -> Self {
        config.listen.address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.listen.port = 0;

        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("index.html"), "hi").unwrap();

        let store = Arc::new(MemoryStore::new());
        let kv: Arc<dyn Handler> = Arc::new(KvHandler::new(store.clone(), "/kv"));
        let router = Router::new()
            .route_shared(Method::Get, PathMatcher::Prefix("/kv".into()), kv.clone())
            .route_shared(Method::Post, PathMatcher::Exact("/kv".into()), kv)
            .route(Method::Post, PathMatcher::Exact("/echo".into()), Echo)
            .route(Method::Get, PathMatcher::Prefix("/".into()), StaticFiles::new(root.path()));

        let server = Server::bind(config, router).await.unwrap();
        let addr = server.local_addr();
        let handle = server.shutdown_handle();
        let task = tokio::spawn(server.run());

        Self {
            addr,
            handle,
            task,
            store,
            _root: root,
        }
    }

    async fn stop(self) -> ServerReport {
        self.handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap()
    }
}

/// Send raw bytes, half-close, and read until the server closes
async fn roundtrip(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("response timed out")
        .unwrap();
    String::from_utf8(response).unwrap()
}

/// Read until the peer closes, treating a reset as a close
async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return buf,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

#[tokio::test]
async fn test_get_static_index() {
    let server = TestServer::start().await;

    let response = roundtrip(server.addr, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Length: 2\r\n"));
    assert!(response.ends_with("\r\n\r\nhi"));

    server.stop().await;
}

#[tokio::test]
async fn test_unsupported_method_is_400() {
    let server = TestServer::start().await;

    let response = roundtrip(server.addr, b"DELETE /x HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    server.stop().await;
}

#[tokio::test]
async fn test_post_kv_then_get() {
    let server = TestServer::start().await;

    let response = roundtrip(
        server.addr,
        b"POST /kv HTTP/1.1\r\nContent-Length: 11\r\n\r\nkey1=value1",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(server.store.get("key1").unwrap().as_deref(), Some("value1"));

    let response = roundtrip(server.addr, b"GET /kv/key1 HTTP/1.1\r\n\r\n").await;
    assert!(response.ends_with("value1"));

    server.stop().await;
}

#[tokio::test]
async fn test_pipelined_requests_in_order() {
    let server = TestServer::start().await;

    let response = roundtrip(
        server.addr,
        b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nfirstPOST /echo HTTP/1.1\r\nContent-Length: 6\r\n\r\nsecond",
    )
    .await;

    assert_eq!(response.matches("HTTP/1.1 200 OK").count(), 2);
    let first = response.find("first").unwrap();
    let second = response.find("second").unwrap();
    assert!(first < second);

    let report = server.stop().await;
    assert_eq!(report.requests_served, 2);
}

#[tokio::test]
async fn test_request_split_across_segments() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    for part in [&b"GE"[..], b"T / HTT", b"P/1.1\r\n", b"Host: x\r", b"\n\r\n"] {
        stream.write_all(part).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    stream.shutdown().await.unwrap();

    let response = String::from_utf8(read_until_closed(&mut stream).await).unwrap();
    assert!(response.ends_with("\r\n\r\nhi"));

    server.stop().await;
}

#[tokio::test]
async fn test_connection_ceiling_rejects_without_bytes() {
    let mut config = Config::default();
    config.limits.max_connections = 1;
    let server = TestServer::start_with(config).await;

    // hold the only slot with a served, still-open connection
    let mut first = TcpStream::connect(server.addr).await.unwrap();
    first.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let mut buf = [0u8; 256];
    let n = first.read(&mut buf).await.unwrap();
    assert!(n > 0);

    let mut second = TcpStream::connect(server.addr).await.unwrap();
    let _ = second.write_all(b"GET / HTTP/1.1\r\n\r\n").await;
    let rejected = tokio::time::timeout(Duration::from_secs(5), read_until_closed(&mut second))
        .await
        .expect("rejected connection left hanging");
    assert!(rejected.is_empty());

    // the existing connection is unaffected
    first.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let n = first.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200 OK"));
    drop(first);

    let report = server.stop().await;
    assert_eq!(report.rejected, 1);
}

#[tokio::test]
async fn test_malformed_request_closes_connection() {
    let server = TestServer::start().await;

    let response = roundtrip(server.addr, b"BROKEN\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(response.contains("Connection: close\r\n"));

    server.stop().await;
}

#[tokio::test]
async fn test_oversized_header_closes_without_response() {
    let mut config = Config::default();
    config.limits.max_header_size = 8192;
    let server = TestServer::start_with(config).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let mut request = b"GET / HTTP/1.1\r\nX-Fill: ".to_vec();
    request.resize(8193, b'a');
    let _ = stream.write_all(&request).await;

    let response = tokio::time::timeout(Duration::from_secs(5), read_until_closed(&mut stream))
        .await
        .expect("oversized frame left hanging");
    assert!(response.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_http10_status_line() {
    let server = TestServer::start().await;

    let response = roundtrip(server.addr, b"GET / HTTP/1.0\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));

    server.stop().await;
}

#[tokio::test]
async fn test_drain_closes_idle_connections() {
    let server = TestServer::start().await;

    let mut idle = TcpStream::connect(server.addr).await.unwrap();
    idle.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let mut buf = [0u8; 256];
    assert!(idle.read(&mut buf).await.unwrap() > 0);

    let mut handle = server.handle.clone();
    let report = server.stop().await;
    handle.stopped().await;

    assert_eq!(handle.state(), LifecycleState::Stopped);
    assert_eq!(report.aborted, 0);
    assert!(read_until_closed(&mut idle).await.is_empty());
}
