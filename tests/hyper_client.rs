//! Interoperability with an independent HTTP/1.1 client

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use pylon::config::Config;
use pylon::handlers::default_router;
use pylon::server::Server;

#[tokio::test]
async fn test_hyper_client_keep_alive() {
    let root = tempfile::TempDir::new().unwrap();
    std::fs::write(root.path().join("index.html"), "<h1>hi</h1>").unwrap();

    let mut config = Config::default();
    config.listen.address = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.listen.port = 0;

    let router = default_router(root.path(), None).unwrap();
    let server = Server::bind(config, router).await.unwrap();
    let addr = server.local_addr();
    let handle = server.shutdown_handle();
    let task = tokio::spawn(server.run());

    let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build_http();

    let post = hyper::Request::post(format!("http://{addr}/kv"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Full::new(Bytes::from_static(b"greeting=hello+world")))
        .unwrap();
    let response = client.request(post).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), b"stored 1");

    // same pooled connection
    let get = hyper::Request::get(format!("http://{addr}/kv/greeting"))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = client.request(get).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), b"hello world");

    let get = hyper::Request::get(format!("http://{addr}/"))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = client.request(get).await.unwrap();
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/html; charset=utf-8"
    );
    assert!(response.headers().contains_key("etag"));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), b"<h1>hi</h1>");

    let missing = hyper::Request::get(format!("http://{addr}/missing.txt"))
        .body(Full::new(Bytes::new()))
        .unwrap();
    assert_eq!(client.request(missing).await.unwrap().status(), 404);

    drop(client);
    handle.shutdown();
    let report = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.requests_served, 4);
}
