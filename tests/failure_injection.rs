//! Failure injection tests: every peer failure closes the client connection
//! without a response and frees the session.

use std::time::Duration;

use joke_gateway::Gateway;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

mod common;

use common::{Behavior, MockUpstream, ScriptedResolver, JOKE_BODY, JOKE_HOST, NAME_BODY, NAME_HOST};

async fn assert_closed_silently(gateway: &Gateway) {
    let addr = gateway.local_addr().unwrap();
    assert_eq!(common::fetch(addr).await, "");
    assert!(gateway.registry().drained(Duration::from_secs(2)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lookup_failure_closes_client() {
    let names = MockUpstream::json(NAME_BODY).await;
    let jokes = MockUpstream::json(JOKE_BODY).await;
    let resolver = ScriptedResolver::new()
        .answer(NAME_HOST, common::LOCALHOST)
        .delayed(NAME_HOST, Duration::from_millis(100))
        .fail(JOKE_HOST);
    let mut gateway = Gateway::with_resolver(common::test_config(names.port(), jokes.port()), resolver.shared());
    gateway.start().unwrap();

    assert_closed_silently(&gateway).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    // the cancelled name lookup must not open an upstream connection
    assert!(names.requests().is_empty());
    gateway.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_eof_before_request_frees_session() {
    let mut gateway = Gateway::new(common::test_config(common::refused_port(), common::refused_port()));
    let addr = gateway.start().unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.shutdown().await.unwrap();
    assert_eq!(common::read_until_close(&mut stream).await, "");
    assert!(gateway.registry().drained(Duration::from_secs(2)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn truncated_request_frees_session() {
    let mut gateway = Gateway::new(common::test_config(common::refused_port(), common::refused_port()));
    let addr = gateway.start().unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\nHost: gate").await.unwrap();
    stream.shutdown().await.unwrap();
    assert_eq!(common::read_until_close(&mut stream).await, "");
    assert!(gateway.registry().drained(Duration::from_secs(2)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_client_request_closes() {
    let mut gateway = Gateway::new(common::test_config(common::refused_port(), common::refused_port()));
    let addr = gateway.start().unwrap();

    assert_eq!(common::send_raw(addr, b"\x00\x01garbage\r\n\r\n").await, "");
    assert!(gateway.registry().drained(Duration::from_secs(2)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_json_closes_client() {
    let names = MockUpstream::json("{\"name\": ").await;
    let jokes = MockUpstream::json(JOKE_BODY).await;
    let mut gateway = Gateway::new(common::test_config(names.port(), jokes.port()));
    gateway.start().unwrap();
    assert_closed_silently(&gateway).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_json_shape_closes_client() {
    let names = MockUpstream::json(NAME_BODY).await;
    let jokes = MockUpstream::json(r#"{"type":"success","value":"no joke"}"#).await;
    let mut gateway = Gateway::new(common::test_config(names.port(), jokes.port()));
    gateway.start().unwrap();
    assert_closed_silently(&gateway).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_upstream_closes_client() {
    let jokes = MockUpstream::json(JOKE_BODY).await;
    let mut gateway = Gateway::new(common::test_config(common::refused_port(), jokes.port()));
    gateway.start().unwrap();
    assert_closed_silently(&gateway).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upstream_closing_without_reply_closes_client() {
    let names = MockUpstream::json(NAME_BODY).await;
    let jokes = MockUpstream::start(Behavior::Close).await;
    let mut gateway = Gateway::new(common::test_config(names.port(), jokes.port()));
    gateway.start().unwrap();
    assert_closed_silently(&gateway).await;
    assert_eq!(jokes.requests().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_upstream_times_out() {
    let names = MockUpstream::json(NAME_BODY).await;
    let jokes = MockUpstream::start(Behavior::Hang).await;
    let mut config = common::test_config(names.port(), jokes.port());
    config.timeouts.upstream_idle_secs = 1;
    let mut gateway = Gateway::new(config);
    gateway.start().unwrap();
    assert_closed_silently(&gateway).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_client_times_out() {
    let mut config = common::test_config(common::refused_port(), common::refused_port());
    config.timeouts.client_idle_secs = 1;
    let mut gateway = Gateway::new(config);
    let addr = gateway.start().unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
    assert_eq!(common::read_until_close(&mut stream).await, "");
    assert!(gateway.registry().drained(Duration::from_secs(2)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_request_head_closes() {
    let mut config = common::test_config(common::refused_port(), common::refused_port());
    config.limits.max_header_bytes = 256;
    let mut gateway = Gateway::new(config);
    let addr = gateway.start().unwrap();

    let request = format!("GET / HTTP/1.1\r\nX-Filler: {}\r\n\r\n", "a".repeat(1024));
    assert_eq!(common::send_raw(addr, request.as_bytes()).await, "");
    assert!(gateway.registry().drained(Duration::from_secs(2)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_leaving_mid_lookup_still_drains() {
    let names = MockUpstream::json(NAME_BODY).await;
    let jokes = MockUpstream::json(JOKE_BODY).await;
    let resolver = ScriptedResolver::localhost()
        .delayed(NAME_HOST, Duration::from_millis(200))
        .delayed(JOKE_HOST, Duration::from_millis(200));
    let mut gateway = Gateway::with_resolver(common::test_config(names.port(), jokes.port()), resolver.shared());
    let addr = gateway.start().unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gateway.registry().len(), 1);
    drop(stream);

    assert!(gateway.registry().drained(Duration::from_secs(3)).await);
    gateway.stop();
}
