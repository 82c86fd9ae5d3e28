//! End-to-end tests for the happy path: one client, two upstreams, one joke.

use std::time::Duration;

use joke_gateway::Gateway;

mod common;

use common::{MockUpstream, ScriptedResolver, COMPOSED, JOKE_BODY, NAME_BODY};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serves_joke_with_fetched_name() {
    let names = MockUpstream::json(NAME_BODY).await;
    let jokes = MockUpstream::json(JOKE_BODY).await;
    let mut gateway = Gateway::new(common::test_config(names.port(), jokes.port()));
    let addr = gateway.start().unwrap();

    let raw = common::fetch(addr).await;
    let (head, body) = common::split_response(&raw);

    assert!(head.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(head.contains("Content-Type: text/plain\r\n"));
    assert!(head.contains(&format!("Content-Length: {}\r\n", COMPOSED.len())));
    assert!(head.contains("Server: Tigera/WebServer/1.0.0\r\n"));
    assert!(head.contains("\r\nDate: "));
    assert_eq!(body, COMPOSED);

    assert!(gateway.registry().drained(Duration::from_secs(2)).await);
    gateway.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upstreams_receive_fixed_requests() {
    let names = MockUpstream::json(NAME_BODY).await;
    let jokes = MockUpstream::json(JOKE_BODY).await;
    let mut gateway = Gateway::new(common::test_config(names.port(), jokes.port()));
    let addr = gateway.start().unwrap();

    common::fetch(addr).await;

    let name_requests = names.requests();
    assert_eq!(name_requests.len(), 1);
    assert!(name_requests[0].starts_with("GET /api/ HTTP/1.1\r\n"));
    assert!(name_requests[0].contains("Host: names.test\r\n"));
    assert!(name_requests[0].contains("User-Agent: Tigera/WebService/1.0.0\r\n"));

    let joke_requests = jokes.requests();
    assert_eq!(joke_requests.len(), 1);
    assert!(joke_requests[0]
        .starts_with("GET /jokes/random?firstName=Eduardo&lastName=Panisset&limitTo=[nerdy] HTTP/1.1\r\n"));
    assert!(joke_requests[0].contains("Host: jokes.test\r\n"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn off_the_shelf_client_reads_joke() {
    let names = MockUpstream::json(NAME_BODY).await;
    let jokes = MockUpstream::json(JOKE_BODY).await;
    let mut gateway = Gateway::new(common::test_config(names.port(), jokes.port()));
    let addr = gateway.start().unwrap();

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let response = client.get(format!("http://{addr}/any/path")).send().await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap().to_str().unwrap(),
        "text/plain"
    );
    assert_eq!(response.text().await.unwrap(), COMPOSED);
    gateway.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chunked_upstream_bodies_are_decoded() {
    let names = MockUpstream::chunked(NAME_BODY, 7).await;
    let jokes = MockUpstream::chunked(JOKE_BODY, 16).await;
    let mut gateway = Gateway::new(common::test_config(names.port(), jokes.port()));
    let addr = gateway.start().unwrap();

    let raw = common::fetch(addr).await;
    assert_eq!(common::split_response(&raw).1, COMPOSED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_delimited_upstream_body_completes_on_eof() {
    let names = MockUpstream::start(common::Behavior::Respond(format!(
        "HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n{NAME_BODY}"
    )))
    .await;
    let jokes = MockUpstream::json(JOKE_BODY).await;
    let mut gateway = Gateway::new(common::test_config(names.port(), jokes.port()));
    let addr = gateway.start().unwrap();

    let raw = common::fetch(addr).await;
    assert_eq!(common::split_response(&raw).1, COMPOSED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn joke_without_placeholders_is_returned_verbatim() {
    let names = MockUpstream::json(NAME_BODY).await;
    let jokes = MockUpstream::json(r#"{"type":"success","value":{"id":1,"joke":"Nobody is named here."}}"#).await;
    let mut gateway = Gateway::new(common::test_config(names.port(), jokes.port()));
    let addr = gateway.start().unwrap();

    let raw = common::fetch(addr).await;
    assert_eq!(common::split_response(&raw).1, "Nobody is named here.");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn injected_resolver_is_used() {
    let names = MockUpstream::json(NAME_BODY).await;
    let jokes = MockUpstream::json(JOKE_BODY).await;
    let mut config = common::test_config(names.port(), jokes.port());
    config.dns.static_hosts.clear();
    let mut gateway = Gateway::with_resolver(config, ScriptedResolver::localhost().shared());
    let addr = gateway.start().unwrap();

    let raw = common::fetch(addr).await;
    assert_eq!(common::split_response(&raw).1, COMPOSED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn workers_share_listening_port() {
    let names = MockUpstream::json(NAME_BODY).await;
    let jokes = MockUpstream::json(JOKE_BODY).await;
    let mut config = common::test_config(names.port(), jokes.port());
    config.listener.workers = 3;
    let mut gateway = Gateway::new(config);
    let addr = gateway.start().unwrap();
    assert_eq!(gateway.running_workers(), 3);

    for _ in 0..6 {
        let raw = common::fetch(addr).await;
        assert_eq!(common::split_response(&raw).1, COMPOSED);
    }
    assert!(gateway.registry().drained(Duration::from_secs(2)).await);
    gateway.stop();
    assert_eq!(gateway.running_workers(), 0);
}
