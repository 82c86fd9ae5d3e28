//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use joke_gateway::config::GatewayConfig;
use joke_gateway::dns::{DnsError, Resolve};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const NAME_HOST: &str = "names.test";
pub const JOKE_HOST: &str = "jokes.test";
pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

pub const NAME_BODY: &str = r#"{"name":"Alice","surname":"Smith","gender":"female","region":"England"}"#;
pub const JOKE_BODY: &str =
    r#"{"type":"success","value":{"id":7,"joke":"Eduardo Panisset is tall","categories":["nerdy"]}}"#;
pub const COMPOSED: &str = "Alice Smith is tall";

/// How a mock upstream answers once it has read a full request head.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write these bytes and close.
    Respond(String),
    /// Close without writing anything.
    Close,
    /// Keep the connection open and never answer.
    Hang,
}

/// A raw-TCP upstream on an ephemeral port that records request heads.
pub struct MockUpstream {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockUpstream {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let behavior = behavior.clone();
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let Some(head) = read_head(&mut socket).await else {
                        return;
                    };
                    seen.lock().unwrap().push(head);
                    match behavior {
                        Behavior::Respond(response) => {
                            let _ = socket.write_all(response.as_bytes()).await;
                            let _ = socket.shutdown().await;
                        }
                        Behavior::Close => {}
                        Behavior::Hang => tokio::time::sleep(Duration::from_secs(30)).await,
                    }
                });
            }
        });

        Self { addr, requests }
    }

    /// Answers with a `Content-Length` JSON body.
    pub async fn json(body: &str) -> Self {
        Self::start(Behavior::Respond(json_response(body))).await
    }

    /// Answers with a chunked JSON body split into `size`-byte chunks.
    pub async fn chunked(body: &str, size: usize) -> Self {
        let mut response =
            String::from("HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n");
        for chunk in body.as_bytes().chunks(size) {
            response.push_str(&format!("{:x}\r\n", chunk.len()));
            response.push_str(std::str::from_utf8(chunk).unwrap());
            response.push_str("\r\n");
        }
        response.push_str("0\r\n\r\n");
        Self::start(Behavior::Respond(response)).await
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Request heads received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn json_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

async fn read_head(socket: &mut TcpStream) -> Option<String> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];
    while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8(raw).ok()
}

/// A port nothing listens on.
pub fn refused_port() -> u16 {
    let vacant = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    vacant.local_addr().unwrap().port()
}

/// Resolver with a per-host answer and delay.
#[derive(Default)]
pub struct ScriptedResolver {
    answers: HashMap<String, (Duration, Result<IpAddr, DnsError>)>,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, host: &str, ip: IpAddr) -> Self {
        self.answers.insert(host.to_string(), (Duration::ZERO, Ok(ip)));
        self
    }

    pub fn fail(mut self, host: &str) -> Self {
        self.answers
            .insert(host.to_string(), (Duration::ZERO, Err(DnsError::NoRecords(host.to_string()))));
        self
    }

    pub fn delayed(mut self, host: &str, delay: Duration) -> Self {
        if let Some(answer) = self.answers.get_mut(host) {
            answer.0 = delay;
        }
        self
    }

    pub fn localhost() -> Self {
        Self::new().answer(NAME_HOST, LOCALHOST).answer(JOKE_HOST, LOCALHOST)
    }

    pub fn shared(self) -> Arc<dyn Resolve> {
        Arc::new(self)
    }
}

#[async_trait]
impl Resolve for ScriptedResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr, DnsError> {
        match self.answers.get(host) {
            Some((delay, answer)) => {
                tokio::time::sleep(*delay).await;
                answer.clone()
            }
            None => Err(DnsError::NoRecords(host.to_string())),
        }
    }
}

/// One worker on an ephemeral port, upstream hosts pinned to localhost.
pub fn test_config(name_port: u16, joke_port: u16) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.listener.workers = 1;
    config.upstreams.name_service.host = NAME_HOST.into();
    config.upstreams.name_service.port = name_port;
    config.upstreams.joke_service.host = JOKE_HOST.into();
    config.upstreams.joke_service.port = joke_port;
    config.dns.static_hosts.insert(NAME_HOST.into(), LOCALHOST);
    config.dns.static_hosts.insert(JOKE_HOST.into(), LOCALHOST);
    config.timeouts.upstream_connect_secs = 2;
    config.timeouts.upstream_idle_secs = 5;
    config
}

/// Send `request` and read until the gateway closes the connection.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    read_until_close(&mut stream).await
}

/// A reset counts as a close; the gateway may drop a socket with input unread.
pub async fn read_until_close(stream: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    let read_all = async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => raw.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::ConnectionReset => break,
                Err(err) => panic!("read failed: {err}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), read_all)
        .await
        .expect("gateway did not close the connection");
    String::from_utf8(raw).unwrap()
}

pub async fn fetch(addr: SocketAddr) -> String {
    send_raw(addr, b"GET / HTTP/1.1\r\nHost: gateway\r\n\r\n").await
}

/// Split a raw response into head and body.
pub fn split_response(raw: &str) -> (&str, &str) {
    raw.split_once("\r\n\r\n").expect("response has no header terminator")
}
