//! Upstream request construction.
//!
//! # Responsibilities
//! - Build the fixed GET request sent to each upstream service
//! - Serialize it once into a shareable buffer
//!
//! # Design Decisions
//! - Requests are built per worker at startup and reused by every session
//! - No request body; upstreams are plain HTTP/1.1 GET endpoints

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::UpstreamConfig;

/// A serialized upstream request: start line plus headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    request_line: String,
    headers: Vec<(String, String)>,
    encoded: Bytes,
}

impl UpstreamRequest {
    pub fn new(request_line: impl Into<String>, headers: Vec<(String, String)>) -> Self {
        let request_line = request_line.into();
        let encoded = encode(&request_line, &headers);
        Self {
            request_line,
            headers,
            encoded,
        }
    }

    /// `GET <path> HTTP/1.1` with Host, User-Agent and Accept headers.
    pub fn get(upstream: &UpstreamConfig) -> Self {
        Self::new(
            format!("GET {} HTTP/1.1", upstream.path),
            vec![
                ("Host".to_string(), upstream.host.clone()),
                ("User-Agent".to_string(), upstream.user_agent.clone()),
                ("Accept".to_string(), "*/*".to_string()),
            ],
        )
    }

    pub fn request_line(&self) -> &str {
        &self.request_line
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Wire bytes; cloning is a reference count bump.
    pub fn to_bytes(&self) -> Bytes {
        self.encoded.clone()
    }
}

fn encode(request_line: &str, headers: &[(String, String)]) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_slice(request_line.as_bytes());
    buf.put_slice(b"\r\n");
    for (name, value) in headers {
        buf.put_slice(name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
    buf.freeze()
}
