//! Client response serialization.
//!
//! # Responsibilities
//! - Write the fixed `HTTP/1.0 200 OK` text/plain head
//! - Stamp Server and Date headers
//!
//! # Design Decisions
//! - HTTP/1.0 with an explicit Content-Length; the connection closes after
//! - The body is handed to the channel as-is, never copied into the head

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};

/// Format `now` as an RFC 7231 IMF-fixdate.
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Serialize the response head for a body of `content_length` bytes.
pub fn encode_head(content_length: usize, server_name: &str, now: DateTime<Utc>) -> BytesMut {
    let mut head = BytesMut::with_capacity(160);
    head.put_slice(b"HTTP/1.0 200 OK\r\n");
    head.put_slice(b"Content-Type: text/plain\r\n");
    head.put_slice(format!("Content-Length: {content_length}\r\n").as_bytes());
    head.put_slice(format!("Server: {server_name}\r\n").as_bytes());
    head.put_slice(format!("Date: {}\r\n", http_date(now)).as_bytes());
    head.put_slice(b"\r\n");
    head
}
