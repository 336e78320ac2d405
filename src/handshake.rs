//! Handshake validator (C5): generates `Sec-WebSocket-Key`, validates the
//! server's `Sec-WebSocket-Accept`, and parses the HTTP/1.1 101 response.
//!
//! Grounded in the teacher's `utils.rs` (key/accept generation) and
//! `request.rs` (URL -> HTTP request), reshaped for the client-only
//! upgrade path: this engine never accepts an incoming handshake, so the
//! server-side `perform_handshake` the teacher carries has no counterpart
//! here.

use crate::error::Error;
use base64::prelude::*;
use rand::RngCore;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use url::Url;

const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
/// Bound on how much of the response we'll buffer looking for the blank
/// line that ends the HTTP headers, mirroring the teacher's 16 KiB budget
/// for the server-side request parse in `request.rs`.
const MAX_RESPONSE_HEADER_BYTES: usize = 16 * 1024;

/// A parsed `ws://`/`wss://` target, ready to drive both the TCP connect
/// and the upgrade request.
pub struct WsUrl {
    pub use_tls: bool,
    pub host: String,
    pub port: u16,
    pub host_header: String,
    pub path_and_query: String,
    pub origin: String,
}

pub fn parse_ws_url(raw: &str) -> Result<WsUrl, Error> {
    let parsed = Url::parse(raw)?;

    let (use_tls, default_port) = match parsed.scheme() {
        "ws" => (false, 80u16),
        "wss" => (true, 443u16),
        _ => return Err(Error::InvalidSchemeURL),
    };

    let host = parsed.host_str().ok_or(Error::URLNoHost)?.to_string();
    let port = parsed.port().unwrap_or(default_port);

    let host_header = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.clone(),
    };

    let path_and_query = match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    };

    let origin = format!("{}://{}", if use_tls { "https" } else { "http" }, host_header);

    Ok(WsUrl {
        use_tls,
        host,
        port,
        host_header,
        path_and_query,
        origin,
    })
}

/// Generates a fresh `Sec-WebSocket-Key`: base64 of 16 random bytes.
pub fn generate_key() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    BASE64_STANDARD.encode(bytes)
}

/// `base64(SHA-1(key ++ GUID))`, the value the server's
/// `Sec-WebSocket-Accept` header must equal.
pub fn expected_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

/// Builds the GET upgrade request bytes for `url`, keyed by `key`. `origin`
/// defaults to the URL's own scheme+host when the caller doesn't supply one
/// (SPEC_FULL.md §4.5).
pub fn build_request(url: &WsUrl, key: &str, origin: Option<&str>) -> Vec<u8> {
    let origin = origin.unwrap_or(&url.origin);
    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Origin: {origin}\r\n\
         \r\n",
        path = url.path_and_query,
        host = url.host_header,
    );
    request.into_bytes()
}

/// A validated upgrade response: status was 101 and the accept key
/// matched. `headers` is kept for `ConnectionState::Connected`.
pub struct HandshakeResponse {
    pub headers: HashMap<String, String>,
    /// Bytes consumed from the input for the HTTP response itself; any
    /// trailing bytes in the same read are already-arrived frame data.
    pub consumed: usize,
}

/// Attempts to parse and validate an HTTP upgrade response out of the front
/// of `buf`. Returns `Ok(None)` when more bytes are needed.
pub fn try_parse_response(buf: &[u8], key: &str) -> Result<Option<HandshakeResponse>, Error> {
    if buf.len() > MAX_RESPONSE_HEADER_BYTES && !has_header_terminator(buf) {
        return Err(Error::IncompleteHTTPResponse);
    }

    let mut header_storage = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut header_storage);

    let status = response.parse(buf)?;
    let consumed = match status {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let code = response.code.unwrap_or(0);
    if code != 101 {
        return Err(Error::NoUpgrade(code));
    }

    let mut headers = HashMap::new();
    for header in response.headers.iter() {
        headers.insert(
            header.name.to_ascii_lowercase(),
            String::from_utf8_lossy(header.value).to_string(),
        );
    }

    let accept = headers
        .get("sec-websocket-accept")
        .ok_or(Error::MissingAcceptHeader)?;

    if accept != &expected_accept(key) {
        return Err(Error::InvalidAcceptKey);
    }

    Ok(Some(HandshakeResponse { headers, consumed }))
}

fn has_header_terminator(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n")
}
