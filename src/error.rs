use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;
use url::ParseError;

/// Unified error type for every layer of the engine: byte decoding, handshake
/// negotiation, transport I/O and configuration misuse all funnel through
/// here so callers only need to match on one type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: httparse::Error,
    },

    // Handshake errors
    #[error("invalid scheme in WebSocket URL, expected ws:// or wss://")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    #[error("incomplete HTTP response from server")]
    IncompleteHTTPResponse,

    #[error("server did not reply with HTTP/1.1 101 Switching Protocols (got {0})")]
    NoUpgrade(u16),

    #[error("server response is missing the Sec-WebSocket-Accept header")]
    MissingAcceptHeader,

    #[error("server sent an invalid Sec-WebSocket-Accept value")]
    InvalidAcceptKey,

    #[error("invalid opcode")]
    InvalidOpcode,

    // Client-surface errors
    #[error("write rejected: connection is not in the Connected state")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,
}
