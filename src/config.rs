use std::time::Duration;

/// Protocol-level knobs for the frame engine (C2/C4), grounded in the
/// teacher's `WebSocketConfig` and extended with the masked-`Pong`
/// compatibility opt-in carried over from SPEC_FULL.md's open questions.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Reject any single frame whose payload exceeds this many bytes with
    /// close code 1009. `None` disables the cap (still bounded by the wire
    /// format's 63-bit length).
    pub max_frame_size: Option<usize>,
    /// Reject a reassembled message (across however many fragments) whose
    /// cumulative payload exceeds this many bytes with close code 1009.
    pub max_message_size: Option<usize>,
    /// RFC 6455 requires server frames to be unmasked; some misbehaving
    /// servers mask `Pong` frames anyway. Off by default — flip this on to
    /// tolerate that deviation instead of failing the connection.
    pub accept_masked_pong_frames: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_frame_size: Some(16 << 20),
            max_message_size: Some(64 << 20),
            accept_masked_pong_frames: false,
        }
    }
}

/// Top-level configuration for a `Client`: the protocol config plus
/// connection-establishment knobs that live above the frame engine.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
    /// Timeout for the TCP connect + TLS handshake + HTTP upgrade,
    /// end to end (SPEC_FULL.md §5, default 10s).
    pub connect_timeout: Duration,
    /// Path to a PEM file with extra trust roots; when unset, the
    /// platform/webpki-roots trust store is used for `wss://`.
    pub ca_file: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            web_socket_config: WebSocketConfig::default(),
            connect_timeout: Duration::from_secs(10),
            ca_file: None,
        }
    }
}
