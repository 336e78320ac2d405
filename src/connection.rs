//! Connection orchestrator (C6): owns the state machine, wires
//! transport <-> decoder <-> reassembler <-> user-notification lane, and
//! serializes writes (SPEC_FULL.md §4.6, §5).
//!
//! Grounded in the teacher's `read.rs` (`poll_messages`'s dispatch over
//! opcodes) and `connection.rs`/`split.rs` (splitting read/write
//! responsibility, `Arc<Mutex<Writer>>` for shared state), reshaped around
//! a single actor task per §5's "the contract is ordering, not the
//! mechanism": rather than three independently-scheduled lanes, one Tokio
//! task `select!`s between inbound transport events and outbound write
//! commands, which trivially preserves FIFO processing within each source
//! and lets a `Pong` be written before the next inbound frame is ever
//! polled (O4) without extra synchronization.

use crate::config::ClientConfig;
use crate::decoder::decode;
use crate::encoder::encode;
use crate::error::Error;
use crate::event::{ClientEvent, ClientEvents, Message};
use crate::frame::{CloseCode, DecodeOutcome, OpCode};
use crate::handshake::{self, HandshakeResponse};
use crate::reassembler::{Event, Reassembler};
use crate::transport::{Transport, TransportEvent, TransportState};
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

/// SPEC_FULL.md §3: equality is structural so state transitions can be
/// deduped to "at most one delegate notification per distinct state".
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected { code: CloseCode, reason: String },
    Connecting,
    Waiting { error: String },
    Connected { headers: HashMap<String, String> },
}

enum Command {
    Write {
        opcode: OpCode,
        payload: Vec<u8>,
        completion: Option<oneshot::Sender<Result<(), Error>>>,
    },
    Disconnect {
        code: CloseCode,
        reason: String,
    },
    ForceDisconnect,
}

/// The user-facing handle (SPEC_FULL.md §6): issues writes and disconnect
/// requests to the orchestrator task over a command channel. Cloning a
/// `Client` is cheap and shares the same underlying connection.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::Sender<Command>,
    state: Arc<Mutex<ConnectionState>>,
}

impl Client {
    /// Spawns the orchestrator task and returns immediately; the connect,
    /// handshake, and every subsequent state transition are all reported
    /// through the returned `ClientEvents` stream rather than this call's
    /// return value (connecting never fails synchronously — only the
    /// background task can observe a connect or handshake failure).
    pub async fn connect(url: &str, config: ClientConfig) -> (Self, ClientEvents) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(128);
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));

        let client = Client {
            commands: command_tx,
            state: state.clone(),
        };

        let url = url.to_string();
        tokio::spawn(run(url, config, state, command_rx, event_tx));

        (client, ClientEvents::new(event_rx))
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.lock().await.clone()
    }

    pub async fn write_text(&self, text: impl Into<String>) -> Result<(), Error> {
        self.write(OpCode::Text, text.into().into_bytes(), true).await
    }

    pub async fn write_binary(&self, data: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.write(OpCode::Binary, data.into(), true).await
    }

    pub async fn write_ping(&self, data: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.write(OpCode::Ping, data.into(), true).await
    }

    pub async fn write_pong(&self, data: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.write(OpCode::Pong, data.into(), true).await
    }

    async fn write(&self, opcode: OpCode, payload: Vec<u8>, wait: bool) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        let completion = if wait { Some(tx) } else { None };
        self.commands
            .send(Command::Write {
                opcode,
                payload,
                completion,
            })
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        if wait {
            rx.await.map_err(|_| Error::ConnectionClosed)?
        } else {
            Ok(())
        }
    }

    pub async fn disconnect(&self, code: CloseCode, reason: impl Into<String>) -> Result<(), Error> {
        self.commands
            .send(Command::Disconnect {
                code,
                reason: reason.into(),
            })
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    pub async fn force_disconnect(&self) -> Result<(), Error> {
        self.commands
            .send(Command::ForceDisconnect)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }
}

async fn run(
    url: String,
    config: ClientConfig,
    state: Arc<Mutex<ConnectionState>>,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<ClientEvent>,
) {
    let ws_url = match handshake::parse_ws_url(&url) {
        Ok(url) => url,
        Err(e) => {
            transition(&state, &events, disconnect_state(CloseCode::Abnormal, e.to_string())).await;
            return;
        }
    };

    let mut transport = match crate::transport::TcpTransport::connect(
        &ws_url.host,
        ws_url.port,
        ws_url.use_tls,
        config.ca_file.as_deref(),
        config.connect_timeout,
    )
    .await
    {
        Ok(transport) => transport,
        Err(e) => {
            transition(&state, &events, disconnect_state(CloseCode::Abnormal, e.to_string())).await;
            return;
        }
    };

    let key = handshake::generate_key();
    let request = handshake::build_request(&ws_url, &key, None);
    if let Err(e) = transport.send(request).await {
        transition(&state, &events, disconnect_state(CloseCode::Abnormal, e.to_string())).await;
        return;
    }

    // `connect_timeout` covers the TCP/TLS connect (bounded inside
    // `TcpTransport::connect` above) *and* the HTTP upgrade round trip
    // (SPEC_FULL.md §5); a server that never finishes the 101 response must
    // not park the client in `Connecting` forever.
    let mut recv_buf: Vec<u8> = Vec::new();
    let response = match tokio::time::timeout(
        config.connect_timeout,
        wait_for_handshake_response(&mut transport, &mut commands, &state, &events, &key, &mut recv_buf),
    )
    .await
    {
        Ok(Ok(response)) => response,
        Ok(Err(())) => return,
        Err(_elapsed) => {
            transport.cancel();
            transition(
                &state,
                &events,
                disconnect_state(CloseCode::Abnormal, "timed out waiting for handshake response"),
            )
            .await;
            return;
        }
    };

    let HandshakeResponse { headers, consumed } = response;
    let trailing = recv_buf.split_off(consumed);
    transition(&state, &events, ConnectionState::Connected { headers }).await;

    let mut reassembler = Reassembler::new();
    let mut decode_buf = trailing;
    let ws_config = config.web_socket_config.clone();

    macro_rules! finish {
        ($code:expr, $reason:expr) => {{
            let code = $code;
            let reason: String = $reason;
            let close_payload = close_frame_payload(code, &reason);
            let _ = transport.send(encode(OpCode::Close, &close_payload)).await;
            transport.cancel();
            transition(&state, &events, ConnectionState::Disconnected { code, reason }).await;
            return;
        }};
    }

    loop {
        tokio::select! {
            biased;

            transport_event = transport.recv_event() => {
                match transport_event {
                    Some(TransportEvent::DataReceived(bytes)) => {
                        decode_buf.extend_from_slice(&bytes);
                        if let Err((code, reason)) = process_inbound(
                            &mut decode_buf,
                            &mut reassembler,
                            &ws_config,
                            &mut transport,
                            &events,
                        )
                        .await
                        {
                            finish!(code, reason);
                        }
                    }
                    Some(TransportEvent::StateChanged(TransportState::Failed(e))) => {
                        transport.cancel();
                        transition(&state, &events, disconnect_state(CloseCode::Abnormal, e)).await;
                        return;
                    }
                    Some(TransportEvent::StateChanged(TransportState::Cancelled)) | None => {
                        transport.cancel();
                        transition(
                            &state,
                            &events,
                            disconnect_state(CloseCode::Abnormal, "transport closed"),
                        )
                        .await;
                        return;
                    }
                    Some(TransportEvent::StateChanged(TransportState::Waiting(e))) => {
                        transition(&state, &events, ConnectionState::Waiting { error: e }).await;
                    }
                    Some(TransportEvent::ViabilityChanged(viable)) => {
                        let _ = events.send(ClientEvent::ViabilityChanged(viable)).await;
                    }
                    Some(TransportEvent::BetterPathAvailable(available)) => {
                        let _ = events.send(ClientEvent::BetterPathAvailable(available)).await;
                    }
                    Some(TransportEvent::StateChanged(TransportState::Preparing))
                    | Some(TransportEvent::StateChanged(TransportState::Ready)) => {}
                }
            }

            command = commands.recv() => {
                match command {
                    Some(Command::Write { opcode, payload, completion }) => {
                        let connected = matches!(*state.lock().await, ConnectionState::Connected { .. });
                        let result = if connected {
                            transport.send(encode(opcode, &payload)).await
                        } else {
                            Err(Error::NotConnected)
                        };
                        if let Some(tx) = completion {
                            let _ = tx.send(result);
                        }
                    }
                    Some(Command::Disconnect { code, reason }) => {
                        finish!(code, reason);
                    }
                    Some(Command::ForceDisconnect) | None => {
                        transport.cancel();
                        transition(
                            &state,
                            &events,
                            disconnect_state(CloseCode::Abnormal, "forced"),
                        )
                        .await;
                        return;
                    }
                }
            }
        }
    }
}

/// Drains transport events and write commands until the HTTP upgrade
/// response is fully parsed and validated. Writes are rejected while still
/// mid-handshake (§4.6 "write admission"), so commands are drained here too
/// rather than left to queue up behind a handshake that may never complete.
/// Every terminal outcome (transport failure, peer disconnect command,
/// malformed response) transitions `state` itself before returning `Err`;
/// the caller only needs to return from `run` in that case. The whole call
/// is meant to be raced against `config.connect_timeout` by the caller.
async fn wait_for_handshake_response(
    transport: &mut crate::transport::TcpTransport,
    commands: &mut mpsc::Receiver<Command>,
    state: &Arc<Mutex<ConnectionState>>,
    events: &mpsc::Sender<ClientEvent>,
    key: &str,
    recv_buf: &mut Vec<u8>,
) -> Result<HandshakeResponse, ()> {
    loop {
        tokio::select! {
            biased;

            transport_event = transport.recv_event() => {
                match transport_event {
                    Some(TransportEvent::DataReceived(bytes)) => {
                        recv_buf.extend_from_slice(&bytes);
                        match handshake::try_parse_response(recv_buf, key) {
                            Ok(Some(response)) => return Ok(response),
                            Ok(None) => continue,
                            Err(e) => {
                                transition(state, events, disconnect_state(CloseCode::Abnormal, e.to_string()))
                                    .await;
                                return Err(());
                            }
                        }
                    }
                    Some(TransportEvent::StateChanged(TransportState::Failed(e))) => {
                        transition(state, events, disconnect_state(CloseCode::Abnormal, e)).await;
                        return Err(());
                    }
                    Some(TransportEvent::StateChanged(TransportState::Waiting(e))) => {
                        transition(state, events, ConnectionState::Waiting { error: e }).await;
                    }
                    Some(_) => continue,
                    None => {
                        transition(
                            state,
                            events,
                            disconnect_state(CloseCode::Abnormal, "transport closed during handshake"),
                        )
                        .await;
                        return Err(());
                    }
                }
            }

            command = commands.recv() => {
                match command {
                    Some(Command::Write { completion, .. }) => {
                        if let Some(tx) = completion {
                            let _ = tx.send(Err(Error::NotConnected));
                        }
                    }
                    Some(Command::Disconnect { code, reason }) => {
                        transport.cancel();
                        transition(state, events, disconnect_state(code, reason)).await;
                        return Err(());
                    }
                    Some(Command::ForceDisconnect) | None => {
                        transport.cancel();
                        transition(state, events, disconnect_state(CloseCode::Abnormal, "forced")).await;
                        return Err(());
                    }
                }
            }
        }
    }
}

/// Drains as many complete frames as `decode_buf` holds, feeding each into
/// the reassembler and reacting to the resulting events. Returns `Err` with
/// the close code/reason the connection should terminate with.
async fn process_inbound(
    decode_buf: &mut Vec<u8>,
    reassembler: &mut Reassembler,
    config: &crate::config::WebSocketConfig,
    transport: &mut crate::transport::TcpTransport,
    events: &mpsc::Sender<ClientEvent>,
) -> Result<(), (CloseCode, String)> {
    loop {
        match decode(&decode_buf[..], config) {
            DecodeOutcome::NeedsMore => return Ok(()),
            DecodeOutcome::Failed { code, reason } => {
                warn!("decoder: protocol error: {reason}");
                return Err((code, reason));
            }
            DecodeOutcome::Frame { frame, consumed } => {
                decode_buf.drain(..consumed);
                for event in reassembler.consume(frame, config.max_message_size) {
                    match event {
                        Event::Text(text) => {
                            let _ = events
                                .send(ClientEvent::MessageReceived(Message::Text(text)))
                                .await;
                        }
                        Event::Binary(data) => {
                            let _ = events
                                .send(ClientEvent::MessageReceived(Message::Binary(data)))
                                .await;
                        }
                        Event::Ping(payload) => {
                            // O4: the pong goes out before we ever poll the
                            // next inbound frame, since we're still inside
                            // this synchronous drain loop.
                            if let Err(e) = transport.send(encode(OpCode::Pong, &payload)).await {
                                error!("failed to send pong: {e}");
                            }
                            let _ = events
                                .send(ClientEvent::MessageReceived(Message::Ping(payload)))
                                .await;
                        }
                        Event::Pong(payload) => {
                            let _ = events
                                .send(ClientEvent::MessageReceived(Message::Pong(payload)))
                                .await;
                        }
                        Event::Closed { code, reason } => {
                            debug!("peer initiated close: {code:?} {reason}");
                            return Err((code, reason));
                        }
                        Event::Error { code, message } => {
                            warn!("reassembler: protocol error: {message}");
                            return Err((code, message));
                        }
                    }
                }
            }
        }
    }
}

fn close_frame_payload(code: CloseCode, reason: &str) -> Vec<u8> {
    if matches!(code, CloseCode::NoStatusReceived | CloseCode::Abnormal) {
        return Vec::new();
    }
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&u16::from(code).to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload
}

fn disconnect_state(code: CloseCode, reason: impl Into<String>) -> ConnectionState {
    ConnectionState::Disconnected {
        code,
        reason: reason.into(),
    }
}

async fn transition(
    state: &Arc<Mutex<ConnectionState>>,
    events: &mpsc::Sender<ClientEvent>,
    new_state: ConnectionState,
) {
    let mut guard = state.lock().await;
    if *guard == new_state {
        return;
    }
    *guard = new_state.clone();
    drop(guard);
    let _ = events.send(ClientEvent::StateChanged(new_state)).await;
}
