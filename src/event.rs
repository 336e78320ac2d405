//! Public event/message surface delivered to the user-notification lane.
//!
//! `Message` plays the role of the teacher's `message.rs::Message`,
//! extended to cover control frames (the distilled spec's
//! `message_received(Text|Binary|Ping|Pong)` callback); `ClientEvents`
//! mirrors the teacher's `event.rs::EventStream` — a `futures::Stream`
//! wrapper around an `mpsc::Receiver` so callers can `.next().await`
//! instead of touching a channel directly.

use crate::connection::ConnectionState;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::Receiver;

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    ViabilityChanged(bool),
    BetterPathAvailable(bool),
    MessageReceived(Message),
}

/// A `Stream` of `ClientEvent`s in the exact order the read/write lanes
/// produced them (O1/O2/O3 in SPEC_FULL.md §5).
pub struct ClientEvents {
    receiver: Receiver<ClientEvent>,
}

impl ClientEvents {
    pub(crate) fn new(receiver: Receiver<ClientEvent>) -> Self {
        Self { receiver }
    }
}

impl Stream for ClientEvents {
    type Item = ClientEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll_recv(cx)
    }
}
