//! Simple async WebSocket client implementation for the Tokio stack.
//!
//! This library offers a frame-level client implementation of the
//! [WebSocket Protocol RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455):
//! performing the HTTP upgrade handshake, decoding and encoding frames,
//! reassembling fragmented messages, and driving the connection's lifecycle
//! over a `tokio::net::TcpStream` (optionally wrapped in TLS).
//!
//! ```no_run
//! use futures::StreamExt;
//! use wsengine::{Client, ClientConfig, ClientEvent, Message};
//!
//! # async fn run() {
//! let (client, mut events) = Client::connect("wss://example.com/socket", ClientConfig::default()).await;
//! client.write_text("hello").await.ok();
//!
//! while let Some(event) = events.next().await {
//!     match event {
//!         ClientEvent::MessageReceived(Message::Text(text)) => println!("{text}"),
//!         ClientEvent::StateChanged(state) => println!("{state:?}"),
//!         _ => {}
//!     }
//! }
//! # }
//! ```

mod buffer;
pub mod config;
mod connection;
mod decoder;
mod encoder;
pub mod error;
pub mod event;
pub mod frame;
pub mod handshake;
mod reassembler;
mod transport;

pub use config::{ClientConfig, WebSocketConfig};
pub use connection::{Client, ConnectionState};
pub use error::Error;
pub use event::{ClientEvent, ClientEvents, Message};
pub use frame::{CloseCode, OpCode};
pub use transport::{TcpTransport, Transport, TransportEvent, TransportState};
