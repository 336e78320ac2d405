//! Transport (A4): the collaborator SPEC_FULL.md §1 describes only by
//! interface, plus one concrete, production-usable implementation over
//! `tokio::net::TcpStream` (optionally wrapped in `tokio-rustls` for
//! `wss://`) so the engine is runnable end to end.
//!
//! Grounded in the teacher's `stream.rs`/`split.rs` socket plumbing and
//! `client_tls.rs` example (the `ClientConfig::ca_file` knob), generalized
//! behind a `Transport` trait per the "out of scope, described only by the
//! interfaces it satisfies" instruction in SPEC_FULL.md §1. `Client` is
//! generic over `Transport` rather than boxing it, so there is no need for
//! the implementation to be `dyn`-safe.

use crate::error::Error;
use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Coarse transport lifecycle state, mirroring the `URLSessionWebSocketTask`
/// state machine SPEC_FULL.md §6 borrows its callback names from.
#[derive(Debug, Clone)]
pub enum TransportState {
    Preparing,
    Waiting(String),
    Ready,
    Failed(String),
    Cancelled,
}

/// Notifications the transport pushes up to the orchestrator (C6). Modeled
/// as an enum delivered over an `mpsc` channel rather than a callback
/// object, matching this crate's "plain return value over injected
/// callback" convention (SPEC_FULL.md §9).
#[derive(Debug, Clone)]
pub enum TransportEvent {
    StateChanged(TransportState),
    ViabilityChanged(bool),
    BetterPathAvailable(bool),
    DataReceived(Vec<u8>),
}

/// The inbound transport interface the engine consumes (SPEC_FULL.md §6).
/// `send` writes bytes; `recv_event` drains the next lifecycle/data event;
/// `cancel` tears the connection down without waiting for anything.
pub trait Transport: Send {
    fn send(&mut self, bytes: Vec<u8>) -> impl Future<Output = Result<(), Error>> + Send;
    fn recv_event(&mut self) -> impl Future<Output = Option<TransportEvent>> + Send;
    fn cancel(&mut self);
}

/// Plain TCP (or TLS-over-TCP) transport. Owns a background task that reads
/// the socket in a loop and posts `DataReceived`/state events over an
/// internal channel — the "recursive receive-loop" of SPEC_FULL.md §5
/// expressed as a Tokio task.
pub struct TcpTransport {
    write_half: TcpWriteHalf,
    events: mpsc::Receiver<TransportEvent>,
    read_task: tokio::task::JoinHandle<()>,
}

enum TcpWriteHalf {
    Plain(WriteHalf<TcpStream>),
    #[cfg(feature = "rustls-tls")]
    Tls(tokio::io::WriteHalf<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl TcpTransport {
    pub async fn connect(
        host: &str,
        port: u16,
        use_tls: bool,
        ca_file: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<Self, Error> {
        let addr = format!("{host}:{port}");
        let tcp = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(Error::from)??;
        tcp.set_nodelay(true).ok();

        if use_tls {
            #[cfg(feature = "rustls-tls")]
            {
                Self::connect_tls(tcp, host, ca_file, connect_timeout).await
            }
            #[cfg(not(feature = "rustls-tls"))]
            {
                let _ = ca_file;
                Err(Error::IOError {
                    source: std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "wss:// requires the rustls-tls feature",
                    ),
                })
            }
        } else {
            Ok(Self::from_plain(tcp))
        }
    }

    fn from_plain(tcp: TcpStream) -> Self {
        let (read_half, write_half) = tokio::io::split(tcp);
        let (tx, rx) = mpsc::channel(64);
        let read_task = tokio::spawn(read_loop(read_half, tx));
        Self {
            write_half: TcpWriteHalf::Plain(write_half),
            events: rx,
            read_task,
        }
    }

    #[cfg(feature = "rustls-tls")]
    async fn connect_tls(
        tcp: TcpStream,
        host: &str,
        ca_file: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<Self, Error> {
        use pki_types::ServerName;
        use std::sync::Arc;
        use tokio_rustls::TlsConnector;

        let mut roots = rustls::RootCertStore::empty();
        if let Some(path) = ca_file {
            let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
            for cert in rustls_pemfile::certs(&mut reader) {
                roots.add(cert?).ok();
            }
        } else {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| Error::URLNoHost)?;

        let tls_stream = timeout(connect_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(Error::from)??;

        let (read_half, write_half) = tokio::io::split(tls_stream);
        let (tx, rx) = mpsc::channel(64);
        let read_task = tokio::spawn(read_loop(read_half, tx));
        Ok(Self {
            write_half: TcpWriteHalf::Tls(write_half),
            events: rx,
            read_task,
        })
    }
}

async fn read_loop<R: AsyncReadExt + Unpin>(mut read_half: R, tx: mpsc::Sender<TransportEvent>) {
    let _ = tx
        .send(TransportEvent::StateChanged(TransportState::Ready))
        .await;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!("transport: peer closed the connection");
                let _ = tx
                    .send(TransportEvent::StateChanged(TransportState::Cancelled))
                    .await;
                break;
            }
            Ok(n) => {
                if tx
                    .send(TransportEvent::DataReceived(buf[..n].to_vec()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                let _ = tx
                    .send(TransportEvent::StateChanged(TransportState::Failed(e.to_string())))
                    .await;
                break;
            }
        }
    }
}

impl Transport for TcpTransport {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), Error> {
        match &mut self.write_half {
            TcpWriteHalf::Plain(w) => w.write_all(&bytes).await?,
            #[cfg(feature = "rustls-tls")]
            TcpWriteHalf::Tls(w) => w.write_all(&bytes).await?,
        }
        Ok(())
    }

    async fn recv_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    fn cancel(&mut self) {
        self.read_task.abort();
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}
