// TCP transport over tokio. Each connection gets a fresh task and a fresh
// event channel, so nothing from a previous session can leak into the next.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use pipsqueak_protocol::codes::tcp;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::{Transport, TransportEvent};
use crate::errors::DeviceError;

/// Two full-size segments, as the board's TCP stack allows.
pub const SEND_WINDOW: usize = 2_920;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Silence on an open connection for this long ends the session.
pub const READ_TIMEOUT: Duration = Duration::from_millis(1_000);
const READ_CHUNK: usize = 512;

#[derive(Debug)]
enum Outbound {
    Data(Bytes),
    Close,
}

#[derive(Default)]
pub struct TcpTransport {
    connected: Arc<AtomicBool>,
    queued: Arc<AtomicUsize>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for TcpTransport {
    /// The host OS owns the network link.
    fn link_up(&self) -> bool {
        true
    }

    fn connect(&mut self, addr: SocketAddr) -> Result<(), DeviceError> {
        if self.connected.load(Ordering::Acquire) {
            return Err(DeviceError::Transport(format!("already connected, refusing {addr}")));
        }
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.events = Some(event_rx);
        self.outbound = Some(out_tx);
        self.queued.store(0, Ordering::Release);

        tokio::spawn(run_connection(
            addr,
            event_tx,
            out_rx,
            self.connected.clone(),
            self.queued.clone(),
        ));
        Ok(())
    }

    fn can_send(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn space(&self) -> usize {
        SEND_WINDOW.saturating_sub(self.queued.load(Ordering::Acquire))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        let Some(tx) = self.outbound.as_ref().filter(|_| self.can_send()) else {
            return Err(DeviceError::Transport("not connected".into()));
        };
        self.queued.fetch_add(data.len(), Ordering::AcqRel);
        tx.send(Outbound::Data(Bytes::copy_from_slice(data)))
            .map_err(|_| DeviceError::Transport("connection task gone".into()))?;
        Ok(data.len())
    }

    fn close(&mut self) {
        if let Some(tx) = self.outbound.as_ref() {
            let _ = tx.send(Outbound::Close);
        }
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.as_mut()?.try_recv().ok()
    }
}

async fn run_connection(
    addr: SocketAddr,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    connected: Arc<AtomicBool>,
    queued: Arc<AtomicUsize>,
) {
    let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(event = "tcp_connect_failed", %addr, error = %e);
            let _ = events.send(TransportEvent::Error(error_code(&e)));
            let _ = events.send(TransportEvent::Disconnected);
            return;
        }
        Err(_) => {
            warn!(event = "tcp_connect_timeout", %addr);
            let _ = events.send(TransportEvent::Timeout);
            let _ = events.send(TransportEvent::Disconnected);
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    connected.store(true, Ordering::Release);
    let _ = events.send(TransportEvent::Connected);
    debug!(event = "tcp_connected", %addr);

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Data(bytes)) => {
                    let result = writer.write_all(&bytes).await;
                    queued.fetch_sub(bytes.len(), Ordering::AcqRel);
                    if let Err(e) = result {
                        let _ = events.send(TransportEvent::Error(error_code(&e)));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = writer.shutdown().await;
                    break;
                }
            },
            read = timeout(READ_TIMEOUT, reader.read(&mut buf)) => match read {
                Err(_) => {
                    let _ = events.send(TransportEvent::Timeout);
                    break;
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    let _ = events.send(TransportEvent::Data(Bytes::copy_from_slice(&buf[..n])));
                }
                Ok(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(error_code(&e)));
                    break;
                }
            },
        }
    }

    connected.store(false, Ordering::Release);
    let _ = events.send(TransportEvent::Disconnected);
    debug!(event = "tcp_disconnected", %addr);
}

/// Host socket errors expressed in the board's TCP stack vocabulary.
pub fn error_code(e: &io::Error) -> i8 {
    use io::ErrorKind::*;
    match e.kind() {
        ConnectionRefused | ConnectionReset => tcp::RESET,
        ConnectionAborted => tcp::ABORTED,
        NotConnected => tcp::NOT_CONNECTED,
        BrokenPipe => tcp::CLOSED,
        TimedOut => tcp::TIMEOUT,
        AddrInUse => tcp::ADDRESS_IN_USE,
        AddrNotAvailable | HostUnreachable | NetworkUnreachable => tcp::ROUTING,
        WouldBlock => tcp::WOULD_BLOCK,
        InvalidInput => tcp::ILLEGAL_ARGUMENT,
        OutOfMemory => tcp::MEMORY,
        _ => tcp::INTERFACE,
    }
}
