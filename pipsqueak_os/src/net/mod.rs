// Byte-stream transport between the session loop and the server.
//
// Socket work happens elsewhere (a tokio task for TCP); the loop only sees
// events it drains with `poll_event`, so every state change is committed
// from inside `Session::poll`.

#[cfg(test)]
pub mod mock;
pub mod tcp;

use std::net::SocketAddr;

use bytes::Bytes;

use crate::errors::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Data(Bytes),
    /// A TCP stack error code (see `pipsqueak_protocol::codes::tcp`).
    Error(i8),
    Timeout,
    Disconnected,
}

pub trait Transport {
    /// Network association (WiFi on the board).
    fn link_up(&self) -> bool;
    /// Starts an asynchronous connect. `Err` means no attempt was made and no
    /// events will follow.
    fn connect(&mut self, addr: SocketAddr) -> Result<(), DeviceError>;
    fn can_send(&self) -> bool;
    /// Bytes that can be queued right now.
    fn space(&self) -> usize;
    fn write(&mut self, data: &[u8]) -> Result<usize, DeviceError>;
    /// Graceful close; `Disconnected` follows.
    fn close(&mut self);
    fn poll_event(&mut self) -> Option<TransportEvent>;
}
