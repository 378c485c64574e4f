// Scripted transport for driving the session in tests.

use std::collections::VecDeque;
use std::net::SocketAddr;

use super::{Transport, TransportEvent};
use crate::errors::DeviceError;

pub struct MockTransport {
    pub link: bool,
    pub connects: Vec<SocketAddr>,
    pub can_send: bool,
    pub space: usize,
    pub written: Vec<Vec<u8>>,
    pub closed: usize,
    pub fail_connect: bool,
    pub events: VecDeque<TransportEvent>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            link: true,
            connects: Vec::new(),
            can_send: true,
            space: super::tcp::SEND_WINDOW,
            written: Vec::new(),
            closed: 0,
            fail_connect: false,
            events: VecDeque::new(),
        }
    }
}

impl MockTransport {
    pub fn push(&mut self, event: TransportEvent) {
        self.events.push_back(event);
    }
}

impl Transport for MockTransport {
    fn link_up(&self) -> bool {
        self.link
    }

    fn connect(&mut self, addr: SocketAddr) -> Result<(), DeviceError> {
        if self.fail_connect {
            return Err(DeviceError::Transport("connect refused by mock".into()));
        }
        self.connects.push(addr);
        Ok(())
    }

    fn can_send(&self) -> bool {
        self.can_send
    }

    fn space(&self) -> usize {
        self.space
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        self.written.push(data.to_vec());
        Ok(data.len())
    }

    fn close(&mut self) {
        self.closed += 1;
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}
