use pipsqueak_protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO: {0}")] Io(#[from] std::io::Error),
    #[error("Protocol: {0}")] Protocol(#[from] ProtocolError),
    #[error("connection closed after {0} of a request's bytes")] Incomplete(usize),
    #[error("no complete request within the socket timeout")] Timeout,
}
