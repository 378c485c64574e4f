// src/main.rs
mod codec;
mod config;
mod errors;
mod handler;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use bytes::BytesMut;
use chrono::Utc;
use pipsqueak_protocol::codes::status;
use pipsqueak_protocol::{RequestHeader, MAX_REQUEST_SIZE, REQUEST_HEADER_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::codec::{RawRequest, RequestCodec};
use crate::errors::ServerError;
use crate::handler::{Exchange, Handler};

/// Matches the device's own read timeout.
pub const SOCKET_TIMEOUT: Duration = Duration::from_millis(1_000);
/// How long a framed request is given to show trailing bytes.
pub const EXCESS_WINDOW: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    // -------- logging ----------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pipsqueak_server=info".parse().unwrap())
                .add_directive("tokio=warn".parse().unwrap()),
        )
        .compact()
        .init();

    // -------- config ----------
    let cfg = config::Cli::parse_and_build_config()?;
    let handler = Arc::new(Handler::from_config(&cfg)?);
    let listener = TcpListener::bind(&cfg.bind).await?;
    info!(
        bind = %listener.local_addr()?,
        device_id = cfg.device_id,
        setpoint = cfg.setpoint,
        max_skew_secs = cfg.max_skew_secs,
        "Pipsqueak server listening"
    );

    tokio::select! {
        res = serve(listener, handler) => res?,
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(?e, "failed to install Ctrl+C handler");
            }
            info!("shutdown signal received; exiting.");
        }
    }
    Ok(())
}

pub async fn serve(listener: TcpListener, handler: Arc<Handler>) -> Result<(), ServerError> {
    loop {
        let (socket, peer) = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(socket, peer, handler).await {
                warn!(%peer, error = %e, "connection dropped");
            }
        });
    }
}

/// One request per connection; the answer is followed by a close.
async fn serve_connection(mut socket: TcpStream, peer: SocketAddr, handler: Arc<Handler>) -> Result<(), ServerError> {
    let incoming = read_request(&mut socket, &handler).await?;
    let request = &incoming.request;
    debug!(%peer, protocol = %request.header.protocol, size = request.bytes.len(), "request framed");

    let response = handler.handle(request, incoming.flags, Utc::now());
    socket.write_all(&response).await?;
    socket.shutdown().await?;
    Ok(())
}

/// A framed request plus what the socket showed around it.
struct Incoming {
    request: RawRequest,
    flags: u8,
    /// Held until the answer is written.
    _exchange: Option<Exchange>,
}

/// Reads until one request is framed. The device counts as busy from its
/// first header; bytes past the request, buffered or arriving shortly
/// after, count as excess data.
async fn read_request(socket: &mut TcpStream, handler: &Arc<Handler>) -> Result<Incoming, ServerError> {
    let mut codec = RequestCodec;
    let mut buf = BytesMut::with_capacity(MAX_REQUEST_SIZE);
    let mut flags = 0u8;
    let mut exchange = None;
    let mut claimed = false;
    loop {
        if !claimed && buf.len() >= REQUEST_HEADER_SIZE {
            let header = RequestHeader::parse(&buf[..REQUEST_HEADER_SIZE])?;
            exchange = handler.begin(header.device_id);
            if exchange.is_none() {
                flags |= status::CONCURRENT_REQUESTS;
            }
            claimed = true;
        }
        if let Some(request) = codec.decode(&mut buf)? {
            if buf.is_empty() {
                if let Ok(read) = timeout(EXCESS_WINDOW, socket.read_buf(&mut buf)).await {
                    read?;
                }
            }
            if !buf.is_empty() {
                flags |= status::EXCESS_DATA;
            }
            return Ok(Incoming { request, flags, _exchange: exchange });
        }
        let n = timeout(SOCKET_TIMEOUT, socket.read_buf(&mut buf))
            .await
            .map_err(|_| ServerError::Timeout)??;
        if n == 0 {
            return Err(ServerError::Incomplete(buf.len()));
        }
    }
}
