// Frames one request out of the byte stream using the size its header announces.

use bytes::{Bytes, BytesMut};
use pipsqueak_protocol::{RequestHeader, REQUEST_HEADER_SIZE};
use tokio_util::codec::Decoder;

use crate::errors::ServerError;

#[derive(Debug, Clone)]
pub struct RawRequest {
    pub header: RequestHeader,
    /// The whole request, HMAC included.
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestCodec;

impl Decoder for RequestCodec {
    type Item = RawRequest;
    type Error = ServerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < REQUEST_HEADER_SIZE {
            return Ok(None);
        }
        let header = RequestHeader::parse(&src[..REQUEST_HEADER_SIZE])?;
        if src.len() < header.size {
            src.reserve(header.size - src.len());
            return Ok(None);
        }
        let bytes = src.split_to(header.size).freeze();
        Ok(Some(RawRequest { header, bytes }))
    }
}
