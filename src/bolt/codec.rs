//! Bolt protocol codec for tokio_util.
//!
//! Implements the chunked message framing of the Bolt protocol.
//! Messages are split into chunks with a 2-byte length prefix and closed by
//! a zero-length chunk. A zero-length chunk outside a message is a NOOP
//! keep-alive and is skipped.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{BoltRequest, BoltResponse};
use super::packstream::{decode, Packer, PackStreamStructure, PackStreamValue};
use super::BoltError;

/// Maximum chunk size (16KB)
pub const MAX_CHUNK_SIZE: usize = 16384;

/// Default upper bound for one reassembled message (16MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// End of message marker (0x00 0x00)
pub const END_MARKER: [u8; 2] = [0x00, 0x00];

/// Bolt message codec for framing.
#[derive(Debug)]
pub struct BoltCodec {
    /// Maximum message size
    max_message_size: usize,
    /// Buffer for accumulating chunks
    message_buffer: BytesMut,
    /// Reusable buffer for outgoing message bodies
    scratch: BytesMut,
}

impl BoltCodec {
    /// Create a new codec with default settings.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a codec with custom max message size.
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            message_buffer: BytesMut::with_capacity(4096),
            scratch: BytesMut::with_capacity(4096),
        }
    }

    /// Write `data` as chunks followed by the end marker.
    fn write_chunks(data: &[u8], dst: &mut BytesMut) {
        dst.reserve(data.len() + 2 * (data.len() / MAX_CHUNK_SIZE + 2));
        for chunk in data.chunks(MAX_CHUNK_SIZE) {
            dst.put_u16(chunk.len() as u16);
            dst.put_slice(chunk);
        }
        dst.put_slice(&END_MARKER);
    }

    /// Pack a structure and frame it.
    fn encode_structure(&mut self, s: &PackStreamStructure, dst: &mut BytesMut) -> Result<(), BoltError> {
        self.scratch.clear();
        Packer::new(&mut self.scratch).pack_structure(s)?;
        Self::write_chunks(&self.scratch, dst);
        Ok(())
    }

    /// Decode one framed message into its structure.
    fn decode_structure(&mut self, src: &mut BytesMut) -> Result<Option<PackStreamStructure>, BoltError> {
        match self.decode(src)? {
            Some(PackStreamValue::Structure(s)) => Ok(Some(s)),
            Some(other) => Err(BoltError::protocol(format!(
                "expected message structure, got {}",
                other.type_name()
            ))),
            None => Ok(None),
        }
    }
}

impl Default for BoltCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BoltCodec {
    type Item = PackStreamValue;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < 2 {
                return Ok(None);
            }

            let chunk_size = u16::from_be_bytes([src[0], src[1]]) as usize;

            if chunk_size == 0 {
                src.advance(2);

                if self.message_buffer.is_empty() {
                    // NOOP
                    continue;
                }

                let message_data = self.message_buffer.split();
                let value = decode(&message_data)?;
                return Ok(Some(value));
            }

            if src.len() < 2 + chunk_size {
                src.reserve(2 + chunk_size - src.len());
                return Ok(None);
            }

            let size = self.message_buffer.len() + chunk_size;
            if size > self.max_message_size {
                return Err(BoltError::MessageTooLarge {
                    size,
                    max: self.max_message_size,
                });
            }

            src.advance(2);
            self.message_buffer.extend_from_slice(&src[..chunk_size]);
            src.advance(chunk_size);
        }
    }
}

impl Encoder<PackStreamValue> for BoltCodec {
    type Error = BoltError;

    fn encode(&mut self, item: PackStreamValue, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.scratch.clear();
        Packer::new(&mut self.scratch).pack(&item)?;
        Self::write_chunks(&self.scratch, dst);
        Ok(())
    }
}

/// Server-side codec: decodes requests, encodes responses.
#[derive(Debug, Default)]
pub struct BoltRequestCodec {
    inner: BoltCodec,
}

impl BoltRequestCodec {
    /// Create a new request codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for BoltRequestCodec {
    type Item = BoltRequest;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode_structure(src)? {
            Some(s) => Ok(Some(BoltRequest::from_structure(&s)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<BoltResponse> for BoltRequestCodec {
    type Error = BoltError;

    fn encode(&mut self, item: BoltResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.inner.encode_structure(&item.to_structure(), dst)
    }
}

/// Client-side codec: encodes requests, decodes responses.
#[derive(Debug, Default)]
pub struct BoltResponseCodec {
    inner: BoltCodec,
}

impl BoltResponseCodec {
    /// Create a new response codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom inbound message limit.
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self {
            inner: BoltCodec::with_max_size(max_message_size),
        }
    }
}

impl Decoder for BoltResponseCodec {
    type Item = BoltResponse;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode_structure(src)? {
            Some(s) => Ok(Some(BoltResponse::from_structure(&s)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<&BoltRequest> for BoltResponseCodec {
    type Error = BoltError;

    fn encode(&mut self, item: &BoltRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.inner.encode_structure(&item.to_structure(), dst)
    }
}
