//! Bolt protocol connection for client-side use.
//!
//! Owns the byte stream, performs the version handshake and frames
//! messages. Requests are queued into a write buffer and flushed together so
//! that RUN and PULL travel in one write.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::bolt::codec::BoltResponseCodec;
use crate::bolt::handshake::{client_preamble, HANDSHAKE_RESPONSE_SIZE};
use crate::bolt::{BoltError, BoltRequest, BoltResponse, BoltResult, BoltVersion, HandshakeError};
use crate::driver::driver::ServerAddress;
use crate::driver::transport::BoxTransport;

use super::SUPPORTED_VERSIONS;

/// Run `fut`, failing with `TimedOut` once `limit` elapses.
async fn timed<T>(limit: Option<Duration>, fut: impl Future<Output = io::Result<T>>) -> io::Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("no response within {:?}", limit)))?,
        None => fut.await,
    }
}

/// Client-side Bolt connection.
pub struct BoltConnection {
    /// Byte stream
    transport: BoxTransport,
    /// Response codec (decodes responses, encodes requests)
    codec: BoltResponseCodec,
    /// Read buffer
    read_buffer: BytesMut,
    /// Write buffer
    write_buffer: BytesMut,
    /// Negotiated protocol version
    version: BoltVersion,
    /// Server address
    address: ServerAddress,
    /// Per-operation I/O timeout
    io_timeout: Option<Duration>,
    /// Requests sent whose summary (SUCCESS/FAILURE/IGNORED) is still due
    outstanding: usize,
    /// Set after any transport error
    broken: bool,
}

impl BoltConnection {
    /// Perform the Bolt handshake over an already opened transport.
    pub async fn handshake(
        mut transport: BoxTransport,
        address: ServerAddress,
        io_timeout: Option<Duration>,
    ) -> BoltResult<Self> {
        let preamble = client_preamble(&SUPPORTED_VERSIONS);
        timed(io_timeout, transport.write_all(&preamble)).await?;
        timed(io_timeout, transport.flush()).await?;

        let mut response = [0u8; HANDSHAKE_RESPONSE_SIZE];
        timed(io_timeout, transport.read_exact(&mut response)).await?;

        if response == [0; HANDSHAKE_RESPONSE_SIZE] {
            return Err(HandshakeError::NoCommonVersion.into());
        }
        let version = BoltVersion::from_bytes(response).ok_or(HandshakeError::UnknownVersion(response))?;
        debug!(%address, %version, "bolt handshake complete");

        Ok(Self {
            transport,
            codec: BoltResponseCodec::new(),
            read_buffer: BytesMut::with_capacity(8192),
            write_buffer: BytesMut::with_capacity(8192),
            version,
            address,
            io_timeout,
            outstanding: 0,
            broken: false,
        })
    }

    /// Encode a request into the write buffer without sending it.
    pub fn queue(&mut self, request: &BoltRequest) -> BoltResult<()> {
        self.codec.encode(request, &mut self.write_buffer)?;
        self.outstanding += 1;
        Ok(())
    }

    /// Write every queued request.
    pub async fn flush(&mut self) -> BoltResult<()> {
        let result = self.flush_inner().await;
        self.note(result)
    }

    async fn flush_inner(&mut self) -> BoltResult<()> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }
        timed(self.io_timeout, self.transport.write_all(&self.write_buffer)).await?;
        timed(self.io_timeout, self.transport.flush()).await?;
        self.write_buffer.clear();
        Ok(())
    }

    /// Receive the next response message.
    pub async fn recv(&mut self) -> BoltResult<BoltResponse> {
        let result = self.recv_inner().await;
        if let Ok(response) = &result {
            if !matches!(response, BoltResponse::Record(_)) {
                self.outstanding = self.outstanding.saturating_sub(1);
            }
        }
        self.note(result)
    }

    async fn recv_inner(&mut self) -> BoltResult<BoltResponse> {
        loop {
            if let Some(response) = self.codec.decode(&mut self.read_buffer)? {
                return Ok(response);
            }

            let n = timed(self.io_timeout, self.transport.read_buf(&mut self.read_buffer)).await?;
            if n == 0 {
                return Err(BoltError::ConnectionClosed);
            }
        }
    }

    /// Queue, flush and receive one response.
    pub async fn request(&mut self, request: &BoltRequest) -> BoltResult<BoltResponse> {
        self.queue(request)?;
        self.flush().await?;
        self.recv().await
    }

    /// Send GOODBYE best-effort and shut the stream down.
    pub async fn close(&mut self) {
        if !self.broken {
            self.write_buffer.clear();
            if self.queue(&BoltRequest::Goodbye).is_ok() {
                let _ = self.flush().await;
            }
            let _ = timed(self.io_timeout, self.transport.shutdown()).await;
        }
        self.broken = true;
    }

    fn note<T>(&mut self, result: BoltResult<T>) -> BoltResult<T> {
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    /// Negotiated protocol version.
    pub fn version(&self) -> BoltVersion {
        self.version
    }

    /// Server address.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Number of requests whose summary has not been read yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Whether a transport error has been observed.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Set the per-operation I/O timeout.
    pub fn set_io_timeout(&mut self, timeout: Option<Duration>) {
        self.io_timeout = timeout;
    }
}

impl std::fmt::Debug for BoltConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltConnection")
            .field("address", &self.address)
            .field("version", &self.version)
            .field("outstanding", &self.outstanding)
            .field("broken", &self.broken)
            .finish()
    }
}
