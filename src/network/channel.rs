//! Channel handling
//!
//! A channel owns exactly one stream to one peer and moves tagged values over it.
//! It is only handed out after the handshake has succeeded, and it closes itself
//! on the first transport or protocol error.

use bytes::BytesMut;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::ChannelOptions;
use crate::protocol::{CodecError, Dialect, FrameCodec, Value};

/// Channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("Cannot send value: {0}")]
    Encode(CodecError),

    #[error("Handshake mismatch: expected {expected}, received {received}")]
    HandshakeMismatch { expected: i32, received: Value },

    #[error("Channel closed")]
    Closed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Bind failed: {0}")]
    Bind(String),

    #[error("Channel index {0} out of range (0..=5)")]
    InvalidChannel(u8),
}

impl ChannelError {
    /// Whether the channel must be discarded after this error.
    /// Only a value rejected before any byte was written leaves it usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ChannelError::Encode(_))
    }

    /// The peer went away or the channel was already torn down
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelError::Closed)
    }
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// State of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Stream accepted/connected, handshake not yet verified
    Handshaking,
    /// Handshake complete, ready for requests
    Open,
    /// Torn down locally, by the peer, or by a fatal error
    Closed,
}

/// Identity of a channel, used to tie proxies to the channel that produced them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ChannelId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::next()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Channel statistics
#[derive(Debug, Default, Clone)]
pub struct ChannelStats {
    /// Frames sent
    pub frames_sent: u64,
    /// Frames received
    pub frames_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

/// One established connection carrying tagged values
pub struct Channel<S = TcpStream> {
    id: ChannelId,
    stream: S,
    peer_addr: Option<SocketAddr>,
    codec: FrameCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
    read_timeout: Option<Duration>,
    state: ChannelState,
    stats: ChannelStats,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a freshly accepted/connected stream. The channel stays in
    /// `Handshaking` until one of the handshake methods succeeds.
    pub(crate) fn new(stream: S, dialect: Dialect, options: &ChannelOptions) -> Self {
        Self {
            id: ChannelId::next(),
            stream,
            peer_addr: None,
            codec: FrameCodec::new(dialect),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            read_timeout: options.read_timeout,
            state: ChannelState::Handshaking,
            stats: ChannelStats::default(),
        }
    }

    pub(crate) fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Engine handshake: read one untagged Int32 and compare it to `expected`
    pub async fn engine_handshake(stream: S, expected: i32, options: &ChannelOptions) -> ChannelResult<Self> {
        let mut channel = Self::new(stream, Dialect::Engine, options);
        let received = channel.recv_raw_int().await?;
        tracing::debug!("Handshake got: {}", received);

        if received != expected {
            channel.state = ChannelState::Closed;
            return Err(ChannelError::HandshakeMismatch {
                expected,
                received: Value::Int(received),
            });
        }

        channel.state = ChannelState::Open;
        Ok(channel)
    }

    /// Peer-link server handshake: the first frame must be the tagged Int32 `expected`
    pub async fn peer_accept_handshake(stream: S, expected: i32, options: &ChannelOptions) -> ChannelResult<Self> {
        let mut channel = Self::new(stream, Dialect::Peer, options);
        let received = channel.recv_frame().await?;

        if received != Value::Int(expected) {
            channel.state = ChannelState::Closed;
            return Err(ChannelError::HandshakeMismatch { expected, received });
        }

        channel.state = ChannelState::Open;
        Ok(channel)
    }

    /// Peer-link client handshake: send the tagged Int32 `code`
    pub async fn peer_connect_handshake(stream: S, code: i32, options: &ChannelOptions) -> ChannelResult<Self> {
        let mut channel = Self::new(stream, Dialect::Peer, options);
        channel.send_frames(&[Value::Int(code)]).await?;
        channel.state = ChannelState::Open;
        Ok(channel)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Send a single value
    pub async fn send(&mut self, value: &Value) -> ChannelResult<()> {
        self.send_all(std::slice::from_ref(value)).await
    }

    /// Send several values back to back in one write
    pub async fn send_all(&mut self, values: &[Value]) -> ChannelResult<()> {
        self.ensure_open()?;
        let result = self.send_frames(values).await;
        self.guard(result)
    }

    /// Receive the next value, waiting until one is complete
    pub async fn recv(&mut self) -> ChannelResult<Value> {
        self.ensure_open()?;
        let result = self.recv_frame().await;
        self.guard(result)
    }

    /// Send a teardown request and mark the channel closed; no reply is read
    pub(crate) async fn send_final(&mut self, frames: &[Value]) -> ChannelResult<()> {
        let result = self.send_all(frames).await;
        self.state = ChannelState::Closed;
        result
    }

    /// Close the channel, shutting down the write half
    pub async fn close(&mut self) -> ChannelResult<()> {
        if self.state == ChannelState::Closed {
            return Ok(());
        }
        self.state = ChannelState::Closed;
        self.stream.shutdown().await?;
        tracing::info!("Channel {} closed", self.id);
        Ok(())
    }

    fn ensure_open(&self) -> ChannelResult<()> {
        match self.state {
            ChannelState::Open => Ok(()),
            _ => Err(ChannelError::Closed),
        }
    }

    fn guard<T>(&mut self, result: ChannelResult<T>) -> ChannelResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() && self.state != ChannelState::Closed {
                tracing::warn!("Channel {} broken: {}", self.id, e);
                self.state = ChannelState::Closed;
            }
        }
        result
    }

    async fn send_frames(&mut self, values: &[Value]) -> ChannelResult<()> {
        self.write_buf.clear();
        for value in values {
            self.codec
                .encode(value, &mut self.write_buf)
                .map_err(ChannelError::Encode)?;
        }

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.frames_sent += values.len() as u64;
        self.stats.bytes_sent += self.write_buf.len() as u64;
        Ok(())
    }

    async fn recv_frame(&mut self) -> ChannelResult<Value> {
        loop {
            if let Some(value) = self.codec.decode(&mut self.read_buf)? {
                self.stats.frames_received += 1;
                return Ok(value);
            }
            self.fill().await?;
        }
    }

    async fn recv_raw_int(&mut self) -> ChannelResult<i32> {
        loop {
            if let Some(value) = self.codec.decode_raw_int(&mut self.read_buf) {
                return Ok(value);
            }
            self.fill().await?;
        }
    }

    /// Read more bytes into the buffer, bounded by the read timeout
    async fn fill(&mut self) -> ChannelResult<()> {
        let mut buf = [0u8; 4096];
        let n = match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.stream.read(&mut buf))
                .await
                .map_err(|_| ChannelError::Timeout(timeout))??,
            None => self.stream.read(&mut buf).await?,
        };

        if n == 0 {
            // short read: the peer went away mid-frame or between frames
            return Err(ChannelError::Closed);
        }

        self.read_buf.extend_from_slice(&buf[..n]);
        self.stats.bytes_received += n as u64;
        Ok(())
    }
}
