//! Engine listener
//!
//! The controlling side is the TCP server: it binds one port of the channel
//! family, accepts exactly one engine connection and verifies the magic number
//! before handing out an open [`Channel`].

use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;

use super::{bind_single, Channel, ChannelError, ChannelOptions, ChannelResult};
use crate::protocol::{BASE_PORT, CHANNEL_COUNT, FISH_MAGIC};

/// Port for an engine channel index
pub fn channel_port(base_port: u16, channel: u8) -> ChannelResult<u16> {
    if channel >= CHANNEL_COUNT {
        return Err(ChannelError::InvalidChannel(channel));
    }
    base_port
        .checked_add(u16::from(channel))
        .ok_or(ChannelError::InvalidChannel(channel))
}

/// A bound, listening socket waiting for the engine
pub struct EngineListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    options: ChannelOptions,
}

impl EngineListener {
    /// Bind to an explicit address
    pub async fn bind(addr: SocketAddr, options: ChannelOptions) -> ChannelResult<Self> {
        let listener = bind_single(addr)?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Listening for engine on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            options,
        })
    }

    /// Bind the well-known port for a channel index (3333 + index)
    pub async fn bind_channel(ip: IpAddr, channel: u8, options: ChannelOptions) -> ChannelResult<Self> {
        let port = channel_port(BASE_PORT, channel)?;
        Self::bind(SocketAddr::new(ip, port), options).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept exactly one connection and perform the handshake.
    ///
    /// Consumes the listener: further connection attempts on this port are refused.
    pub async fn accept(self) -> ChannelResult<Channel> {
        let accept = self.listener.accept();
        let (stream, addr) = match self.options.accept_timeout {
            Some(timeout) => tokio::time::timeout(timeout, accept)
                .await
                .map_err(|_| ChannelError::Timeout(timeout))??,
            None => accept.await?,
        };
        tracing::info!("Socket connection established by {}", addr);
        stream.set_nodelay(true)?;

        let channel = Channel::engine_handshake(stream, FISH_MAGIC, &self.options)
            .await?
            .with_peer_addr(addr);
        tracing::info!("Handshake with {} complete, channel {} open", addr, channel.id());
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Value;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_channel_ports() {
        assert_eq!(channel_port(BASE_PORT, 0).unwrap(), 3333);
        assert_eq!(channel_port(BASE_PORT, 5).unwrap(), 3338);
        assert!(matches!(channel_port(BASE_PORT, 6), Err(ChannelError::InvalidChannel(6))));
    }

    #[tokio::test]
    async fn test_accept_and_handshake() {
        let listener = EngineListener::bind(loopback(), ChannelOptions::new()).await.unwrap();
        let addr = listener.local_addr();

        let engine = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&FISH_MAGIC.to_le_bytes()).await.unwrap();
            // tagged Int32 7
            stream.write_all(&[1, 0, 0, 0, 7, 0, 0, 0]).await.unwrap();
            let mut reply = [0u8; 8];
            stream.read_exact(&mut reply).await.unwrap();
            reply
        });

        let mut channel = listener.accept().await.unwrap();
        assert!(channel.is_open());
        assert!(channel.peer_addr().is_some());
        assert_eq!(channel.recv().await.unwrap(), Value::Int(7));
        channel.send(&Value::Int(8)).await.unwrap();

        assert_eq!(engine.await.unwrap(), [1, 0, 0, 0, 8, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_wrong_magic_is_rejected() {
        let listener = EngineListener::bind(loopback(), ChannelOptions::new()).await.unwrap();
        let addr = listener.local_addr();

        let engine = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&1234i32.to_le_bytes()).await.unwrap();
            stream
        });

        let result = listener.accept().await;
        assert!(matches!(result, Err(ChannelError::HandshakeMismatch { .. })));
        drop(engine.await.unwrap());
    }

    #[tokio::test]
    async fn test_accept_timeout() {
        let options = ChannelOptions::new().with_accept_timeout(Duration::from_millis(20));
        let listener = EngineListener::bind(loopback(), options).await.unwrap();
        assert!(matches!(listener.accept().await, Err(ChannelError::Timeout(_))));
    }
}
