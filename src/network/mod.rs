//! Network module - Handles the TCP side of the engine and peer connections
//!
//! Provides:
//! - Channel: one handshaked socket carrying tagged values
//! - Listener for the engine (server role, magic-number handshake)
//! - Peer-to-peer link server and client

mod channel;
mod listener;
mod peer;

pub use channel::*;
pub use listener::*;
pub use peer::*;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};

/// Timeouts applied to one channel's blocking operations
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelOptions {
    /// Bound on waiting for the peer to connect (None waits until cancelled)
    pub accept_timeout: Option<Duration>,
    /// Bound on waiting for each incoming frame (None waits until cancelled)
    pub read_timeout: Option<Duration>,
}

impl ChannelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = Some(timeout);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}

/// Bind a listener that accepts a single connection, with SO_REUSEADDR set
/// so a restarted session can rebind the same port right away
pub(crate) fn bind_single(addr: SocketAddr) -> ChannelResult<TcpListener> {
    let bind = || -> std::io::Result<TcpListener> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(1)
    };

    bind().map_err(|e| ChannelError::Bind(format!("Failed to bind to {}: {}", addr, e)))
}

