//! Peer-to-peer link
//!
//! Moves tagged values between two instances of this program. Uses the engine
//! wire format plus the Blob tag for NumPy arrays; the client identifies itself
//! with a tagged Int32 right after connecting.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use super::{bind_single, resolve_host, Channel, ChannelError, ChannelOptions, ChannelResult};
use crate::protocol::{ArrayError, NumericArray, Value, PEER_LINK_CODE};

/// Server side of the peer link
pub struct PeerServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    options: ChannelOptions,
}

impl PeerServer {
    pub async fn bind(ip: IpAddr, port: u16, options: ChannelOptions) -> ChannelResult<Self> {
        let listener = bind_single(SocketAddr::new(ip, port))?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Peer link listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            options,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one client and check its identification value
    pub async fn accept(self) -> ChannelResult<PeerLink> {
        let accept = self.listener.accept();
        let (stream, addr) = match self.options.accept_timeout {
            Some(timeout) => tokio::time::timeout(timeout, accept)
                .await
                .map_err(|_| ChannelError::Timeout(timeout))??,
            None => accept.await?,
        };
        tracing::info!("Peer connected from {}", addr);

        let channel = Channel::peer_accept_handshake(stream, PEER_LINK_CODE, &self.options)
            .await?
            .with_peer_addr(addr);
        tracing::debug!("Got peer code from {}", addr);
        Ok(PeerLink { channel })
    }
}

/// Client side of the peer link
pub struct PeerClient;

impl PeerClient {
    /// Connect to a peer-link server and send the identification value
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        options: ChannelOptions,
    ) -> ChannelResult<PeerLink> {
        let addr = resolve_host(host, port).await?;
        tracing::info!("Connecting to peer at {}", addr);

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ChannelError::Timeout(connect_timeout))??;
        stream.set_nodelay(true)?;

        let channel = Channel::peer_connect_handshake(stream, PEER_LINK_CODE, &options)
            .await?
            .with_peer_addr(addr);
        tracing::debug!("Sent peer code to {}", addr);
        Ok(PeerLink { channel })
    }
}

/// An open peer link
pub struct PeerLink {
    channel: Channel,
}

impl PeerLink {
    pub async fn send(&mut self, value: &Value) -> ChannelResult<()> {
        self.channel.send(value).await
    }

    /// Send a numeric array as an NPY blob
    pub async fn send_array(&mut self, array: &NumericArray) -> ChannelResult<()> {
        self.channel.send(&Value::Blob(array.to_npy())).await
    }

    pub async fn recv(&mut self) -> ChannelResult<Value> {
        self.channel.recv().await
    }

    /// Decode a received blob as a numeric array
    pub fn decode_array(value: &Value) -> Option<Result<NumericArray, ArrayError>> {
        match value {
            Value::Blob(bytes) => Some(NumericArray::from_npy(bytes)),
            _ => None,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub async fn close(&mut self) -> ChannelResult<()> {
        tracing::info!("Cleaning up peer link");
        self.channel.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncWriteExt;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn test_peer_link_exchange() {
        let server = PeerServer::bind(LOCALHOST, 0, ChannelOptions::new()).await.unwrap();
        let port = server.local_addr().port();

        let client = tokio::spawn(async move {
            let mut link = PeerClient::connect("127.0.0.1", port, Duration::from_secs(5), ChannelOptions::new())
                .await
                .unwrap();
            link.send(&Value::from("James")).await.unwrap();
            link.send_array(&NumericArray::from_rows(&[[1.0, 2.0], [3.0, 4.0]]))
                .await
                .unwrap();
            for i in 0..3 {
                link.send(&Value::Int(i)).await.unwrap();
            }
            link.send(&Value::Int(-1)).await.unwrap();
            link.recv().await.unwrap()
        });

        let mut link = server.accept().await.unwrap();
        let mut received = Vec::new();
        loop {
            let value = link.recv().await.unwrap();
            if value == Value::Int(-1) {
                break;
            }
            received.push(value);
        }
        link.send(&Value::from("done")).await.unwrap();

        assert_eq!(received.len(), 5);
        assert_eq!(received[0], Value::from("James"));
        let array = PeerLink::decode_array(&received[1]).unwrap().unwrap();
        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array.data(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(received[4], Value::Int(2));
        assert!(PeerLink::decode_array(&received[0]).is_none());

        assert_eq!(client.await.unwrap(), Value::from("done"));
    }

    #[tokio::test]
    async fn test_wrong_peer_code() {
        let server = PeerServer::bind(LOCALHOST, 0, ChannelOptions::new()).await.unwrap();
        let addr = server.local_addr();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            // tagged Int32 99
            stream.write_all(&[1, 0, 0, 0, 99, 0, 0, 0]).await.unwrap();
            stream
        });

        match server.accept().await {
            Err(ChannelError::HandshakeMismatch { expected, received }) => {
                assert_eq!(expected, PEER_LINK_CODE);
                assert_eq!(received, Value::Int(99));
            }
            _ => panic!("Expected handshake mismatch"),
        }
        drop(client.await.unwrap());
    }
}
