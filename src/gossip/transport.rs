use anyhow::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use super::types::GossipMessage;

/// Datagram-style carrier for gossip. Sends are fire-and-forget; loss is
/// healed by later rounds.
#[async_trait]
pub trait GossipTransport: Send + Sync + 'static {
    async fn send(&self, target: SocketAddr, msg: &GossipMessage) -> Result<()>;

    async fn recv(&self) -> Result<(SocketAddr, GossipMessage)>;

    fn local_addr(&self) -> SocketAddr;
}

/// Gossip over UDP, bincode-encoded.
pub struct UdpTransport {
    socket: UdpSocket,
    addr: SocketAddr,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let addr = socket.local_addr()?;
        Ok(Self { socket, addr })
    }
}

#[async_trait]
impl GossipTransport for UdpTransport {
    async fn send(&self, target: SocketAddr, msg: &GossipMessage) -> Result<()> {
        let encoded = bincode::serialize(msg)?;
        self.socket.send_to(&encoded, target).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<(SocketAddr, GossipMessage)> {
        let mut buf = vec![0u8; 65536];
        let (len, src) = self.socket.recv_from(&mut buf).await?;
        let msg = bincode::deserialize::<GossipMessage>(&buf[..len])?;
        Ok((src, msg))
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}
