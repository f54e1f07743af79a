//! Substrates that carry raw segments between two peers.

use crate::host::TransportError;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::{
    net::UdpSocket,
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};
use tracing::trace;

/// Sends and receives opaque datagrams to and from one peer.
#[async_trait]
pub trait Datagram: Send {
    /// Transmits one datagram, returning the number of bytes accepted.
    async fn send(&mut self, datagram: &[u8]) -> Result<usize, TransportError>;

    /// Waits for the next datagram. Must be cancel safe: if the future is
    /// dropped before it completes, no datagram is lost.
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// One end of an in-process link. Datagrams arrive in order and none are
/// dropped.
#[derive(Debug)]
pub struct MemoryLink {
    send: UnboundedSender<Vec<u8>>,
    recv: UnboundedReceiver<Vec<u8>>,
}

impl MemoryLink {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_send, b_recv) = unbounded_channel();
        let (b_send, a_recv) = unbounded_channel();
        (
            Self {
                send: a_send,
                recv: a_recv,
            },
            Self {
                send: b_send,
                recv: b_recv,
            },
        )
    }
}

#[async_trait]
impl Datagram for MemoryLink {
    async fn send(&mut self, datagram: &[u8]) -> Result<usize, TransportError> {
        self.send
            .send(datagram.to_vec())
            .map_err(|_| TransportError::Disconnected)?;
        Ok(datagram.len())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.recv.recv().await.ok_or(TransportError::Disconnected)
    }
}

/// A link over UDP. A listening link locks onto the first peer it hears from
/// and ignores everyone else afterwards.
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    buf: Vec<u8>,
}

impl UdpLink {
    /// Binds to `local` and sends to `remote`.
    pub async fn connect(local: SocketAddr, remote: SocketAddr) -> Result<Self, TransportError> {
        Ok(Self {
            socket: UdpSocket::bind(local).await?,
            peer: Some(remote),
            buf: vec![0; u16::MAX as usize],
        })
    }

    /// Binds to `local` and waits to learn the peer from its first datagram.
    pub async fn listen(local: SocketAddr) -> Result<Self, TransportError> {
        Ok(Self {
            socket: UdpSocket::bind(local).await?,
            peer: None,
            buf: vec![0; u16::MAX as usize],
        })
    }

    /// The address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// The peer, once known
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

#[async_trait]
impl Datagram for UdpLink {
    async fn send(&mut self, datagram: &[u8]) -> Result<usize, TransportError> {
        let peer = self.peer.ok_or(TransportError::NotConnected)?;
        Ok(self.socket.send_to(datagram, peer).await?)
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            let (len, from) = self.socket.recv_from(&mut self.buf).await?;
            match self.peer {
                None => self.peer = Some(from),
                Some(peer) if peer != from => {
                    trace!(%from, "Ignoring datagram from a stranger");
                    continue;
                }
                Some(_) => {}
            }
            return Ok(self.buf[..len].to_vec());
        }
    }
}
