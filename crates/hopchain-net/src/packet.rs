//! Datagram channel abstraction.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// A shared, message-oriented channel.
///
/// Implemented by raw UDP sockets and by [`UdpTunConn`](crate::UdpTunConn),
/// which frames datagrams over a stream.
#[async_trait]
pub trait PacketConn: Send + Sync + 'static {
    /// Receive one datagram, returning its length and source address.
    ///
    /// Datagrams longer than `buf` are truncated.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Send one datagram to `target`.
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Release the underlying transport.
    async fn close(&self) -> io::Result<()>;
}

#[async_trait]
impl PacketConn for UdpSocket {
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn close(&self) -> io::Result<()> {
        // the socket is released when the last handle drops
        Ok(())
    }
}
