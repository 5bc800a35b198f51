//! Listener returned by a bind.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::BoxStream;
use crate::error::NetError;
use crate::mux::MuxListener;
use crate::udp::{PeerConn, UdpListener};

/// A logical connection accepted from a [`BoundListener`].
pub enum Accepted {
    Stream(BoxStream),
    Datagram(Arc<PeerConn>),
}

impl std::fmt::Debug for Accepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Accepted::Stream(_) => f.write_str("Accepted::Stream"),
            Accepted::Datagram(conn) => f.debug_tuple("Accepted::Datagram").field(conn).finish(),
        }
    }
}

/// Listener produced by a bind.
///
/// `Tcp` and `Udp` are reverse listeners opened on a relay; `Direct` is a
/// plain local TCP listener used when a route has no hops.
#[derive(Debug)]
pub enum BoundListener {
    Tcp(MuxListener),
    Udp(UdpListener),
    Direct(TcpListener),
}

impl BoundListener {
    pub async fn accept(&self) -> Result<Accepted, NetError> {
        match self {
            BoundListener::Tcp(l) => l.accept().await.map(Accepted::Stream),
            BoundListener::Udp(l) => l.accept().await.map(Accepted::Datagram),
            BoundListener::Direct(l) => {
                let (stream, _) = l.accept().await?;
                Ok(Accepted::Stream(Box::new(stream)))
            }
        }
    }

    /// Address the listener is bound on.
    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        match self {
            BoundListener::Tcp(l) => Ok(l.local_addr()),
            BoundListener::Udp(l) => Ok(l.local_addr()),
            BoundListener::Direct(l) => Ok(l.local_addr()?),
        }
    }

    pub fn network(&self) -> &'static str {
        match self {
            BoundListener::Tcp(_) | BoundListener::Direct(_) => "tcp",
            BoundListener::Udp(_) => "udp",
        }
    }

    /// Close the listener. A `Direct` listener is released on drop.
    pub async fn close(&self) -> Result<(), NetError> {
        match self {
            BoundListener::Tcp(l) => {
                l.close();
                Ok(())
            }
            BoundListener::Udp(l) => l.close().await,
            BoundListener::Direct(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UdpListenerConfig;
    use crate::packet::PacketConn;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpStream, UdpSocket};

    #[tokio::test]
    async fn direct_listener_accepts_tcp() {
        let listener = BoundListener::Direct(TcpListener::bind("127.0.0.1:0").await.unwrap());
        let addr = listener.local_addr().unwrap();
        assert_eq!(listener.network(), "tcp");

        let client = tokio::spawn(async move {
            let mut s = TcpStream::connect(addr).await.unwrap();
            s.write_all(b"hi").await.unwrap();
        });
        match listener.accept().await.unwrap() {
            Accepted::Stream(mut s) => {
                let mut buf = [0u8; 2];
                s.read_exact(&mut buf).await.unwrap();
                assert_eq!(&buf, b"hi");
            }
            other => panic!("unexpected {:?}", other),
        }
        client.await.unwrap();
    }

    #[tokio::test]
    async fn udp_listener_over_raw_socket() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let local = socket.local_addr().unwrap();
        let channel: Arc<dyn PacketConn> = Arc::new(socket);
        let listener = BoundListener::Udp(UdpListener::new(
            channel,
            local,
            UdpListenerConfig::default(),
        ));
        assert_eq!(listener.network(), "udp");

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"ping", local).await.unwrap();

        let Accepted::Datagram(conn) = listener.accept().await.unwrap() else {
            panic!("expected datagram conn");
        };
        assert_eq!(conn.peer_addr(), client.local_addr().unwrap());
        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        conn.write(b"pong").await.unwrap();
        let (n, from) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!((&buf[..n], from), (&b"pong"[..], local));

        listener.close().await.unwrap();
        assert!(matches!(listener.accept().await, Err(NetError::ListenerClosed)));
    }
}
