//! Server-side stream multiplexing over one relay connection.

use std::net::SocketAddr;

use async_smux::error::MuxError;
use async_smux::{MuxAcceptor, MuxBuilder, MuxConnector};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::BoxStream;
use crate::error::NetError;

/// A mux session in the server role: the remote side opens streams and
/// this side accepts them.
pub struct ServerSession {
    acceptor: tokio::sync::Mutex<MuxAcceptor<BoxStream>>,
    // held so the session stays open while the listener lives
    connector: Mutex<Option<MuxConnector<BoxStream>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: CancellationToken,
}

impl ServerSession {
    /// Wrap `stream` in a server session and start its worker.
    pub fn open(stream: BoxStream) -> Self {
        let mut builder = MuxBuilder::server();
        let (connector, acceptor, worker) = builder.with_connection(stream).build();

        let closed = CancellationToken::new();
        let done = closed.clone();
        let worker = tokio::spawn(async move {
            log_worker_result(worker.await);
            done.cancel();
        });

        Self {
            acceptor: tokio::sync::Mutex::new(acceptor),
            connector: Mutex::new(Some(connector)),
            worker: Mutex::new(Some(worker)),
            closed,
        }
    }

    /// Wait for the next stream opened by the remote side.
    pub async fn accept(&self) -> Result<BoxStream, NetError> {
        let mut acceptor = self.acceptor.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(NetError::ListenerClosed),
            stream = acceptor.accept() => match stream {
                Some(stream) => Ok(Box::new(stream) as BoxStream),
                None => {
                    self.closed.cancel();
                    Err(NetError::ListenerClosed)
                }
            },
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Stop the session worker. Streams already accepted are torn down with it.
    pub fn close(&self) {
        self.closed.cancel();
        self.connector.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn log_worker_result(result: Result<(), MuxError>) {
    match result {
        Ok(()) => debug!("mux session finished"),
        Err(MuxError::ConnectionClosed | MuxError::StreamClosed(_)) => {
            debug!("mux session closed by peer");
        }
        Err(e) => warn!(error = ?e, "mux session failed"),
    }
}

/// Reverse TCP listener backed by a [`ServerSession`].
pub struct MuxListener {
    addr: SocketAddr,
    session: ServerSession,
}

impl MuxListener {
    /// `addr` is the address the relay reported for the bind.
    pub fn new(addr: SocketAddr, session: ServerSession) -> Self {
        Self { addr, session }
    }

    /// Next logical connection accepted by the relay on our behalf.
    pub async fn accept(&self) -> Result<BoxStream, NetError> {
        self.session.accept().await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    pub fn close(&self) {
        self.session.close();
    }
}

impl std::fmt::Debug for MuxListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxListener")
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    fn addr() -> SocketAddr {
        "192.0.2.10:8080".parse().unwrap()
    }

    #[tokio::test]
    async fn accepts_streams_opened_by_peer() {
        let (local, remote) = duplex(64 * 1024);
        let listener = MuxListener::new(addr(), ServerSession::open(Box::new(local)));

        let mut builder = MuxBuilder::client();
        let (connector, _acceptor, worker) = builder.with_connection(remote).build();
        tokio::spawn(worker);

        let mut outbound = connector.connect().unwrap();
        outbound.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        outbound.flush().await.unwrap();

        let mut inbound = listener.accept().await.unwrap();
        let mut buf = [0u8; 18];
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET / HTTP/1.0\r\n\r\n");

        inbound.write_all(b"ok").await.unwrap();
        inbound.flush().await.unwrap();
        let mut reply = [0u8; 2];
        outbound.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ok");

        assert_eq!(listener.local_addr(), addr());
    }

    #[tokio::test]
    async fn accept_after_close_fails() {
        let (local, _remote) = duplex(1024);
        let listener = MuxListener::new(addr(), ServerSession::open(Box::new(local)));
        listener.close();
        assert!(listener.is_closed());
        assert!(matches!(listener.accept().await, Err(NetError::ListenerClosed)));
    }

    #[tokio::test]
    async fn session_ends_when_peer_goes_away() {
        let (local, remote) = duplex(1024);
        let listener = MuxListener::new(addr(), ServerSession::open(Box::new(local)));
        drop(remote);
        assert!(matches!(listener.accept().await, Err(NetError::ListenerClosed)));
    }
}
