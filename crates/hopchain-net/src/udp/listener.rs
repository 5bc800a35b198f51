//! Accept loop that splits one datagram channel into per-peer connections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::conn::{PeerConn, PeerConnConfig};
use crate::BindOptions;
use crate::error::NetError;
use crate::packet::PacketConn;

/// Tuning for a [`UdpListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpListenerConfig {
    /// Capacity of the accept queue.
    pub backlog: usize,
    /// Per-peer inbound queue depth.
    pub queue_size: usize,
    /// Receive buffer size; longer datagrams are truncated.
    pub buffer_size: usize,
    /// Peer idle TTL. Zero disables expiry.
    pub ttl: Duration,
}

impl Default for UdpListenerConfig {
    fn default() -> Self {
        Self::from(&BindOptions::default())
    }
}

impl From<&BindOptions> for UdpListenerConfig {
    fn from(opts: &BindOptions) -> Self {
        Self {
            backlog: opts.backlog,
            queue_size: opts.udp_queue_size,
            buffer_size: opts.udp_buffer_size,
            ttl: opts.udp_ttl,
        }
    }
}

struct Shared {
    channel: Arc<dyn PacketConn>,
    local: SocketAddr,
    conns: Mutex<HashMap<SocketAddr, Arc<PeerConn>>>,
    config: UdpListenerConfig,
    closed: CancellationToken,
    next_id: AtomicU64,
}

impl Shared {
    /// Mark closed and close every live connection.
    ///
    /// Returns false if the listener was already closed.
    fn shutdown(&self) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        self.closed.cancel();
        // close hooks take the table lock, so drain before closing
        let conns = std::mem::take(&mut *self.conns.lock());
        for conn in conns.into_values() {
            let _ = conn.close();
        }
        true
    }
}

/// Listener handing out one [`PeerConn`] per remote address seen on a
/// shared datagram channel.
pub struct UdpListener {
    shared: Arc<Shared>,
    accept_rx: tokio::sync::Mutex<mpsc::Receiver<Arc<PeerConn>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl UdpListener {
    /// Start demultiplexing `channel`.
    ///
    /// Spawns the single reader task, so this must be called inside a Tokio
    /// runtime.
    pub fn new(channel: Arc<dyn PacketConn>, local: SocketAddr, config: UdpListenerConfig) -> Self {
        let (accept_tx, accept_rx) = mpsc::channel(config.backlog.max(1));
        let shared = Arc::new(Shared {
            channel,
            local,
            conns: Mutex::new(HashMap::new()),
            config,
            closed: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        });
        let reader = tokio::spawn(read_loop(shared.clone(), accept_tx));
        Self {
            shared,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            reader: Mutex::new(Some(reader)),
        }
    }

    /// Wait for the next new peer.
    pub async fn accept(&self) -> Result<Arc<PeerConn>, NetError> {
        let mut rx = self.accept_rx.lock().await;
        tokio::select! {
            biased;
            _ = self.shared.closed.cancelled() => Err(NetError::ListenerClosed),
            conn = rx.recv() => conn.ok_or(NetError::ListenerClosed),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local
    }

    /// Number of live peer connections.
    pub fn peer_count(&self) -> usize {
        self.shared.conns.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Stop reading, close every peer connection and release the channel.
    pub async fn close(&self) -> Result<(), NetError> {
        if !self.shared.shutdown() {
            return Ok(());
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.shared.channel.close().await?;
        Ok(())
    }
}

impl Drop for UdpListener {
    fn drop(&mut self) {
        self.shared.shutdown();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for UdpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpListener")
            .field("local", &self.shared.local)
            .field("peers", &self.peer_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn read_loop(shared: Arc<Shared>, accept_tx: mpsc::Sender<Arc<PeerConn>>) {
    let mut buf = vec![0u8; shared.config.buffer_size.max(1)];
    loop {
        let received = tokio::select! {
            biased;
            _ = shared.closed.cancelled() => return,
            r = shared.channel.recv_from(&mut buf) => r,
        };
        let (n, peer) = match received {
            Ok(r) => r,
            Err(e) => {
                warn!(local = %shared.local, error = %e, "datagram channel read failed");
                shared.shutdown();
                return;
            }
        };

        let Some(conn) = conn_for_peer(&shared, &accept_tx, peer) else {
            continue;
        };
        if let Err(e) = conn.send(Bytes::copy_from_slice(&buf[..n])) {
            warn!(peer = %peer, len = n, error = %e, kind = hopchain_core::ERROR_OVERFLOW, "dropping datagram");
        }
    }
}

/// Look up or create the connection for `peer`.
///
/// A new connection that does not fit the accept queue is closed and the
/// datagram that created it is dropped.
fn conn_for_peer(
    shared: &Arc<Shared>,
    accept_tx: &mpsc::Sender<Arc<PeerConn>>,
    peer: SocketAddr,
) -> Option<Arc<PeerConn>> {
    let conn = {
        let mut conns = shared.conns.lock();
        if let Some(conn) = conns.get(&peer) {
            return Some(conn.clone());
        }
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = PeerConn::new(
            id,
            shared.channel.clone(),
            shared.local,
            peer,
            PeerConnConfig {
                queue_size: shared.config.queue_size,
                ttl: shared.config.ttl,
                on_close: Some(remove_on_close(Arc::downgrade(shared), peer, id)),
            },
        );
        conns.insert(peer, conn.clone());
        conn
    };

    match accept_tx.try_send(conn.clone()) {
        Ok(()) => {
            debug!(peer = %peer, id = conn.id(), "new peer connection");
            Some(conn)
        }
        Err(_) => {
            warn!(
                peer = %peer,
                backlog = shared.config.backlog,
                kind = hopchain_core::ERROR_OVERFLOW,
                "accept queue full, discarding connection"
            );
            let _ = conn.close();
            None
        }
    }
}

fn remove_on_close(shared: Weak<Shared>, peer: SocketAddr, id: u64) -> super::CloseHook {
    Box::new(move || {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut conns = shared.conns.lock();
        if conns.get(&peer).is_some_and(|c| c.id() == id) {
            conns.remove(&peer);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::UdpTunConn;
    use tokio::io::{DuplexStream, duplex};

    fn local() -> SocketAddr {
        "203.0.113.5:51820".parse().unwrap()
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([198, 51, 100, 1], port))
    }

    /// Listener over an in-memory tunnel; the returned end plays the relay.
    fn tunnel_listener(config: UdpListenerConfig) -> (UdpListener, UdpTunConn<DuplexStream>) {
        let (a, b) = duplex(64 * 1024);
        let channel: Arc<dyn PacketConn> = Arc::new(UdpTunConn::new(a));
        (UdpListener::new(channel, local(), config), UdpTunConn::new(b))
    }

    fn config(backlog: usize, ttl: Duration) -> UdpListenerConfig {
        UdpListenerConfig {
            backlog,
            queue_size: 8,
            buffer_size: 1500,
            ttl,
        }
    }

    #[tokio::test]
    async fn demultiplexes_by_peer_and_replies() {
        let (listener, relay) = tunnel_listener(config(4, Duration::ZERO));

        relay.send_to(b"hello from a", peer(1000)).await.unwrap();
        relay.send_to(b"hello from b", peer(2000)).await.unwrap();
        relay.send_to(b"again from a", peer(1000)).await.unwrap();

        let a = listener.accept().await.unwrap();
        let b = listener.accept().await.unwrap();
        assert_eq!(a.peer_addr(), peer(1000));
        assert_eq!(b.peer_addr(), peer(2000));
        assert_eq!(a.local_addr(), local());

        let mut buf = [0u8; 64];
        let n = a.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello from a");
        let n = a.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"again from a");
        let n = b.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello from b");
        assert_eq!(listener.peer_count(), 2);

        b.write(b"reply").await.unwrap();
        let (n, to) = relay.recv_from(&mut buf).await.unwrap();
        assert_eq!((&buf[..n], to), (&b"reply"[..], peer(2000)));
    }

    #[tokio::test]
    async fn full_backlog_discards_new_peer() {
        let (listener, relay) = tunnel_listener(config(1, Duration::ZERO));

        relay.send_to(b"first", peer(1)).await.unwrap();
        relay.send_to(b"second", peer(2)).await.unwrap();
        // a datagram from the first peer proves both were processed
        relay.send_to(b"marker", peer(1)).await.unwrap();

        let first = listener.accept().await.unwrap();
        let mut buf = [0u8; 16];
        first.read(&mut buf).await.unwrap();
        let n = first.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"marker");

        assert_eq!(first.peer_addr(), peer(1));
        assert_eq!(listener.peer_count(), 1);
    }

    #[tokio::test]
    async fn closed_peer_is_removed_and_recreated() {
        let (listener, relay) = tunnel_listener(config(4, Duration::ZERO));

        relay.send_to(b"one", peer(7)).await.unwrap();
        let conn = listener.accept().await.unwrap();
        let mut buf = [0u8; 16];
        conn.read(&mut buf).await.unwrap();
        assert_eq!(listener.peer_count(), 1);

        conn.close().unwrap();
        assert_eq!(listener.peer_count(), 0);

        relay.send_to(b"two", peer(7)).await.unwrap();
        let fresh = listener.accept().await.unwrap();
        assert_ne!(fresh.id(), conn.id());
        let n = fresh.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"two");
    }

    #[tokio::test]
    async fn oversized_datagram_is_truncated_to_buffer() {
        let mut cfg = config(4, Duration::ZERO);
        cfg.buffer_size = 8;
        let (listener, relay) = tunnel_listener(cfg);

        relay.send_to(&[9u8; 32], peer(3)).await.unwrap();
        let conn = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(conn.read(&mut buf).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn close_stops_accept_and_closes_peers() {
        let (listener, relay) = tunnel_listener(config(4, Duration::ZERO));
        relay.send_to(b"x", peer(5)).await.unwrap();
        let conn = listener.accept().await.unwrap();

        listener.close().await.unwrap();
        assert!(listener.is_closed());
        assert!(conn.is_closed());
        assert_eq!(listener.peer_count(), 0);
        assert!(matches!(listener.accept().await, Err(NetError::ListenerClosed)));
        // second close is a no-op
        listener.close().await.unwrap();
    }

    #[tokio::test]
    async fn channel_failure_closes_listener() {
        let (listener, relay) = tunnel_listener(config(4, Duration::ZERO));
        drop(relay);
        assert!(matches!(listener.accept().await, Err(NetError::ListenerClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_peer_expires_and_leaves_table() {
        let ttl = Duration::from_secs(5);
        let (listener, relay) = tunnel_listener(config(4, ttl));

        relay.send_to(b"ping", peer(9)).await.unwrap();
        let conn = listener.accept().await.unwrap();
        assert_eq!(listener.peer_count(), 1);

        tokio::time::sleep(ttl * 2).await;
        assert!(conn.is_closed());
        assert_eq!(listener.peer_count(), 0);
    }
}
