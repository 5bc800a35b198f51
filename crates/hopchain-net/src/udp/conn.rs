//! Per-peer logical connection over a shared datagram channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::NetError;
use crate::packet::PacketConn;

/// Callback run exactly once when a [`PeerConn`] closes.
pub type CloseHook = Box<dyn FnOnce() + Send + 'static>;

enum CloseState {
    Open(Option<CloseHook>),
    Closed,
}

/// Settings for a new [`PeerConn`].
pub struct PeerConnConfig {
    /// Inbound queue depth (at least 1).
    pub queue_size: usize,
    /// Idle TTL. `Duration::ZERO` disables the watchdog.
    pub ttl: Duration,
    pub on_close: Option<CloseHook>,
}

/// One remote peer's view of a shared datagram channel.
///
/// Inbound payloads are pushed by the channel's single reader through
/// [`send`](Self::send) and consumed with [`read`](Self::read). Writes go
/// straight to the shared channel addressed to the peer.
pub struct PeerConn {
    id: u64,
    channel: Arc<dyn PacketConn>,
    local: SocketAddr,
    peer: SocketAddr,
    tx: mpsc::Sender<Bytes>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    fresh: AtomicBool,
    closed: CancellationToken,
    state: Mutex<CloseState>,
}

impl PeerConn {
    /// Create the connection and start its TTL watchdog.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        id: u64,
        channel: Arc<dyn PacketConn>,
        local: SocketAddr,
        peer: SocketAddr,
        config: PeerConnConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let conn = Arc::new(Self {
            id,
            channel,
            local,
            peer,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            fresh: AtomicBool::new(false),
            closed: CancellationToken::new(),
            state: Mutex::new(CloseState::Open(config.on_close)),
        });
        if !config.ttl.is_zero() {
            tokio::spawn(ttl_watchdog(conn.clone(), config.ttl));
        }
        conn
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Queue an inbound payload without blocking.
    ///
    /// A full queue drops the payload and returns [`NetError::QueueFull`].
    pub fn send(&self, payload: Bytes) -> Result<(), NetError> {
        if self.is_closed() {
            return Err(NetError::ConnClosed);
        }
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NetError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => NetError::ConnClosed,
        })
    }

    /// Read the next payload into `buf`, truncating if it does not fit.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, NetError> {
        self.read_from(buf).await.map(|(n, _)| n)
    }

    /// Like [`read`](Self::read), also returning the peer address.
    pub async fn read_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), NetError> {
        let payload = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(NetError::ReadClosed),
            payload = async { self.rx.lock().await.recv().await } => payload,
        };
        let payload = payload.ok_or(NetError::ReadClosed)?;
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        self.fresh.store(true, Ordering::Release);
        Ok((n, self.peer))
    }

    /// Write a datagram to the peer through the shared channel.
    pub async fn write(&self, buf: &[u8]) -> Result<usize, NetError> {
        self.write_to(buf, self.peer).await
    }

    /// Write a datagram to an explicit address through the shared channel.
    pub async fn write_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, NetError> {
        if self.is_closed() {
            return Err(NetError::ConnClosed);
        }
        Ok(self.channel.send_to(buf, target).await?)
    }

    /// Close the connection.
    ///
    /// The first call runs the close hook and then signals closure; every
    /// later call returns [`NetError::ConnClosed`].
    pub fn close(&self) -> Result<(), NetError> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, CloseState::Closed) {
            CloseState::Closed => Err(NetError::ConnClosed),
            CloseState::Open(hook) => {
                if let Some(hook) = hook {
                    hook();
                }
                self.closed.cancel();
                Ok(())
            }
        }
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

impl std::fmt::Debug for PeerConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConn")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Close `conn` once a whole TTL passes without a successful read.
async fn ttl_watchdog(conn: Arc<PeerConn>, ttl: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + ttl, ttl);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = conn.closed.cancelled() => return,
            _ = ticker.tick() => {
                if conn
                    .fresh
                    .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    debug!(peer = %conn.peer, ttl = ?ttl, "peer connection idle, closing");
                    let _ = conn.close();
                    return;
                }
            }
        }
    }
}
