//! Logical connections over shared transports.
//!
//! A bound reverse listener hands out many logical connections that all
//! ride on one physical connection to the relay:
//!
//! - [`mux`]: TCP binds. The connection is wrapped in a server-side mux
//!   session and every accepted stream is one logical connection.
//! - [`udp`]: UDP binds. Datagrams from the shared [`PacketConn`] are
//!   demultiplexed by peer address into [`PeerConn`]s, each with a bounded
//!   inbound queue and an idle TTL.
//! - [`tunnel`]: datagram framing over a byte stream, used to turn a
//!   negotiated relay connection into a [`PacketConn`].

pub mod error;
pub mod listener;
pub mod mux;
pub mod packet;
pub mod tunnel;
pub mod udp;

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

pub use error::NetError;
pub use listener::{Accepted, BoundListener};
pub use mux::{MuxListener, ServerSession};
pub use packet::PacketConn;
pub use tunnel::UdpTunConn;
pub use udp::{PeerConn, UdpListener, UdpListenerConfig};

/// Marker trait for byte streams carried through a chain.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> AsyncStream for T {}

/// Type-erased stream, the unit passed between dialers and connectors.
pub type BoxStream = Box<dyn AsyncStream>;

/// Caller-supplied tuning for a bound listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOptions {
    /// Accept queue capacity.
    pub backlog: usize,
    /// Per-peer inbound datagram queue depth (UDP only).
    pub udp_queue_size: usize,
    /// Inbound datagram buffer size in bytes (UDP only).
    pub udp_buffer_size: usize,
    /// Idle time after which a UDP peer connection is closed.
    pub udp_ttl: Duration,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            backlog: hopchain_core::DEFAULT_BACKLOG,
            udp_queue_size: hopchain_core::DEFAULT_UDP_QUEUE_SIZE,
            udp_buffer_size: hopchain_core::DEFAULT_UDP_BUFFER_SIZE,
            udp_ttl: Duration::from_secs(hopchain_core::DEFAULT_UDP_TTL_SECS),
        }
    }
}
