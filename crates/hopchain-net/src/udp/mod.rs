//! UDP demultiplexing over one shared datagram channel.

mod conn;
mod listener;

pub use conn::{CloseHook, PeerConn, PeerConnConfig};
pub use listener::{UdpListener, UdpListenerConfig};
