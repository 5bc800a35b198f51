//! Dialers for reaching a node.
//!
//! # Dialers
//!
//! - [`tcp`]: plain TCP with dial timeout and optional local interface.
//! - [`tls`]: TCP, then a TLS client handshake. The handshake runs in
//!   [`Dialer::handshake`](hopchain_chain::Dialer::handshake) so nodes
//!   reached through a tunnel get TLS as well.

pub mod tcp;
pub mod tls;

use hopchain_chain::{ComponentOptions, Dialer, Registry};

pub use tcp::TcpDialer;
pub use tls::TlsDialer;

/// Register the `tcp` and `tls` dialers.
pub fn register(registry: &mut Registry) {
    registry.register_dialer("tcp", |_opts: ComponentOptions| -> Box<dyn Dialer> {
        Box::new(TcpDialer::new())
    });
    registry.register_dialer("tls", |opts: ComponentOptions| -> Box<dyn Dialer> {
        Box::new(TlsDialer::new(opts.tls))
    });
}
