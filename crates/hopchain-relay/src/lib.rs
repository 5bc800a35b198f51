//! Relay connector.
//!
//! Speaks the relay protocol ([`hopchain_proto`]) over a stream that ends
//! at a relay node:
//!
//! - **connect**: ask the relay to open a connection to a target and use
//!   the stream as that connection.
//! - **bind**: ask the relay to listen on an address. TCP binds carry a
//!   mux session (one stream per inbound connection); UDP binds carry
//!   tunnelled datagrams demultiplexed by peer.

pub mod connector;
pub mod error;
pub mod wire;

use hopchain_chain::{ComponentOptions, Connector, Registry};

pub use connector::RelayConnector;
pub use error::RelayError;

/// Register the `relay` connector.
pub fn register(registry: &mut Registry) {
    registry.register_connector("relay", |opts: ComponentOptions| -> Box<dyn Connector> {
        Box::new(RelayConnector::new(opts))
    });
}
