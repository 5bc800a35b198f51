//! # hopchain
//!
//! Proxy-chaining tunnel core: multi-hop routes through relay nodes and
//! reverse binds that expose a remote listener locally.
//!
//! ## Crates
//!
//! - [`hopchain_core`] - Shared defaults and error-kind labels
//! - [`hopchain_proto`] - Relay protocol codec
//! - [`hopchain_net`] - Pseudo-connections, UDP demultiplexing, mux listeners
//! - [`hopchain_chain`] - Chains, selectors, routes, registry and builder
//! - [`hopchain_transport`] - TCP and TLS dialers
//! - [`hopchain_relay`] - Relay connector (connect and bind)

pub mod cli;
pub mod config;
pub mod forward;

pub use hopchain_chain as chain;
pub use hopchain_core as core;
pub use hopchain_net as net;
pub use hopchain_proto as proto;
pub use hopchain_relay as relay;
pub use hopchain_transport as transport;

use hopchain_chain::Registry;

/// Registry with every built-in connector and dialer.
pub fn default_registry() -> Registry {
    let mut registry = Registry::new();
    hopchain_transport::register(&mut registry);
    hopchain_relay::register(&mut registry);
    registry
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{Config, ForwardConfig, load_config, validate_config};
    pub use crate::default_registry;
    pub use hopchain_chain::{Chain, ChainBuilder, ChainError, Registry, Route, RouteContext};
    pub use hopchain_net::{Accepted, BindOptions, BoundListener};
    pub use tokio_util::sync::CancellationToken;
}

#[cfg(test)]
mod tests {
    #[test]
    fn default_registry_has_builtins() {
        let r = super::default_registry();
        assert!(r.dialer("tcp").is_some());
        assert!(r.dialer("tls").is_some());
        assert!(r.connector("relay").is_some());
        assert!(r.connector("tcp").is_none());
    }
}
