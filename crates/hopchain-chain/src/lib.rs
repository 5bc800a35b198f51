//! Multi-hop forwarding chains.
//!
//! A [`Chain`] is an ordered list of hops ([`NodeGroup`]s). Each connection
//! attempt asks every hop's [`Selector`] for one [`Node`], producing a
//! [`Route`]. The route dials the first node and tunnels through every
//! following node via the previous node's [`Connector`]; the last node's
//! connector then connects to the final target or, if it exposes a
//! [`Binder`], opens a reverse listener.
//!
//! Components are created by type name through an explicit [`Registry`]
//! and assembled from configuration by [`ChainBuilder`].

pub mod builder;
pub mod chain;
pub mod config;
pub mod error;
pub mod metadata;
pub mod node;
pub mod policy;
pub mod registry;
pub mod route;
pub mod selector;
pub mod tls;
pub mod transport;

pub use builder::ChainBuilder;
pub use chain::{Chain, NodeGroup, RouteContext};
pub use config::{
    AuthConfig, BypassConfig, ChainConfig, ComponentConfig, HopConfig, HostsConfig, NodeConfig,
    ResolverConfig, SelectorConfig, Strategy, TlsConfig,
};
pub use error::ChainError;
pub use metadata::Metadata;
pub use node::{FailMarker, Node, Transport};
pub use policy::{Bypass, BypassList, HostMapper, Resolver, StaticHosts, SystemResolver};
pub use registry::Registry;
pub use route::Route;
pub use selector::{Fifo, Random, RoundRobin, Selector, Weighted};
pub use tls::{ClientTls, load_client_config};
pub use transport::{
    Auth, Binder, ComponentOptions, Connector, DialOptions, Dialer, HandshakeOptions,
};
