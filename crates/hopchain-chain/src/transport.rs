//! Component traits plugged into a node's transport.
//!
//! A **dialer** produces the first stream to a node (and may run a
//! transport handshake on it). A **connector** speaks the node's proxy
//! protocol over an established stream to reach the next address. A
//! connector that can ask its node to listen on our behalf also exposes a
//! **binder**.

use async_trait::async_trait;
use hopchain_net::{BindOptions, BoundListener, BoxStream};
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::error::ChainError;
use crate::metadata::Metadata;
use crate::tls::ClientTls;

/// Credentials configured for a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    pub username: String,
    pub password: Option<String>,
}

/// Construction options handed to component factories.
#[derive(Debug, Clone)]
pub struct ComponentOptions {
    pub auth: Option<Auth>,
    pub tls: ClientTls,
    /// Span carrying the chain/hop/node fields of the owning node.
    pub span: Span,
}

/// Per-dial options derived from the node's transport.
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// The node address as configured, before resolution.
    pub host: String,
    /// Local interface or address to bind before connecting.
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HandshakeOptions {
    /// The node address as configured.
    pub addr: String,
}

#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Apply component metadata. Called once, before first use.
    fn init(&mut self, _md: &Metadata) -> Result<(), ChainError> {
        Ok(())
    }

    /// Open a stream to `addr`.
    async fn dial(&self, addr: &str, opts: &DialOptions) -> Result<BoxStream, ChainError>;

    /// Transport handshake on a freshly dialed or tunnelled stream.
    async fn handshake(
        &self,
        stream: BoxStream,
        _opts: &HandshakeOptions,
    ) -> Result<BoxStream, ChainError> {
        Ok(stream)
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Apply component metadata. Called once, before first use.
    fn init(&mut self, _md: &Metadata) -> Result<(), ChainError> {
        Ok(())
    }

    /// Ask the node at the end of `stream` to connect to `address`.
    async fn connect(
        &self,
        cancel: &CancellationToken,
        stream: BoxStream,
        network: &str,
        address: &str,
    ) -> Result<BoxStream, ChainError>;

    /// Reverse-bind capability, if this connector has one.
    fn binder(&self) -> Option<&dyn Binder> {
        None
    }
}

#[async_trait]
pub trait Binder: Send + Sync {
    /// Ask the node at the end of `stream` to listen on `address` and relay
    /// inbound traffic back over the stream.
    async fn bind(
        &self,
        cancel: &CancellationToken,
        stream: BoxStream,
        network: &str,
        address: &str,
        opts: &BindOptions,
    ) -> Result<BoundListener, ChainError>;
}
