//! Chain nodes and their transports.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hopchain_net::{BindOptions, BoundListener, BoxStream};
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::error::ChainError;
use crate::policy::{Bypass, HostMapper, Resolver};
use crate::transport::{Connector, DialOptions, Dialer, HandshakeOptions};

// ── FailMarker ──

/// Consecutive failure count and time of the last failure.
#[derive(Debug, Default)]
pub struct FailMarker {
    count: AtomicU32,
    /// Milliseconds since the Unix epoch; zero means never.
    last_failure_ms: AtomicU64,
}

impl FailMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure.
    pub fn mark(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
        self.last_failure_ms.store(now_ms(), Ordering::Release);
    }

    /// Clear the failure count after a success.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }

    pub fn fail_count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn last_failure(&self) -> Option<SystemTime> {
        match self.last_failure_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(1)
        .max(1)
}

// ── Transport ──

/// How a node is reached and spoken to.
#[derive(Clone)]
pub struct Transport {
    connector: Arc<dyn Connector>,
    dialer: Arc<dyn Dialer>,
    addr: String,
    interface: Option<String>,
}

impl Transport {
    pub fn new(connector: Arc<dyn Connector>, dialer: Arc<dyn Dialer>, addr: impl Into<String>) -> Self {
        Self {
            connector,
            dialer,
            addr: addr.into(),
            interface: None,
        }
    }

    pub fn with_interface(mut self, interface: Option<String>) -> Self {
        self.interface = interface.filter(|s| !s.is_empty());
        self
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub async fn dial(&self, addr: &str) -> Result<BoxStream, ChainError> {
        let opts = DialOptions {
            host: self.addr.clone(),
            interface: self.interface.clone(),
        };
        self.dialer.dial(addr, &opts).await
    }

    pub async fn handshake(&self, stream: BoxStream) -> Result<BoxStream, ChainError> {
        let opts = HandshakeOptions {
            addr: self.addr.clone(),
        };
        self.dialer.handshake(stream, &opts).await
    }

    pub async fn connect(
        &self,
        cancel: &CancellationToken,
        stream: BoxStream,
        network: &str,
        address: &str,
    ) -> Result<BoxStream, ChainError> {
        self.connector.connect(cancel, stream, network, address).await
    }

    /// Bind through the connector, if it supports it.
    pub async fn bind(
        &self,
        cancel: &CancellationToken,
        stream: BoxStream,
        network: &str,
        address: &str,
        opts: &BindOptions,
    ) -> Result<BoundListener, ChainError> {
        match self.connector.binder() {
            Some(binder) => binder.bind(cancel, stream, network, address, opts).await,
            None => Err(ChainError::BindUnsupported),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("addr", &self.addr)
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

// ── Node ──

/// One candidate intermediary in a hop.
pub struct Node {
    name: String,
    addr: String,
    transport: Transport,
    bypass: Option<Arc<dyn Bypass>>,
    resolver: Option<Arc<dyn Resolver>>,
    hosts: Option<Arc<dyn HostMapper>>,
    weight: u32,
    marker: FailMarker,
    span: Span,
}

impl Node {
    pub fn new(name: impl Into<String>, addr: impl Into<String>, transport: Transport) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            transport,
            bypass: None,
            resolver: None,
            hosts: None,
            weight: 1,
            marker: FailMarker::new(),
            span: Span::none(),
        }
    }

    pub fn with_bypass(mut self, bypass: Option<Arc<dyn Bypass>>) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn with_resolver(mut self, resolver: Option<Arc<dyn Resolver>>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_hosts(mut self, hosts: Option<Arc<dyn HostMapper>>) -> Self {
        self.hosts = hosts;
        self
    }

    /// Weight for the weighted selector. Zero is treated as one.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn bypass(&self) -> Option<&Arc<dyn Bypass>> {
        self.bypass.as_ref()
    }

    pub fn resolver(&self) -> Option<&Arc<dyn Resolver>> {
        self.resolver.as_ref()
    }

    pub fn hosts(&self) -> Option<&Arc<dyn HostMapper>> {
        self.hosts.as_ref()
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn marker(&self) -> &FailMarker {
        &self.marker
    }

    /// Span with the node's chain/hop/node fields.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("weight", &self.weight)
            .field("fail_count", &self.marker.fail_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_counts_and_resets() {
        let m = FailMarker::new();
        assert_eq!(m.fail_count(), 0);
        assert!(m.last_failure().is_none());

        m.mark();
        m.mark();
        assert_eq!(m.fail_count(), 2);
        let when = m.last_failure().unwrap();
        assert!(when <= SystemTime::now());

        m.reset();
        assert_eq!(m.fail_count(), 0);
        // the failure time is kept for fail_timeout bookkeeping
        assert!(m.last_failure().is_some());
    }

    #[test]
    fn marker_is_shared_across_threads() {
        let m = Arc::new(FailMarker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = m.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        m.mark();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.fail_count(), 800);
    }
}
