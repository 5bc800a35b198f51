//! A concrete path through a chain: one node per hop.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;

use hopchain_net::{BindOptions, BoundListener, BoxStream, UdpListener};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

use crate::error::ChainError;
use crate::node::Node;
use crate::policy::{join_host_port, split_host_port};

/// Nodes selected for one connection attempt, in dial order.
#[derive(Debug, Clone, Default)]
pub struct Route {
    nodes: Vec<Arc<Node>>,
}

impl Route {
    pub fn new(nodes: Vec<Arc<Node>>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn last(&self) -> Option<&Arc<Node>> {
        self.nodes.last()
    }

    /// Establish a stream that terminates at the last node.
    ///
    /// Every node's failure marker is updated by the attempt that reaches it.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<BoxStream, ChainError> {
        cancellable(cancel, self.connect_hops(cancel)).await
    }

    /// Connect to `address` through the route; directly when it is empty.
    pub async fn dial(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> Result<BoxStream, ChainError> {
        let Some(last) = self.nodes.last() else {
            return cancellable(cancel, dial_direct(network, address)).await;
        };
        cancellable(cancel, async {
            let stream = self.connect_hops(cancel).await?;
            last.transport()
                .connect(cancel, stream, network, address)
                .instrument(last.span().clone())
                .await
        })
        .await
    }

    /// Ask the last node to listen on `address`; listen locally when the
    /// route is empty.
    pub async fn bind(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
        opts: &BindOptions,
    ) -> Result<BoundListener, ChainError> {
        let Some(last) = self.nodes.last() else {
            return bind_local(network, address, opts).await;
        };
        cancellable(cancel, async {
            let stream = self.connect_hops(cancel).await?;
            last.transport()
                .bind(cancel, stream, network, address, opts)
                .instrument(last.span().clone())
                .await
        })
        .await
    }

    async fn connect_hops(&self, cancel: &CancellationToken) -> Result<BoxStream, ChainError> {
        let Some(first) = self.nodes.first() else {
            return Err(ChainError::NoNodeAvailable("route".into()));
        };
        let mut stream = track(first, first_hop(first).instrument(first.span().clone()).await)?;
        for pair in self.nodes.windows(2) {
            let (prev, node) = (&pair[0], &pair[1]);
            let hop = next_hop(cancel, prev, node, stream).instrument(node.span().clone());
            stream = track(node, hop.await)?;
        }
        Ok(stream)
    }
}

async fn first_hop(node: &Node) -> Result<BoxStream, ChainError> {
    let addr = resolve_addr("ip", node.addr(), node).await?;
    debug!(addr = %addr, "dialing first hop");
    let stream = node.transport().dial(&addr).await?;
    node.transport().handshake(stream).await
}

async fn next_hop(
    cancel: &CancellationToken,
    prev: &Node,
    node: &Node,
    stream: BoxStream,
) -> Result<BoxStream, ChainError> {
    let addr = resolve_addr("ip", node.addr(), node).await?;
    debug!(via = %prev.name(), addr = %addr, "connecting next hop");
    let stream = prev.transport().connect(cancel, stream, "tcp", &addr).await?;
    node.transport().handshake(stream).await
}

fn track<T>(node: &Node, result: Result<T, ChainError>) -> Result<T, ChainError> {
    match &result {
        Ok(_) => node.marker().reset(),
        Err(e) => {
            node.marker().mark();
            debug!(node = %node.name(), fails = node.marker().fail_count(), error = %e, "hop failed");
        }
    }
    result
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ChainError>>,
) -> Result<T, ChainError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChainError::Cancelled),
        r = fut => r,
    }
}

/// Resolve the host of `addr` through the node's host table, then its
/// resolver. Literal IPs and nodes without policies pass through.
async fn resolve_addr(network: &str, addr: &str, node: &Node) -> Result<String, ChainError> {
    let Some((host, port)) = split_host_port(addr) else {
        return Ok(addr.to_string());
    };
    if host.is_empty() || host.parse::<IpAddr>().is_ok() {
        return Ok(addr.to_string());
    }
    if let Some(hosts) = node.hosts()
        && let Some(ip) = hosts.lookup(network, host).and_then(|ips| ips.first().copied())
    {
        return Ok(join_host_port(&ip.to_string(), port));
    }
    if let Some(resolver) = node.resolver() {
        let ips = resolver.resolve(network, host).await.unwrap_or_else(|e| {
            warn!(host, error = %e, kind = hopchain_core::ERROR_RESOLVE, "resolve failed");
            Vec::new()
        });
        return ips
            .first()
            .map(|ip| join_host_port(&ip.to_string(), port))
            .ok_or_else(|| ChainError::Resolve(host.to_string()));
    }
    Ok(addr.to_string())
}

async fn dial_direct(network: &str, address: &str) -> Result<BoxStream, ChainError> {
    match network {
        "tcp" | "tcp4" | "tcp6" => {
            let stream = TcpStream::connect(address)
                .await
                .map_err(|source| ChainError::Dial {
                    addr: address.to_string(),
                    source,
                })?;
            stream.set_nodelay(hopchain_core::DEFAULT_TCP_NO_DELAY)?;
            Ok(Box::new(stream))
        }
        other => Err(ChainError::UnsupportedNetwork(other.to_string())),
    }
}

async fn bind_local(
    network: &str,
    address: &str,
    opts: &BindOptions,
) -> Result<BoundListener, ChainError> {
    let address = listen_addr(address);
    match network {
        "tcp" | "tcp4" | "tcp6" => Ok(BoundListener::Direct(TcpListener::bind(&address).await?)),
        "udp" | "udp4" | "udp6" => {
            let socket = UdpSocket::bind(&address).await?;
            let local = socket.local_addr()?;
            Ok(BoundListener::Udp(UdpListener::new(
                Arc::new(socket),
                local,
                opts.into(),
            )))
        }
        other => Err(ChainError::UnsupportedNetwork(other.to_string())),
    }
}

/// `:port` means every interface.
fn listen_addr(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}
