//! Relay connector and bind negotiator.
//!
//! Metadata:
//! - `handshakeTimeout`: bound on one request/response exchange (default 10s).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hopchain_chain::policy::family_allows;
use hopchain_chain::{Auth, Binder, ChainError, ComponentOptions, Connector, Metadata};
use hopchain_net::{BindOptions, BoundListener, BoxStream, MuxListener, ServerSession, UdpListener, UdpTunConn};
use hopchain_proto::{
    AddrFeature, CMD_BIND, CMD_CONNECT, FLAG_UDP, Request, Response, UserAuthFeature,
};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info};

use crate::error::RelayError;
use crate::wire::{read_response, write_request};

pub struct RelayConnector {
    auth: Option<Auth>,
    handshake_timeout: Duration,
    span: Span,
}

impl RelayConnector {
    pub fn new(opts: ComponentOptions) -> Self {
        Self {
            auth: opts.auth,
            handshake_timeout: Duration::from_secs(hopchain_core::DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            span: opts.span,
        }
    }

    /// Request with credentials first (when configured), then the address.
    fn request(&self, flags: u8, address: &str) -> Result<Request, RelayError> {
        let mut req = Request::new(flags);
        if let Some(auth) = &self.auth {
            let password = auth.password.clone().unwrap_or_default();
            req.features
                .push(UserAuthFeature::new(auth.username.clone(), password).into());
        }
        req.features
            .push(AddrFeature::parse_from(address).map_err(RelayError::Proto)?.into());
        Ok(req)
    }

    /// One request/response exchange, bounded by the handshake timeout and
    /// by `cancel`.
    async fn exchange(
        &self,
        cancel: &CancellationToken,
        stream: &mut BoxStream,
        request: &Request,
    ) -> Result<Response, RelayError> {
        let round_trip = async {
            write_request(stream, request).await?;
            read_response(stream).await
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RelayError::Cancelled),
            r = tokio::time::timeout(self.handshake_timeout, round_trip) => {
                r.map_err(|_| RelayError::Timeout)?
            }
        }
    }

    /// Ask the relay to listen on `address` and return the address it bound.
    ///
    /// `flags` must already carry the command and, for UDP, [`FLAG_UDP`].
    pub async fn negotiate(
        &self,
        cancel: &CancellationToken,
        stream: &mut BoxStream,
        flags: u8,
        network: &str,
        address: &str,
    ) -> Result<SocketAddr, RelayError> {
        let request = self.request(flags, address)?;
        let response = self.exchange(cancel, stream, &request).await?;
        if !response.is_ok() {
            return Err(RelayError::BindFailed {
                address: address.to_string(),
                network: network.to_string(),
                status: response.status,
            });
        }
        let bound = response.address().ok_or(RelayError::MissingAddress)?;
        resolve_bound(network, bound).await
    }
}

impl std::fmt::Debug for RelayConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnector")
            .field("user", &self.auth.as_ref().map(|a| a.username.as_str()))
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

#[async_trait]
impl Connector for RelayConnector {
    fn init(&mut self, md: &Metadata) -> Result<(), ChainError> {
        if let Some(timeout) = md.get_duration("handshakeTimeout")
            && !timeout.is_zero()
        {
            self.handshake_timeout = timeout;
        }
        Ok(())
    }

    async fn connect(
        &self,
        cancel: &CancellationToken,
        mut stream: BoxStream,
        network: &str,
        address: &str,
    ) -> Result<BoxStream, ChainError> {
        let flags = match network {
            "tcp" | "tcp4" | "tcp6" => CMD_CONNECT,
            "udp" | "udp4" | "udp6" => CMD_CONNECT | FLAG_UDP,
            other => return Err(RelayError::UnsupportedNetwork(other.to_string()).into()),
        };
        debug!(parent: &self.span, address, network, "connect");

        let request = self.request(flags, address)?;
        let response = self.exchange(cancel, &mut stream, &request).await?;
        if !response.is_ok() {
            return Err(RelayError::ConnectFailed {
                address: address.to_string(),
                network: network.to_string(),
                status: response.status,
            }
            .into());
        }
        Ok(stream)
    }

    fn binder(&self) -> Option<&dyn Binder> {
        Some(self)
    }
}

#[async_trait]
impl Binder for RelayConnector {
    async fn bind(
        &self,
        cancel: &CancellationToken,
        mut stream: BoxStream,
        network: &str,
        address: &str,
        opts: &BindOptions,
    ) -> Result<BoundListener, ChainError> {
        let udp = match network {
            "tcp" | "tcp4" | "tcp6" => false,
            "udp" | "udp4" | "udp6" => true,
            other => return Err(RelayError::UnsupportedNetwork(other.to_string()).into()),
        };
        let flags = if udp { CMD_BIND | FLAG_UDP } else { CMD_BIND };

        info!(parent: &self.span, "bind on {address}/{network}");
        let local = self.negotiate(cancel, &mut stream, flags, network, address).await?;
        debug!(parent: &self.span, %local, "bind on {address}/{network} OK");

        if udp {
            let channel = Arc::new(UdpTunConn::new(stream));
            Ok(BoundListener::Udp(UdpListener::new(channel, local, opts.into())))
        } else {
            Ok(BoundListener::Tcp(MuxListener::new(local, ServerSession::open(stream))))
        }
    }
}

/// Resolve the address reported by the relay within `network`'s family.
async fn resolve_bound(network: &str, addr: &AddrFeature) -> Result<SocketAddr, RelayError> {
    match network {
        "tcp" | "tcp4" | "tcp6" | "udp" | "udp4" | "udp6" => {}
        other => return Err(RelayError::UnsupportedNetwork(other.to_string())),
    }

    if addr.host.is_empty() {
        let any = if network.ends_with('6') {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        return Ok(SocketAddr::new(any, addr.port));
    }
    if let Ok(ip) = addr.host.parse::<IpAddr>() {
        return if family_allows(network, &ip) {
            Ok(SocketAddr::new(ip, addr.port))
        } else {
            Err(RelayError::AddressFamily {
                address: addr.host.clone(),
                network: network.to_string(),
            })
        };
    }

    tokio::net::lookup_host((addr.host.as_str(), addr.port))
        .await?
        .find(|sa| family_allows(network, &sa.ip()))
        .ok_or_else(|| RelayError::Resolve(addr.host.clone()))
}
