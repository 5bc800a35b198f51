//! TLS dialer: TCP connect, then a rustls client handshake.
//!
//! SNI is the configured server name, else the host of the node address.
//! Metadata: everything [`TcpDialer`] reads, plus `handshakeTimeout`
//! (default 10s).

use std::time::Duration;

use async_trait::async_trait;
use hopchain_chain::policy::split_host_port;
use hopchain_chain::{ChainError, ClientTls, DialOptions, Dialer, HandshakeOptions, Metadata};
use hopchain_net::BoxStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::debug;

use crate::tcp::TcpDialer;

pub struct TlsDialer {
    tcp: TcpDialer,
    tls: ClientTls,
    handshake_timeout: Duration,
}

impl TlsDialer {
    pub fn new(tls: ClientTls) -> Self {
        Self {
            tcp: TcpDialer::new(),
            tls,
            handshake_timeout: Duration::from_secs(hopchain_core::DEFAULT_TLS_HANDSHAKE_TIMEOUT_SECS),
        }
    }

    fn server_name(&self, addr: &str) -> Result<ServerName<'static>, ChainError> {
        let name = self
            .tls
            .server_name
            .clone()
            .or_else(|| split_host_port(addr).map(|(host, _)| host.to_string()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        ServerName::try_from(name).map_err(|e| ChainError::Tls(format!("invalid SNI: {e}")))
    }
}

impl std::fmt::Debug for TlsDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsDialer")
            .field("server_name", &self.tls.server_name)
            .field("secure", &self.tls.secure)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    fn init(&mut self, md: &Metadata) -> Result<(), ChainError> {
        self.tcp.init(md)?;
        if let Some(timeout) = md.get_duration("handshakeTimeout")
            && !timeout.is_zero()
        {
            self.handshake_timeout = timeout;
        }
        Ok(())
    }

    async fn dial(&self, addr: &str, opts: &DialOptions) -> Result<BoxStream, ChainError> {
        self.tcp.dial(addr, opts).await
    }

    async fn handshake(
        &self,
        stream: BoxStream,
        opts: &HandshakeOptions,
    ) -> Result<BoxStream, ChainError> {
        let name = self.server_name(&opts.addr)?;
        let connector = TlsConnector::from(self.tls.config.clone());
        match tokio::time::timeout(self.handshake_timeout, connector.connect(name.clone(), stream)).await {
            Ok(Ok(tls)) => {
                debug!(sni = ?name, secure = self.tls.secure, "tls established");
                Ok(Box::new(tls))
            }
            Ok(Err(e)) => Err(ChainError::Tls(e.to_string())),
            Err(_) => Err(ChainError::Timeout("tls handshake".into())),
        }
    }
}
