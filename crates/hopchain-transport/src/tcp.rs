//! Plain TCP dialer.
//!
//! Metadata:
//! - `dialTimeout`: connect timeout (default 5s).
//! - `nodelay`: set `TCP_NODELAY` (default true).

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use hopchain_chain::{ChainError, DialOptions, Dialer, Metadata};
use hopchain_net::BoxStream;
use tokio::net::{TcpSocket, TcpStream};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TcpDialer {
    dial_timeout: Duration,
    nodelay: bool,
}

impl TcpDialer {
    pub fn new() -> Self {
        Self {
            dial_timeout: Duration::from_secs(hopchain_core::DEFAULT_DIAL_TIMEOUT_SECS),
            nodelay: hopchain_core::DEFAULT_TCP_NO_DELAY,
        }
    }

    /// Connect to `addr`, binding `interface` (an IP or a device name) first
    /// when given.
    pub async fn connect(&self, addr: &str, interface: Option<&str>) -> Result<TcpStream, ChainError> {
        let stream = match tokio::time::timeout(self.dial_timeout, connect_via(addr, interface)).await {
            Ok(r) => r.map_err(|source| ChainError::Dial {
                addr: addr.to_string(),
                source,
            })?,
            Err(_) => return Err(ChainError::Timeout(format!("dial {addr}"))),
        };
        stream.set_nodelay(self.nodelay)?;
        debug!(addr, local = ?stream.local_addr().ok(), "tcp connected");
        Ok(stream)
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    fn init(&mut self, md: &Metadata) -> Result<(), ChainError> {
        if let Some(timeout) = md.get_duration("dialTimeout")
            && !timeout.is_zero()
        {
            self.dial_timeout = timeout;
        }
        if let Some(nodelay) = md.get_bool("nodelay") {
            self.nodelay = nodelay;
        }
        Ok(())
    }

    async fn dial(&self, addr: &str, opts: &DialOptions) -> Result<BoxStream, ChainError> {
        let stream = self.connect(addr, opts.interface.as_deref()).await?;
        Ok(Box::new(stream))
    }
}

async fn connect_via(addr: &str, interface: Option<&str>) -> io::Result<TcpStream> {
    let Some(iface) = interface else {
        return TcpStream::connect(addr).await;
    };

    let mut last_err = None;
    for target in tokio::net::lookup_host(addr).await? {
        let socket = if target.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Err(e) = bind_interface(&socket, iface, &target) {
            last_err = Some(e);
            continue;
        }
        match socket.connect(target).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no address for {addr}"))
    }))
}

fn bind_interface(socket: &TcpSocket, iface: &str, target: &SocketAddr) -> io::Result<()> {
    match iface.parse::<IpAddr>() {
        Ok(ip) if ip.is_ipv4() == target.is_ipv4() => socket.bind(SocketAddr::new(ip, 0)),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("interface {iface} cannot reach {target}"),
        )),
        Err(_) => bind_device(socket, iface),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn bind_device(socket: &TcpSocket, iface: &str) -> io::Result<()> {
    socket.bind_device(Some(iface.as_bytes()))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn bind_device(_socket: &TcpSocket, iface: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("binding to device {iface} is not supported on this platform"),
    ))
}
