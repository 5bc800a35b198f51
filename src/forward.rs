//! Reverse port forwarding.
//!
//! Every `[[forwards]]` entry binds a listener at the far end of its chain
//! and pipes each accepted connection to a local target. When the listener
//! closes (relay gone, session ended) the forward binds again after
//! `rebind_delay_secs`.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hopchain_chain::{Chain, ChainBuilder, ChainError, Registry, Route, RouteContext};
use hopchain_net::{Accepted, BoundListener, BoxStream, PeerConn};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{Config, ForwardConfig};

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("forward '{forward}': unknown chain '{chain}'")]
    UnknownChain { forward: String, chain: String },
}

/// Build every chain, then run all forwards until `shutdown` fires.
pub async fn run(
    config: Config,
    mut registry: Registry,
    shutdown: CancellationToken,
) -> Result<(), ForwardError> {
    registry.load_policies(&config.bypasses, &config.hosts, &config.resolvers);

    let builder = ChainBuilder::new(&registry);
    let mut chains = HashMap::new();
    for chain in &config.chains {
        let built = builder.build(chain)?;
        info!(chain = %chain.name, hops = built.groups().len(), "chain ready");
        chains.insert(chain.name.clone(), Arc::new(built));
    }

    let mut handles = Vec::new();
    for fwd in config.forwards {
        let chain = match &fwd.chain {
            Some(name) => Some(chains.get(name).cloned().ok_or_else(|| ForwardError::UnknownChain {
                forward: fwd.name.clone(),
                chain: name.clone(),
            })?),
            None => None,
        };
        let span = info_span!("forward", name = %fwd.name, network = %fwd.network, bind = %fwd.bind);
        handles.push(tokio::spawn(
            run_forward(fwd, chain, shutdown.clone()).instrument(span),
        ));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "forward task panicked");
        }
    }
    Ok(())
}

async fn run_forward(fwd: ForwardConfig, chain: Option<Arc<Chain>>, shutdown: CancellationToken) {
    let opts = fwd.bind_options();
    let delay = Duration::from_secs(fwd.rebind_delay_secs);
    let udp_idle = Duration::from_secs(fwd.udp_idle_secs);

    loop {
        let route = match &chain {
            Some(chain) => chain.route(&RouteContext::default()),
            None => Ok(Route::default()),
        };
        let bound = match route {
            Ok(route) => route.bind(&shutdown, &fwd.network, &fwd.bind, &opts).await,
            Err(e) => Err(e),
        };

        match bound {
            Ok(listener) => {
                info!(local = ?listener.local_addr().ok(), dest = %fwd.target, "forward listening");
                serve(&listener, &fwd.target, udp_idle, &shutdown).await;
                if let Err(e) = listener.close().await {
                    debug!(error = %e, "listener close");
                }
            }
            Err(ChainError::Cancelled) => return,
            Err(e) => warn!(error = %e, kind = e.kind(), "bind failed"),
        }

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("forward shutting down");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Accept until the listener closes or `shutdown` fires.
pub(crate) async fn serve(
    listener: &BoundListener,
    target: &str,
    udp_idle: Duration,
    shutdown: &CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            r = listener.accept() => r,
        };
        match accepted {
            Ok(Accepted::Stream(stream)) => {
                let target = target.to_string();
                tokio::spawn(
                    async move {
                        if let Err(e) = pipe_stream(stream, &target).await {
                            debug!(error = %e, "stream forward ended");
                        }
                    }
                    .instrument(info_span!("conn", network = "tcp")),
                );
            }
            Ok(Accepted::Datagram(conn)) => {
                let target = target.to_string();
                let span = info_span!("conn", network = "udp", peer = %conn.peer_addr());
                tokio::spawn(
                    async move {
                        if let Err(e) = pipe_datagrams(&conn, &target, udp_idle).await {
                            debug!(error = %e, "datagram forward ended");
                        }
                        let _ = conn.close();
                    }
                    .instrument(span),
                );
            }
            Err(e) => {
                info!(error = %e, "listener closed");
                return;
            }
        }
    }
}

async fn pipe_stream(mut inbound: BoxStream, target: &str) -> std::io::Result<()> {
    let dial = Duration::from_secs(hopchain_core::DEFAULT_DIAL_TIMEOUT_SECS);
    let mut outbound = tokio::time::timeout(dial, TcpStream::connect(target))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, format!("connect {target}")))??;
    outbound.set_nodelay(hopchain_core::DEFAULT_TCP_NO_DELAY)?;

    let (up, down) = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await?;
    debug!(dest = %target, up, down, "stream forward closed");
    Ok(())
}

/// Relay one peer's datagrams to `target` and the target's replies back,
/// until either side closes or nothing comes back for `idle`.
async fn pipe_datagrams(conn: &PeerConn, target: &str, idle: Duration) -> std::io::Result<()> {
    let target: SocketAddr = tokio::net::lookup_host(target)
        .await?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("no address for {target}")))?;
    let any = if target.is_ipv4() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    };
    let socket = UdpSocket::bind(SocketAddr::new(any, 0)).await?;
    socket.connect(target).await?;

    let to_target = async {
        let mut buf = vec![0u8; hopchain_core::MAX_UDP_PAYLOAD];
        loop {
            let n = match conn.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, "peer closed");
                    return Ok::<(), std::io::Error>(());
                }
            };
            socket.send(&buf[..n]).await?;
        }
    };
    let from_target = async {
        let mut buf = vec![0u8; hopchain_core::MAX_UDP_PAYLOAD];
        loop {
            let Ok(received) = tokio::time::timeout(idle, socket.recv(&mut buf)).await else {
                debug!("target idle");
                return Ok::<(), std::io::Error>(());
            };
            let n = received?;
            if let Err(e) = conn.write(&buf[..n]).await {
                debug!(error = %e, "peer closed");
                return Ok(());
            }
        }
    };

    tokio::select! {
        r = to_target => r,
        r = from_target => r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopchain_net::{UdpListener, UdpListenerConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn tcp_echo() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut s, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut r, mut w) = s.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });
        addr
    }

    async fn udp_echo() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 1500];
            while let Ok((n, from)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&buf[..n], from).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn tcp_connections_reach_target() {
        let target = tcp_echo().await;
        let listener = BoundListener::Direct(TcpListener::bind("127.0.0.1:0").await.unwrap());
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let stop = shutdown.clone();
        let server = tokio::spawn(async move {
            serve(&listener, &target.to_string(), Duration::from_secs(5), &stop).await;
        });

        for msg in [&b"first"[..], &b"second"[..]] {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(msg).await.unwrap();
            let mut buf = vec![0u8; msg.len()];
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, msg);
        }

        shutdown.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn udp_peers_reach_target() {
        let target = udp_echo().await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let local = socket.local_addr().unwrap();
        let listener = BoundListener::Udp(UdpListener::new(
            Arc::new(socket),
            local,
            UdpListenerConfig::default(),
        ));
        let shutdown = CancellationToken::new();

        let stop = shutdown.clone();
        let server = tokio::spawn(async move {
            serve(&listener, &target.to_string(), Duration::from_secs(5), &stop).await;
            listener.close().await.unwrap();
        });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"query", local).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"query");
        assert_eq!(from, local);

        shutdown.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let config: Config = toml::from_str(
            r#"
[[forwards]]
name = "local"
bind = "127.0.0.1:0"
target = "127.0.0.1:9"
"#,
        )
        .unwrap();
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.cancel();
        });
        run(config, Registry::new(), shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn run_rejects_unknown_chain() {
        let config: Config = toml::from_str(
            r#"
[[forwards]]
name = "web"
chain = "nowhere"
bind = ":8080"
target = "127.0.0.1:80"
"#,
        )
        .unwrap();
        let err = run(config, Registry::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::UnknownChain { .. }));
    }
}
