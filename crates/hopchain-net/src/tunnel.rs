//! Datagrams framed over a byte stream.
//!
//! Each datagram is one frame in the SOCKS5 UDP layout, with the reserved
//! field carrying the payload length so frames can be delimited on a stream:
//!
//! ```text
//! +-----+------+------+----------+----------+----------+
//! | LEN | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +-----+------+------+----------+----------+----------+
//! |  2  |  1   |  1   | Variable |    2     |   LEN    |
//! +-----+------+------+----------+----------+----------+
//! ```
//!
//! On frames received from the relay the address is the datagram's source;
//! on frames sent to the relay it is the destination.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::packet::PacketConn;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// A [`PacketConn`] over a stream to a relay.
///
/// Reads and writes are serialized independently, so one task may be
/// blocked in `recv_from` while others send.
pub struct UdpTunConn<S> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
}

impl<S> UdpTunConn<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

impl<S> std::fmt::Debug for UdpTunConn<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTunConn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<S> PacketConn for UdpTunConn<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut reader = self.reader.lock().await;
        loop {
            let len = reader.read_u16().await? as usize;
            let frag = reader.read_u8().await?;
            let addr = read_addr(&mut *reader).await?;

            let n = len.min(buf.len());
            reader.read_exact(&mut buf[..n]).await?;
            if len > n {
                discard(&mut *reader, len - n).await?;
            }

            match addr {
                Some(addr) if frag == 0 => return Ok((n, addr)),
                _ => debug!(frag, len, "skipping tunnel frame without usable source"),
            }
        }
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let frame = encode_frame(target, buf)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(buf.len())
    }

    async fn close(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

/// Encode one tunnel frame.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_frame(addr: SocketAddr, payload: &[u8]) -> io::Result<Vec<u8>> {
    if payload.len() > hopchain_core::MAX_UDP_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "datagram too large for tunnel frame",
        ));
    }
    let mut frame = Vec::with_capacity(4 + 18 + payload.len());
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.push(0x00);
    match addr {
        SocketAddr::V4(a) => {
            frame.push(ATYP_IPV4);
            frame.extend_from_slice(&a.ip().octets());
        }
        SocketAddr::V6(a) => {
            frame.push(ATYP_IPV6);
            frame.extend_from_slice(&a.ip().octets());
        }
    }
    frame.extend_from_slice(&addr.port().to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Read ATYP + address + port. Domain addresses are consumed and yield `None`.
async fn read_addr<R>(reader: &mut R) -> io::Result<Option<SocketAddr>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let atyp = reader.read_u8().await?;
    let addr = match atyp {
        ATYP_IPV4 => {
            let mut ip = [0u8; 4];
            reader.read_exact(&mut ip).await?;
            Some(SocketAddr::from((Ipv4Addr::from(ip), reader.read_u16().await?)))
        }
        ATYP_IPV6 => {
            let mut ip = [0u8; 16];
            reader.read_exact(&mut ip).await?;
            Some(SocketAddr::from((Ipv6Addr::from(ip), reader.read_u16().await?)))
        }
        ATYP_DOMAIN => {
            let len = reader.read_u8().await? as usize;
            discard(reader, len + 2).await?;
            None
        }
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported address type: 0x{other:02x}"),
            ));
        }
    };
    Ok(addr)
}

async fn discard<R>(reader: &mut R, mut n: usize) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut scratch = [0u8; 512];
    while n > 0 {
        let chunk = n.min(scratch.len());
        reader.read_exact(&mut scratch[..chunk]).await?;
        n -= chunk;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn frames_carry_address_and_payload() {
        let (a, b) = duplex(4096);
        let left = UdpTunConn::new(a);
        let right = UdpTunConn::new(b);

        let v4: SocketAddr = "198.51.100.7:5353".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::2]:443".parse().unwrap();
        left.send_to(b"first", v4).await.unwrap();
        left.send_to(b"second", v6).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = right.recv_from(&mut buf).await.unwrap();
        assert_eq!((&buf[..n], from), (&b"first"[..], v4));
        let (n, from) = right.recv_from(&mut buf).await.unwrap();
        assert_eq!((&buf[..n], from), (&b"second"[..], v6));
    }

    #[tokio::test]
    async fn oversized_datagram_is_truncated_without_desync() {
        let (a, b) = duplex(4096);
        let left = UdpTunConn::new(a);
        let right = UdpTunConn::new(b);
        let addr: SocketAddr = "10.1.1.1:9".parse().unwrap();

        left.send_to(&[7u8; 100], addr).await.unwrap();
        left.send_to(b"next", addr).await.unwrap();

        let mut small = [0u8; 10];
        let (n, _) = right.recv_from(&mut small).await.unwrap();
        assert_eq!(n, 10);
        let (n, _) = right.recv_from(&mut small).await.unwrap();
        assert_eq!(&small[..n], b"next");
    }

    #[tokio::test]
    async fn domain_source_frames_are_skipped() {
        let (mut raw, b) = duplex(4096);
        let right = UdpTunConn::new(b);

        // LEN=2, FRAG=0, ATYP=domain "ab", port 53, DATA "xx"
        raw.write_all(&[0x00, 0x02, 0x00, ATYP_DOMAIN, 0x02, b'a', b'b', 0x00, 0x35, b'x', b'x'])
            .await
            .unwrap();
        let addr: SocketAddr = "10.0.0.9:53".parse().unwrap();
        raw.write_all(&encode_frame(addr, b"ok").unwrap()).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = right.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ok");
        assert_eq!(from, addr);
    }
}
