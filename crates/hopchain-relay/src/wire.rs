//! Async reading and writing of relay frames.
//!
//! Readers pull exactly as many bytes as the frame needs, so whatever the
//! relay sends after its response (mux frames, tunnelled datagrams) stays
//! in the stream.

use bytes::BytesMut;
use hopchain_proto::{
    ParseResult, REQUEST_HEADER_LEN, RESPONSE_HEADER_LEN, Request, Response, parse_request,
    parse_response,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RelayError;

pub async fn write_request<W>(writer: &mut W, request: &Request) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::new();
    request.encode(&mut buf).map_err(RelayError::Write)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::new();
    response.encode(&mut buf).map_err(RelayError::Write)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_request<R>(reader: &mut R) -> Result<Request, RelayError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(REQUEST_HEADER_LEN);
    loop {
        match parse_request(&buf) {
            ParseResult::Complete((request, _)) => return Ok(request),
            ParseResult::Incomplete(need) => fill(reader, &mut buf, need).await?,
            ParseResult::Invalid(e) => return Err(RelayError::Proto(e)),
        }
    }
}

pub async fn read_response<R>(reader: &mut R) -> Result<Response, RelayError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(RESPONSE_HEADER_LEN);
    loop {
        match parse_response(&buf) {
            ParseResult::Complete((response, _)) => return Ok(response),
            ParseResult::Incomplete(need) => fill(reader, &mut buf, need).await?,
            ParseResult::Invalid(e) => return Err(RelayError::Proto(e)),
        }
    }
}

/// Grow `buf` to `need` bytes read from `reader`.
async fn fill<R>(reader: &mut R, buf: &mut Vec<u8>, need: usize) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let start = buf.len();
    buf.resize(need, 0);
    reader.read_exact(&mut buf[start..]).await?;
    Ok(())
}
