//! Relay request and response frames.

use bytes::{BufMut, BytesMut};

use crate::feature::{AddrFeature, Feature, UserAuthFeature, decode_features};
use crate::{
    CMD_MASK, FLAG_UDP, ParseError, ParseResult, REQUEST_HEADER_LEN, RESPONSE_HEADER_LEN,
    STATUS_OK, VERSION1, WriteError, read_u16,
};

/// Client → relay request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub version: u8,
    pub flags: u8,
    pub features: Vec<Feature>,
}

impl Request {
    /// Version-1 request with the given command flags and no features.
    pub fn new(flags: u8) -> Self {
        Self {
            version: VERSION1,
            flags,
            features: Vec::new(),
        }
    }

    /// Command carried in the low nibble of the flags.
    pub fn command(&self) -> u8 {
        self.flags & CMD_MASK
    }

    pub fn is_udp(&self) -> bool {
        self.flags & FLAG_UDP != 0
    }

    /// First address feature, if any.
    pub fn address(&self) -> Option<&AddrFeature> {
        find_addr(&self.features)
    }

    /// First user/password feature, if any.
    pub fn user_auth(&self) -> Option<&UserAuthFeature> {
        self.features.iter().find_map(|f| match f {
            Feature::UserAuth(a) => Some(a),
            _ => None,
        })
    }

    /// Append the encoded request to `buf`.
    ///
    /// On error `buf` is left untouched.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WriteError> {
        let features = encode_features(&self.features)?;
        let len = features_len(&features)?;
        buf.reserve(REQUEST_HEADER_LEN + features.len());
        buf.put_u8(self.version);
        buf.put_u8(self.flags);
        buf.put_u16(len);
        buf.extend_from_slice(&features);
        Ok(())
    }
}

/// Relay → client response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u8,
    pub features: Vec<Feature>,
}

impl Response {
    pub fn new(status: u8) -> Self {
        Self {
            status,
            features: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// First address feature, if any.
    pub fn address(&self) -> Option<&AddrFeature> {
        find_addr(&self.features)
    }

    /// Append the encoded response to `buf`.
    ///
    /// On error `buf` is left untouched.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WriteError> {
        let features = encode_features(&self.features)?;
        let len = features_len(&features)?;
        buf.reserve(RESPONSE_HEADER_LEN + features.len());
        buf.put_u8(self.status);
        buf.put_u16(len);
        buf.extend_from_slice(&features);
        Ok(())
    }
}

/// Parse a request from the start of `buf`.
///
/// On success returns the request and the number of bytes consumed.
pub fn parse_request(buf: &[u8]) -> ParseResult<(Request, usize)> {
    if buf.len() < REQUEST_HEADER_LEN {
        return ParseResult::Incomplete(REQUEST_HEADER_LEN);
    }
    let version = buf[0];
    if version != VERSION1 {
        return ParseResult::Invalid(ParseError::InvalidVersion);
    }
    let flags = buf[1];
    let total = REQUEST_HEADER_LEN + read_u16(&buf[2..4]) as usize;
    if buf.len() < total {
        return ParseResult::Incomplete(total);
    }
    match decode_features(&buf[REQUEST_HEADER_LEN..total]) {
        Ok(features) => ParseResult::Complete((
            Request {
                version,
                flags,
                features,
            },
            total,
        )),
        Err(e) => ParseResult::Invalid(e),
    }
}

/// Parse a response from the start of `buf`.
pub fn parse_response(buf: &[u8]) -> ParseResult<(Response, usize)> {
    if buf.len() < RESPONSE_HEADER_LEN {
        return ParseResult::Incomplete(RESPONSE_HEADER_LEN);
    }
    let status = buf[0];
    let total = RESPONSE_HEADER_LEN + read_u16(&buf[1..3]) as usize;
    if buf.len() < total {
        return ParseResult::Incomplete(total);
    }
    match decode_features(&buf[RESPONSE_HEADER_LEN..total]) {
        Ok(features) => ParseResult::Complete((Response { status, features }, total)),
        Err(e) => ParseResult::Invalid(e),
    }
}

fn encode_features(features: &[Feature]) -> Result<BytesMut, WriteError> {
    let mut buf = BytesMut::new();
    for f in features {
        f.encode(&mut buf)?;
    }
    Ok(buf)
}

#[allow(clippy::cast_possible_truncation)]
fn features_len(features: &[u8]) -> Result<u16, WriteError> {
    if features.len() > u16::MAX as usize {
        return Err(WriteError::FeaturesTooLarge);
    }
    Ok(features.len() as u16)
}

fn find_addr(features: &[Feature]) -> Option<&AddrFeature> {
    features.iter().find_map(|f| match f {
        Feature::Addr(a) => Some(a),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CMD_BIND, STATUS_FORBIDDEN};

    fn complete<T: std::fmt::Debug>(res: ParseResult<T>) -> T {
        match res {
            ParseResult::Complete(v) => v,
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn request_roundtrip_addr_and_auth() {
        let mut req = Request::new(CMD_BIND);
        req.features.push(UserAuthFeature::new("alice", "secret").into());
        req.features.push(AddrFeature::new("10.0.0.1", 1080).into());

        let mut buf = BytesMut::new();
        req.encode(&mut buf).unwrap();
        let (parsed, used) = complete(parse_request(&buf));

        assert_eq!(used, buf.len());
        assert_eq!(parsed, req);
        assert_eq!(parsed.address(), Some(&AddrFeature::new("10.0.0.1", 1080)));
        assert_eq!(
            parsed.user_auth(),
            Some(&UserAuthFeature::new("alice", "secret"))
        );
    }

    #[test]
    fn request_header_layout() {
        let req = Request::new(CMD_BIND | FLAG_UDP);
        let mut buf = BytesMut::new();
        req.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[VERSION1, CMD_BIND | FLAG_UDP, 0x00, 0x00]);

        let (parsed, _) = complete(parse_request(&buf));
        assert_eq!(parsed.command(), CMD_BIND);
        assert!(parsed.is_udp());
    }

    #[test]
    fn request_incomplete_reports_total() {
        let mut req = Request::new(CMD_BIND);
        req.features.push(AddrFeature::new("h", 1).into());
        let mut buf = BytesMut::new();
        req.encode(&mut buf).unwrap();

        assert_eq!(parse_request(&buf[..2]), ParseResult::Incomplete(REQUEST_HEADER_LEN));
        assert_eq!(parse_request(&buf[..5]), ParseResult::Incomplete(buf.len()));
    }

    #[test]
    fn request_rejects_bad_version() {
        assert_eq!(
            parse_request(&[0x05, CMD_BIND, 0x00, 0x00]),
            ParseResult::Invalid(ParseError::InvalidVersion)
        );
    }

    #[test]
    fn response_with_bound_address() {
        let mut resp = Response::new(STATUS_OK);
        resp.features.push(AddrFeature::new("203.0.113.5", 51820).into());
        let mut buf = BytesMut::new();
        resp.encode(&mut buf).unwrap();
        // trailing bytes belong to whatever follows on the stream
        buf.extend_from_slice(b"mux");

        let (parsed, used) = complete(parse_response(&buf));
        assert_eq!(used, buf.len() - 3);
        assert!(parsed.is_ok());
        assert_eq!(
            parsed.address().map(AddrFeature::to_host_port).as_deref(),
            Some("203.0.113.5:51820")
        );
    }

    #[test]
    fn response_failure_status_without_features() {
        let (parsed, used) = complete(parse_response(&[STATUS_FORBIDDEN, 0x00, 0x00]));
        assert_eq!(used, RESPONSE_HEADER_LEN);
        assert!(!parsed.is_ok());
        assert!(parsed.address().is_none());
    }

    #[test]
    fn encode_error_leaves_buffer_untouched() {
        let mut req = Request::new(CMD_BIND);
        req.features.push(AddrFeature::new("x".repeat(300), 1).into());
        let mut buf = BytesMut::new();
        assert_eq!(req.encode(&mut buf), Err(WriteError::HostTooLong));
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_feature_list_leaves_buffer_untouched() {
        // 300 * (3 + 1 + 250 + 2) bytes overflows the 16-bit length
        let addrs: Vec<Feature> = (0..300)
            .map(|_| AddrFeature::new("h".repeat(250), 443).into())
            .collect();

        let mut req = Request::new(CMD_BIND);
        req.features = addrs.clone();
        let mut buf = BytesMut::from(&b"prefix"[..]);
        assert_eq!(req.encode(&mut buf), Err(WriteError::FeaturesTooLarge));
        assert_eq!(&buf[..], b"prefix");

        let mut resp = Response::new(STATUS_OK);
        resp.features = addrs;
        let mut buf = BytesMut::new();
        assert_eq!(resp.encode(&mut buf), Err(WriteError::FeaturesTooLarge));
        assert!(buf.is_empty());
    }
}
