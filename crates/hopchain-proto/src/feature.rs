//! Typed, length-prefixed fields carried inside relay messages.
//!
//! ```text
//! Addr     BODY: HLEN(1) | HOST(HLEN) | PORT(2)
//! UserAuth BODY: ULEN(1) | USER(ULEN) | PLEN(1) | PASS(PLEN)
//! ```

use bytes::{BufMut, BytesMut};

use crate::{
    FEATURE_ADDR, FEATURE_HEADER_LEN, FEATURE_USER_AUTH, MAX_FIELD_LEN, ParseError, WriteError,
    read_u16,
};

/// A relay message feature.
///
/// Unknown feature types are skipped on decode, so this enum only holds
/// the types this crate understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feature {
    UserAuth(UserAuthFeature),
    Addr(AddrFeature),
}

impl Feature {
    /// Wire type tag.
    pub fn feature_type(&self) -> u8 {
        match self {
            Feature::UserAuth(_) => FEATURE_USER_AUTH,
            Feature::Addr(_) => FEATURE_ADDR,
        }
    }

    /// Append `TYPE | LEN | BODY` to `buf`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WriteError> {
        let mut body = BytesMut::with_capacity(64);
        match self {
            Feature::UserAuth(f) => f.encode_body(&mut body)?,
            Feature::Addr(f) => f.encode_body(&mut body)?,
        }
        if body.len() > u16::MAX as usize {
            return Err(WriteError::FeaturesTooLarge);
        }
        buf.put_u8(self.feature_type());
        buf.put_u16(body.len() as u16);
        buf.extend_from_slice(&body);
        Ok(())
    }
}

impl From<AddrFeature> for Feature {
    fn from(f: AddrFeature) -> Self {
        Feature::Addr(f)
    }
}

impl From<UserAuthFeature> for Feature {
    fn from(f: UserAuthFeature) -> Self {
        Feature::UserAuth(f)
    }
}

/// Decode a complete feature list (the `FEALEN` bytes after a header).
pub fn decode_features(mut buf: &[u8]) -> Result<Vec<Feature>, ParseError> {
    let mut features = Vec::new();
    while !buf.is_empty() {
        if buf.len() < FEATURE_HEADER_LEN {
            return Err(ParseError::TruncatedFeature);
        }
        let tag = buf[0];
        let len = read_u16(&buf[1..3]) as usize;
        let end = FEATURE_HEADER_LEN + len;
        if buf.len() < end {
            return Err(ParseError::TruncatedFeature);
        }
        let body = &buf[FEATURE_HEADER_LEN..end];
        match tag {
            FEATURE_USER_AUTH => features.push(Feature::UserAuth(UserAuthFeature::decode_body(body)?)),
            FEATURE_ADDR => features.push(Feature::Addr(AddrFeature::decode_body(body)?)),
            _ => {} // unknown type, skip by length
        }
        buf = &buf[end..];
    }
    Ok(features)
}

// ── Address ──

/// Target or bound address as a host string and port.
///
/// The host is kept textual: it may be an IPv4/IPv6 literal or a domain,
/// and an empty host means "any address" in a bind request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrFeature {
    pub host: String,
    pub port: u16,
}

impl AddrFeature {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`, `[v6]:port` or `:port`.
    pub fn parse_from(address: &str) -> Result<Self, ParseError> {
        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or(ParseError::InvalidAddress)?;
            let port = tail.strip_prefix(':').ok_or(ParseError::InvalidAddress)?;
            (host, port)
        } else {
            let (host, port) = address.rsplit_once(':').ok_or(ParseError::InvalidAddress)?;
            // bare IPv6 without brackets is ambiguous
            if host.contains(':') {
                return Err(ParseError::InvalidAddress);
            }
            (host, port)
        };
        let port = port.parse::<u16>().map_err(|_| ParseError::InvalidAddress)?;
        Ok(Self::new(host, port))
    }

    /// Join host and port, bracketing IPv6 literals.
    pub fn to_host_port(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WriteError> {
        if self.host.len() > MAX_FIELD_LEN {
            return Err(WriteError::HostTooLong);
        }
        buf.put_u8(self.host.len() as u8);
        buf.extend_from_slice(self.host.as_bytes());
        buf.put_u16(self.port);
        Ok(())
    }

    fn decode_body(body: &[u8]) -> Result<Self, ParseError> {
        let (host, rest) = read_short_str(body)?;
        if rest.len() != 2 {
            return Err(ParseError::InvalidFieldLen);
        }
        Ok(Self::new(host, read_u16(rest)))
    }
}

// ── User/password ──

/// Credentials carried in the clear; protecting them is the transport's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAuthFeature {
    pub username: String,
    pub password: String,
}

impl UserAuthFeature {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WriteError> {
        if self.username.len() > MAX_FIELD_LEN || self.password.len() > MAX_FIELD_LEN {
            return Err(WriteError::CredentialTooLong);
        }
        buf.put_u8(self.username.len() as u8);
        buf.extend_from_slice(self.username.as_bytes());
        buf.put_u8(self.password.len() as u8);
        buf.extend_from_slice(self.password.as_bytes());
        Ok(())
    }

    fn decode_body(body: &[u8]) -> Result<Self, ParseError> {
        let (username, rest) = read_short_str(body)?;
        let (password, rest) = read_short_str(rest)?;
        if !rest.is_empty() {
            return Err(ParseError::InvalidFieldLen);
        }
        Ok(Self::new(username, password))
    }
}

/// Read a one-byte length-prefixed UTF-8 string, returning it and the rest.
fn read_short_str(buf: &[u8]) -> Result<(&str, &[u8]), ParseError> {
    let (&len, rest) = buf.split_first().ok_or(ParseError::InvalidFieldLen)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(ParseError::InvalidFieldLen);
    }
    let s = std::str::from_utf8(&rest[..len]).map_err(|_| ParseError::InvalidUtf8)?;
    Ok((s, &rest[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_parse_forms() {
        assert_eq!(
            AddrFeature::parse_from("10.0.0.1:1080").unwrap(),
            AddrFeature::new("10.0.0.1", 1080)
        );
        assert_eq!(
            AddrFeature::parse_from("[2001:db8::1]:443").unwrap(),
            AddrFeature::new("2001:db8::1", 443)
        );
        assert_eq!(AddrFeature::parse_from(":0").unwrap(), AddrFeature::new("", 0));
        assert_eq!(
            AddrFeature::parse_from("example.com"),
            Err(ParseError::InvalidAddress)
        );
        assert_eq!(
            AddrFeature::parse_from("example.com:99999"),
            Err(ParseError::InvalidAddress)
        );
        assert_eq!(
            AddrFeature::parse_from("2001:db8::1:443"),
            Err(ParseError::InvalidAddress)
        );
    }

    #[test]
    fn addr_to_host_port_brackets_ipv6() {
        assert_eq!(AddrFeature::new("::1", 53).to_host_port(), "[::1]:53");
        assert_eq!(AddrFeature::new("a.example", 53).to_host_port(), "a.example:53");
    }

    #[test]
    fn addr_wire_layout() {
        let mut buf = BytesMut::new();
        Feature::Addr(AddrFeature::new("a.b", 0x0438)).encode(&mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &[FEATURE_ADDR, 0x00, 0x06, 0x03, b'a', b'.', b'b', 0x04, 0x38]
        );
    }

    #[test]
    fn decode_skips_unknown_feature() {
        let mut buf = BytesMut::new();
        // unknown type 0x7e with a 4-byte body
        buf.extend_from_slice(&[0x7e, 0x00, 0x04, 1, 2, 3, 4]);
        Feature::Addr(AddrFeature::new("h", 1)).encode(&mut buf).unwrap();

        let features = decode_features(&buf).unwrap();
        assert_eq!(features, vec![Feature::Addr(AddrFeature::new("h", 1))]);
    }

    #[test]
    fn decode_rejects_truncated_feature() {
        assert_eq!(
            decode_features(&[FEATURE_ADDR, 0x00, 0x09, 0x01]),
            Err(ParseError::TruncatedFeature)
        );
        assert_eq!(decode_features(&[FEATURE_ADDR, 0x00]), Err(ParseError::TruncatedFeature));
    }

    #[test]
    fn decode_rejects_inconsistent_body() {
        // host length says 5 but only 1 byte follows
        assert_eq!(
            decode_features(&[FEATURE_ADDR, 0x00, 0x02, 0x05, b'x']),
            Err(ParseError::InvalidFieldLen)
        );
        // trailing garbage after password
        assert_eq!(
            decode_features(&[FEATURE_USER_AUTH, 0x00, 0x05, 0x01, b'u', 0x01, b'p', 0xff]),
            Err(ParseError::InvalidFieldLen)
        );
    }

    #[test]
    fn encode_rejects_long_fields() {
        let mut buf = BytesMut::new();
        let host = "h".repeat(256);
        assert_eq!(
            Feature::Addr(AddrFeature::new(host, 1)).encode(&mut buf),
            Err(WriteError::HostTooLong)
        );
        let user = "u".repeat(256);
        assert_eq!(
            Feature::UserAuth(UserAuthFeature::new(user, "p")).encode(&mut buf),
            Err(WriteError::CredentialTooLong)
        );
        assert!(buf.is_empty());
    }
}
