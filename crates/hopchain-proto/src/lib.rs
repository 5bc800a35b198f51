//! Relay protocol parsing and serialization.
//!
//! ```text
//! Request : VER(1) | FLAGS(1) | FEALEN(2) | FEATURES
//! Response: STATUS(1) | FEALEN(2) | FEATURES
//! Feature : TYPE(1) | LEN(2) | BODY
//! ```
//!
//! All multi-byte integers are big-endian. `FEALEN` is the total byte length
//! of the feature list, so a reader knows how much to pull off the stream
//! before decoding. Feature bodies are documented on each feature type.

mod feature;
mod message;

pub use feature::{AddrFeature, Feature, UserAuthFeature, decode_features};
pub use message::{Request, Response, parse_request, parse_response};

pub const VERSION1: u8 = 0x01;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
/// Low nibble of the flags byte carries the command.
pub const CMD_MASK: u8 = 0x0f;
/// Modifier bit: the command applies to UDP traffic.
pub const FLAG_UDP: u8 = 0x80;

pub const STATUS_OK: u8 = 0x00;
pub const STATUS_BAD_REQUEST: u8 = 0x01;
pub const STATUS_UNAUTHORIZED: u8 = 0x02;
pub const STATUS_FORBIDDEN: u8 = 0x03;
pub const STATUS_TIMEOUT: u8 = 0x04;
pub const STATUS_SERVICE_UNAVAILABLE: u8 = 0x05;
pub const STATUS_HOST_UNREACHABLE: u8 = 0x06;
pub const STATUS_NETWORK_UNREACHABLE: u8 = 0x07;
pub const STATUS_INTERNAL_SERVER_ERROR: u8 = 0x08;

pub const FEATURE_USER_AUTH: u8 = 0x01;
pub const FEATURE_ADDR: u8 = 0x02;

/// VER + FLAGS + FEALEN.
pub const REQUEST_HEADER_LEN: usize = 4;
/// STATUS + FEALEN.
pub const RESPONSE_HEADER_LEN: usize = 3;
/// TYPE + LEN.
pub const FEATURE_HEADER_LEN: usize = 3;
/// Maximum length of a one-byte length-prefixed field.
pub const MAX_FIELD_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    InvalidVersion,
    /// Feature header or body runs past the end of the feature list.
    TruncatedFeature,
    /// A length prefix inside a known feature body is inconsistent.
    InvalidFieldLen,
    InvalidUtf8,
    /// `host:port` string could not be split or the port is not a number.
    InvalidAddress,
}

/// Errors that can occur when writing protocol data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// Host exceeds 255 bytes.
    HostTooLong,
    /// Username or password exceeds 255 bytes.
    CredentialTooLong,
    /// Encoded feature list exceeds 65535 bytes.
    FeaturesTooLarge,
}

/// Parse result for incremental parsing.
///
/// - `Complete(T)` - parsing succeeded, contains the parsed value.
/// - `Incomplete(n)` - buffer too small; `n` is the **minimum total bytes** needed.
/// - `Invalid(e)` - protocol violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult<T> {
    Complete(T),
    Incomplete(usize),
    Invalid(ParseError),
}

/// Human readable label for a response status code.
pub fn status_text(status: u8) -> &'static str {
    match status {
        STATUS_OK => "ok",
        STATUS_BAD_REQUEST => "bad request",
        STATUS_UNAUTHORIZED => "unauthorized",
        STATUS_FORBIDDEN => "forbidden",
        STATUS_TIMEOUT => "timeout",
        STATUS_SERVICE_UNAVAILABLE => "service unavailable",
        STATUS_HOST_UNREACHABLE => "host unreachable",
        STATUS_NETWORK_UNREACHABLE => "network unreachable",
        STATUS_INTERNAL_SERVER_ERROR => "internal server error",
        _ => "unknown status",
    }
}

#[inline]
pub(crate) fn read_u16(buf: &[u8]) -> u16 {
    debug_assert!(buf.len() >= 2, "read_u16 requires at least 2 bytes");
    u16::from_be_bytes([buf[0], buf[1]])
}
