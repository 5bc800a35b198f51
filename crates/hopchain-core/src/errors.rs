//! Error kind labels for logging.
//!
//! Used as the `kind` field on error events so log pipelines can group
//! failures without parsing messages.

/// Chain or node construction failure.
pub const ERROR_BUILD: &str = "build";
/// Relay protocol violation or non-OK status.
pub const ERROR_PROTOCOL: &str = "protocol";
/// I/O error.
pub const ERROR_IO: &str = "io";
/// DNS/address resolution error.
pub const ERROR_RESOLVE: &str = "resolve";
/// Timeout error.
pub const ERROR_TIMEOUT: &str = "timeout";
/// Bounded queue or backlog overflow.
pub const ERROR_OVERFLOW: &str = "overflow";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
