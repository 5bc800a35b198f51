//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Bind Defaults
// ============================================================================

/// Default accept backlog for bound listeners.
pub const DEFAULT_BACKLOG: usize = 128;
/// Default per-peer inbound datagram queue depth.
pub const DEFAULT_UDP_QUEUE_SIZE: usize = 128;
/// Default inbound datagram buffer size (bytes).
pub const DEFAULT_UDP_BUFFER_SIZE: usize = 4096;
/// Default idle TTL for UDP peer connections in seconds.
pub const DEFAULT_UDP_TTL_SECS: u64 = 5;

// ============================================================================
// Dial / Handshake Defaults
// ============================================================================

/// Default dial timeout in seconds.
pub const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 5;
/// Default relay handshake timeout in seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
/// Default TLS handshake timeout in seconds.
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
/// Default TCP_NODELAY.
pub const DEFAULT_TCP_NO_DELAY: bool = true;

// ============================================================================
// Selector Defaults
// ============================================================================

/// Consecutive failures after which the fifo selector skips a node.
pub const DEFAULT_MAX_FAILS: u32 = 1;
/// Seconds a failed node stays excluded by the fifo selector.
pub const DEFAULT_FAIL_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Forwarding Defaults
// ============================================================================

/// Delay before re-binding after a bound listener closes, in seconds.
pub const DEFAULT_REBIND_DELAY_SECS: u64 = 3;
/// Idle timeout for forwarded UDP sessions in seconds.
pub const DEFAULT_FORWARD_UDP_IDLE_SECS: u64 = 60;

// ============================================================================
// Protocol Constants
// ============================================================================

/// Maximum UDP payload carried over a tunnel frame.
pub const MAX_UDP_PAYLOAD: usize = 65535;
