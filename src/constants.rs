//! Application-wide constants for motionlink.
//!
//! This module centralizes the timeouts, polling intervals and buffer sizes
//! used by the transport and dispatch layers.
//!
//! # Categories
//!
//! - **Timeouts**: Handshake and write bounds
//! - **Polling**: Worker loop wait granularity
//! - **Buffers**: Receive and framing limits
//! - **Protocol**: Wire-level constants and defaults

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time the TCP handshake may take before the attempt is abandoned.
///
/// Slow networks routinely need more than a second, so the bound is generous.
/// Overridable through `Config::connect_timeout_ms`.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a single outbound TCP write.
///
/// Keeps `send` from stalling a caller indefinitely when the peer stops
/// draining its receive window.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Polling
// ============================================================================

/// Readiness wait used while the non-blocking handshake is in flight.
pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause after a readiness wake-up that did not yet complete the handshake.
pub const HANDSHAKE_SETTLE: Duration = Duration::from_millis(10);

/// Bounded wait for read readiness in the TCP receive loop.
///
/// This is also the granularity at which `stop()` is observed.
pub const READ_WAIT: Duration = Duration::from_millis(100);

/// Idle sleep in the UDP receive loop when no datagram is pending.
pub const UDP_IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Bounded wait used by the outbound sender thread between queue checks.
pub const SEND_QUEUE_WAIT: Duration = Duration::from_millis(100);

// ============================================================================
// Buffers
// ============================================================================

/// Size of the scratch buffer for a single socket read (64 KB).
pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Largest unterminated line the framer will hold before discarding it (1 MiB).
pub const MAX_LINE_BUFFER: usize = 1024 * 1024;

// ============================================================================
// Protocol
// ============================================================================

/// `code` value the server uses to signal success.
pub const SUCCESS_CODE: i64 = 1000;

/// Record separator appended to every outbound message.
pub const LINE_TERMINATOR: &str = "\n";

/// Default server address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_PORT: u16 = 6666;
