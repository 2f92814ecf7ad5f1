//! Error taxonomy for the transport and dispatch layers.
//!
//! Connection-level errors ([`TransportError`]) are terminal for the worker
//! that produced them. Per-envelope errors ([`EnvelopeError`]) only discard
//! the offending envelope; session state is left untouched.

/// Errors raised while establishing, running or writing to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Host is not a valid IP address literal.
    AddressInvalid(String),
    /// Port is outside `1..=65535`.
    PortInvalid(u32),
    /// TCP handshake did not complete within the connect timeout.
    ConnectTimeout {
        /// Timeout that elapsed, in milliseconds.
        elapsed_ms: u64,
    },
    /// TCP handshake failed outright (refused, unreachable, ...).
    ConnectError(String),
    /// Remote peer shut the stream down in an orderly way.
    GracefulClose,
    /// Connection failed mid-stream.
    ConnectionError(String),
    /// Socket reported that it is no longer connected.
    NotConnected,
    /// UDP socket could not be bound to the local port.
    BindFailed(String),
    /// Outbound payload could not be written in full.
    SendFailure(String),
    /// Framing buffer grew past its cap without a record separator.
    BufferOverflow {
        /// Number of bytes discarded.
        discarded: usize,
    },
    /// `stop()` was observed before the handshake completed.
    Cancelled,
}

impl TransportError {
    /// Whether this error should be surfaced to observers.
    ///
    /// Cancellation is requested by the owner, so there is nobody to tell.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddressInvalid(host) => write!(f, "Invalid address: {host}"),
            Self::PortInvalid(port) => write!(f, "Invalid port: {port}"),
            Self::ConnectTimeout { elapsed_ms } => {
                write!(f, "Connection timed out after {elapsed_ms} ms")
            }
            Self::ConnectError(msg) => write!(f, "Connection failed: {msg}"),
            Self::GracefulClose => write!(f, "Server closed the connection"),
            Self::ConnectionError(msg) => write!(f, "Connection lost: {msg}"),
            Self::NotConnected => write!(f, "Connection lost: socket is not connected"),
            Self::BindFailed(msg) => write!(f, "UDP bind failed: {msg}"),
            Self::SendFailure(msg) => write!(f, "Send failed: {msg}"),
            Self::BufferOverflow { discarded } => {
                write!(f, "Receive buffer overflow, discarded {discarded} bytes")
            }
            Self::Cancelled => write!(f, "Connection attempt cancelled"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors raised while interpreting a single inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Text is not a JSON object with a string `cmd`.
    Malformed(String),
    /// `data` is missing or not shaped as the action requires.
    MissingDataField {
        /// Command the envelope carried.
        cmd: String,
        /// Action, if one could be read.
        action: String,
    },
    /// `cmd` names no known handler.
    UnknownCommand(String),
    /// `data.action` is not valid for the command.
    UnknownAction {
        /// Command the envelope carried.
        cmd: String,
        /// Unrecognized action.
        action: String,
    },
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(detail) => write!(f, "Malformed envelope: {detail}"),
            Self::MissingDataField { cmd, action } if action.is_empty() => {
                write!(f, "{cmd}: missing or invalid data")
            }
            Self::MissingDataField { cmd, action } => {
                write!(f, "{cmd}/{action}: missing or invalid data")
            }
            Self::UnknownCommand(cmd) => write!(f, "Unknown command: {cmd}"),
            Self::UnknownAction { cmd, action } => write!(f, "{cmd}: unknown action '{action}'"),
        }
    }
}

impl std::error::Error for EnvelopeError {}
