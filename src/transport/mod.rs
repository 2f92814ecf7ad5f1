//! Socket transport for the motion-analysis server.
//!
//! One worker thread per connection attempt owns the socket, frames the
//! byte stream into envelope lines and pushes everything it observes into a
//! single event channel. The consumer on the other end of that channel is the
//! only place where session state changes.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager ──start()──► TransportWorker thread
//!   │   ▲                          │ connect / bind
//!   │   │ state cell               │ read loop ──► LineDecoder
//!   │   └──────── EventSink ◄──────┘
//!   │                 │ LinkEvent (mpsc)
//!   │                 ▼
//!   │           dispatch consumer
//!   │
//!   └─ SendQueue ──► sender thread ──► TransportWorker::send ──► socket
//! ```

pub mod connect;
pub mod framing;
pub mod manager;
pub mod send_queue;
pub mod worker;

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;

use crate::error::TransportError;

pub use connect::Endpoint;
pub use framing::LineDecoder;
pub use manager::ConnectionManager;
pub use send_queue::SendQueue;
pub use worker::TransportWorker;

/// Connection state reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket, or the last one has been torn down.
    #[default]
    Disconnected,
    /// A worker is performing the handshake or bind.
    Connecting,
    /// Ready to exchange messages.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Socket flavour used for a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Stream socket with a handshake.
    Tcp,
    /// Datagram socket bound to the configured port.
    Udp,
}

impl Protocol {
    /// Pick the protocol from the `use_udp` flag.
    pub fn from_udp_flag(use_udp: bool) -> Self {
        if use_udp {
            Self::Udp
        } else {
            Self::Tcp
        }
    }
}

/// Event delivered from the transport to the dispatch consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// A complete envelope line arrived.
    Envelope(String),
    /// A connection-level error occurred.
    Fault(TransportError),
}

/// Relay between a worker and its owning [`ConnectionManager`].
///
/// Writes go to the shared state cell first, then to the event channel, so
/// `ConnectionManager::state()` never lags behind what observers were told.
/// Repeated transitions into the same state are collapsed.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: UnboundedSender<LinkEvent>,
    state: Arc<Mutex<ConnectionState>>,
    log_messages: bool,
}

impl EventSink {
    pub(crate) fn new(
        tx: UnboundedSender<LinkEvent>,
        state: Arc<Mutex<ConnectionState>>,
        log_messages: bool,
    ) -> Self {
        Self {
            tx,
            state,
            log_messages,
        }
    }

    /// Record a state transition and notify the consumer if it changed.
    pub(crate) fn set_state(&self, next: ConnectionState) {
        {
            let mut current = self.state.lock().expect("connection state mutex poisoned");
            if *current == next {
                return;
            }
            *current = next;
        }
        log::info!("[Transport] State -> {next}");
        let _ = self.tx.send(LinkEvent::StateChanged(next));
    }

    pub(crate) fn envelope(&self, line: String) {
        if self.log_messages {
            log::info!("[Transport] Recv: {line}");
        } else {
            log::debug!("[Transport] Recv {} bytes", line.len());
        }
        let _ = self.tx.send(LinkEvent::Envelope(line));
    }

    pub(crate) fn fault(&self, err: TransportError) {
        if !err.is_reportable() {
            log::debug!("[Transport] {err}");
            return;
        }
        log::warn!("[Transport] {err}");
        let _ = self.tx.send(LinkEvent::Fault(err));
    }

    pub(crate) fn log_messages(&self) -> bool {
        self.log_messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx, Arc::new(Mutex::new(ConnectionState::Disconnected)), false);
        (sink, rx)
    }

    fn current(sink: &EventSink) -> ConnectionState {
        *sink.state.lock().expect("connection state mutex poisoned")
    }

    #[test]
    fn test_repeated_state_is_collapsed() {
        let (sink, mut rx) = sink();
        sink.set_state(ConnectionState::Connecting);
        sink.set_state(ConnectionState::Connecting);
        sink.set_state(ConnectionState::Disconnected);
        sink.set_state(ConnectionState::Disconnected);

        assert_eq!(rx.try_recv(), Ok(LinkEvent::StateChanged(ConnectionState::Connecting)));
        assert_eq!(rx.try_recv(), Ok(LinkEvent::StateChanged(ConnectionState::Disconnected)));
        assert!(rx.try_recv().is_err());
        assert_eq!(current(&sink), ConnectionState::Disconnected);
    }

    #[test]
    fn test_cancelled_fault_is_not_forwarded() {
        let (sink, mut rx) = sink();
        sink.fault(TransportError::Cancelled);
        sink.fault(TransportError::GracefulClose);
        assert_eq!(rx.try_recv(), Ok(LinkEvent::Fault(TransportError::GracefulClose)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_protocol_from_flag() {
        assert_eq!(Protocol::from_udp_flag(true), Protocol::Udp);
        assert_eq!(Protocol::from_udp_flag(false), Protocol::Tcp);
    }
}
