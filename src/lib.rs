//! motionlink - persistent client for a motion-analysis server.
//!
//! Exchanges line-delimited JSON envelopes over TCP or UDP and runs the
//! analysis session state machine on top of them.
//!
//! # Architecture
//!
//! - **Transport** - one worker thread per connection attempt, line framing,
//!   outbound queue, connection lifecycle
//! - **Protocol** - envelope model and result summaries
//! - **Dispatch** - session state machine and observer notifications
//! - **Client** - owns a transport and a serialized dispatch consumer
//!
//! # Modules
//!
//! - [`transport`] - sockets, framing and the connection manager
//! - [`protocol`] - envelope parsing
//! - [`dispatch`] - session tracking and notifications
//! - [`client`] - the [`MotionClient`] entry point
//! - [`config`] - configuration loading/saving

// Library modules
pub mod client;
pub mod dispatch;
pub mod protocol;
pub mod transport;

pub mod config;
pub mod constants;
pub mod error;

// Re-export commonly used types
pub use client::MotionClient;
pub use config::Config;
pub use dispatch::{AnalysisMode, Dispatcher, Notification, Observer, Session, StatusCategory};
pub use error::{EnvelopeError, TransportError};
pub use transport::{ConnectionManager, ConnectionState, LineDecoder, Protocol};
