//! Composing owner: one connection manager, one dispatch consumer.
//!
//! ```text
//! TransportWorker ─┐
//! sender thread  ──┼── LinkEvent ──► "motionlink-dispatch" ──► Dispatcher ──► observers
//! manager        ──┘   (mpsc)          blocking_recv loop          │
//!                                                                  └─ watch<Session>
//! ```
//!
//! The consumer thread exits once every event sender is gone, which happens
//! when the manager is dropped. Field order in [`MotionClient`] relies on that.

use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::dispatch::{Dispatcher, Observer, Session};
use crate::error::TransportError;
use crate::transport::{ConnectionManager, ConnectionState, Protocol};

/// Client for one motion-analysis server.
#[derive(Debug)]
pub struct MotionClient {
    // Must drop before `consumer`.
    manager: ConnectionManager,
    consumer: ConsumerThread,
    session: watch::Receiver<Session>,
    config: Config,
}

impl MotionClient {
    /// Build a client with `observers` attached. Does not connect.
    pub fn new(config: Config, observers: Vec<Box<dyn Observer>>) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut dispatcher = Dispatcher::new();
        for observer in observers {
            dispatcher.add_observer(observer);
        }
        let session = dispatcher.subscribe();

        let consumer = std::thread::Builder::new()
            .name("motionlink-dispatch".to_owned())
            .spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    dispatcher.handle_event(event);
                }
                log::debug!("[Client] Dispatch thread exiting");
            })
            .context("Failed to spawn dispatch thread")?;

        let manager = ConnectionManager::new(tx, config.connect_timeout(), config.log_messages);
        Ok(Self {
            manager,
            consumer: ConsumerThread(Some(consumer)),
            session,
            config,
        })
    }

    /// Connect using the configured host, port and protocol.
    pub fn connect(&self) -> Result<(), TransportError> {
        self.connect_to(&self.config.host, self.config.port, self.config.protocol())
    }

    /// Connect to an explicit endpoint, replacing any current connection.
    pub fn connect_to(
        &self,
        host: &str,
        port: u32,
        protocol: Protocol,
    ) -> Result<(), TransportError> {
        log::info!("[Client] Connecting to {host}:{port} ({protocol:?})");
        self.manager.start(host, port, protocol)
    }

    /// Close the connection. Idempotent.
    pub fn disconnect(&self) {
        self.manager.stop();
    }

    /// Send `payload` as-is on the caller's thread.
    pub fn send(&self, payload: &str) -> bool {
        self.manager.send(payload)
    }

    /// Queue `message` for sending; a line terminator is appended.
    pub fn enqueue(&self, message: &str) {
        self.manager.enqueue(message);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Whether a socket is open.
    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// Snapshot of the dispatcher's session.
    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    /// Receiver notified on every session change.
    pub fn watch_session(&self) -> watch::Receiver<Session> {
        self.session.clone()
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Joins the dispatch thread on drop.
#[derive(Debug)]
struct ConsumerThread(Option<JoinHandle<()>>);

impl Drop for ConsumerThread {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            if handle.join().is_err() {
                log::error!("[Client] Dispatch thread panicked");
            }
        }
    }
}
