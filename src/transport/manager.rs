//! Public owner of the connection lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use super::connect::Endpoint;
use super::send_queue::SendQueue;
use super::worker::TransportWorker;
use super::{ConnectionState, EventSink, LinkEvent, Protocol};
use crate::constants::{LINE_TERMINATOR, SEND_QUEUE_WAIT};
use crate::error::TransportError;

type SharedWorker = Arc<Mutex<Option<TransportWorker>>>;

/// Starts and stops transport workers and owns the outbound queue.
///
/// Every state transition and transport fault is forwarded as a
/// [`LinkEvent`] on the channel given to [`ConnectionManager::new`]. A
/// dedicated `motionlink-sender` thread drains the [`SendQueue`] into the
/// live worker, so producers never touch the socket directly.
#[derive(Debug)]
pub struct ConnectionManager {
    state: Arc<Mutex<ConnectionState>>,
    events: UnboundedSender<LinkEvent>,
    queue: Arc<SendQueue>,
    worker: SharedWorker,
    sender: Option<JoinHandle<()>>,
    sender_stop: Arc<AtomicBool>,
    connect_timeout: Duration,
    log_messages: bool,
}

impl ConnectionManager {
    /// Create a manager that reports to `events`.
    ///
    /// The sender thread starts immediately and idles until a worker exists.
    pub fn new(
        events: UnboundedSender<LinkEvent>,
        connect_timeout: Duration,
        log_messages: bool,
    ) -> Self {
        let state = Arc::new(Mutex::new(ConnectionState::Disconnected));
        let queue = Arc::new(SendQueue::new());
        let worker: SharedWorker = Arc::new(Mutex::new(None));
        let sender_stop = Arc::new(AtomicBool::new(false));

        let sink = EventSink::new(events.clone(), Arc::clone(&state), log_messages);
        let sender = spawn_sender(
            Arc::clone(&queue),
            Arc::clone(&worker),
            Arc::clone(&sender_stop),
            sink,
        );

        Self {
            state,
            events,
            queue,
            worker,
            sender,
            sender_stop,
            connect_timeout,
            log_messages,
        }
    }

    /// Connect to `host:port`, replacing any previous connection.
    ///
    /// Emits `Connecting` before the worker is spawned. On invalid input a
    /// fault is reported and the state stays `Disconnected`.
    ///
    /// # Errors
    ///
    /// Validation and spawn failures from [`TransportWorker::start`].
    pub fn start(&self, host: &str, port: u32, protocol: Protocol) -> Result<(), TransportError> {
        self.stop_worker();
        let sink = self.sink();

        if let Err(err) = Endpoint::parse(host, port) {
            sink.fault(err.clone());
            sink.set_state(ConnectionState::Disconnected);
            return Err(err);
        }

        sink.set_state(ConnectionState::Connecting);
        match TransportWorker::start(host, port, protocol, self.connect_timeout, sink.clone()) {
            Ok(worker) => {
                *self.worker.lock().expect("worker mutex poisoned") = Some(worker);
                Ok(())
            }
            Err(err) => {
                sink.fault(err.clone());
                sink.set_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Tear down the current connection and drop queued messages.
    ///
    /// Blocks until the worker thread has exited. Idempotent.
    pub fn stop(&self) {
        self.stop_worker();
        self.queue.clear();
        self.sink().set_state(ConnectionState::Disconnected);
    }

    /// Send immediately on the caller's thread.
    ///
    /// Returns `false` when there is no socket or the write failed.
    pub fn send(&self, payload: &str) -> bool {
        let guard = self.worker.lock().expect("worker mutex poisoned");
        let Some(worker) = guard.as_ref() else {
            log::debug!("[Transport] Send without a connection");
            return false;
        };
        match worker.send(payload) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("[Transport] {err}");
                false
            }
        }
    }

    /// Queue `message` for the sender thread, appending the line terminator.
    pub fn enqueue(&self, message: &str) {
        let mut line = String::with_capacity(message.len() + LINE_TERMINATOR.len());
        line.push_str(message);
        line.push_str(LINE_TERMINATOR);
        self.queue.push(line);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("connection state mutex poisoned")
    }

    /// Whether a worker holds a usable socket.
    pub fn is_connected(&self) -> bool {
        self.worker
            .lock()
            .expect("worker mutex poisoned")
            .as_ref()
            .is_some_and(TransportWorker::is_connected)
    }

    /// Messages waiting for the sender thread.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn sink(&self) -> EventSink {
        EventSink::new(self.events.clone(), Arc::clone(&self.state), self.log_messages)
    }

    fn stop_worker(&self) {
        // Join outside the lock so the sender thread is never stuck behind it.
        let previous = self.worker.lock().expect("worker mutex poisoned").take();
        if let Some(mut worker) = previous {
            log::info!("[Transport] Stopping worker for {}", worker.endpoint());
            worker.stop();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop_worker();
        self.sender_stop.store(true, Ordering::Relaxed);
        self.queue.wake();
        if let Some(handle) = self.sender.take() {
            let _ = handle.join();
        }
    }
}

fn spawn_sender(
    queue: Arc<SendQueue>,
    worker: SharedWorker,
    stop: Arc<AtomicBool>,
    sink: EventSink,
) -> Option<JoinHandle<()>> {
    let spawned = std::thread::Builder::new()
        .name("motionlink-sender".to_owned())
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                for message in queue.wait_drain(SEND_QUEUE_WAIT) {
                    let guard = worker.lock().expect("worker mutex poisoned");
                    let result = match guard.as_ref() {
                        Some(worker) => worker.send(&message),
                        None => Err(TransportError::SendFailure("not connected".to_string())),
                    };
                    drop(guard);
                    if let Err(err) = result {
                        sink.fault(err);
                    }
                }
            }
            log::debug!("[Transport] Sender thread exiting");
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::error!("[Transport] Failed to spawn sender thread: {e}");
            None
        }
    }
}
