//! One socket, one thread, one connection attempt.
//!
//! # Lifecycle
//!
//! ```text
//! start(host, port, proto) ──validate──► spawn "motionlink-transport"
//!                                            │
//!                     TCP: connect_tcp ──────┤ UDP: bind 0.0.0.0:port
//!                                            ▼
//!                                        Connected
//!                                            │ read loop (stop flag checked every READ_WAIT)
//!                                            ▼
//!                      teardown guard: close socket under lock, Disconnected
//!
//! stop() ──set flag──► join thread
//! ```
//!
//! The reader owns its own handle; the send path goes through a cloned handle
//! in a shared slot. Teardown empties that slot under the same lock `send`
//! takes, so a send racing teardown either completes or fails cleanly.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::connect::{connect_tcp, Endpoint};
use super::framing::LineDecoder;
use super::{ConnectionState, EventSink, Protocol};
use crate::constants::{READ_WAIT, RECV_BUFFER_SIZE, UDP_IDLE_SLEEP, WRITE_TIMEOUT};
use crate::error::TransportError;

/// Write half shared between the worker thread and `send`.
#[derive(Debug)]
enum Socket {
    Tcp(TcpStream),
    Udp {
        socket: UdpSocket,
        remote: Option<SocketAddr>,
    },
}

type SharedSocket = Arc<Mutex<Option<Socket>>>;

/// Background connection worker.
///
/// Created by [`TransportWorker::start`]; terminal failures end the thread and
/// leave the worker inert. Recovery is a fresh `start`.
#[derive(Debug)]
pub struct TransportWorker {
    endpoint: Endpoint,
    protocol: Protocol,
    stop: Arc<AtomicBool>,
    socket: SharedSocket,
    thread: Option<JoinHandle<()>>,
    log_messages: bool,
}

impl TransportWorker {
    /// Validate the endpoint and spawn the worker thread.
    ///
    /// Invalid input fails fast and spawns nothing.
    ///
    /// # Errors
    ///
    /// [`TransportError::AddressInvalid`] / [`TransportError::PortInvalid`] for
    /// bad input, [`TransportError::ConnectError`] if the thread cannot be spawned.
    pub(crate) fn start(
        host: &str,
        port: u32,
        protocol: Protocol,
        connect_timeout: Duration,
        sink: EventSink,
    ) -> Result<Self, TransportError> {
        let endpoint = Endpoint::parse(host, port)?;
        let stop = Arc::new(AtomicBool::new(false));
        let socket: SharedSocket = Arc::new(Mutex::new(None));
        let log_messages = sink.log_messages();

        let thread = {
            let endpoint = endpoint.clone();
            let stop = Arc::clone(&stop);
            let socket = Arc::clone(&socket);
            std::thread::Builder::new()
                .name("motionlink-transport".to_owned())
                .spawn(move || {
                    let teardown_sink = sink.clone();
                    let teardown_socket = Arc::clone(&socket);
                    let _teardown = scopeguard::guard((), move |()| {
                        close_socket(&teardown_socket);
                        teardown_sink.set_state(ConnectionState::Disconnected);
                        log::debug!("[Transport] Worker thread exiting");
                    });

                    let result = match protocol {
                        Protocol::Tcp => run_tcp(&endpoint, connect_timeout, &stop, &socket, &sink),
                        Protocol::Udp => run_udp(&endpoint, &stop, &socket, &sink),
                    };
                    if let Err(err) = result {
                        if stop.load(Ordering::Relaxed) && err != TransportError::Cancelled {
                            log::debug!("[Transport] Ignoring error after stop: {err}");
                        } else {
                            sink.fault(err);
                        }
                    }
                })
                .map_err(|e| TransportError::ConnectError(format!("spawn worker: {e}")))?
        };

        log::info!("[Transport] Worker started for {endpoint} ({protocol:?})");
        Ok(Self {
            endpoint,
            protocol,
            stop,
            socket,
            thread: Some(thread),
            log_messages,
        })
    }

    /// Write one payload to the peer.
    ///
    /// Never blocks on a missing socket. A short write counts as a failure and
    /// is not retried.
    ///
    /// # Errors
    ///
    /// [`TransportError::SendFailure`] when there is no socket or the write
    /// fails or is partial.
    pub fn send(&self, payload: &str) -> Result<(), TransportError> {
        if payload.is_empty() {
            return Err(TransportError::SendFailure("empty payload".to_string()));
        }
        let bytes = payload.as_bytes();

        let mut slot = self.socket.lock().expect("socket mutex poisoned");
        let written = match slot.as_mut() {
            None => return Err(TransportError::SendFailure("not connected".to_string())),
            Some(Socket::Tcp(stream)) => stream.write(bytes),
            Some(Socket::Udp { socket, remote }) => {
                let target = *remote.get_or_insert_with(|| self.endpoint.socket_addr());
                socket.send_to(bytes, target)
            }
        }
        .map_err(|e| TransportError::SendFailure(e.to_string()))?;
        drop(slot);

        if written != bytes.len() {
            return Err(TransportError::SendFailure(format!(
                "partial write: {written} of {} bytes",
                bytes.len()
            )));
        }
        if self.log_messages {
            log::info!("[Transport] Sent: {}", payload.trim_end());
        } else {
            log::debug!("[Transport] Sent {written} bytes");
        }
        Ok(())
    }

    /// Whether the worker currently holds a usable socket.
    pub fn is_connected(&self) -> bool {
        self.socket.lock().expect("socket mutex poisoned").is_some()
    }

    /// Endpoint this worker was started for.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Protocol this worker was started with.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Signal the thread to exit and wait for it. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("[Transport] Worker thread panicked");
            }
        }
    }
}

impl Drop for TransportWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn close_socket(slot: &SharedSocket) {
    let taken = slot.lock().expect("socket mutex poisoned").take();
    if let Some(Socket::Tcp(stream)) = &taken {
        let _ = stream.shutdown(Shutdown::Both);
    }
}

fn run_tcp(
    endpoint: &Endpoint,
    connect_timeout: Duration,
    stop: &AtomicBool,
    slot: &SharedSocket,
    sink: &EventSink,
) -> Result<(), TransportError> {
    log::info!("[Transport] Connecting to {endpoint}");
    let stream = connect_tcp(endpoint.socket_addr(), stop, connect_timeout)?;
    stream
        .set_read_timeout(Some(READ_WAIT))
        .and_then(|()| stream.set_write_timeout(Some(WRITE_TIMEOUT)))
        .map_err(|e| TransportError::ConnectError(format!("configure socket: {e}")))?;
    let writer = stream
        .try_clone()
        .map_err(|e| TransportError::ConnectError(format!("clone socket: {e}")))?;
    *slot.lock().expect("socket mutex poisoned") = Some(Socket::Tcp(writer));
    sink.set_state(ConnectionState::Connected);

    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut reader = &stream;
    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }
        match stream.take_error() {
            Ok(None) => {}
            Ok(Some(e)) | Err(e) => return Err(TransportError::ConnectionError(e.to_string())),
        }

        match reader.read(&mut buf) {
            Ok(0) => return Err(TransportError::GracefulClose),
            Ok(n) => forward(&mut decoder, &buf[..n], sink, false),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(classify_read_error(&stream, &e)),
        }
    }
}

fn classify_read_error(stream: &TcpStream, err: &std::io::Error) -> TransportError {
    match stream.peer_addr() {
        Err(e) if e.kind() == ErrorKind::NotConnected => TransportError::NotConnected,
        _ => TransportError::ConnectionError(err.to_string()),
    }
}

fn run_udp(
    endpoint: &Endpoint,
    stop: &AtomicBool,
    slot: &SharedSocket,
    sink: &EventSink,
) -> Result<(), TransportError> {
    let bind_addr = endpoint.bind_addr();
    let socket = UdpSocket::bind(bind_addr)
        .map_err(|e| TransportError::BindFailed(format!("{bind_addr}: {e}")))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| TransportError::BindFailed(format!("set non-blocking: {e}")))?;
    let writer = socket
        .try_clone()
        .map_err(|e| TransportError::BindFailed(format!("clone socket: {e}")))?;
    *slot.lock().expect("socket mutex poisoned") = Some(Socket::Udp {
        socket: writer,
        remote: None,
    });
    log::info!("[Transport] UDP bound to {bind_addr}, peer {endpoint}");
    sink.set_state(ConnectionState::Connected);

    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }
        match socket.recv_from(&mut buf) {
            Ok((0, _)) => {}
            Ok((n, from)) => {
                log::debug!("[Transport] Datagram of {n} bytes from {from}");
                forward(&mut decoder, &buf[..n], sink, true);
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                std::thread::sleep(UDP_IDLE_SLEEP);
            }
            // ICMP port-unreachable from an earlier send surfaces here; it is not fatal.
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                log::debug!("[Transport] Ignoring UDP reset: {e}");
            }
            Err(e) => return Err(TransportError::ConnectionError(e.to_string())),
        }
    }
}

fn forward(decoder: &mut LineDecoder, bytes: &[u8], sink: &EventSink, datagram: bool) {
    let records = if datagram {
        decoder.feed_datagram(bytes)
    } else {
        decoder.feed(bytes)
    };
    if let Some(discarded) = decoder.take_overflow() {
        sink.fault(TransportError::BufferOverflow { discarded });
    }
    for record in records {
        sink.envelope(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LinkEvent;
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::time::Instant;
    use tokio::sync::mpsc;

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        (EventSink::new(tx, state, false), rx)
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(event) = rx.try_recv() {
                return event;
            }
            assert!(Instant::now() < deadline, "timed out waiting for event");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_invalid_input_spawns_nothing() {
        let (sink, mut rx) = sink();
        let timeout = Duration::from_secs(1);
        let err = TransportWorker::start("localhost", 6666, Protocol::Tcp, timeout, sink)
            .expect_err("hostnames are rejected");
        assert_eq!(err, TransportError::AddressInvalid("localhost".to_string()));
        assert!(rx.try_recv().is_err());

        let (sink, _rx) = self::sink();
        let err = TransportWorker::start("127.0.0.1", 0, Protocol::Udp, timeout, sink)
            .expect_err("port 0 is rejected");
        assert_eq!(err, TransportError::PortInvalid(0));
    }

    #[test]
    fn test_tcp_receive_send_and_graceful_close() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = u32::from(listener.local_addr().expect("addr").port());
        let (sink, mut rx) = sink();

        let mut worker =
            TransportWorker::start("127.0.0.1", port, Protocol::Tcp, Duration::from_secs(2), sink)
                .expect("start");
        let (mut peer, _) = listener.accept().expect("accept");

        assert_eq!(next_event(&mut rx), LinkEvent::StateChanged(ConnectionState::Connected));
        assert!(worker.is_connected());

        peer.write_all(b"{\"cmd\":\"a\"}\r\n{\"cmd\":").expect("write");
        peer.write_all(b"\"b\"}\n").expect("write");
        assert_eq!(next_event(&mut rx), LinkEvent::Envelope("{\"cmd\":\"a\"}".to_string()));
        assert_eq!(next_event(&mut rx), LinkEvent::Envelope("{\"cmd\":\"b\"}".to_string()));

        worker.send("{\"cmd\":\"out\"}\n").expect("send");
        let mut line = String::new();
        std::io::BufReader::new(&peer).read_line(&mut line).expect("read");
        assert_eq!(line, "{\"cmd\":\"out\"}\n");

        peer.shutdown(Shutdown::Both).expect("shutdown");
        drop(peer);
        assert_eq!(next_event(&mut rx), LinkEvent::Fault(TransportError::GracefulClose));
        assert_eq!(next_event(&mut rx), LinkEvent::StateChanged(ConnectionState::Disconnected));

        worker.stop();
        assert!(!worker.is_connected());
        assert!(worker.send("late").is_err());
    }

    #[test]
    fn test_stop_is_idempotent_and_silent() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = u32::from(listener.local_addr().expect("addr").port());
        let (sink, mut rx) = sink();

        let mut worker =
            TransportWorker::start("127.0.0.1", port, Protocol::Tcp, Duration::from_secs(2), sink)
                .expect("start");
        let _peer = listener.accept().expect("accept");
        assert_eq!(next_event(&mut rx), LinkEvent::StateChanged(ConnectionState::Connected));

        worker.stop();
        worker.stop();
        assert_eq!(rx.try_recv(), Ok(LinkEvent::StateChanged(ConnectionState::Disconnected)));
        assert!(rx.try_recv().is_err(), "stop must not report a fault");
    }

    /// Close `stream` with an RST instead of a FIN.
    #[cfg(unix)]
    fn reset(stream: TcpStream) {
        use std::os::unix::io::AsRawFd;

        let linger = libc::linger {
            l_onoff: 1,
            l_linger: 0,
        };
        // SAFETY: `stream` owns a valid socket and `linger` outlives the call.
        let ret = unsafe {
            libc::setsockopt(
                stream.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_LINGER,
                std::ptr::addr_of!(linger).cast(),
                std::mem::size_of::<libc::linger>() as libc::socklen_t,
            )
        };
        assert_eq!(ret, 0, "SO_LINGER");
        drop(stream);
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_read_error() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let mut stream = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (peer, _) = listener.accept().expect("accept");

        let live = std::io::Error::other("boom");
        assert_eq!(
            classify_read_error(&stream, &live),
            TransportError::ConnectionError("boom".to_string())
        );

        reset(peer);
        stream.set_read_timeout(Some(Duration::from_secs(2))).expect("timeout");
        let mut buf = [0u8; 16];
        let err = loop {
            match stream.read(&mut buf) {
                Ok(0) => panic!("reset peer must not look like a graceful close"),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => break e,
            }
        };
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
        assert_eq!(classify_read_error(&stream, &err), TransportError::NotConnected);
    }

    #[cfg(unix)]
    #[test]
    fn test_peer_reset_is_connection_fault() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = u32::from(listener.local_addr().expect("addr").port());
        let (sink, mut rx) = sink();

        let mut worker =
            TransportWorker::start("127.0.0.1", port, Protocol::Tcp, Duration::from_secs(2), sink)
                .expect("start");
        let (peer, _) = listener.accept().expect("accept");
        assert_eq!(next_event(&mut rx), LinkEvent::StateChanged(ConnectionState::Connected));

        reset(peer);
        match next_event(&mut rx) {
            LinkEvent::Fault(
                TransportError::ConnectionError(_) | TransportError::NotConnected,
            ) => {}
            other => panic!("expected a connection fault, got {other:?}"),
        }
        assert_eq!(next_event(&mut rx), LinkEvent::StateChanged(ConnectionState::Disconnected));
        worker.stop();
    }
}
