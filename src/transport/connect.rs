//! Endpoint validation and the interruptible TCP handshake.
//!
//! `std::net::TcpStream::connect_timeout` blocks for the whole timeout and
//! cannot observe a stop request, so the handshake is driven by hand:
//!
//! ```text
//! socket(2) ──set_nonblocking──► connect(2) ──EINPROGRESS──► poll(POLLOUT, 100ms)
//!                                                              │   ▲
//!                                    SO_ERROR set? ─► ConnectError │
//!                                    peer_addr ok? ─► Connected    │
//!                                    stop flag?    ─► Cancelled    │
//!                                    deadline?     ─► ConnectTimeout
//!                                    otherwise ────────────────────┘
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::error::TransportError;

/// Validated remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    ip: IpAddr,
    port: u16,
}

impl Endpoint {
    /// Validate `host` and `port` without touching the network.
    ///
    /// `host` must be an IPv4 or IPv6 literal; name resolution is not
    /// attempted. `port` must be in `1..=65535`.
    pub fn parse(host: &str, port: u32) -> Result<Self, TransportError> {
        let ip = host
            .trim()
            .parse::<IpAddr>()
            .ok()
            .ok_or_else(|| TransportError::AddressInvalid(host.to_string()))?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(TransportError::PortInvalid(port))?;
        Ok(Self { ip, port })
    }

    /// Remote socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Local wildcard address on the same port, for UDP binding.
    pub fn bind_addr(&self) -> SocketAddr {
        let any = match self.ip {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        SocketAddr::new(any, self.port)
    }

    /// Remote port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Connect to `addr`, giving up after `timeout` or as soon as `stop` is set.
///
/// The returned stream is back in blocking mode.
#[cfg(unix)]
pub(crate) fn connect_tcp(
    addr: SocketAddr,
    stop: &AtomicBool,
    timeout: Duration,
) -> Result<TcpStream, TransportError> {
    use std::os::unix::io::FromRawFd;
    use std::time::Instant;

    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };
    // SAFETY: plain socket(2) call; the descriptor is checked before use.
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(TransportError::ConnectError(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    // SAFETY: `fd` is a fresh socket nobody else owns; the stream closes it on drop.
    let stream = unsafe { TcpStream::from_raw_fd(fd) };
    stream
        .set_nonblocking(true)
        .map_err(|e| TransportError::ConnectError(format!("set non-blocking: {e}")))?;

    let started = Instant::now();
    match start_connect(&stream, addr) {
        Ok(()) => {}
        Err(e) if is_in_progress(&e) => {
            log::debug!("[Transport] Handshake in progress -> {addr}");
            wait_connected(&stream, stop, timeout, started)?;
        }
        Err(e) => return Err(TransportError::ConnectError(e.to_string())),
    }

    stream
        .set_nonblocking(false)
        .map_err(|e| TransportError::ConnectError(format!("set blocking: {e}")))?;
    Ok(stream)
}

/// Fallback for targets without `poll(2)`: a plain bounded connect.
#[cfg(not(unix))]
pub(crate) fn connect_tcp(
    addr: SocketAddr,
    stop: &AtomicBool,
    timeout: Duration,
) -> Result<TcpStream, TransportError> {
    use std::sync::atomic::Ordering;

    if stop.load(Ordering::Relaxed) {
        return Err(TransportError::Cancelled);
    }
    TcpStream::connect_timeout(&addr, timeout).map_err(|e| match e.kind() {
        std::io::ErrorKind::TimedOut => TransportError::ConnectTimeout {
            elapsed_ms: timeout.as_millis() as u64,
        },
        _ => TransportError::ConnectError(e.to_string()),
    })
}

#[cfg(unix)]
fn is_in_progress(err: &std::io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EINPROGRESS | libc::EINTR | libc::EALREADY)
    ) || err.kind() == std::io::ErrorKind::WouldBlock
}

#[cfg(unix)]
fn start_connect(stream: &TcpStream, addr: SocketAddr) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let (storage, len) = sockaddr_from(addr);
    // SAFETY: `storage` holds an initialised sockaddr of `len` bytes matching
    // the socket's address family, and outlives the call.
    let ret = unsafe {
        libc::connect(
            stream.as_raw_fd(),
            std::ptr::addr_of!(storage).cast::<libc::sockaddr>(),
            len,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn sockaddr_from(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // SAFETY: sockaddr_storage is plain old data; all-zero is a valid value.
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            // SAFETY: sockaddr_storage is large enough and aligned for any sockaddr_*.
            let sin = unsafe {
                &mut *std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr_in>()
            };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(v4.ip().octets()),
            };
            std::mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            // SAFETY: sockaddr_storage is large enough and aligned for any sockaddr_*.
            let sin6 = unsafe {
                &mut *std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr_in6>()
            };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: v6.ip().octets(),
            };
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_scope_id = v6.scope_id();
            std::mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

#[cfg(unix)]
fn wait_connected(
    stream: &TcpStream,
    stop: &AtomicBool,
    timeout: Duration,
    started: std::time::Instant,
) -> Result<(), TransportError> {
    use std::os::unix::io::AsRawFd;
    use std::sync::atomic::Ordering;

    use crate::constants::{CONNECT_POLL_INTERVAL, HANDSHAKE_SETTLE};

    let wait_ms = CONNECT_POLL_INTERVAL.as_millis() as libc::c_int;
    loop {
        if stop.load(Ordering::Relaxed) {
            return Err(TransportError::Cancelled);
        }

        let mut pfd = libc::pollfd {
            fd: stream.as_raw_fd(),
            events: libc::POLLOUT,
            revents: 0,
        };
        // SAFETY: `pfd` is one valid pollfd that lives for the whole call.
        let ready = unsafe { libc::poll(&mut pfd, 1, wait_ms) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(TransportError::ConnectError(format!("poll: {err}")));
            }
        } else if ready > 0 {
            if let Some(err) = stream
                .take_error()
                .map_err(|e| TransportError::ConnectError(e.to_string()))?
            {
                return Err(TransportError::ConnectError(err.to_string()));
            }
            match stream.peer_addr() {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {
                    std::thread::sleep(HANDSHAKE_SETTLE);
                }
                Err(e) => return Err(TransportError::ConnectError(e.to_string())),
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(TransportError::ConnectTimeout {
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
    }
}

/// Listener whose accept queue is already full, so new handshakes stay pending.
///
/// The returned stream occupies the only backlog slot and must be kept alive.
#[cfg(all(test, unix))]
pub(crate) fn saturated_listener() -> (std::net::TcpListener, TcpStream) {
    use std::os::unix::io::AsRawFd;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    // SAFETY: `listener` owns a valid listening socket for the whole call.
    let ret = unsafe { libc::listen(listener.as_raw_fd(), 0) };
    assert_eq!(ret, 0, "listen");
    let filler = TcpStream::connect(listener.local_addr().expect("addr")).expect("filler");
    std::thread::sleep(Duration::from_millis(50));
    (listener, filler)
}
