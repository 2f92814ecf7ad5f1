//! End-to-end tests against a loopback peer.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, UdpSocket};
use std::time::{Duration, Instant};

use motionlink::{
    Config, ConnectionState, MotionClient, Notification, Protocol, StatusCategory, TransportError,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

fn client() -> (MotionClient, UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let config = Config {
        connect_timeout_ms: 2000,
        ..Config::default()
    };
    let client = MotionClient::new(config, vec![Box::new(tx)]).expect("client");
    (client, rx)
}

/// Collect notifications until one matches `want`.
fn wait_for(rx: &mut UnboundedReceiver<Notification>, want: &Notification) -> Vec<Notification> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(notification) => {
                let done = &notification == want;
                seen.push(notification);
                if done {
                    return seen;
                }
            }
            Err(_) => std::thread::sleep(Duration::from_millis(5)),
        }
    }
    panic!("never saw {want:?}; got {seen:?}");
}

fn status(text: &str, category: StatusCategory) -> Notification {
    Notification::Status {
        text: text.to_string(),
        category,
    }
}

fn loopback_listener() -> (TcpListener, u32) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = u32::from(listener.local_addr().expect("addr").port());
    (listener, port)
}

#[test]
fn test_chunked_stream_drives_session() {
    let (listener, port) = loopback_listener();
    let (client, mut rx) = client();

    client.connect_to("127.0.0.1", port, Protocol::Tcp).expect("start");
    let (mut peer, _) = listener.accept().expect("accept");
    wait_for(&mut rx, &Notification::ConnectionState(ConnectionState::Connected));

    let begin = b"{\"cmd\":\"trajectoryAnalysis\",\"code\":1000,\"data\":{\"action\":\"begin\",\"bizId\":\"B1\"}}\r\n";
    for chunk in begin.chunks(7) {
        peer.write_all(chunk).expect("write");
        peer.flush().expect("flush");
    }
    wait_for(&mut rx, &Notification::Analysis(true));
    let session = client.session();
    assert!(session.analyzing);
    assert_eq!(session.biz_id, "B1");

    let interim = b"{\"cmd\":\"onTrajectoryAnalysis\",\"data\":{\"action\":\"result\",\"isFinish\":false}}\n";
    peer.write_all(b"garbage\n").expect("write");
    peer.write_all(interim).expect("write");
    let seen = wait_for(
        &mut rx,
        &status("Trajectory analysis incomplete", StatusCategory::AnalysisResult),
    );
    assert!(matches!(
        &seen[0],
        Notification::Status { text, .. } if text.starts_with("Malformed envelope")
    ));
    assert!(client.session().analyzing);

    peer.write_all(b"{\"cmd\":\"onTrajectoryAnalysis\",\"data\":{\"action\":\"stop\"}}\n")
        .expect("write");
    wait_for(&mut rx, &Notification::Analysis(false));
    assert!(!client.session().analyzing);
}

#[test]
fn test_graceful_close_reports_and_disconnects() {
    let (listener, port) = loopback_listener();
    let (client, mut rx) = client();

    client.connect_to("127.0.0.1", port, Protocol::Tcp).expect("start");
    let (peer, _) = listener.accept().expect("accept");
    wait_for(&mut rx, &Notification::ConnectionState(ConnectionState::Connected));
    assert!(client.is_connected());

    drop(peer);
    let seen = wait_for(&mut rx, &Notification::ConnectionState(ConnectionState::Disconnected));
    assert!(seen.contains(&status("Server closed the connection", StatusCategory::Message)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.send("{\"cmd\":\"late\"}\n"));
}

#[test]
fn test_enqueued_lines_reach_server() {
    let (listener, port) = loopback_listener();
    let (client, mut rx) = client();

    client.connect_to("127.0.0.1", port, Protocol::Tcp).expect("start");
    let (peer, _) = listener.accept().expect("accept");
    wait_for(&mut rx, &Notification::ConnectionState(ConnectionState::Connected));

    client.enqueue("{\"cmd\":\"cprAnalysis\",\"data\":{\"action\":\"begin\"}}");
    assert!(client.send("{\"cmd\":\"direct\"}\n"));

    let mut reader = BufReader::new(peer);
    let mut lines = Vec::new();
    for _ in 0..2 {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read");
        lines.push(line);
    }
    lines.sort();
    assert_eq!(
        lines,
        vec![
            "{\"cmd\":\"cprAnalysis\",\"data\":{\"action\":\"begin\"}}\n".to_string(),
            "{\"cmd\":\"direct\"}\n".to_string(),
        ]
    );
}

#[test]
fn test_send_and_stop_without_connection() {
    let (client, mut rx) = client();
    assert!(!client.send("{\"cmd\":\"x\"}\n"));
    client.disconnect();
    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    std::thread::sleep(Duration::from_millis(50));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_refused_connection_reports_failure() {
    let port = {
        let (listener, port) = loopback_listener();
        drop(listener);
        port
    };
    let (client, mut rx) = client();

    client.connect_to("127.0.0.1", port, Protocol::Tcp).expect("validated");
    let seen = wait_for(&mut rx, &Notification::ConnectionState(ConnectionState::Disconnected));
    assert_eq!(seen[0], Notification::ConnectionState(ConnectionState::Connecting));
    assert!(seen.iter().any(
        |n| matches!(n, Notification::Status { text, .. } if text.starts_with("Connection failed"))
    ));
}

#[test]
fn test_invalid_address_fails_fast() {
    let (client, mut rx) = client();
    let err = client
        .connect_to("motion.local", 6666, Protocol::Tcp)
        .expect_err("hostnames are rejected");
    assert_eq!(err, TransportError::AddressInvalid("motion.local".to_string()));
    wait_for(
        &mut rx,
        &status("Invalid address: motion.local", StatusCategory::Message),
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn test_udp_datagram_is_one_envelope() {
    let port = {
        let spare = UdpSocket::bind("127.0.0.1:0").expect("bind");
        u32::from(spare.local_addr().expect("addr").port())
    };
    let (client, mut rx) = client();

    client.connect_to("127.0.0.1", port, Protocol::Udp).expect("start");
    wait_for(&mut rx, &Notification::ConnectionState(ConnectionState::Connected));

    let peer = UdpSocket::bind("127.0.0.1:0").expect("peer");
    peer.send_to(
        b"{\"cmd\":\"onCprAnalysis\",\"data\":{\"action\":\"begin\",\"bizId\":\"C1\"}}",
        ("127.0.0.1", u16::try_from(port).expect("port")),
    )
    .expect("send");

    wait_for(&mut rx, &Notification::Analysis(true));
    assert_eq!(client.session().biz_id, "C1");

    client.disconnect();
    wait_for(&mut rx, &Notification::ConnectionState(ConnectionState::Disconnected));
}
