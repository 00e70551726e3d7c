//! End-to-end tests against a mock relay on loopback.
//!
//! The mock speaks just enough of the control protocol to authenticate
//! a session, mint streams, and push server events, and it owns one UDP
//! socket standing in for the relay's data plane.

use corelink::config::ClientConfig;
use corelink::control::EventHandlers;
use corelink::{state, wire, Client, Error};
use crossbeam_channel::unbounded;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct MockRelay {
    control_port: u16,
    udp: Arc<UdpSocket>,
    /// Clone of the accepted control connection, for pushing events.
    conn: crossbeam_channel::Receiver<TcpStream>,
    handle: Option<JoinHandle<()>>,
}

impl MockRelay {
    fn spawn() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let control_port = listener.local_addr().unwrap().port();
        let udp = Arc::new(UdpSocket::bind(("127.0.0.1", 0)).unwrap());
        udp.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let udp_port = udp.local_addr().unwrap().port();
        let (conn_tx, conn_rx) = unbounded();
        let handle = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let _ = conn_tx.send(conn.try_clone().unwrap());
            while let Some(command) = read_doc(&mut conn) {
                let function = command["function"].as_str().unwrap_or_default();
                let id = command["ID"].as_u64().unwrap_or(0);
                if let Some(response) = respond(function, id, udp_port) {
                    conn.write_all(response.to_string().as_bytes()).unwrap();
                }
            }
        });
        MockRelay {
            control_port,
            udp,
            conn: conn_rx,
            handle: Some(handle),
        }
    }

    fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::local_defaults();
        config.server.port = self.control_port;
        config.auth.username = "alice".to_string();
        config
    }

    fn push_event(&self, event: Value) {
        let mut conn = self.conn.recv_timeout(Duration::from_secs(5)).unwrap();
        conn.write_all(event.to_string().as_bytes()).unwrap();
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Reads one brace-balanced JSON document; `None` on disconnect.
fn read_doc(conn: &mut TcpStream) -> Option<Value> {
    let mut doc = Vec::new();
    let mut depth = 0i32;
    let mut byte = [0u8; 1];
    loop {
        match conn.read(&mut byte) {
            Ok(1) => {}
            _ => return None,
        }
        doc.push(byte[0]);
        match byte[0] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_slice(&doc).ok();
                }
            }
            _ => {}
        }
    }
}

fn respond(function: &str, id: u64, udp_port: u16) -> Option<Value> {
    match function {
        "auth" => Some(json!({
            "ID": id, "statusCode": 0, "token": "tok-1", "IP": "127.0.0.1",
        })),
        "sender" => Some(json!({
            "ID": id, "statusCode": 0, "streamID": 100, "MTU": 1400, "port": udp_port,
        })),
        "receiver" => Some(json!({
            "ID": id, "statusCode": 0, "streamID": 200, "MTU": 1400, "port": udp_port,
            "streamList": [{"streamID": 42}],
        })),
        "subscribe" | "unsubscribe" | "disconnect" => {
            Some(json!({"ID": id, "statusCode": 0}))
        }
        "listWorkspaces" => Some(json!({
            "ID": id, "statusCode": 0, "workspaceList": ["Holodeck", "Chalktalk"],
        })),
        "addWorkspace" => Some(json!({
            "ID": id, "statusCode": 1, "message": "permission denied",
        })),
        "noreply" => None,
        _ => Some(json!({
            "ID": id, "statusCode": 1, "message": "unknown function",
        })),
    }
}

#[test]
fn connect_authenticates_and_tears_down() {
    let relay = MockRelay::spawn();
    let client = Client::connect(&relay.config(), EventHandlers::default()).unwrap();
    assert_eq!(client.token(), "tok-1");
    assert_eq!(client.client_ip(), "127.0.0.1");
    assert_eq!(client.list_workspaces().unwrap(), vec!["Holodeck", "Chalktalk"]);
    drop(client);
    // MockRelay::drop joins the relay thread, which exits once the
    // client has hung up the control connection.
}

#[test]
fn sender_stream_publishes_datagrams() {
    let relay = MockRelay::spawn();
    let client = Client::connect(&relay.config(), EventHandlers::default()).unwrap();
    let stream_id = client
        .create_sender("holo", "audio", "mic", false, false, state::SEND_UDP)
        .unwrap();
    assert_eq!(stream_id, 100);
    assert_eq!(client.stream_state(stream_id), state::SEND_UDP);
    assert_eq!(client.local_streams(), vec![stream_id]);

    client.send(stream_id, b"ping").unwrap();
    let mut buf = [0u8; 256];
    let (n, _) = relay.udp.recv_from(&mut buf).unwrap();
    let frame = wire::decode_frame(&buf[..n]).unwrap();
    assert_eq!(frame.stream_id, 100);
    assert_eq!(frame.payload, b"ping");
    assert!(frame.header.is_empty());

    // Sending on a non-sender id is a state error.
    assert!(matches!(client.send(999, b"x"), Err(Error::State(_))));
}

#[test]
fn receiver_stream_dispatches_and_handles_stale() {
    let relay = MockRelay::spawn();
    let (stale_tx, stale_rx) = unbounded();
    let handlers = EventHandlers {
        on_stale: Some(Box::new(move |id| {
            let _ = stale_tx.send(id);
        })),
        ..Default::default()
    };
    let client = Client::connect(&relay.config(), handlers).unwrap();
    let stream_id = client
        .create_receiver("holo", &["audio".to_string()], "", false, false, state::RECV_UDP)
        .unwrap();
    assert_eq!(stream_id, 200);
    assert_eq!(client.sources(stream_id), vec![42]);

    let (frame_tx, frame_rx) = unbounded();
    client
        .set_on_receive(stream_id, move |stream, source, header, payload| {
            let _ = frame_tx.send((stream, source, header.to_vec(), payload.to_vec()));
        })
        .unwrap();

    // The receiver announced itself with a hello datagram; answer it
    // with one data frame from sender 42.
    let mut buf = [0u8; 256];
    let (n, client_addr) = relay.udp.recv_from(&mut buf).unwrap();
    let hello = wire::decode_frame(&buf[..n]).unwrap();
    assert_eq!(hello.stream_id, 200);
    let mut frame = wire::encode_frame(0, 0, b"chunk", b"hd", false);
    frame[4..8].copy_from_slice(&42i32.to_le_bytes());
    relay.udp.send_to(&frame, client_addr).unwrap();

    let (stream, source, header, payload) =
        frame_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!((stream, source), (200, 42));
    assert_eq!(header, b"hd");
    assert_eq!(payload, b"chunk");

    // Server reports sender 42 dead: handler fires and the source set
    // is purged.
    relay.push_event(json!({"function": "stale", "streamID": 42}));
    assert_eq!(stale_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    let deadline = Instant::now() + Duration::from_secs(5);
    while !client.sources(stream_id).is_empty() {
        assert!(Instant::now() < deadline, "stale source never purged");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn server_rejection_surfaces_as_comm_error() {
    let relay = MockRelay::spawn();
    let client = Client::connect(&relay.config(), EventHandlers::default()).unwrap();
    let err = client.add_workspace("forbidden").unwrap_err();
    assert!(matches!(err, Error::Comm(message) if message == "permission denied"));
}

#[test]
fn disconnect_of_unowned_stream_is_local_error() {
    let relay = MockRelay::spawn();
    let client = Client::connect(&relay.config(), EventHandlers::default()).unwrap();
    assert!(matches!(
        client.disconnect_stream(555),
        Err(Error::State(_))
    ));
}

#[test]
fn close_releases_inflight_commands_in_bounded_time() {
    let relay = MockRelay::spawn();
    let client = Arc::new(Client::connect(&relay.config(), EventHandlers::default()).unwrap());
    let worker = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.generic_command(r#"{"function":"noreply"}"#))
    };
    thread::sleep(Duration::from_millis(200));
    let started = Instant::now();
    client.close();
    let result = worker.join().unwrap();
    assert!(matches!(result, Err(Error::Comm(_))));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn subscribe_updates_source_set() {
    let relay = MockRelay::spawn();
    let client = Client::connect(&relay.config(), EventHandlers::default()).unwrap();
    let stream_id = client
        .create_receiver("holo", &[], "", false, false, state::RECV_UDP)
        .unwrap();
    // Drain the hello so the relay socket stays clean for other tests.
    let mut buf = [0u8; 256];
    let _ = relay.udp.recv_from(&mut buf);

    client.subscribe(stream_id, 77).unwrap();
    let mut sources = client.sources(stream_id);
    sources.sort_unstable();
    assert_eq!(sources, vec![42, 77]);
    client.unsubscribe(stream_id, 42).unwrap();
    assert_eq!(client.sources(stream_id), vec![77]);
}
