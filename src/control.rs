//! Control channel to the relay server.
//!
//! Commands and responses are JSON objects over one TCP connection.
//! Writers serialize on a lock so concurrent commands never interleave.
//! A receive thread reassembles documents by brace depth and routes
//! them: documents carrying an `ID` wake the caller waiting in the
//! response mailbox, documents without one are server-initiated events
//! handled on a separate dispatch thread so a slow user callback never
//! stalls the socket.

use crate::error::Result;
use crate::mailbox::Mailbox;
use crate::recv_buffer::RecvBuffer;
use crate::registry::StreamCatalog;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;
use parking_lot::Mutex;
use serde_json::Value;
use std::io::Write;
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Socket read timeout bounding shutdown latency of the receive thread.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

pub type StreamEventHandler = Box<dyn Fn(i32) + Send + Sync>;
pub type PairEventHandler = Box<dyn Fn(i32, i32) + Send + Sync>;

/// User hooks for server-initiated events. Handlers run on the control
/// channel's dispatch thread.
#[derive(Default)]
pub struct EventHandlers {
    /// A receiver listening to one of this session's senders went away.
    pub on_dropped: Option<StreamEventHandler>,
    /// A sender feeding one of this session's receivers died. Called
    /// with the dead sender's id; the source is also purged from every
    /// receiver's source set.
    pub on_stale: Option<StreamEventHandler>,
    /// A receiver subscribed to one of this session's senders.
    /// Arguments: sender id, receiver id.
    pub on_subscriber: Option<PairEventHandler>,
    /// A new sender matches one of this session's receivers.
    /// Arguments: receiver id, sender id.
    pub on_update: Option<PairEventHandler>,
}

pub struct ControlChannel {
    stream: TcpStream,
    send_lock: Mutex<()>,
    responses: Arc<Mailbox<Value>>,
    running: Arc<AtomicBool>,
    events: Sender<Option<Value>>,
    recv_worker: Mutex<Option<JoinHandle<()>>>,
    event_worker: Mutex<Option<JoinHandle<()>>>,
}

impl ControlChannel {
    /// Connects to the relay's control port and starts the receive and
    /// event threads. `catalog` is consulted when server events require
    /// local bookkeeping.
    pub fn connect(
        address: IpAddr,
        port: u16,
        handlers: EventHandlers,
        catalog: Arc<StreamCatalog>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(SocketAddr::new(address, port))?;
        stream.set_read_timeout(Some(RECV_TIMEOUT))?;
        let responses = Arc::new(Mailbox::new());
        let running = Arc::new(AtomicBool::new(true));
        let (events, event_rx) = unbounded::<Option<Value>>();

        let recv_worker = {
            let mut reader = stream.try_clone()?;
            let responses = Arc::clone(&responses);
            let events = events.clone();
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("control-recv".to_string())
                .spawn(move || recv_loop(&mut reader, &responses, &events, &running))?
        };
        let event_worker = thread::Builder::new()
            .name("control-events".to_string())
            .spawn(move || event_loop(event_rx, handlers, catalog))?;

        Ok(ControlChannel {
            stream,
            send_lock: Mutex::new(()),
            responses,
            running,
            events,
            recv_worker: Mutex::new(Some(recv_worker)),
            event_worker: Mutex::new(Some(event_worker)),
        })
    }

    /// Reserves a correlation id for the next command.
    pub fn reserve(&self) -> u32 {
        self.responses.reserve()
    }

    /// Writes one serialized command. Returns false once the channel is
    /// shut down or the write fails.
    pub fn send_command(&self, bytes: &[u8]) -> bool {
        let _guard = self.send_lock.lock();
        if !self.running.load(Ordering::Relaxed) {
            return false;
        }
        (&self.stream).write_all(bytes).is_ok()
    }

    /// Sends a command and blocks until the response with the matching
    /// id arrives. Returns an empty object when the send fails or the
    /// channel shuts down while waiting; callers treat that as a
    /// communication error.
    pub fn send_and_await(&self, command: &Value, id: u32) -> Value {
        let bytes = match serde_json::to_vec(command) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("unserializable command: {}", e);
                return empty_response();
            }
        };
        if !self.send_command(&bytes) {
            return empty_response();
        }
        self.responses
            .get(id, true)
            .unwrap_or_else(empty_response)
    }

    /// Shuts the channel down: closes the socket, releases every caller
    /// blocked on a response, and joins both worker threads. Idempotent
    /// and callable from any thread.
    pub fn close(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let _ = self.stream.shutdown(Shutdown::Both);
            self.responses.clear();
            let _ = self.events.send(None);
        }
        let recv_worker = self.recv_worker.lock().take();
        if let Some(worker) = recv_worker {
            let _ = worker.join();
        }
        let event_worker = self.event_worker.lock().take();
        if let Some(worker) = event_worker {
            let _ = worker.join();
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn empty_response() -> Value {
    Value::Object(serde_json::Map::new())
}

fn recv_loop(
    stream: &mut TcpStream,
    responses: &Mailbox<Value>,
    events: &Sender<Option<Value>>,
    running: &AtomicBool,
) {
    let mut buf = RecvBuffer::new(2);
    let mut depth: i64 = 0;
    // Bytes buffered from earlier chunks that belong to the current document.
    let mut pending: usize = 0;
    while running.load(Ordering::Relaxed) {
        let chunk: Vec<u8> = match buf.fill_from(stream) {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => chunk.to_vec(),
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(e) => {
                debug!("control recv failed: {}", e);
                break;
            }
        };
        let mut consumed = 0usize;
        for (i, &byte) in chunk.iter().enumerate() {
            // Depth counts every brace byte; the server does not put
            // braces inside string values on the control channel.
            match byte {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let doc_len = pending + i + 1 - consumed;
                        if let Some(doc) = buf.take(doc_len, 0) {
                            dispatch(&doc, responses, events);
                        }
                        pending = 0;
                        consumed = i + 1;
                    }
                }
                _ => {}
            }
        }
        pending += chunk.len() - consumed;
    }
}

fn dispatch(doc: &[u8], responses: &Mailbox<Value>, events: &Sender<Option<Value>>) {
    let value: Value = match serde_json::from_slice(doc) {
        Ok(value) => value,
        Err(e) => {
            debug!("discarding unparseable control message: {}", e);
            return;
        }
    };
    match value.get("ID").and_then(Value::as_u64) {
        Some(id) => {
            responses.add(value, id as u32);
        }
        None => {
            let _ = events.send(Some(value));
        }
    }
}

fn event_loop(rx: Receiver<Option<Value>>, handlers: EventHandlers, catalog: Arc<StreamCatalog>) {
    while let Ok(Some(event)) = rx.recv() {
        let function = event
            .get("function")
            .and_then(Value::as_str)
            .unwrap_or_default();
        match function {
            "dropped" => {
                if let (Some(handler), Some(id)) = (&handlers.on_dropped, int(&event, "streamID"))
                {
                    handler(id);
                }
            }
            "stale" => {
                let id = int(&event, "streamID");
                if let (Some(handler), Some(id)) = (&handlers.on_stale, id) {
                    handler(id);
                }
                if let Some(id) = id {
                    catalog.remove_source_everywhere(id);
                }
            }
            "subscriber" => {
                if let (Some(handler), Some(sender), Some(receiver)) = (
                    &handlers.on_subscriber,
                    int(&event, "senderID"),
                    int(&event, "receiverID"),
                ) {
                    handler(sender, receiver);
                }
            }
            "update" => {
                if let (Some(handler), Some(receiver), Some(stream)) = (
                    &handlers.on_update,
                    int(&event, "receiverID"),
                    int(&event, "streamID"),
                ) {
                    handler(receiver, stream);
                }
            }
            other => debug!("ignoring server callback {:?}", other),
        }
    }
}

fn int(event: &Value, field: &str) -> Option<i32> {
    event.get(field).and_then(Value::as_i64).map(|v| v as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Read;
    use std::net::{Ipv4Addr, TcpListener};

    /// Reads one brace-balanced document from the connection.
    fn read_doc(conn: &mut TcpStream) -> Value {
        let mut doc = Vec::new();
        let mut depth = 0i32;
        let mut byte = [0u8; 1];
        loop {
            conn.read_exact(&mut byte).unwrap();
            doc.push(byte[0]);
            match byte[0] {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return serde_json::from_slice(&doc).unwrap();
                    }
                }
                _ => {}
            }
        }
    }

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn correlates_responses_and_routes_events() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let command = read_doc(&mut conn);
            assert_eq!(command["function"], "ping");
            let id = command["ID"].as_u64().unwrap();
            // Event first, then the response split across two writes.
            conn.write_all(b"{\"function\":\"stale\",\"streamID\":9}")
                .unwrap();
            let response = format!("{{\"ID\":{},\"statusCode\":0,\"message\":\"ok\"}}", id);
            let (head, tail) = response.as_bytes().split_at(10);
            conn.write_all(head).unwrap();
            thread::sleep(Duration::from_millis(20));
            conn.write_all(tail).unwrap();
            // Hold the connection open until the client hangs up.
            let mut sink = [0u8; 16];
            while matches!(conn.read(&mut sink), Ok(n) if n > 0) {}
        });

        let (stale_tx, stale_rx) = unbounded();
        let handlers = EventHandlers {
            on_stale: Some(Box::new(move |id| {
                let _ = stale_tx.send(id);
            })),
            ..Default::default()
        };
        let catalog = Arc::new(StreamCatalog::new());
        let control = ControlChannel::connect(localhost(), port, handlers, catalog).unwrap();
        let id = control.reserve();
        let response = control.send_and_await(&json!({"function": "ping", "ID": id}), id);
        assert_eq!(response["statusCode"], 0);
        assert_eq!(stale_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 9);
        control.close();
        server.join().unwrap();
    }

    #[test]
    fn stale_event_purges_catalog_sources() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(b"{\"function\":\"stale\",\"streamID\":42}")
                .unwrap();
            let mut sink = [0u8; 16];
            while matches!(conn.read(&mut sink), Ok(n) if n > 0) {}
        });

        let catalog = Arc::new(StreamCatalog::new());
        let mut meta = crate::meta::StreamMeta {
            stream_id: 7,
            state: crate::state::RECV_UDP,
            mtu: 0,
            owner: String::new(),
            workspace: String::new(),
            meta: String::new(),
            types: Vec::new(),
            sources: Default::default(),
        };
        meta.sources.insert(42);
        catalog.insert(meta);

        let control = ControlChannel::connect(
            localhost(),
            port,
            EventHandlers::default(),
            Arc::clone(&catalog),
        )
        .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !catalog.sources(7).is_empty() {
            assert!(std::time::Instant::now() < deadline, "source never purged");
            thread::sleep(Duration::from_millis(10));
        }
        control.close();
        server.join().unwrap();
    }

    #[test]
    fn close_releases_blocked_callers() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            // Never answer; just drain until the client hangs up.
            let mut sink = [0u8; 64];
            while matches!(conn.read(&mut sink), Ok(n) if n > 0) {}
        });

        let catalog = Arc::new(StreamCatalog::new());
        let control = Arc::new(
            ControlChannel::connect(localhost(), port, EventHandlers::default(), catalog)
                .unwrap(),
        );
        let id = control.reserve();
        let waiter = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                control.send_and_await(&json!({"function": "noreply", "ID": id}), id)
            })
        };
        thread::sleep(Duration::from_millis(100));
        control.close();
        let response = waiter.join().unwrap();
        assert!(response.as_object().unwrap().is_empty());
        server.join().unwrap();
    }
}
