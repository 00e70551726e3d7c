//! TCP receiver channel.
//!
//! Each receiver stream connects to the relay port it was assigned,
//! announces itself with an empty hello frame, and reassembles the byte
//! stream into frames. Inbound frames carry a four-byte length prefix
//! (header and payload lengths), a four-byte source stream id, then the
//! header and payload bytes.

use super::{is_timeout, RecvCallback, RECV_TIMEOUT};
use crate::error::Result;
use crate::recv_buffer::RecvBuffer;
use crate::stream_map::StreamMap;
use crate::wire;
use log::debug;
use parking_lot::Mutex;
use std::io::Write;
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const SOURCE_ID_LEN: usize = 4;

struct StreamEntry {
    stream: Arc<TcpStream>,
    stop: Arc<AtomicBool>,
    callback: Arc<Mutex<Option<RecvCallback>>>,
    worker: Option<JoinHandle<()>>,
}

pub struct TcpReceiver {
    server_ip: IpAddr,
    streams: StreamMap<StreamEntry>,
}

impl TcpReceiver {
    pub fn new(server_ip: IpAddr) -> Self {
        TcpReceiver {
            server_ip,
            streams: StreamMap::new(),
        }
    }

    /// Connects the stream's socket, sends the hello frame, and starts
    /// its receive thread. A repeated id is left untouched.
    pub fn add_stream(&self, id: i32, port: u16) -> Result<()> {
        if self.streams.slot_of(id).is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect(SocketAddr::new(self.server_ip, port))?;
        stream.set_read_timeout(Some(RECV_TIMEOUT))?;
        let stream = Arc::new(stream);
        let stop = Arc::new(AtomicBool::new(false));
        let callback: Arc<Mutex<Option<RecvCallback>>> = Arc::new(Mutex::new(None));
        let worker = {
            let stream = Arc::clone(&stream);
            let stop = Arc::clone(&stop);
            let callback = Arc::clone(&callback);
            thread::Builder::new()
                .name(format!("tcp-recv-{}", id))
                .spawn(move || recv_loop(id, stream, stop, callback))?
        };
        self.streams.add(
            id,
            StreamEntry {
                stream,
                stop,
                callback,
                worker: Some(worker),
            },
        );
        Ok(())
    }

    /// Stops the stream's thread, shutting the socket down so a blocked
    /// read returns immediately, and joins it.
    pub fn remove_stream(&self, id: i32) {
        let slot = match self.streams.slot_of(id) {
            Some(slot) => slot,
            None => return,
        };
        let worker = self
            .streams
            .with_mut(slot, |entry| {
                entry.stop.store(true, Ordering::Relaxed);
                let _ = entry.stream.shutdown(Shutdown::Both);
                entry.worker.take()
            })
            .flatten();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
        self.streams.remove_id(id);
    }

    pub fn stream_ref(&self, id: i32) -> Option<usize> {
        self.streams.slot_of(id)
    }

    /// Installs the callback invoked for every frame on this stream.
    /// Returns false when `slot` no longer belongs to `id`.
    pub fn set_callback(&self, slot: usize, id: i32, callback: RecvCallback) -> bool {
        if self.streams.id_at(slot) != Some(id) {
            return false;
        }
        self.streams
            .with(slot, |entry| *entry.callback.lock() = Some(callback))
            .is_some()
    }
}

impl Drop for TcpReceiver {
    fn drop(&mut self) {
        for id in self.streams.ids() {
            self.remove_stream(id);
        }
    }
}

fn recv_loop(
    id: i32,
    stream: Arc<TcpStream>,
    stop: Arc<AtomicBool>,
    callback: Arc<Mutex<Option<RecvCallback>>>,
) {
    let hello = wire::encode_frame(id, 0, &[], &[], false);
    if let Err(e) = (&*stream).write_all(&hello) {
        debug!("stream {}: hello failed: {}", id, e);
        return;
    }
    let mut buf = RecvBuffer::new(2);
    // Declared lengths of the frame currently being reassembled.
    let mut pending: Option<(usize, usize)> = None;
    while !stop.load(Ordering::Relaxed) {
        if pending.is_none() && buf.available() > 4 {
            if let Some(prefix) = buf.take(4, 0) {
                let (header_len, payload_len, _) = wire::read_lengths(&prefix);
                pending = Some((header_len, payload_len));
            }
        }
        if let Some((header_len, payload_len)) = pending {
            if buf.available() >= SOURCE_ID_LEN + header_len + payload_len {
                let source = buf.take(SOURCE_ID_LEN, 0);
                let body = buf.take(header_len + payload_len, 0);
                if let (Some(source), Some(body)) = (source, body) {
                    let sender_id =
                        i32::from_le_bytes([source[0], source[1], source[2], source[3]]);
                    let handler = callback.lock().clone();
                    if let Some(handler) = handler {
                        handler(id, sender_id, &body[..header_len], &body[header_len..]);
                    }
                }
                pending = None;
                continue;
            }
        }
        let mut reader = &*stream;
        match buf.fill_from(&mut reader) {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(_) => {}
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => {
                debug!("stream {}: tcp recv failed: {}", id, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::io::Read;
    use std::net::{Ipv4Addr, TcpListener};
    use std::time::Duration;

    /// Relay stand-in: accepts the stream connection, checks the hello,
    /// then writes the given inbound frames in the given chunk sizes.
    fn relay_push(frames: Vec<u8>, chunk: usize) -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut hello = [0u8; wire::PREFIX_LEN];
            conn.read_exact(&mut hello).unwrap();
            assert!(wire::decode_frame(&hello).is_some());
            // Give the test time to install its callback.
            thread::sleep(Duration::from_millis(200));
            for piece in frames.chunks(chunk) {
                conn.write_all(piece).unwrap();
                thread::sleep(Duration::from_millis(5));
            }
            // Hold the connection open until the peer goes away.
            let mut sink = [0u8; 16];
            while matches!(conn.read(&mut sink), Ok(n) if n > 0) {}
        });
        (port, handle)
    }

    fn inbound_frame(source: i32, header: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.push(header.len() as u8);
        frame.push((header.len() >> 8) as u8);
        frame.push(payload.len() as u8);
        frame.push((payload.len() >> 8) as u8);
        frame.extend_from_slice(&source.to_le_bytes());
        frame.extend_from_slice(header);
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn reassembles_frames_split_across_reads() {
        let mut bytes = inbound_frame(11, b"h1", b"first message");
        bytes.extend(inbound_frame(12, &[], b"second"));
        let (port, relay) = relay_push(bytes, 3);

        let receiver = TcpReceiver::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        receiver.add_stream(60, port).unwrap();
        let slot = receiver.stream_ref(60).unwrap();
        let (tx, rx) = unbounded();
        assert!(receiver.set_callback(
            slot,
            60,
            Arc::new(move |stream, source, header, payload| {
                let _ = tx.send((stream, source, header.to_vec(), payload.to_vec()));
            }),
        ));

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, (60, 11, b"h1".to_vec(), b"first message".to_vec()));
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second, (60, 12, Vec::new(), b"second".to_vec()));

        receiver.remove_stream(60);
        relay.join().unwrap();
    }

    #[test]
    fn remove_stream_unblocks_pending_read() {
        let (port, relay) = relay_push(Vec::new(), 1);
        let receiver = TcpReceiver::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        receiver.add_stream(61, port).unwrap();
        let started = std::time::Instant::now();
        receiver.remove_stream(61);
        assert!(started.elapsed() < Duration::from_secs(3));
        relay.join().unwrap();
    }
}
