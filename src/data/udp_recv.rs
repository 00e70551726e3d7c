//! UDP receiver channel.
//!
//! Each receiver stream binds its own ephemeral socket and announces
//! itself to the relay with an empty hello frame; the relay learns the
//! return address from that datagram and targets it from then on. One
//! thread per stream blocks in `recv_from` with a timeout and hands
//! decoded frames to the stream's callback. Malformed datagrams are
//! dropped without notice.

use super::{is_timeout, RecvCallback, RECV_BUFFER_SIZE, RECV_TIMEOUT};
use crate::error::Result;
use crate::stream_map::StreamMap;
use crate::wire;
use log::debug;
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct StreamEntry {
    stop: Arc<AtomicBool>,
    callback: Arc<Mutex<Option<RecvCallback>>>,
    worker: Option<JoinHandle<()>>,
}

pub struct UdpReceiver {
    server_ip: IpAddr,
    streams: StreamMap<StreamEntry>,
}

impl UdpReceiver {
    pub fn new(server_ip: IpAddr) -> Self {
        UdpReceiver {
            server_ip,
            streams: StreamMap::new(),
        }
    }

    /// Binds a socket for the stream, sends the hello frame, and starts
    /// its receive thread. A repeated id is left untouched.
    pub fn add_stream(&self, id: i32, port: u16) -> Result<()> {
        if self.streams.slot_of(id).is_some() {
            return Ok(());
        }
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let stop = Arc::new(AtomicBool::new(false));
        let callback: Arc<Mutex<Option<RecvCallback>>> = Arc::new(Mutex::new(None));
        let server = SocketAddr::new(self.server_ip, port);
        let worker = {
            let stop = Arc::clone(&stop);
            let callback = Arc::clone(&callback);
            thread::Builder::new()
                .name(format!("udp-recv-{}", id))
                .spawn(move || recv_loop(id, socket, server, stop, callback))?
        };
        self.streams.add(
            id,
            StreamEntry {
                stop,
                callback,
                worker: Some(worker),
            },
        );
        Ok(())
    }

    /// Stops the stream's thread and drops its socket. Returns once the
    /// thread has exited, which the read timeout bounds.
    pub fn remove_stream(&self, id: i32) {
        let slot = match self.streams.slot_of(id) {
            Some(slot) => slot,
            None => return,
        };
        let worker = self
            .streams
            .with_mut(slot, |entry| {
                entry.stop.store(true, Ordering::Relaxed);
                entry.worker.take()
            })
            .flatten();
        // Join with the map lock released.
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

impl Drop for UdpReceiver {
    fn drop(&mut self) {
        for id in self.streams.ids() {
            self.remove_stream(id);
        }
    }
}

fn recv_loop(
    id: i32,
    socket: UdpSocket,
    server: SocketAddr,
    stop: Arc<AtomicBool>,
    callback: Arc<Mutex<Option<RecvCallback>>>,
) {
    let hello = wire::encode_frame(id, 0, &[], &[], false);
    if let Err(e) = socket.send_to(&hello, server) {
        debug!("stream {}: hello to {} failed: {}", id, server, e);
    }
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    while !stop.load(Ordering::Relaxed) {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _)) => len,
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => {
                debug!("stream {}: udp recv failed: {}", id, e);
                continue;
            }
        };
        let frame = match wire::decode_udp_frame(&buf[..len]) {
            Some(frame) => frame,
            None => continue,
        };
        let handler = callback.lock().clone();
        if let Some(handler) = handler {
            handler(id, frame.sender_id, frame.header, frame.payload);
        }
    }
}
