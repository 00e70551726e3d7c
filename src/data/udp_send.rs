//! UDP sender channel.
//!
//! All UDP sender streams share one unbound socket and one worker
//! thread. Callers enqueue encoded frames; the worker drains the queue
//! and fires datagrams at the relay port assigned to each stream. Send
//! failures are logged and dropped, matching UDP delivery semantics.

use crate::error::Result;
use crate::stream_map::StreamMap;
use crate::wire;
use crossbeam_channel::{unbounded, Sender};
use log::debug;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::thread::{self, JoinHandle};

pub struct UdpSender {
    server_ip: IpAddr,
    streams: StreamMap<u16>,
    queue: Option<Sender<(SocketAddr, Vec<u8>)>>,
    worker: Option<JoinHandle<()>>,
}

impl UdpSender {
    pub fn new(server_ip: IpAddr) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        let (queue, rx) = unbounded::<(SocketAddr, Vec<u8>)>();
        let worker = thread::Builder::new()
            .name("udp-send".to_string())
            .spawn(move || {
                while let Ok((addr, frame)) = rx.recv() {
                    if let Err(e) = socket.send_to(&frame, addr) {
                        debug!("udp send to {} failed: {}", addr, e);
                    }
                }
            })?;
        Ok(UdpSender {
            server_ip,
            streams: StreamMap::new(),
            queue: Some(queue),
            worker: Some(worker),
        })
    }

    /// Registers a sender stream with its relay-assigned port.
    /// A repeated id leaves the existing registration in place.
    pub fn add_stream(&self, id: i32, port: u16) {
        self.streams.add(id, port);
    }

    pub fn remove_stream(&self, id: i32) {
        self.streams.remove_id(id);
    }

    pub fn stream_ref(&self, id: i32) -> Option<usize> {
        self.streams.slot_of(id)
    }

    /// Encodes and queues one frame. Returns false when `slot` no longer
    /// belongs to `id` or the channel is shutting down.
    pub fn send(
        &self,
        slot: usize,
        id: i32,
        federation_id: i32,
        payload: &[u8],
        header: &[u8],
        server_check: bool,
    ) -> bool {
        if self.streams.id_at(slot) != Some(id) {
            return false;
        }
        let port = match self.streams.with(slot, |port| *port) {
            Some(port) => port,
            None => return false,
        };
        let frame = wire::encode_frame(id, federation_id, payload, header, server_check);
        match &self.queue {
            Some(queue) => queue
                .send((SocketAddr::new(self.server_ip, port), frame))
                .is_ok(),
            None => false,
        }
    }
}

impl Drop for UdpSender {
    fn drop(&mut self) {
        // Closing the queue ends the worker once it has drained.
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
