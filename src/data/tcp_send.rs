//! TCP sender channel.
//!
//! Each sender stream owns its own connection to the relay; one shared
//! worker thread drains the frame queue and writes complete frames with
//! `write_all`, so concurrent streams never interleave partial frames.
//! Write failures are logged and the frame dropped; the relay notices
//! dead connections on its own.

use crate::error::Result;
use crate::stream_map::StreamMap;
use crate::wire;
use crossbeam_channel::{unbounded, Sender};
use log::debug;
use std::io::Write;
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct TcpSender {
    server_ip: IpAddr,
    streams: StreamMap<Arc<TcpStream>>,
    queue: Option<Sender<(Arc<TcpStream>, Vec<u8>)>>,
    worker: Option<JoinHandle<()>>,
}

impl TcpSender {
    pub fn new(server_ip: IpAddr) -> Result<Self> {
        let (queue, rx) = unbounded::<(Arc<TcpStream>, Vec<u8>)>();
        let worker = thread::Builder::new()
            .name("tcp-send".to_string())
            .spawn(move || {
                while let Ok((stream, frame)) = rx.recv() {
                    if let Err(e) = (&*stream).write_all(&frame) {
                        debug!("tcp send failed: {}", e);
                    }
                }
            })?;
        Ok(TcpSender {
            server_ip,
            streams: StreamMap::new(),
            queue: Some(queue),
            worker: Some(worker),
        })
    }

    /// Connects to the relay port assigned to the stream and registers
    /// it. A repeated id leaves the existing connection in place.
    pub fn add_stream(&self, id: i32, port: u16) -> Result<()> {
        if self.streams.slot_of(id).is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect(SocketAddr::new(self.server_ip, port))?;
        self.streams.add(id, Arc::new(stream));
        Ok(())
    }

    pub fn remove_stream(&self, id: i32) {
        if let Some(stream) = self.streams.remove_id(id) {
            let _ = stream.shutdown(Shutdown::Both);
        }
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
        let stream = match self.streams.with(slot, Arc::clone) {
            Some(stream) => stream,
            None => return false,
        };
        let frame = wire::encode_frame(id, federation_id, payload, header, server_check);
        match &self.queue {
            Some(queue) => queue.send((stream, frame)).is_ok(),
            None => false,
        }
    }
}

impl Drop for TcpSender {
    fn drop(&mut self) {
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        for id in self.streams.ids() {
            self.remove_stream(id);
        }
    }
}
