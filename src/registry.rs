//! Stream bookkeeping for a session.
//!
//! [`StreamCatalog`] is the shared id-to-metadata map; the control
//! channel's event thread holds a reference so server-side stale
//! notices can purge dead sources. [`StreamRegistry`] pairs the catalog
//! with the six transport channel slots and keeps them consistent. The
//! catalog lock is always released before calling into a channel.

use crate::data::{DataChannel, TcpReceiver, TcpSender, UdpReceiver, UdpSender};
use crate::error::{Error, Result};
use crate::meta::StreamMeta;
use crate::state;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;

/// Metadata for every stream the session owns, keyed by stream id.
pub struct StreamCatalog {
    streams: Mutex<HashMap<i32, StreamMeta>>,
}

impl StreamCatalog {
    pub fn new() -> Self {
        StreamCatalog {
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, meta: StreamMeta) {
        self.streams.lock().insert(meta.stream_id, meta);
    }

    pub fn remove(&self, id: i32) -> Option<StreamMeta> {
        self.streams.lock().remove(&id)
    }

    pub fn get(&self, id: i32) -> Option<StreamMeta> {
        self.streams.lock().get(&id).cloned()
    }

    /// Transport/direction bit of the stream, or [`state::NONE`] when
    /// the stream is unknown.
    pub fn state_of(&self, id: i32) -> u32 {
        self.streams
            .lock()
            .get(&id)
            .map(|meta| meta.state)
            .unwrap_or(state::NONE)
    }

    pub fn is_type(&self, id: i32, mask: u32) -> bool {
        self.state_of(id) & mask != 0
    }

    pub fn ids(&self) -> Vec<i32> {
        self.streams.lock().keys().copied().collect()
    }

    pub fn sources(&self, id: i32) -> Vec<i32> {
        self.streams
            .lock()
            .get(&id)
            .map(|meta| meta.sources.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn add_source(&self, receiver_id: i32, source_id: i32) {
        if let Some(meta) = self.streams.lock().get_mut(&receiver_id) {
            meta.sources.insert(source_id);
        }
    }

    pub fn remove_source(&self, receiver_id: i32, source_id: i32) {
        if let Some(meta) = self.streams.lock().get_mut(&receiver_id) {
            meta.sources.remove(&source_id);
        }
    }

    /// Removes a dead sender from every receiver's source set. Invoked
    /// when the server reports the sender stale.
    pub fn remove_source_everywhere(&self, source_id: i32) {
        for meta in self.streams.lock().values_mut() {
            meta.sources.remove(&source_id);
        }
    }
}

impl Default for StreamCatalog {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StreamRegistry {
    catalog: std::sync::Arc<StreamCatalog>,
    channels: [Option<DataChannel>; state::BIT_COUNT],
}

impl StreamRegistry {
    /// Builds the registry, instantiating a channel for every enabled
    /// transport bit. WebSocket bits get the placeholder channel that
    /// rejects use.
    pub fn new(
        catalog: std::sync::Arc<StreamCatalog>,
        enabled: u32,
        server_ip: IpAddr,
    ) -> Result<Self> {
        let mut channels: [Option<DataChannel>; state::BIT_COUNT] =
            [None, None, None, None, None, None];
        for (bit, slot) in channels.iter_mut().enumerate() {
            let bit_state = 1u32 << bit;
            if enabled & bit_state == 0 {
                continue;
            }
            *slot = Some(match bit_state {
                state::SEND_UDP => DataChannel::UdpSend(UdpSender::new(server_ip)?),
                state::RECV_UDP => DataChannel::UdpRecv(UdpReceiver::new(server_ip)),
                state::SEND_TCP => DataChannel::TcpSend(TcpSender::new(server_ip)?),
                state::RECV_TCP => DataChannel::TcpRecv(TcpReceiver::new(server_ip)),
                _ => DataChannel::Ws,
            });
        }
        Ok(StreamRegistry { catalog, channels })
    }

    pub fn catalog(&self) -> &StreamCatalog {
        &self.catalog
    }

    /// Channel serving the given concrete transport/direction state.
    pub fn channel(&self, stream_state: u32) -> Result<&DataChannel> {
        let bit = state::bit_index(stream_state)
            .ok_or_else(|| Error::Value(format!("not a concrete stream state: {}", stream_state)))?;
        self.channels[bit]
            .as_ref()
            .ok_or_else(|| Error::State("transport not enabled for this session".into()))
    }

    /// Records the stream and registers it with its transport channel.
    pub fn add_stream(&self, meta: StreamMeta, port: u16) -> Result<()> {
        let channel = self.channel(meta.state)?;
        let id = meta.stream_id;
        self.catalog.insert(meta);
        if let Err(e) = channel.add_stream(id, port) {
            self.catalog.remove(id);
            return Err(e);
        }
        Ok(())
    }

    /// Forgets the stream and tears down its channel resources.
    pub fn remove_stream(&self, id: i32) {
        let meta = match self.catalog.remove(id) {
            Some(meta) => meta,
            None => return,
        };
        if let Ok(channel) = self.channel(meta.state) {
            let _ = channel.remove_stream(id);
        }
    }

    /// Removes every stream; used during session teardown.
    pub fn clear(&self) {
        for id in self.catalog.ids() {
            self.remove_stream(id);
        }
    }
}
