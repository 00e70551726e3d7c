//! Per-stream metadata records.

use crate::state;
use std::collections::HashSet;

/// Everything the client tracks about one of its own streams.
#[derive(Debug, Clone)]
pub struct StreamMeta {
    /// Server-assigned stream id.
    pub stream_id: i32,
    /// Concrete transport/direction bit, see [`crate::state`].
    pub state: u32,
    /// Largest payload the relay accepts for this stream.
    pub mtu: i32,
    /// Username that created the stream.
    pub owner: String,
    pub workspace: String,
    /// Free-form metadata string registered with the server.
    pub meta: String,
    /// Data type tags; senders carry one, receivers may filter on many.
    pub types: Vec<String>,
    /// For receivers, ids of the sender streams currently feeding it.
    pub sources: HashSet<i32>,
}

impl StreamMeta {
    /// Channel slot index for this stream's transport/direction.
    pub fn bit_index(&self) -> Option<usize> {
        state::bit_index(self.state)
    }

    pub fn is_sender(&self) -> bool {
        self.state & state::SEND != 0
    }

    pub fn is_receiver(&self) -> bool {
        self.state & state::RECV != 0
    }
}
