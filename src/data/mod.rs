//! Data-plane transport channels.
//!
//! One channel exists per enabled transport/direction pair and owns
//! every stream of that kind. Senders share one background thread that
//! drains a frame queue; receivers run one thread per stream. All
//! receive loops use a one-second socket timeout so a raised stop flag
//! is observed within bounded time.

mod tcp_recv;
mod tcp_send;
mod udp_recv;
mod udp_send;

pub use tcp_recv::TcpReceiver;
pub use tcp_send::TcpSender;
pub use udp_recv::UdpReceiver;
pub use udp_send::UdpSender;

use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Invoked on the receive thread for every frame that arrives on a
/// receiver stream. Arguments: receiver stream id, source stream id,
/// header bytes, payload bytes.
pub type RecvCallback = Arc<dyn Fn(i32, i32, &[u8], &[u8]) + Send + Sync>;

/// Socket read timeout bounding shutdown latency of receive loops.
pub(crate) const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest datagram the relay will hand us.
pub(crate) const RECV_BUFFER_SIZE: usize = 65535;

pub(crate) fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// A transport/direction channel. WebSocket slots exist in the protocol
/// but are not implemented by this client; every operation on them
/// reports that uniformly.
pub enum DataChannel {
    UdpSend(UdpSender),
    UdpRecv(UdpReceiver),
    TcpSend(TcpSender),
    TcpRecv(TcpReceiver),
    Ws,
}

impl DataChannel {
    /// Registers a stream with the channel. For receivers this connects
    /// the socket, sends the hello frame, and starts the receive thread.
    pub fn add_stream(&self, id: i32, port: u16) -> Result<()> {
        match self {
            DataChannel::UdpSend(ch) => {
                ch.add_stream(id, port);
                Ok(())
            }
            DataChannel::UdpRecv(ch) => ch.add_stream(id, port),
            DataChannel::TcpSend(ch) => ch.add_stream(id, port),
            DataChannel::TcpRecv(ch) => ch.add_stream(id, port),
            DataChannel::Ws => Err(Error::NotImplemented("ws")),
        }
    }

    /// Drops a stream, closing its socket and joining its thread.
    pub fn remove_stream(&self, id: i32) -> Result<()> {
        match self {
            DataChannel::UdpSend(ch) => {
                ch.remove_stream(id);
                Ok(())
            }
            DataChannel::UdpRecv(ch) => {
                ch.remove_stream(id);
                Ok(())
            }
            DataChannel::TcpSend(ch) => {
                ch.remove_stream(id);
                Ok(())
            }
            DataChannel::TcpRecv(ch) => {
                ch.remove_stream(id);
                Ok(())
            }
            DataChannel::Ws => Err(Error::NotImplemented("ws")),
        }
    }

    /// Slot handle for a stream, usable with [`DataChannel::send`] and
    /// [`DataChannel::set_callback`].
    pub fn stream_ref(&self, id: i32) -> Option<usize> {
        match self {
            DataChannel::UdpSend(ch) => ch.stream_ref(id),
            DataChannel::UdpRecv(ch) => ch.stream_ref(id),
            DataChannel::TcpSend(ch) => ch.stream_ref(id),
            DataChannel::TcpRecv(ch) => ch.stream_ref(id),
            DataChannel::Ws => None,
        }
    }

    /// Queues a frame on a sender stream. Returns `Ok(false)` when the
    /// slot no longer belongs to `id`.
    pub fn send(
        &self,
        slot: usize,
        id: i32,
        federation_id: i32,
        payload: &[u8],
        header: &[u8],
        server_check: bool,
    ) -> Result<bool> {
        match self {
            DataChannel::UdpSend(ch) => {
                Ok(ch.send(slot, id, federation_id, payload, header, server_check))
            }
            DataChannel::TcpSend(ch) => {
                Ok(ch.send(slot, id, federation_id, payload, header, server_check))
            }
            DataChannel::Ws => Err(Error::NotImplemented("ws")),
            _ => Err(Error::State("stream is not a sender".into())),
        }
    }

    /// Installs the receive callback for a receiver stream.
    pub fn set_callback(&self, slot: usize, id: i32, callback: RecvCallback) -> Result<bool> {
        match self {
            DataChannel::UdpRecv(ch) => Ok(ch.set_callback(slot, id, callback)),
            DataChannel::TcpRecv(ch) => Ok(ch.set_callback(slot, id, callback)),
            DataChannel::Ws => Err(Error::NotImplemented("ws")),
            _ => Err(Error::State("stream is not a receiver".into())),
        }
    }
}
