//! Stream state bitmask.
//!
//! Each stream is described by a transport (UDP, TCP, WS) crossed with a
//! direction (send, receive). A concrete stream holds exactly one bit;
//! unions of bits are used for filtering and for the set of transports a
//! session enables.

pub const NONE: u32 = 0;
pub const SEND_UDP: u32 = 1 << 0;
pub const RECV_UDP: u32 = 1 << 1;
pub const SEND_TCP: u32 = 1 << 2;
pub const RECV_TCP: u32 = 1 << 3;
pub const SEND_WS: u32 = 1 << 4;
pub const RECV_WS: u32 = 1 << 5;

pub const UDP: u32 = SEND_UDP | RECV_UDP;
pub const TCP: u32 = SEND_TCP | RECV_TCP;
pub const WS: u32 = SEND_WS | RECV_WS;
pub const SEND: u32 = SEND_UDP | SEND_TCP | SEND_WS;
pub const RECV: u32 = RECV_UDP | RECV_TCP | RECV_WS;
pub const ALL: u32 = SEND | RECV;

/// Number of concrete transport/direction combinations.
pub const BIT_COUNT: usize = 6;

/// True when `state` names exactly one transport/direction pair.
pub fn is_concrete(state: u32) -> bool {
    state != NONE && state & (state - 1) == 0 && state <= RECV_WS
}

/// Channel slot index for a concrete state.
pub fn bit_index(state: u32) -> Option<usize> {
    if is_concrete(state) {
        Some(state.trailing_zeros() as usize)
    } else {
        None
    }
}

/// Wire name of the transport for a concrete state.
pub fn proto_name(state: u32) -> Option<&'static str> {
    match state {
        SEND_UDP | RECV_UDP => Some("udp"),
        SEND_TCP | RECV_TCP => Some("tcp"),
        SEND_WS | RECV_WS => Some("ws"),
        _ => None,
    }
}

/// Concrete state for a wire transport name and direction, where
/// `sender` distinguishes the send side from the receive side.
/// Unknown names map to `NONE`.
pub fn from_proto(proto: &str, sender: bool) -> u32 {
    match (proto, sender) {
        ("udp", true) => SEND_UDP,
        ("udp", false) => RECV_UDP,
        ("tcp", true) => SEND_TCP,
        ("tcp", false) => RECV_TCP,
        ("ws", true) => SEND_WS,
        ("ws", false) => RECV_WS,
        _ => NONE,
    }
}
