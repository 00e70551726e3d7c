//! Data-plane frame layout.
//!
//! Frames sent to the relay carry an 8-byte prefix, then the user header,
//! then the payload:
//!
//! ```text
//! offset  size  field
//! 0       2     header length, little-endian; top bit is the
//!               server-check flag, so the usable range is 0..=32767
//! 2       2     payload length, little-endian
//! 4       2     stream id, little-endian
//! 6       2     federation id, little-endian
//! 8       ...   header bytes, then payload bytes
//! ```
//!
//! Datagrams received from the relay replace the id fields with a 4-byte
//! little-endian sender stream id. All fields are packed byte by byte;
//! nothing here depends on host byte order or struct layout.

/// Bytes before the header in every frame.
pub const PREFIX_LEN: usize = 8;

/// Mask clearing the server-check flag from the declared header length.
pub const HEADER_LEN_MASK: u16 = 0x7FFF;

/// Builds an outbound frame. Header and payload lengths must fit in
/// `HEADER_LEN_MASK` and `u16` respectively; the relay enforces the same
/// limits, so callers validate before reaching this point.
pub fn encode_frame(
    stream_id: i32,
    federation_id: i32,
    payload: &[u8],
    header: &[u8],
    server_check: bool,
) -> Vec<u8> {
    let header_len = header.len();
    let payload_len = payload.len();
    let mut frame = Vec::with_capacity(PREFIX_LEN + header_len + payload_len);
    frame.push(header_len as u8);
    frame.push(((header_len >> 8) as u8 & 0x7F) | if server_check { 0x80 } else { 0 });
    frame.push(payload_len as u8);
    frame.push((payload_len >> 8) as u8);
    frame.push(stream_id as u8);
    frame.push((stream_id >> 8) as u8);
    frame.push(federation_id as u8);
    frame.push((federation_id >> 8) as u8);
    frame.extend_from_slice(header);
    frame.extend_from_slice(payload);
    frame
}

/// Declared lengths from the first four bytes of a frame: masked header
/// length, payload length, and the server-check flag. `prefix` must hold
/// at least four bytes.
pub fn read_lengths(prefix: &[u8]) -> (usize, usize, bool) {
    let raw_header = prefix[0] as u16 | (prefix[1] as u16) << 8;
    let payload = prefix[2] as usize | (prefix[3] as usize) << 8;
    (
        (raw_header & HEADER_LEN_MASK) as usize,
        payload,
        raw_header & !HEADER_LEN_MASK != 0,
    )
}

/// A decoded outbound-format frame, used when reading back frames the
/// client itself produced.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub stream_id: i32,
    pub federation_id: i32,
    pub server_check: bool,
    pub header: &'a [u8],
    pub payload: &'a [u8],
}

/// Decodes a complete outbound-format frame. Returns `None` when the
/// declared lengths disagree with the buffer size.
pub fn decode_frame(buffer: &[u8]) -> Option<Frame<'_>> {
    if buffer.len() < PREFIX_LEN {
        return None;
    }
    let (header_len, payload_len, server_check) = read_lengths(buffer);
    if header_len + payload_len + PREFIX_LEN != buffer.len() {
        return None;
    }
    let stream_id = (buffer[4] as i32) | (buffer[5] as i32) << 8;
    let federation_id = (buffer[6] as i32) | (buffer[7] as i32) << 8;
    let header = &buffer[PREFIX_LEN..PREFIX_LEN + header_len];
    let payload = &buffer[PREFIX_LEN + header_len..];
    Some(Frame {
        stream_id,
        federation_id,
        server_check,
        header,
        payload,
    })
}

/// A decoded datagram from the relay.
#[derive(Debug, PartialEq, Eq)]
pub struct UdpFrame<'a> {
    pub sender_id: i32,
    pub server_check: bool,
    pub header: &'a [u8],
    pub payload: &'a [u8],
}

/// Decodes a relay datagram. Returns `None` when the datagram is shorter
/// than the prefix or the declared lengths disagree with its size;
/// malformed datagrams are dropped by the caller without further notice.
pub fn decode_udp_frame(datagram: &[u8]) -> Option<UdpFrame<'_>> {
    if datagram.len() < PREFIX_LEN {
        return None;
    }
    let (header_len, payload_len, server_check) = read_lengths(datagram);
    if header_len + payload_len + PREFIX_LEN != datagram.len() {
        return None;
    }
    let sender_id = i32::from_le_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]);
    let header = &datagram[PREFIX_LEN..PREFIX_LEN + header_len];
    let payload = &datagram[PREFIX_LEN + header_len..];
    Some(UdpFrame {
        sender_id,
        server_check,
        header,
        payload,
    })
}
