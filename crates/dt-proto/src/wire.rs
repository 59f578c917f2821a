//! Binary framing.
//!
//! Frame layout:
//!
//! ```text
//! MAGIC(4) || VERSION(2) || LENGTH(4) || PAYLOAD(LENGTH)
//! ```
//!
//! * MAGIC is `"DTSM"`.
//! * VERSION and LENGTH are big-endian.
//! * PAYLOAD is the CBOR encoding of one [`Message`].
//!
//! Encoding always copies into a fresh buffer, so a sent message never
//! aliases the sender's state.

use serde::{de::DeserializeOwned, Serialize};

use crate::{Message, ProtoError, ProtoResult};

/// Frame magic, `"DTSM"`.
pub const MAGIC: [u8; 4] = *b"DTSM";
/// Wire protocol version.
pub const VERSION: u16 = 1;
/// Header bytes preceding every payload.
pub const HEADER_LEN: usize = 10;
/// Largest payload accepted.  A full inline road graph for a city fits well
/// inside this.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// CBOR-encode any serialisable value.
pub fn to_cbor<T: Serialize>(value: &T) -> ProtoResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| ProtoError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode a CBOR value.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtoResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtoError::Decode(e.to_string()))
}

/// Build the header for a payload of `len` bytes.
pub fn header(len: usize) -> ProtoResult<[u8; HEADER_LEN]> {
    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(len));
    }
    let mut h = [0u8; HEADER_LEN];
    h[0..4].copy_from_slice(&MAGIC);
    h[4..6].copy_from_slice(&VERSION.to_be_bytes());
    h[6..10].copy_from_slice(&(len as u32).to_be_bytes());
    Ok(h)
}

/// Validate a header and return the payload length it announces.
pub fn payload_len(h: &[u8; HEADER_LEN]) -> ProtoResult<usize> {
    let magic = [h[0], h[1], h[2], h[3]];
    if magic != MAGIC {
        return Err(ProtoError::BadMagic(magic));
    }
    let version = u16::from_be_bytes([h[4], h[5]]);
    if version != VERSION {
        return Err(ProtoError::UnsupportedVersion(version));
    }
    let len = u32::from_be_bytes([h[6], h[7], h[8], h[9]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(len));
    }
    Ok(len)
}

/// Encode `msg` into a complete frame.
pub fn encode_frame(msg: &Message) -> ProtoResult<Vec<u8>> {
    let payload = to_cbor(msg)?;
    let h = header(payload.len())?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&h);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode one frame from the front of `bytes`.
///
/// Returns `Ok(None)` when `bytes` does not yet hold a whole frame, and the
/// message plus the bytes consumed otherwise.
pub fn decode_frame(bytes: &[u8]) -> ProtoResult<Option<(Message, usize)>> {
    if bytes.len() < HEADER_LEN {
        return Ok(None);
    }
    let mut h = [0u8; HEADER_LEN];
    h.copy_from_slice(&bytes[..HEADER_LEN]);
    let len = payload_len(&h)?;
    if bytes.len() < HEADER_LEN + len {
        return Ok(None);
    }
    let msg = from_cbor(&bytes[HEADER_LEN..HEADER_LEN + len])?;
    Ok(Some((msg, HEADER_LEN + len)))
}
