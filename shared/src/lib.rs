//! Protocol pieces shared by the gateway, the game hosts and clients

pub mod codec;
pub mod crypto;
pub mod proto;
pub mod relay;

pub use codec::{decode, encode, try_encode, DecodeError, EncodeError, Pack, Reader, Unpack, Writer};
pub use relay::{RelayFrame, StreamMetadata};

/// Largest payload a 16-bit length prefix can describe
pub const PACKET_LIMIT: usize = u16::MAX as usize;

/// First message id forwarded to game hosts; lower ids stay on the gateway
pub const RELAY_MESSAGE_BEGIN: i16 = 1000;

/// Size of the length prefix in front of every client-gateway frame
pub const FRAME_HEADER_LEN: usize = 2;

/// Prepends the 16-bit big-endian length to a payload.
///
/// Returns `None` when the payload cannot be described by the prefix.
pub fn frame(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() > PACKET_LIMIT {
        return None;
    }
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    Some(out)
}
