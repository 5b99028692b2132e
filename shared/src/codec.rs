//! Field-by-field payload codec used inside client-gateway frames
//!
//! Every encoded unit starts with a 16-bit signed message id followed by the
//! message body. Bodies are written in declaration order using big-endian
//! fixed-width integers and floats, and 16-bit length-prefixed strings and
//! byte arrays. There is no self-description on the wire: both ends must agree
//! on the field order of each message id.

use bytes::{Buf, BufMut, BytesMut};
use log::warn;
use thiserror::Error;

/// Errors produced while pulling typed fields out of a payload
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("read of {needed} bytes overruns payload ({remaining} remaining)")]
    Overrun { needed: usize, remaining: usize },
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
}

/// Errors produced while writing a unit
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("field of {len} bytes does not fit its 16-bit length prefix")]
    FieldTooLong { len: usize },
}

/// Types that know how to write themselves into a [`Writer`]
pub trait Pack {
    fn pack(&self, writer: &mut Writer);
}

/// Types that know how to read themselves back from a [`Reader`]
pub trait Unpack: Sized {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, DecodeError>;
}

/// Growable output buffer for one encoded unit
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
    oversized: Option<usize>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    /// Writes a u16 length prefix followed by the raw bytes.
    ///
    /// A field past `u16::MAX` bytes is truncated and remembered, so
    /// [`Writer::finish`] rejects the unit.
    pub fn write_bytes(&mut self, v: &[u8]) {
        let len = v.len().min(u16::MAX as usize);
        if len < v.len() {
            warn!("truncating {} byte field to {} bytes", v.len(), len);
            self.oversized.get_or_insert(v.len());
        }
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&v[..len]);
    }

    pub fn write_string(&mut self, v: &str) {
        self.write_bytes(v.as_bytes());
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    /// Like [`Writer::into_vec`], but fails if any field was truncated
    pub fn finish(self) -> Result<Vec<u8>, EncodeError> {
        match self.oversized {
            Some(len) => Err(EncodeError::FieldTooLong { len }),
            None => Ok(self.into_vec()),
        }
    }
}

/// Cursor over a received payload
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Bytes not consumed yet
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    fn ensure(&self, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Overrun {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32())
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.ensure(8)?;
        Ok(self.buf.get_f64())
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_u16()? as usize;
        self.ensure(len)?;
        let out = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(out)
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let raw = self.read_bytes()?;
        String::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)
    }
}

/// Encodes a message id and an optional body into one unit.
///
/// With no body only the two-byte id header is emitted, which is how
/// zero-payload acks go out.
pub fn encode<T: Pack + ?Sized>(message_id: i16, body: Option<&T>) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.write_i16(message_id);
    if let Some(body) = body {
        body.pack(&mut writer);
    }
    writer.into_vec()
}

/// Encodes like [`encode`], failing instead of truncating oversized fields
pub fn try_encode<T: Pack + ?Sized>(
    message_id: i16,
    body: Option<&T>,
) -> Result<Vec<u8>, EncodeError> {
    let mut writer = Writer::new();
    writer.write_i16(message_id);
    if let Some(body) = body {
        body.pack(&mut writer);
    }
    writer.finish()
}

/// Reads the leading message id and hands back a cursor over the body
pub fn decode(bytes: &[u8]) -> Result<(i16, Reader<'_>), DecodeError> {
    let mut reader = Reader::new(bytes);
    let message_id = reader.read_i16()?;
    Ok((message_id, reader))
}
